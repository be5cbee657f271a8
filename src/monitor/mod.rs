//! Change detectors attached to watched resources.
//!
//! Every variant offers the same capabilities: `check`, `consume_update`,
//! `serialize`, `deserialize` and `release`. The variant is recorded as a
//! [`MonitorKind`] tag string, which the store uses to route each monitor's
//! record to its own table.

mod diff;
mod etag;
mod probe;

pub use diff::unified_diff;
pub use etag::ETagMonitor;
pub use probe::{
    ConditionalRequest, HttpProbe, ProbeResponse, ReqwestProbe, ReqwestProbeBuilder, http_date,
    parse_http_date,
};

use crate::graph::TenantId;
use std::fmt;
use std::path::{Path, PathBuf};

/// Which change detector a resource uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonitorKind {
    /// Conditional GET with `ETag` / `If-Modified-Since`
    ETag,
}

impl MonitorKind {
    /// Every kind, in table order.
    pub const ALL: [MonitorKind; 1] = [MonitorKind::ETag];

    /// Persistence tag.
    pub fn tag(self) -> &'static str {
        match self {
            MonitorKind::ETag => ETagMonitor::KIND,
        }
    }

    /// Resolve a persistence tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Column names of the kind's record, after the leading url column.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            MonitorKind::ETag => &ETagMonitor::COLUMNS,
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Result of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The resource is unchanged (or answered 304).
    Unchanged,
    /// A change was recorded and is pending.
    Changed,
    /// The probe failed; nothing was modified.
    Failed,
}

/// A consumed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Unified diff against the previous content, if there was any.
    ///
    /// `None` still means the resource changed; there was just nothing to
    /// diff against.
    pub diff: Option<String>,
}

/// A change detector.
#[derive(Debug, Clone)]
pub enum Monitor {
    /// See [`ETagMonitor`].
    ETag(ETagMonitor),
}

impl Monitor {
    /// Fresh monitor state for a resource. No network I/O.
    pub fn new(kind: MonitorKind, url: &str, name: &str, tenant: TenantId, cache_root: &Path) -> Self {
        match kind {
            MonitorKind::ETag => {
                Monitor::ETag(ETagMonitor::new(url, cache_path(cache_root, kind, tenant, name)))
            }
        }
    }

    /// The variant tag.
    pub fn kind(&self) -> MonitorKind {
        match self {
            Monitor::ETag(_) => MonitorKind::ETag,
        }
    }

    /// Establish a baseline right after the resource is first added.
    pub async fn prime(&mut self, probe: &dyn HttpProbe) {
        match self {
            Monitor::ETag(monitor) => monitor.prime(probe).await,
        }
    }

    /// Probe the resource. Never fails; failures come back as [`CheckOutcome::Failed`].
    pub async fn check(&mut self, probe: &dyn HttpProbe) -> CheckOutcome {
        match self {
            Monitor::ETag(monitor) => monitor.check(probe).await,
        }
    }

    /// Take the pending change; a second call without a new check returns `None`.
    pub fn consume_update(&mut self) -> Option<Update> {
        match self {
            Monitor::ETag(monitor) => monitor.consume_update(),
        }
    }

    /// Opaque persisted fields, in [`MonitorKind::columns`] order.
    pub fn serialize(&self) -> Vec<String> {
        match self {
            Monitor::ETag(monitor) => monitor.serialize(),
        }
    }

    /// Overwrite state from persisted fields.
    pub fn deserialize(&mut self, fields: &[&str]) -> std::result::Result<(), String> {
        match self {
            Monitor::ETag(monitor) => monitor.deserialize(fields),
        }
    }

    /// Free external resources. Called once, when the resource is removed.
    pub fn release(&mut self) {
        match self {
            Monitor::ETag(monitor) => monitor.release(),
        }
    }

    /// The ETag variant, if that is what this is.
    pub fn as_etag(&self) -> Option<&ETagMonitor> {
        match self {
            Monitor::ETag(monitor) => Some(monitor),
        }
    }
}

/// Cache file for a resource: `<root>/<kind>/<tenant>/<escaped name>.html`.
///
/// Distinct names always get distinct files, even on case-insensitive
/// filesystems: only `[a-z0-9_-]` is kept as is, every other byte of the
/// name is written as `%XX`.
pub fn cache_path(cache_root: &Path, kind: MonitorKind, tenant: TenantId, name: &str) -> PathBuf {
    let mut file = String::with_capacity(name.len() + ".html".len());
    for byte in name.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || matches!(byte, b'-' | b'_') {
            file.push(char::from(byte));
        } else {
            file.push_str(&format!("%{:02X}", byte));
        }
    }
    file.push_str(".html");

    cache_root.join(kind.tag()).join(tenant.to_string()).join(file)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{ConditionalRequest, HttpProbe, ProbeResponse};
    use crate::error::{Result, WatchError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records what was asked.
    pub struct ScriptedProbe {
        responses: Mutex<VecDeque<Result<ProbeResponse>>>,
        requests: Mutex<Vec<ConditionalRequest>>,
    }

    impl ScriptedProbe {
        pub fn new(responses: Vec<Result<ProbeResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ConditionalRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpProbe for ScriptedProbe {
        async fn fetch(&self, request: &ConditionalRequest) -> Result<ProbeResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(WatchError::Http("script exhausted".to_string())))
        }
    }
}
