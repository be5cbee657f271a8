//! Conditional-GET change detection driven by `ETag` / `Last-Modified`.

use super::diff::unified_diff;
use super::probe::{ConditionalRequest, HttpProbe};
use super::{CheckOutcome, Update};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Detects changes with conditional GETs and keeps the last body on disk.
///
/// The body is cached under a file named after the resource, so the next
/// change can be diffed against it even across restarts.
#[derive(Debug, Clone)]
pub struct ETagMonitor {
    url: String,
    cache_path: PathBuf,
    validator: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    pending: bool,
    diff: Option<String>,
    content: String,
}

impl ETagMonitor {
    /// Tag used for persistence routing.
    pub const KIND: &'static str = "ETagMonitor";

    /// Column names of the persisted record, after the leading url column.
    pub const COLUMNS: [&'static str; 4] = ["validator", "pending", "last_modified", "content"];

    /// Fresh state for `url`, reusing the cached body at `cache_path` if present.
    ///
    /// Performs no network I/O.
    pub fn new(url: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        let cache_path = cache_path.into();
        let content = match fs::read_to_string(&cache_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!(path = %cache_path.display(), error = %e, "cannot read cached content");
                String::new()
            }
        };

        Self {
            url: url.into(),
            cache_path,
            validator: None,
            last_modified: None,
            pending: false,
            diff: None,
            content,
        }
    }

    /// The watched url.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Where the cached body lives.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Last validator, verbatim as the server sent it.
    pub fn validator(&self) -> Option<&str> {
        self.validator.as_deref()
    }

    /// Timestamp sent as `If-Modified-Since`.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Whether a change is waiting to be consumed.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// The cached body.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Fetch the baseline body if none is cached yet.
    ///
    /// Any failure leaves the baseline empty; the next check then reports a
    /// change without a diff.
    pub async fn prime(&mut self, probe: &dyn HttpProbe) {
        if !self.content.is_empty() {
            return;
        }

        let response = match probe.fetch(&ConditionalRequest::unconditional(&self.url)).await {
            Ok(response) if response.status.is_success() => response,
            Ok(response) => {
                debug!(url = %self.url, status = %response.status, "no baseline");
                return;
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "no baseline");
                return;
            }
        };

        self.validator = response.etag;
        self.last_modified = Some(response.last_modified.unwrap_or_else(Utc::now));
        self.content = response.body;
        self.persist_content();
    }

    /// Probe the resource and record whether it changed.
    pub async fn check(&mut self, probe: &dyn HttpProbe) -> CheckOutcome {
        let request = ConditionalRequest {
            url: self.url.clone(),
            if_none_match: self.validator.clone(),
            if_modified_since: self.last_modified,
        };

        let response = match probe.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %self.url, error = %e, "check failed");
                return CheckOutcome::Failed;
            }
        };

        if !response.is_usable() {
            warn!(url = %self.url, status = %response.status, "check failed");
            return CheckOutcome::Failed;
        }

        // The first usable answer sets the baseline for later conditional checks.
        if self.validator.is_none() {
            self.validator = response.etag.clone();
        }
        if self.last_modified.is_none() {
            self.last_modified = Some(response.last_modified.unwrap_or_else(Utc::now));
        }

        if response.is_not_modified() {
            return CheckOutcome::Unchanged;
        }

        if let Some(tag) = response.etag {
            self.validator = Some(tag);
        }
        self.last_modified = Some(response.last_modified.unwrap_or_else(Utc::now));

        if response.body == self.content {
            debug!(url = %self.url, "full response with an identical body");
            return CheckOutcome::Unchanged;
        }

        let diff = if self.content.is_empty() {
            None
        } else {
            match unified_diff(&self.content, &response.body) {
                Some(diff) => Some(diff),
                None => {
                    debug!(url = %self.url, "only line endings changed");
                    self.content = response.body;
                    self.persist_content();
                    return CheckOutcome::Unchanged;
                }
            }
        };

        info!(url = %self.url, "update detected");
        self.pending = true;
        self.diff = diff;
        self.content = response.body;
        self.persist_content();

        CheckOutcome::Changed
    }

    /// Take the pending change, if any. Always clears the pending flag.
    pub fn consume_update(&mut self) -> Option<Update> {
        if !std::mem::take(&mut self.pending) {
            return None;
        }
        Some(Update {
            diff: self.diff.take(),
        })
    }

    /// Persisted fields, in [`Self::COLUMNS`] order.
    pub fn serialize(&self) -> Vec<String> {
        vec![
            self.validator.clone().unwrap_or_default(),
            self.pending.to_string(),
            self.last_modified
                .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                .unwrap_or_default(),
            self.content.clone(),
        ]
    }

    /// Overwrite state with persisted fields.
    ///
    /// Rows written by older versions may stop after the pending flag or the
    /// timestamp; missing fields keep their current values.
    pub fn deserialize(&mut self, fields: &[&str]) -> std::result::Result<(), String> {
        if fields.len() < 2 {
            return Err(format!(
                "expected at least 2 fields after the url, found {}",
                fields.len()
            ));
        }

        let validator = match fields[0] {
            "" | "None" => None,
            tag => Some(tag.to_string()),
        };
        let pending = match fields[1].to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            other => return Err(format!("invalid pending flag '{}'", other)),
        };
        let last_modified = match fields.get(2) {
            None => self.last_modified,
            Some(&"") => None,
            Some(text) => Some(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|e| format!("invalid timestamp '{}': {}", text, e))?
                    .with_timezone(&Utc),
            ),
        };

        self.validator = validator;
        self.pending = pending;
        self.last_modified = last_modified;
        if let Some(content) = fields.get(3) {
            self.content = content.to_string();
        }
        Ok(())
    }

    /// Delete the cached body.
    pub fn release(&mut self) {
        match fs::remove_file(&self.cache_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "cannot remove cached content")
            }
        }
    }

    fn persist_content(&self) {
        let result = match self.cache_path.parent() {
            Some(dir) => fs::create_dir_all(dir),
            None => Ok(()),
        }
        .and_then(|()| fs::write(&self.cache_path, &self.content));

        if let Err(e) = result {
            warn!(path = %self.cache_path.display(), error = %e, "cannot write cached content");
        }
    }
}
