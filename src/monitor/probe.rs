//! Conditional HTTP probes.

use crate::error::{Result, WatchError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// A GET request, optionally made conditional on a validator and a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalRequest {
    /// Resource to fetch
    pub url: String,
    /// Sent verbatim as `If-None-Match`
    pub if_none_match: Option<String>,
    /// Sent as `If-Modified-Since` in HTTP-date form
    pub if_modified_since: Option<DateTime<Utc>>,
}

impl ConditionalRequest {
    /// A plain GET with no conditional headers.
    pub fn unconditional(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            if_none_match: None,
            if_modified_since: None,
        }
    }

    /// `If-Modified-Since` header value, if any.
    pub fn if_modified_since_header(&self) -> Option<String> {
        self.if_modified_since.map(http_date)
    }
}

/// What came back from a probe.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// Response status
    pub status: StatusCode,
    /// `ETag` header, exactly as received (quotes included)
    pub etag: Option<String>,
    /// Parsed `Last-Modified` header
    pub last_modified: Option<DateTime<Utc>>,
    /// Response body; empty for 304 and error statuses
    pub body: String,
}

impl ProbeResponse {
    /// A `200 OK` carrying `body`.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            etag: None,
            last_modified: None,
            body: body.into(),
        }
    }

    /// A `304 Not Modified`.
    pub fn not_modified() -> Self {
        Self {
            status: StatusCode::NOT_MODIFIED,
            etag: None,
            last_modified: None,
            body: String::new(),
        }
    }

    /// A body-less response with an arbitrary status.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            etag: None,
            last_modified: None,
            body: String::new(),
        }
    }

    /// Attach an `ETag`.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Attach a `Last-Modified` timestamp.
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// The server says our cached copy is current.
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    /// Either a success or a not-modified reply. Anything else aborts a check.
    pub fn is_usable(&self) -> bool {
        self.status.is_success() || self.is_not_modified()
    }
}

/// Something that can perform a (conditional) GET.
///
/// The production implementation is [`ReqwestProbe`]; tests substitute a
/// scripted one.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Perform the request.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Http`] when no response was received at all
    /// (timeout, DNS, connection reset). Error statuses are *not* errors; they
    /// come back as a [`ProbeResponse`].
    async fn fetch(&self, request: &ConditionalRequest) -> Result<ProbeResponse>;
}

/// reqwest-backed probe with a bounded per-request timeout.
///
/// # Examples
///
/// ```rust,no_run
/// use sitewatch::monitor::ReqwestProbe;
/// use std::time::Duration;
///
/// # fn example() -> sitewatch::error::Result<()> {
/// let probe = ReqwestProbe::builder()
///     .with_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ReqwestProbe {
    client: Client,
    user_agent: String,
}

impl ReqwestProbe {
    /// Create a new builder for constructing a probe.
    pub fn builder() -> ReqwestProbeBuilder {
        ReqwestProbeBuilder::new()
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn fetch(&self, request: &ConditionalRequest) -> Result<ProbeResponse> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(USER_AGENT, self.user_agent.as_str());

        if let Some(tag) = &request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, tag.as_str());
        }
        if let Some(since) = request.if_modified_since_header() {
            builder = builder.header(IF_MODIFIED_SINCE, since);
        }

        debug!(
            url = %request.url,
            if_none_match = ?request.if_none_match,
            if_modified_since = ?request.if_modified_since_header(),
            "sending request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| WatchError::Http(format!("{}: {}", request.url, e)))?;

        let status = response.status();
        let headers = response.headers();
        let etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let body = if status.is_success() {
            response
                .text()
                .await
                .map_err(|e| WatchError::Http(format!("{}: reading body: {}", request.url, e)))?
        } else {
            String::new()
        };

        Ok(ProbeResponse {
            status,
            etag,
            last_modified,
            body,
        })
    }
}

/// Builder for constructing a [`ReqwestProbe`].
pub struct ReqwestProbeBuilder {
    timeout: Duration,
    user_agent: String,
}

impl ReqwestProbeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("sitewatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Set the request timeout.
    ///
    /// Default is 10 seconds. A probe that exceeds it is treated like any
    /// other failed check.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<ReqwestProbe> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| WatchError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ReqwestProbe {
            client,
            user_agent: self.user_agent,
        })
    }
}

impl Default for ReqwestProbeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a timestamp as an RFC 1123 HTTP-date.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP-date such as `Wed, 11 Jan 2023 09:17:49 GMT`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
