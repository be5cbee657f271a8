//! Error types for sitewatch.

use crate::graph::{ChannelId, SubscriberId, TenantId};

/// Result type alias for sitewatch operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors that can occur while watching, persisting, or notifying.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted table could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A probe failed before a usable response arrived (timeout, connection error).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A persisted row could not be turned back into the graph.
    #[error("Malformed record in '{table}' (row {row}): {reason}")]
    MalformedRecord {
        /// Table the row came from
        table: String,
        /// 1-based data row number (the header row is not counted)
        row: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Settings were loaded but failed validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Settings could not be loaded from their sources.
    #[error("Failed to load settings: {0}")]
    Settings(String),

    /// The host refused or failed to deliver a notification.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// A graph operation was rejected.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl WatchError {
    /// Build a [`WatchError::MalformedRecord`].
    pub fn malformed(table: impl Into<String>, row: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            table: table.into(),
            row,
            reason: reason.into(),
        }
    }
}

/// Outcomes of domain graph operations that the command layer reports as text.
///
/// None of these are fatal; the graph is left untouched when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The tenant was never provisioned.
    #[error("tenant {0} is unrecognized")]
    UnknownTenant(TenantId),

    /// Another resource of the same tenant already uses this name.
    #[error("'{0}' is already being monitored")]
    DuplicateResourceName(String),

    /// The URL is already watched (possibly under another name or tenant).
    #[error("{0} is already being monitored")]
    UrlAlreadyWatched(String),

    /// No resource with this name exists for the tenant.
    #[error("'{0}' is not being monitored")]
    ResourceNotFound(String),

    /// The subscriber is not registered on the tenant.
    #[error("subscriber {0} is not subscribed to anything")]
    SubscriberNotFound(SubscriberId),

    /// The subscriber exists but does not follow the named resource.
    #[error("subscriber {subscriber} wasn't subscribed to '{name}'")]
    NotSubscribed {
        /// Who tried to unsubscribe
        subscriber: SubscriberId,
        /// The resource name they gave
        name: String,
    },

    /// The channel does not exist on the tenant.
    #[error("channel {0} is unknown")]
    ChannelNotFound(ChannelId),

    /// The channel id is already attached to a different tenant.
    #[error("channel {channel} belongs to tenant {owner}")]
    ChannelOwnedByOtherTenant {
        /// The channel that was referenced
        channel: ChannelId,
        /// The tenant that actually owns it
        owner: TenantId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_converts() {
        let err: WatchError = GraphError::ResourceNotFound("blog".to_string()).into();
        assert!(matches!(err, WatchError::Graph(GraphError::ResourceNotFound(_))));
        assert_eq!(err.to_string(), "'blog' is not being monitored");
    }

    #[test]
    fn test_malformed_display() {
        let err = WatchError::malformed("channels", 3, "unknown tenant 7");
        assert_eq!(
            err.to_string(),
            "Malformed record in 'channels' (row 3): unknown tenant 7"
        );
    }
}
