//! Persistence of the whole watch graph.
//!
//! A store is a full-graph dump: every save rewrites every table from the
//! in-memory [`Registry`], and a load rebuilds the graph in dependency order
//! (tenants, channels, resources, subscribers, subscription links) before
//! applying each resource's persisted monitor state on top of the fresh
//! monitor its construction created.

mod flat_file;

pub use flat_file::CsvStore;

use crate::error::Result;
use crate::graph::Registry;

/// Somewhere the graph can be saved to and loaded from.
pub trait GraphStore: Send + Sync {
    /// Rebuild the graph.
    ///
    /// # Errors
    ///
    /// Any unreadable row or dangling reference is fatal: a partially
    /// reconstructed graph is never returned.
    fn load(&self) -> Result<Registry>;

    /// Write the whole graph.
    ///
    /// # Errors
    ///
    /// Returns an error if any table cannot be written.
    fn save(&self, registry: &Registry) -> Result<()>;

    /// Human-readable name for logging.
    fn name(&self) -> String;
}
