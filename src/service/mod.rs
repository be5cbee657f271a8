//! The running watch service: command surface, poll passes and the poll loop.
//!
//! [`WatchService`] owns the graph behind a single async lock. Command calls
//! and poll passes each hold it for their whole duration, so they never
//! interleave. Every successful command saves the graph; a command whose save
//! fails is rolled back in memory before the error is returned.

mod poller;
mod watch_service;

pub use poller::{Poller, PollerHandle};
pub use watch_service::{PollReport, ResourceSummary, WatchService, WatchServiceBuilder};
