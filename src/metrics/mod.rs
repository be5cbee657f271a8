//! Built-in metrics for the poll loop.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Poll passes run and skipped, with their duration
//! - Check outcomes per pass
//! - Delivered and failed notifications
//! - Failed saves
//! - Resources being watched
//! - Time since the last completed pass
//!
//! # Examples
//!
//! ```rust,no_run
//! use opentelemetry::global;
//! use sitewatch::prelude::*;
//!
//! # async fn example(delivery: impl Deliver + 'static) -> Result<()> {
//! let service = WatchService::builder()
//!     .with_settings(WatchSettings::default())
//!     .with_delivery(delivery)
//!     .with_metrics(WatchMetrics::new(global::meter("sitewatch")))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod watch_metrics;

pub use watch_metrics::WatchMetrics;
