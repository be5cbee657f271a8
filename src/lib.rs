//! # sitewatch
//!
//! Watch remote web pages for changes and tell the people who care.
//!
//! ## Overview
//!
//! `sitewatch` keeps a multi-tenant graph of watched pages:
//! - Tenants own notification channels and subscribers
//! - Each channel owns the pages whose updates are posted to it
//! - Each page carries a change detector that polls it with conditional GETs
//!   (`If-None-Match` / `If-Modified-Since`) and keeps the last body on disk
//! - A poll pass checks every page, posts a unified diff of each change to its
//!   channel with a mention for every subscriber, then saves the whole graph
//!   to flat CSV tables
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sitewatch::prelude::*;
//!
//! # async fn example() -> sitewatch::error::Result<()> {
//! let settings = WatchSettings::builder()
//!     .with_env_overrides("SITEWATCH", "__")
//!     .build()?;
//!
//! let service = WatchService::builder()
//!     .with_settings(settings)
//!     .with_delivery(delivery_fn(|channel, text| async move {
//!         println!("#{channel}\n{text}");
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! service.provision_tenant(TenantId(1)).await?;
//! service
//!     .add_watched_resource(TenantId(1), ChannelId(10), "blog", "https://example.com/blog")
//!     .await?;
//! service.subscribe(TenantId(1), SubscriberId(42), "blog").await?;
//!
//! let poller = Poller::spawn(service.clone(), service.poll_interval());
//! # poller.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics`: OpenTelemetry counters and gauges for poll passes
//!   ([`metrics::WatchMetrics`])

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod error;
pub mod graph;
pub mod monitor;
pub mod notify;
pub mod service;
pub mod settings;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::error::{GraphError, Result, WatchError};
    pub use crate::graph::{ChannelId, Registry, SubscriberId, TenantId};
    pub use crate::monitor::{HttpProbe, MonitorKind, ReqwestProbe};
    pub use crate::notify::{Deliver, delivery_fn};
    pub use crate::service::{PollReport, Poller, PollerHandle, ResourceSummary, WatchService};
    pub use crate::settings::WatchSettings;
    pub use crate::store::{CsvStore, GraphStore};

    #[cfg(feature = "metrics")]
    pub use crate::metrics::WatchMetrics;
}
