//! Watch a few pages and print their updates to stdout.
//!
//! ```text
//! cargo run --example watch_daemon -- [settings.yaml] blog=https://example.com/blog ...
//! ```
//!
//! Settings can also come from `SITEWATCH_*` environment variables, e.g.
//! `SITEWATCH_POLL_INTERVAL_SECS=60`. Log verbosity follows `RUST_LOG`.

use sitewatch::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const TENANT: TenantId = TenantId(1);
const CHANNEL: ChannelId = ChannelId(1);

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let mut builder = WatchSettings::builder();
    let mut pages = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.split_once('=') {
            Some((name, url)) => pages.push((name.to_string(), url.to_string())),
            None => builder = builder.with_file(arg),
        }
    }
    let settings = builder.with_env_overrides("SITEWATCH", "__").build()?;

    let service = WatchService::builder()
        .with_settings(settings)
        .with_delivery(delivery_fn(|channel, text| async move {
            println!("--- #{channel} ---\n{text}\n");
            Ok(())
        }))
        .build()?;

    service.provision_tenant(TENANT).await?;
    for (name, url) in &pages {
        match service.add_watched_resource(TENANT, CHANNEL, name, url).await {
            Ok(()) => info!(resource = %name, url = %url, "watching"),
            Err(WatchError::Graph(e)) => warn!(resource = %name, "{e}"),
            Err(e) => return Err(e.into()),
        }
    }
    info!("monitoring {} websites", service.watched_count().await);

    let poller = Poller::spawn(service.clone(), service.poll_interval());
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    poller.stop().await;
    service.save().await?;
    Ok(())
}
