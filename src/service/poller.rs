//! Periodic poll loop.

use super::WatchService;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Runs [`WatchService::run_one_poll_pass`] on a fixed interval.
pub struct Poller;

impl Poller {
    /// Spawn the loop onto the current tokio runtime.
    ///
    /// The first pass starts immediately. Ticks missed while a pass overruns
    /// are skipped rather than bunched up, so passes never overlap.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use sitewatch::prelude::*;
    /// # async fn example(service: WatchService) {
    /// let handle = Poller::spawn(service.clone(), service.poll_interval());
    /// // ...
    /// handle.stop().await;
    /// # }
    /// ```
    pub fn spawn(service: WatchService, every: Duration) -> PollerHandle {
        let (shutdown, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = every.as_secs(), "poll loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                // A pass in progress always runs to completion.
                service.run_one_poll_pass().await;
            }
            debug!("poll loop stopped");
        });

        PollerHandle {
            shutdown,
            task: Some(task),
        }
    }
}

/// Handle to a running poll loop.
///
/// Dropping the handle also stops the loop once the current pass finishes.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for an in-flight pass to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ChannelId, TenantId};
    use crate::monitor::ProbeResponse;
    use crate::monitor::testing::ScriptedProbe;
    use crate::notify::delivery_fn;
    use crate::store::CsvStore;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_passes_until_stopped() {
        let dir = TempDir::new().unwrap();
        let service = WatchService::builder()
            .with_store(CsvStore::new(dir.path()))
            .with_probe(ScriptedProbe::new(vec![
                Ok(ProbeResponse::ok("one")),
                Ok(ProbeResponse::ok("two")),
            ]))
            .with_delivery(delivery_fn(|_, _| async { Ok(()) }))
            .with_baseline_priming(false)
            .build()
            .unwrap();
        service.provision_tenant(TenantId(1)).await.unwrap();
        service
            .add_watched_resource(TenantId(1), ChannelId(10), "page", "https://a")
            .await
            .unwrap();

        let handle = Poller::spawn(service.clone(), Duration::from_secs(60));
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_secs(90)).await;
        let content = service
            .read(|registry| {
                let monitor = registry.resource("https://a").unwrap().monitor().as_etag().unwrap();
                monitor.content().to_owned()
            })
            .await;
        assert_eq!(content, "two");

        handle.stop().await;
    }
}
