//! Command surface and poll pass over a shared graph.

use crate::error::{GraphError, Result, WatchError};
use crate::graph::{ChannelId, DetachedResource, Registry, SubscriberId, TenantId, WatchedResource};
use crate::monitor::{CheckOutcome, HttpProbe, ReqwestProbe};
use crate::notify::{Deliver, compose};
use crate::settings::WatchSettings;
use crate::store::{CsvStore, GraphStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::WatchMetrics;

/// Owned view of a watched resource, as returned by the listing commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    /// Display name
    pub name: String,
    /// Fetch url
    pub url: String,
    /// Channel updates go to
    pub channel: ChannelId,
    /// Current subscribers, ascending
    pub subscribers: Vec<SubscriberId>,
}

impl From<&WatchedResource> for ResourceSummary {
    fn from(resource: &WatchedResource) -> Self {
        Self {
            name: resource.name().to_string(),
            url: resource.url().to_string(),
            channel: resource.channel(),
            subscribers: resource.subscribers().collect(),
        }
    }
}

/// What one poll pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Resources checked
    pub checked: usize,
    /// Checks that recorded a change
    pub changed: usize,
    /// Checks that failed (network error, timeout, error status)
    pub failed: usize,
    /// Notifications the host accepted
    pub notified: usize,
    /// Notifications the host rejected
    pub failed_deliveries: usize,
    /// Whether the closing save succeeded
    pub saved: bool,
    /// The pass did not run because another one was in progress
    pub skipped: bool,
}

impl PollReport {
    fn skipped_pass() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Watches resources, answers commands and runs poll passes.
///
/// Cheap to clone; clones share the graph.
///
/// # Examples
///
/// ```rust,no_run
/// use sitewatch::prelude::*;
///
/// # async fn example() -> Result<()> {
/// let service = WatchService::builder()
///     .with_settings(WatchSettings::default())
///     .with_delivery(delivery_fn(|channel, text| async move {
///         println!("#{channel}: {text}");
///         Ok(())
///     }))
///     .build()?;
///
/// service.provision_tenant(TenantId(1)).await?;
/// service
///     .add_watched_resource(TenantId(1), ChannelId(10), "blog", "https://example.com/blog")
///     .await?;
/// let report = service.run_one_poll_pass().await;
/// println!("{} checked, {} changed", report.checked, report.changed);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WatchService {
    registry: Arc<Mutex<Registry>>,
    pass_guard: Arc<Mutex<()>>,
    store: Arc<dyn GraphStore>,
    probe: Arc<dyn HttpProbe>,
    delivery: Arc<dyn Deliver>,
    message_limit: usize,
    poll_interval: Duration,
    prime_on_add: bool,
    #[cfg(feature = "metrics")]
    metrics: Option<WatchMetrics>,
}

impl WatchService {
    /// Create a new builder for constructing a service.
    pub fn builder() -> WatchServiceBuilder {
        WatchServiceBuilder::new()
    }

    /// Interval the poll loop should run at.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Register a tenant. Returns `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns the store error if the save fails; the tenant is then not
    /// registered.
    pub async fn provision_tenant(&self, tenant: TenantId) -> Result<bool> {
        let mut registry = self.registry.lock().await;
        if !registry.provision_tenant(tenant) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&registry) {
            registry.retire_tenant(tenant);
            return Err(e);
        }
        Ok(true)
    }

    /// Start watching `url` as `name`, posting updates to `channel`.
    ///
    /// The channel is created on first use. Unless disabled on the builder, the
    /// current body is fetched right away as the baseline for the first diff;
    /// a failed fetch is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Graph`] if the graph rejects the resource, or the
    /// store error if the save fails (nothing is added in that case).
    pub async fn add_watched_resource(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        name: &str,
        url: &str,
    ) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let new_channel = registry.channel(channel).is_none();

        let resource = registry.add_watched_resource(tenant, channel, name, url)?;
        if self.prime_on_add {
            resource.monitor_mut().prime(self.probe.as_ref()).await;
        }

        if let Err(e) = self.persist(&registry) {
            let undone = if new_channel {
                registry.remove_channel(tenant, channel).map(|_| ())
            } else {
                registry.remove_watched_resource(tenant, name).map(|_| ())
            };
            if let Err(undo) = undone {
                error!(tenant = %tenant, resource = name, error = %undo, "rollback failed");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop watching `name` and release its cached content.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ResourceNotFound`] for an unknown name, or the
    /// store error if the save fails (the resource is then still watched).
    pub async fn remove_watched_resource(&self, tenant: TenantId, name: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let detached = registry.detach_watched_resource(tenant, name)?;

        match self.persist(&registry) {
            Ok(()) => {
                detached.release();
                Ok(())
            }
            Err(e) => {
                restore_all(&mut registry, vec![detached]);
                Err(e)
            }
        }
    }

    /// Remove a channel and every resource posting to it.
    ///
    /// Returns the names of the removed resources.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ChannelNotFound`] unless the tenant owns the
    /// channel, or the store error if the save fails (nothing is removed then).
    pub async fn remove_channel(&self, tenant: TenantId, channel: ChannelId) -> Result<Vec<String>> {
        let mut registry = self.registry.lock().await;
        let names: Vec<String> = match registry.channel(channel) {
            Some(found) if found.tenant() == tenant => registry
                .list_watched_resources(tenant)?
                .into_iter()
                .filter(|resource| resource.channel() == channel)
                .map(|resource| resource.name().to_string())
                .collect(),
            _ => return Err(GraphError::ChannelNotFound(channel).into()),
        };

        let mut detached = Vec::with_capacity(names.len());
        for name in &names {
            match registry.detach_watched_resource(tenant, name) {
                Ok(resource) => detached.push(resource),
                Err(e) => {
                    restore_all(&mut registry, detached);
                    return Err(e.into());
                }
            }
        }
        registry.remove_channel(tenant, channel)?;

        if let Err(e) = self.persist(&registry) {
            if let Err(undo) = registry.ensure_channel(tenant, channel) {
                error!(tenant = %tenant, channel = %channel, error = %undo, "rollback failed");
            }
            restore_all(&mut registry, detached);
            return Err(e);
        }
        for resource in detached {
            resource.release();
        }
        Ok(names)
    }

    /// Follow `name`. Following twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ResourceNotFound`] for an unknown name, or the
    /// store error if the save fails.
    pub async fn subscribe(&self, tenant: TenantId, subscriber: SubscriberId, name: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let known = registry
            .tenant(tenant)
            .is_some_and(|owner| owner.subscriber(subscriber).is_some());
        let following = registry
            .find_watched_resource(tenant, name)
            .is_some_and(|resource| resource.subscribers().any(|id| id == subscriber));

        registry.subscribe(tenant, subscriber, name)?;
        if following {
            return Ok(());
        }

        if let Err(e) = self.persist(&registry) {
            if let Err(undo) = registry.unsubscribe(tenant, subscriber, name) {
                error!(tenant = %tenant, subscriber = %subscriber, error = %undo, "rollback failed");
            }
            if !known {
                registry.forget_subscriber(tenant, subscriber);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop following `name`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotSubscribed`] unless the subscriber follows
    /// `name`, or the store error if the save fails.
    pub async fn unsubscribe(&self, tenant: TenantId, subscriber: SubscriberId, name: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        registry.unsubscribe(tenant, subscriber, name)?;

        if let Err(e) = self.persist(&registry) {
            if let Err(undo) = registry.subscribe(tenant, subscriber, name) {
                error!(tenant = %tenant, subscriber = %subscriber, error = %undo, "rollback failed");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Every resource of the tenant, by channel then name.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTenant`] for an unprovisioned tenant.
    pub async fn list_watched_resources(&self, tenant: TenantId) -> Result<Vec<ResourceSummary>> {
        let registry = self.registry.lock().await;
        Ok(registry
            .list_watched_resources(tenant)?
            .into_iter()
            .map(ResourceSummary::from)
            .collect())
    }

    /// Resources the subscriber follows, by channel then name.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTenant`] for an unprovisioned tenant.
    pub async fn list_subscriptions(
        &self,
        tenant: TenantId,
        subscriber: SubscriberId,
    ) -> Result<Vec<ResourceSummary>> {
        let registry = self.registry.lock().await;
        Ok(registry
            .list_subscriptions(tenant, subscriber)?
            .into_iter()
            .map(ResourceSummary::from)
            .collect())
    }

    /// Number of watched resources across all tenants.
    pub async fn watched_count(&self) -> usize {
        self.registry.lock().await.watched_count()
    }

    /// Run `f` against the graph while holding the lock.
    pub async fn read<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        let registry = self.registry.lock().await;
        f(&registry)
    }

    /// Save the whole graph now.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn save(&self) -> Result<()> {
        let registry = self.registry.lock().await;
        self.persist(&registry)
    }

    /// Check every resource once, deliver notifications, then save.
    ///
    /// Resources are visited tenant by tenant, channel by channel, name by
    /// name. A failed check or delivery is logged and the pass moves on. If a
    /// pass is already running, returns at once with `skipped` set.
    pub async fn run_one_poll_pass(&self) -> PollReport {
        let Ok(_pass) = self.pass_guard.try_lock() else {
            debug!("poll pass already running, skipping");
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.record_skipped();
            }
            return PollReport::skipped_pass();
        };

        #[cfg(feature = "metrics")]
        let timer = self.metrics.as_ref().map(|metrics| metrics.start_pass());

        let mut registry = self.registry.lock().await;
        let mut report = self.check_all(&mut registry).await;

        report.saved = match self.store.save(&registry) {
            Ok(()) => true,
            Err(e) => {
                error!(store = %self.store.name(), error = %e, "saving after poll pass failed");
                false
            }
        };

        info!(
            checked = report.checked,
            changed = report.changed,
            failed = report.failed,
            notified = report.notified,
            failed_deliveries = report.failed_deliveries,
            "poll pass complete"
        );

        #[cfg(feature = "metrics")]
        if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
            metrics.record_pass(timer, &report);
            metrics.update_watched_count(registry.watched_count());
        }

        report
    }

    async fn check_all(&self, registry: &mut Registry) -> PollReport {
        let mut report = PollReport::default();

        for url in registry.poll_order() {
            let Some(resource) = registry.resource_mut(&url) else {
                continue;
            };
            report.checked += 1;

            match resource.monitor_mut().check(self.probe.as_ref()).await {
                CheckOutcome::Changed => report.changed += 1,
                CheckOutcome::Failed => report.failed += 1,
                CheckOutcome::Unchanged => {}
            }

            let Some(update) = resource.monitor_mut().consume_update() else {
                continue;
            };
            let text = compose(resource, &update, self.message_limit);
            match self.delivery.deliver(resource.channel(), text).await {
                Ok(()) => report.notified += 1,
                Err(e) => {
                    warn!(
                        url = %url,
                        channel = %resource.channel(),
                        error = %e,
                        "notification not delivered"
                    );
                    report.failed_deliveries += 1;
                }
            }
        }

        report
    }

    fn persist(&self, registry: &Registry) -> Result<()> {
        self.store.save(registry).map_err(|e| {
            error!(store = %self.store.name(), error = %e, "save failed, rolling back");
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.record_save_failure();
            }
            e
        })
    }
}

/// Put detached resources back, releasing any that no longer fit.
fn restore_all(registry: &mut Registry, detached: Vec<DetachedResource>) {
    for resource in detached {
        if let Err((e, resource)) = registry.restore(resource) {
            error!(url = %resource.resource().url(), error = %e, "rollback failed");
            resource.release();
        }
    }
}

/// Builder for constructing a [`WatchService`].
///
/// Only the delivery target is required. The store defaults to a
/// [`CsvStore`] in the settings' data directory and the probe to a
/// [`ReqwestProbe`] using the settings' timeout and user agent.
pub struct WatchServiceBuilder {
    settings: WatchSettings,
    store: Option<Arc<dyn GraphStore>>,
    probe: Option<Arc<dyn HttpProbe>>,
    delivery: Option<Arc<dyn Deliver>>,
    prime_on_add: bool,
    #[cfg(feature = "metrics")]
    metrics: Option<WatchMetrics>,
}

impl WatchServiceBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            settings: WatchSettings::default(),
            store: None,
            probe: None,
            delivery: None,
            prime_on_add: true,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Use these settings.
    pub fn with_settings(mut self, settings: WatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Persist somewhere other than the settings' data directory.
    pub fn with_store(mut self, store: impl GraphStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Probe with something other than the default HTTP client.
    pub fn with_probe(mut self, probe: impl HttpProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Where notifications go.
    pub fn with_delivery(mut self, delivery: impl Deliver + 'static) -> Self {
        self.delivery = Some(Arc::new(delivery));
        self
    }

    /// Whether adding a resource fetches its baseline body. Default `true`.
    pub fn with_baseline_priming(mut self, enabled: bool) -> Self {
        self.prime_on_add = enabled;
        self
    }

    /// Record metrics for passes and saves.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: WatchMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate settings, load the saved graph and build the service.
    ///
    /// # Errors
    ///
    /// Returns an error if no delivery target was given, the settings are
    /// invalid, the HTTP client cannot be built, or the saved graph cannot
    /// be loaded.
    pub fn build(self) -> Result<WatchService> {
        self.settings.validate()?;
        let delivery = self.delivery.ok_or_else(|| {
            WatchError::InvalidSettings("a delivery target is required".to_string())
        })?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(CsvStore::new(&self.settings.data_dir)),
        };
        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(
                ReqwestProbe::builder()
                    .with_timeout(self.settings.request_timeout())
                    .with_user_agent(&self.settings.user_agent)
                    .build()?,
            ),
        };

        let registry = store.load()?;
        info!(
            store = %store.name(),
            resources = registry.watched_count(),
            "watch service ready"
        );

        Ok(WatchService {
            registry: Arc::new(Mutex::new(registry)),
            pass_guard: Arc::new(Mutex::new(())),
            store,
            probe,
            delivery,
            message_limit: self.settings.message_limit,
            poll_interval: self.settings.poll_interval(),
            prime_on_add: self.prime_on_add,
            #[cfg(feature = "metrics")]
            metrics: self.metrics,
        })
    }
}

impl Default for WatchServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
