//! The watch graph: tenants, channels, resources and subscribers.

use super::entities::{
    ChannelId, NotificationChannel, Subscriber, SubscriberId, Tenant, TenantId, WatchedResource,
};
use crate::error::GraphError;
use crate::monitor::{Monitor, MonitorKind};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type GraphResult<T> = std::result::Result<T, GraphError>;

/// In-memory graph of everything being watched.
///
/// Channels and resources live in arenas keyed by id and url; ownership edges
/// (tenant -> channel -> resource) and the back-references are plain ids.
/// Every operation validates before it mutates, so a rejected call leaves the
/// graph exactly as it was.
///
/// # Examples
///
/// ```rust
/// use sitewatch::graph::{ChannelId, Registry, SubscriberId, TenantId};
///
/// let mut registry = Registry::new("/tmp/sitewatch-doc/cache");
/// registry.provision_tenant(TenantId(1));
/// registry
///     .add_watched_resource(TenantId(1), ChannelId(10), "blog", "https://example.com/blog")
///     .unwrap();
/// registry.subscribe(TenantId(1), SubscriberId(42), "blog").unwrap();
///
/// let blog = registry.find_watched_resource(TenantId(1), "blog").unwrap();
/// assert_eq!(blog.subscribers().collect::<Vec<_>>(), vec![SubscriberId(42)]);
/// ```
#[derive(Debug)]
pub struct Registry {
    cache_root: PathBuf,
    tenants: BTreeMap<TenantId, Tenant>,
    channels: BTreeMap<ChannelId, NotificationChannel>,
    resources: BTreeMap<String, WatchedResource>,
}

/// A resource taken out of the graph but not yet released.
///
/// Either [`Registry::restore`] it or [`DetachedResource::release`] it.
#[derive(Debug)]
#[must_use]
pub struct DetachedResource {
    resource: WatchedResource,
}

impl DetachedResource {
    /// The detached resource.
    pub fn resource(&self) -> &WatchedResource {
        &self.resource
    }

    /// Free the monitor's external state and hand back the resource.
    pub fn release(mut self) -> WatchedResource {
        self.resource.monitor.release();
        self.resource
    }
}

impl Registry {
    /// Create an empty graph whose monitors cache content under `cache_root`.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            tenants: BTreeMap::new(),
            channels: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    /// Root directory for monitor caches.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Register a tenant. Returns `false` if it already existed.
    pub fn provision_tenant(&mut self, id: TenantId) -> bool {
        if self.tenants.contains_key(&id) {
            return false;
        }
        self.tenants.insert(id, Tenant::new(id));
        info!(tenant = %id, "tenant provisioned");
        true
    }

    /// Look up a tenant.
    pub fn tenant(&self, id: TenantId) -> Option<&Tenant> {
        self.tenants.get(&id)
    }

    /// All tenants, ascending by id.
    pub fn tenants(&self) -> impl Iterator<Item = &Tenant> {
        self.tenants.values()
    }

    /// Look up a channel.
    pub fn channel(&self, id: ChannelId) -> Option<&NotificationChannel> {
        self.channels.get(&id)
    }

    /// All channels, ascending by id.
    pub fn channels(&self) -> impl Iterator<Item = &NotificationChannel> {
        self.channels.values()
    }

    /// Look up a resource by its url.
    pub fn resource(&self, url: &str) -> Option<&WatchedResource> {
        self.resources.get(url)
    }

    /// Mutable lookup of a resource by its url.
    pub fn resource_mut(&mut self, url: &str) -> Option<&mut WatchedResource> {
        self.resources.get_mut(url)
    }

    /// Number of watched resources across all tenants.
    pub fn watched_count(&self) -> usize {
        self.resources.len()
    }

    /// Create the channel on first use.
    ///
    /// # Errors
    ///
    /// Fails if the tenant is unknown or the channel already belongs to
    /// another tenant.
    pub fn ensure_channel(&mut self, tenant: TenantId, channel: ChannelId) -> GraphResult<()> {
        self.check_channel(tenant, channel)?;
        if !self.channels.contains_key(&channel) {
            self.channels
                .insert(channel, NotificationChannel::new(channel, tenant));
            if let Some(owner) = self.tenants.get_mut(&tenant) {
                owner.channels.insert(channel);
            }
            debug!(tenant = %tenant, channel = %channel, "channel created");
        }
        Ok(())
    }

    /// Start watching `url` under `name`, posting updates to `channel`.
    ///
    /// The channel is created if this is its first use. The resource gets a
    /// fresh [`MonitorKind::ETag`] monitor.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownTenant`] for an unprovisioned tenant
    /// - [`GraphError::ChannelOwnedByOtherTenant`] if the channel id is taken
    /// - [`GraphError::DuplicateResourceName`] if the tenant already uses `name`
    /// - [`GraphError::UrlAlreadyWatched`] if `url` is watched anywhere
    pub fn add_watched_resource(
        &mut self,
        tenant: TenantId,
        channel: ChannelId,
        name: &str,
        url: &str,
    ) -> GraphResult<&mut WatchedResource> {
        self.add_watched_resource_with(tenant, channel, name, url, MonitorKind::ETag)
    }

    /// Like [`Registry::add_watched_resource`] with an explicit monitor kind.
    pub fn add_watched_resource_with(
        &mut self,
        tenant: TenantId,
        channel: ChannelId,
        name: &str,
        url: &str,
        kind: MonitorKind,
    ) -> GraphResult<&mut WatchedResource> {
        self.check_channel(tenant, channel)?;
        if self.find_watched_resource(tenant, name).is_some() {
            return Err(GraphError::DuplicateResourceName(name.to_string()));
        }
        if self.resources.contains_key(url) {
            return Err(GraphError::UrlAlreadyWatched(url.to_string()));
        }

        self.ensure_channel(tenant, channel)?;
        let monitor = Monitor::new(kind, url, name, tenant, &self.cache_root);
        if let Some(owner) = self.channels.get_mut(&channel) {
            owner.resources.insert(name.to_string(), url.to_string());
        }
        info!(tenant = %tenant, channel = %channel, resource = name, url, "resource added");

        Ok(self
            .resources
            .entry(url.to_string())
            .or_insert(WatchedResource {
                name: name.to_string(),
                url: url.to_string(),
                channel,
                tenant,
                subscribers: BTreeSet::new(),
                monitor,
            }))
    }

    /// Find a resource by name among the tenant's channels.
    pub fn find_watched_resource(&self, tenant: TenantId, name: &str) -> Option<&WatchedResource> {
        let url = self.url_of(tenant, name)?;
        self.resources.get(url)
    }

    /// Mutable variant of [`Registry::find_watched_resource`].
    pub fn find_watched_resource_mut(
        &mut self,
        tenant: TenantId,
        name: &str,
    ) -> Option<&mut WatchedResource> {
        let url = self.url_of(tenant, name)?.to_string();
        self.resources.get_mut(&url)
    }

    /// Stop watching a resource: unlink it everywhere and release its monitor.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownTenant`] or [`GraphError::ResourceNotFound`].
    pub fn remove_watched_resource(
        &mut self,
        tenant: TenantId,
        name: &str,
    ) -> GraphResult<WatchedResource> {
        Ok(self.detach_watched_resource(tenant, name)?.release())
    }

    /// Unlink a resource from its channel and every subscriber without
    /// releasing its monitor yet.
    pub fn detach_watched_resource(
        &mut self,
        tenant: TenantId,
        name: &str,
    ) -> GraphResult<DetachedResource> {
        self.require_tenant(tenant)?;
        let url = self
            .url_of(tenant, name)
            .ok_or_else(|| GraphError::ResourceNotFound(name.to_string()))?
            .to_string();

        let Some(resource) = self.resources.remove(&url) else {
            return Err(GraphError::ResourceNotFound(name.to_string()));
        };
        if let Some(channel) = self.channels.get_mut(&resource.channel) {
            channel.resources.remove(&resource.name);
        }
        if let Some(owner) = self.tenants.get_mut(&tenant) {
            for id in &resource.subscribers {
                if let Some(subscriber) = owner.subscribers.get_mut(id) {
                    subscriber.follows.remove(&url);
                }
            }
        }
        info!(tenant = %tenant, resource = name, url = %url, "resource removed");

        Ok(DetachedResource { resource })
    }

    /// Put a detached resource back exactly where it was.
    ///
    /// Subscribers that were unlinked are linked again; the channel is
    /// recreated if it disappeared in the meantime.
    ///
    /// # Errors
    ///
    /// Fails if the name or url has been reused since the resource was
    /// detached; the detached resource is handed back alongside the error so
    /// the caller can still release it.
    pub fn restore(
        &mut self,
        detached: DetachedResource,
    ) -> std::result::Result<(), (GraphError, DetachedResource)> {
        let resource = &detached.resource;
        if let Err(e) = self.check_channel(resource.tenant, resource.channel) {
            return Err((e, detached));
        }
        if self.find_watched_resource(resource.tenant, &resource.name).is_some() {
            let e = GraphError::DuplicateResourceName(resource.name.clone());
            return Err((e, detached));
        }
        if self.resources.contains_key(&resource.url) {
            let e = GraphError::UrlAlreadyWatched(resource.url.clone());
            return Err((e, detached));
        }

        let resource = detached.resource;
        if let Err(e) = self.ensure_channel(resource.tenant, resource.channel) {
            return Err((e, DetachedResource { resource }));
        }
        if let Some(channel) = self.channels.get_mut(&resource.channel) {
            channel
                .resources
                .insert(resource.name.clone(), resource.url.clone());
        }
        if let Some(owner) = self.tenants.get_mut(&resource.tenant) {
            for id in &resource.subscribers {
                owner
                    .subscribers
                    .entry(*id)
                    .or_insert_with(|| Subscriber::new(*id, resource.tenant))
                    .follows
                    .insert(resource.url.clone());
            }
        }
        self.resources.insert(resource.url.clone(), resource);
        Ok(())
    }

    /// Remove a channel together with every resource posted to it.
    ///
    /// Returns the released resources, ordered by name.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownTenant`], [`GraphError::ChannelNotFound`] (also
    /// when the channel belongs to a different tenant).
    pub fn remove_channel(
        &mut self,
        tenant: TenantId,
        channel: ChannelId,
    ) -> GraphResult<Vec<WatchedResource>> {
        self.require_tenant(tenant)?;
        let names: Vec<String> = match self.channels.get(&channel) {
            Some(found) if found.tenant == tenant => found.resources.keys().cloned().collect(),
            _ => return Err(GraphError::ChannelNotFound(channel)),
        };

        let mut removed = Vec::with_capacity(names.len());
        for name in names {
            removed.push(self.remove_watched_resource(tenant, &name)?);
        }
        self.channels.remove(&channel);
        if let Some(owner) = self.tenants.get_mut(&tenant) {
            owner.channels.remove(&channel);
        }
        info!(tenant = %tenant, channel = %channel, resources = removed.len(), "channel removed");

        Ok(removed)
    }

    /// Make `subscriber` follow the tenant's resource called `name`.
    ///
    /// The subscriber is registered on the tenant the first time. Following a
    /// resource twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownTenant`] or [`GraphError::ResourceNotFound`].
    pub fn subscribe(
        &mut self,
        tenant: TenantId,
        subscriber: SubscriberId,
        name: &str,
    ) -> GraphResult<()> {
        self.require_tenant(tenant)?;
        let url = self
            .url_of(tenant, name)
            .ok_or_else(|| GraphError::ResourceNotFound(name.to_string()))?
            .to_string();
        self.link(tenant, subscriber, &url);
        debug!(tenant = %tenant, subscriber = %subscriber, resource = name, "subscribed");
        Ok(())
    }

    /// Stop `subscriber` following the tenant's resource called `name`.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownTenant`], [`GraphError::SubscriberNotFound`] when
    /// the subscriber was never registered on the tenant, or
    /// [`GraphError::NotSubscribed`] when the resource is unknown or they were
    /// not linked.
    pub fn unsubscribe(
        &mut self,
        tenant: TenantId,
        subscriber: SubscriberId,
        name: &str,
    ) -> GraphResult<()> {
        let owner = self.require_tenant(tenant)?;
        if owner.subscriber(subscriber).is_none() {
            return Err(GraphError::SubscriberNotFound(subscriber));
        }
        let not_subscribed = || GraphError::NotSubscribed {
            subscriber,
            name: name.to_string(),
        };

        let url = self.url_of(tenant, name).ok_or_else(not_subscribed)?.to_string();
        let follows = self
            .tenants
            .get(&tenant)
            .and_then(|owner| owner.subscribers.get(&subscriber))
            .is_some_and(|found| found.follows.contains(&url));
        if !follows {
            return Err(not_subscribed());
        }

        if let Some(found) = self
            .tenants
            .get_mut(&tenant)
            .and_then(|owner| owner.subscribers.get_mut(&subscriber))
        {
            found.follows.remove(&url);
        }
        if let Some(resource) = self.resources.get_mut(&url) {
            resource.subscribers.remove(&subscriber);
        }
        debug!(tenant = %tenant, subscriber = %subscriber, resource = name, "unsubscribed");
        Ok(())
    }

    /// The tenant's resources, ordered by channel id then name.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownTenant`].
    pub fn list_watched_resources(&self, tenant: TenantId) -> GraphResult<Vec<&WatchedResource>> {
        let owner = self.require_tenant(tenant)?;
        Ok(owner
            .channels
            .iter()
            .filter_map(|id| self.channels.get(id))
            .flat_map(|channel| channel.resources.values())
            .filter_map(|url| self.resources.get(url))
            .collect())
    }

    /// What `subscriber` follows, ordered by channel id then name.
    ///
    /// An unregistered subscriber simply follows nothing.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownTenant`].
    pub fn list_subscriptions(
        &self,
        tenant: TenantId,
        subscriber: SubscriberId,
    ) -> GraphResult<Vec<&WatchedResource>> {
        let owner = self.require_tenant(tenant)?;
        let Some(found) = owner.subscribers.get(&subscriber) else {
            return Ok(Vec::new());
        };
        let mut followed: Vec<&WatchedResource> = found
            .follows
            .iter()
            .filter_map(|url| self.resources.get(url))
            .collect();
        followed.sort_by(|a, b| (a.channel, &a.name).cmp(&(b.channel, &b.name)));
        Ok(followed)
    }

    /// Urls of every resource in poll order: tenants, then channels, then names.
    pub fn poll_order(&self) -> Vec<String> {
        self.tenants
            .values()
            .flat_map(|tenant| tenant.channels.iter())
            .filter_map(|id| self.channels.get(id))
            .flat_map(|channel| channel.resources.values().cloned())
            .collect()
    }

    /// Every resource, in poll order.
    pub fn resources(&self) -> impl Iterator<Item = &WatchedResource> {
        self.tenants
            .values()
            .flat_map(|tenant| tenant.channels.iter())
            .filter_map(|id| self.channels.get(id))
            .flat_map(|channel| channel.resources.values())
            .filter_map(|url| self.resources.get(url))
    }

    /// Register a subscriber without linking anything.
    pub(crate) fn register_subscriber(
        &mut self,
        tenant: TenantId,
        subscriber: SubscriberId,
    ) -> GraphResult<()> {
        let owner = self
            .tenants
            .get_mut(&tenant)
            .ok_or(GraphError::UnknownTenant(tenant))?;
        owner
            .subscribers
            .entry(subscriber)
            .or_insert_with(|| Subscriber::new(subscriber, tenant));
        Ok(())
    }

    /// Link an already registered subscriber to the resource at `url`.
    pub(crate) fn link_registered(
        &mut self,
        subscriber: SubscriberId,
        url: &str,
    ) -> std::result::Result<(), String> {
        let tenant = self
            .resources
            .get(url)
            .map(|resource| resource.tenant)
            .ok_or_else(|| format!("unknown resource url '{}'", url))?;
        let registered = self
            .tenants
            .get(&tenant)
            .is_some_and(|owner| owner.subscribers.contains_key(&subscriber));
        if !registered {
            return Err(format!(
                "subscriber {} is not registered on tenant {}",
                subscriber, tenant
            ));
        }
        self.link(tenant, subscriber, url);
        Ok(())
    }

    /// Drop a tenant that owns nothing. Returns whether it was removed.
    pub(crate) fn retire_tenant(&mut self, tenant: TenantId) -> bool {
        let empty = self
            .tenants
            .get(&tenant)
            .is_some_and(|owner| owner.channels.is_empty() && owner.subscribers.is_empty());
        if empty {
            self.tenants.remove(&tenant);
        }
        empty
    }

    /// Drop a subscriber that follows nothing. Returns whether it was removed.
    pub(crate) fn forget_subscriber(&mut self, tenant: TenantId, subscriber: SubscriberId) -> bool {
        let Some(owner) = self.tenants.get_mut(&tenant) else {
            return false;
        };
        let idle = owner
            .subscribers
            .get(&subscriber)
            .is_some_and(|found| found.follows.is_empty());
        if idle {
            owner.subscribers.remove(&subscriber);
        }
        idle
    }

    /// Single mutation path for the subscriber <-> resource edge.
    fn link(&mut self, tenant: TenantId, subscriber: SubscriberId, url: &str) {
        if let Some(owner) = self.tenants.get_mut(&tenant) {
            owner
                .subscribers
                .entry(subscriber)
                .or_insert_with(|| Subscriber::new(subscriber, tenant))
                .follows
                .insert(url.to_string());
        }
        if let Some(resource) = self.resources.get_mut(url) {
            resource.subscribers.insert(subscriber);
        }
    }

    fn url_of(&self, tenant: TenantId, name: &str) -> Option<&str> {
        self.tenants
            .get(&tenant)?
            .channels
            .iter()
            .filter_map(|id| self.channels.get(id))
            .find_map(|channel| channel.resources.get(name))
            .map(String::as_str)
    }

    fn require_tenant(&self, tenant: TenantId) -> GraphResult<&Tenant> {
        self.tenants
            .get(&tenant)
            .ok_or(GraphError::UnknownTenant(tenant))
    }

    fn check_channel(&self, tenant: TenantId, channel: ChannelId) -> GraphResult<()> {
        self.require_tenant(tenant)?;
        match self.channels.get(&channel) {
            Some(existing) if existing.tenant != tenant => {
                Err(GraphError::ChannelOwnedByOtherTenant {
                    channel,
                    owner: existing.tenant,
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const T1: TenantId = TenantId(1);
    const T2: TenantId = TenantId(2);
    const C10: ChannelId = ChannelId(10);
    const C11: ChannelId = ChannelId(11);
    const ALICE: SubscriberId = SubscriberId(100);
    const BOB: SubscriberId = SubscriberId(200);

    fn registry(dir: &TempDir) -> Registry {
        let mut registry = Registry::new(dir.path().join("cache"));
        registry.provision_tenant(T1);
        registry.provision_tenant(T2);
        registry
    }

    #[test]
    fn test_add_creates_channel_lazily() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);

        registry
            .add_watched_resource(T1, C10, "blog", "https://example.com/blog")
            .unwrap();

        let channel = registry.channel(C10).unwrap();
        assert_eq!(channel.tenant(), T1);
        assert_eq!(
            registry.tenant(T1).unwrap().channel_ids().collect::<Vec<_>>(),
            vec![C10]
        );
        assert_eq!(registry.watched_count(), 1);
    }

    #[test]
    fn test_add_rejections_leave_graph_untouched() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry
            .add_watched_resource(T1, C10, "blog", "https://example.com/blog")
            .unwrap();

        assert_eq!(
            registry
                .add_watched_resource(TenantId(9), C10, "x", "https://x")
                .unwrap_err(),
            GraphError::UnknownTenant(TenantId(9))
        );
        assert_eq!(
            registry
                .add_watched_resource(T1, C11, "blog", "https://other")
                .unwrap_err(),
            GraphError::DuplicateResourceName("blog".to_string())
        );
        assert_eq!(
            registry
                .add_watched_resource(T2, ChannelId(20), "mirror", "https://example.com/blog")
                .unwrap_err(),
            GraphError::UrlAlreadyWatched("https://example.com/blog".to_string())
        );
        assert_eq!(
            registry
                .add_watched_resource(T2, C10, "news", "https://news")
                .unwrap_err(),
            GraphError::ChannelOwnedByOtherTenant {
                channel: C10,
                owner: T1
            }
        );

        // The rejected adds did not create channels.
        assert!(registry.channel(C11).is_none());
        assert!(registry.channel(ChannelId(20)).is_none());
        assert_eq!(registry.watched_count(), 1);
    }

    #[test]
    fn test_same_name_in_different_tenants() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C10, "blog", "https://a").unwrap();
        registry
            .add_watched_resource(T2, ChannelId(20), "blog", "https://b")
            .unwrap();

        assert_eq!(registry.find_watched_resource(T1, "blog").unwrap().url(), "https://a");
        assert_eq!(registry.find_watched_resource(T2, "blog").unwrap().url(), "https://b");
    }

    #[test]
    fn test_subscribe_is_symmetric() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C10, "blog", "https://a").unwrap();

        registry.subscribe(T1, ALICE, "blog").unwrap();
        registry.subscribe(T1, ALICE, "blog").unwrap();

        let alice = registry.tenant(T1).unwrap().subscriber(ALICE).unwrap();
        assert_eq!(alice.follows().collect::<Vec<_>>(), vec!["https://a"]);
        let blog = registry.find_watched_resource(T1, "blog").unwrap();
        assert_eq!(blog.subscribers().collect::<Vec<_>>(), vec![ALICE]);

        assert_eq!(
            registry.subscribe(T1, ALICE, "missing").unwrap_err(),
            GraphError::ResourceNotFound("missing".to_string())
        );
        // Tenant scoping: tenant 2 cannot see tenant 1's resource.
        assert_eq!(
            registry.subscribe(T2, ALICE, "blog").unwrap_err(),
            GraphError::ResourceNotFound("blog".to_string())
        );
    }

    #[test]
    fn test_unsubscribe() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C10, "blog", "https://a").unwrap();
        registry.subscribe(T1, ALICE, "blog").unwrap();

        let not_subscribed = |subscriber| GraphError::NotSubscribed {
            subscriber,
            name: "blog".to_string(),
        };
        assert_eq!(
            registry.unsubscribe(T1, BOB, "blog").unwrap_err(),
            GraphError::SubscriberNotFound(BOB)
        );

        registry.unsubscribe(T1, ALICE, "blog").unwrap();
        assert!(
            registry
                .find_watched_resource(T1, "blog")
                .unwrap()
                .subscribers()
                .next()
                .is_none()
        );
        assert!(registry.list_subscriptions(T1, ALICE).unwrap().is_empty());
        assert_eq!(
            registry.unsubscribe(T1, ALICE, "blog").unwrap_err(),
            not_subscribed(ALICE)
        );
    }

    #[test]
    fn test_remove_cascades_to_subscribers() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C10, "blog", "https://a").unwrap();
        registry.add_watched_resource(T1, C10, "wiki", "https://b").unwrap();
        registry.subscribe(T1, ALICE, "blog").unwrap();
        registry.subscribe(T1, ALICE, "wiki").unwrap();
        registry.subscribe(T1, BOB, "blog").unwrap();

        let removed = registry.remove_watched_resource(T1, "blog").unwrap();
        assert_eq!(removed.url(), "https://a");

        let tenant = registry.tenant(T1).unwrap();
        assert_eq!(
            tenant.subscriber(ALICE).unwrap().follows().collect::<Vec<_>>(),
            vec!["https://b"]
        );
        assert!(tenant.subscriber(BOB).unwrap().follows().next().is_none());
        assert!(registry.find_watched_resource(T1, "blog").is_none());
        assert!(registry.resource("https://a").is_none());
        assert_eq!(
            registry.remove_watched_resource(T1, "blog").unwrap_err(),
            GraphError::ResourceNotFound("blog".to_string())
        );
    }

    #[test]
    fn test_detach_and_restore() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C10, "blog", "https://a").unwrap();
        registry.subscribe(T1, ALICE, "blog").unwrap();

        let detached = registry.detach_watched_resource(T1, "blog").unwrap();
        assert!(registry.list_subscriptions(T1, ALICE).unwrap().is_empty());

        registry.restore(detached).unwrap();
        let subscriptions = registry.list_subscriptions(T1, ALICE).unwrap();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].name(), "blog");
        assert_eq!(
            registry
                .find_watched_resource(T1, "blog")
                .unwrap()
                .subscribers()
                .collect::<Vec<_>>(),
            vec![ALICE]
        );
    }

    #[test]
    fn test_remove_channel_cascades() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C10, "blog", "https://a").unwrap();
        registry.add_watched_resource(T1, C10, "wiki", "https://b").unwrap();
        registry.add_watched_resource(T1, C11, "news", "https://c").unwrap();
        registry.subscribe(T1, ALICE, "wiki").unwrap();

        let removed = registry.remove_channel(T1, C10).unwrap();
        let names: Vec<&str> = removed.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["blog", "wiki"]);

        assert!(registry.channel(C10).is_none());
        assert_eq!(registry.watched_count(), 1);
        assert!(registry.list_subscriptions(T1, ALICE).unwrap().is_empty());
        assert_eq!(
            registry.remove_channel(T2, C11).unwrap_err(),
            GraphError::ChannelNotFound(C11)
        );
    }

    #[test]
    fn test_listing_order() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C11, "zeta", "https://z").unwrap();
        registry.add_watched_resource(T1, C10, "beta", "https://b").unwrap();
        registry.add_watched_resource(T1, C10, "alpha", "https://a").unwrap();
        registry
            .add_watched_resource(T2, ChannelId(5), "other", "https://o")
            .unwrap();

        let names: Vec<&str> = registry
            .list_watched_resources(T1)
            .unwrap()
            .iter()
            .map(|r| r.name())
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);

        assert_eq!(
            registry.poll_order(),
            vec!["https://a", "https://b", "https://z", "https://o"]
        );
        assert_eq!(
            registry.list_watched_resources(TenantId(3)).unwrap_err(),
            GraphError::UnknownTenant(TenantId(3))
        );
    }

    #[test]
    fn test_unknown_subscriber_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        assert!(registry.list_subscriptions(T1, BOB).unwrap().is_empty());
    }

    #[test]
    fn test_retire_and_forget_only_when_idle() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry.add_watched_resource(T1, C10, "blog", "https://a").unwrap();
        registry.subscribe(T1, BOB, "blog").unwrap();

        assert!(!registry.forget_subscriber(T1, BOB));
        registry.unsubscribe(T1, BOB, "blog").unwrap();
        assert!(registry.forget_subscriber(T1, BOB));
        assert!(registry.tenant(T1).unwrap().subscriber(BOB).is_none());

        assert!(!registry.retire_tenant(T1));
        registry.provision_tenant(TenantId(9));
        assert!(registry.retire_tenant(TenantId(9)));
        assert!(registry.tenant(TenantId(9)).is_none());
    }
}
