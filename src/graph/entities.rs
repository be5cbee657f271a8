//! Entities of the watch graph and their ids.

use crate::monitor::Monitor;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Opaque id of a tenant, such as a chat server.
    TenantId
);
numeric_id!(
    /// Id of a notification channel. Unique across all tenants.
    ChannelId
);
numeric_id!(
    /// Id of a subscriber, scoped to a tenant.
    SubscriberId
);

/// A provisioned tenant.
///
/// Owns its subscribers outright; channels live in the registry arena and are
/// listed here by id.
#[derive(Debug)]
pub struct Tenant {
    pub(crate) id: TenantId,
    pub(crate) channels: BTreeSet<ChannelId>,
    pub(crate) subscribers: BTreeMap<SubscriberId, Subscriber>,
}

impl Tenant {
    pub(crate) fn new(id: TenantId) -> Self {
        Self {
            id,
            channels: BTreeSet::new(),
            subscribers: BTreeMap::new(),
        }
    }

    /// The tenant id.
    pub fn id(&self) -> TenantId {
        self.id
    }

    /// Ids of the tenant's channels, ascending.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().copied()
    }

    /// Look up a registered subscriber.
    pub fn subscriber(&self, id: SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(&id)
    }

    /// All registered subscribers, ascending by id.
    pub fn subscribers(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }
}

/// A channel notifications are posted to.
#[derive(Debug)]
pub struct NotificationChannel {
    pub(crate) id: ChannelId,
    pub(crate) tenant: TenantId,
    /// Resource name -> resource url (the arena key).
    pub(crate) resources: BTreeMap<String, String>,
}

impl NotificationChannel {
    pub(crate) fn new(id: ChannelId, tenant: TenantId) -> Self {
        Self {
            id,
            tenant,
            resources: BTreeMap::new(),
        }
    }

    /// The channel id.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The tenant this channel belongs to.
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Urls of the resources posted here, ordered by resource name.
    pub fn resource_urls(&self) -> impl Iterator<Item = &str> {
        self.resources.values().map(String::as_str)
    }

    /// Chat mention for this channel.
    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}

/// A web resource being watched for changes.
#[derive(Debug)]
pub struct WatchedResource {
    pub(crate) name: String,
    pub(crate) url: String,
    pub(crate) channel: ChannelId,
    pub(crate) tenant: TenantId,
    pub(crate) subscribers: BTreeSet<SubscriberId>,
    pub(crate) monitor: Monitor,
}

impl WatchedResource {
    /// Display name, unique within the tenant.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch url, unique across the graph.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The channel updates are posted to.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// The tenant owning the channel.
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Subscribers following this resource, ascending by id.
    pub fn subscribers(&self) -> impl Iterator<Item = SubscriberId> + '_ {
        self.subscribers.iter().copied()
    }

    /// The change detector attached to this resource.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Mutable access to the change detector.
    pub fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    /// Markdown link to the resource.
    pub fn hyperlink(&self) -> String {
        format!("[{}]({})", self.name, self.url)
    }
}

/// Someone following resources of one tenant.
#[derive(Debug)]
pub struct Subscriber {
    pub(crate) id: SubscriberId,
    pub(crate) tenant: TenantId,
    /// Urls of followed resources.
    pub(crate) follows: BTreeSet<String>,
}

impl Subscriber {
    pub(crate) fn new(id: SubscriberId, tenant: TenantId) -> Self {
        Self {
            id,
            tenant,
            follows: BTreeSet::new(),
        }
    }

    /// The subscriber id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// The tenant the subscriber is registered on.
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Urls of the resources this subscriber follows.
    pub fn follows(&self) -> impl Iterator<Item = &str> {
        self.follows.iter().map(String::as_str)
    }

    /// Chat mention for this subscriber.
    pub fn mention(&self) -> String {
        mention(self.id)
    }
}

/// Chat mention for a subscriber id.
pub fn mention(id: SubscriberId) -> String {
    format!("<@{}>", id)
}
