//! Domain graph of tenants, notification channels, watched resources and
//! subscribers.

mod entities;
mod registry;

pub use entities::{
    ChannelId, NotificationChannel, Subscriber, SubscriberId, Tenant, TenantId, WatchedResource,
    mention,
};
pub use registry::{DetachedResource, Registry};
