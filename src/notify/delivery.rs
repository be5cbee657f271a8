//! The host-side delivery seam.

use crate::error::Result;
use crate::graph::ChannelId;
use async_trait::async_trait;
use std::future::Future;

/// Posts a finished notification to a channel.
///
/// Implemented by the host (a chat bot, a webhook client, a test recorder).
/// A returned error is logged by the poll pass and not retried.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Post `text` to `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host could not deliver the message.
    async fn deliver(&self, channel: ChannelId, text: String) -> Result<()>;
}

/// [`Deliver`] backed by an async closure. Build one with [`delivery_fn`].
pub struct DeliverFn<F> {
    f: F,
}

/// Wrap an async closure as a [`Deliver`].
///
/// # Examples
///
/// ```rust
/// use sitewatch::notify::delivery_fn;
///
/// let stdout = delivery_fn(|channel, text| async move {
///     println!("#{channel}: {text}");
///     Ok(())
/// });
/// # let _ = stdout;
/// ```
pub fn delivery_fn<F, Fut>(f: F) -> DeliverFn<F>
where
    F: Fn(ChannelId, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    DeliverFn { f }
}

#[async_trait]
impl<F, Fut> Deliver for DeliverFn<F>
where
    F: Fn(ChannelId, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn deliver(&self, channel: ChannelId, text: String) -> Result<()> {
        (self.f)(channel, text).await
    }
}
