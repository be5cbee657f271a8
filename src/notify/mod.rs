//! Change notifications: composing the text and handing it to the host.
//!
//! The crate never talks to a chat service itself. A poll pass builds one
//! message per changed resource and passes it, with the target channel id, to
//! a [`Deliver`] implementation supplied by the host.

mod delivery;
mod message;

pub use delivery::{Deliver, DeliverFn, delivery_fn};
pub use message::{TRUNCATION_MARKER, compose, truncate};
