//! The subscription and dispatch engine shared by every provider.
//!
//! - [`registry`]: per-device subscriptions and the callback fan-out.
//! - [`source`]: raw source traits and the samplers built on them.
//! - [`normalize`]: raw-to-`i16` conversions.
//! - [`poll_loop`]: the per-device acquisition state machine.
//! - [`provider`]: host-facing provider traits and the generic provider.

pub mod error;
pub mod normalize;
pub mod poll_loop;
pub mod provider;
pub mod registry;
pub mod source;
