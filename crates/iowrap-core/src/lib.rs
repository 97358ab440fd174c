//! # iowrap-core
//!
//! Shared library for IOWrap: the domain model, the subscription and
//! dispatch engine every input provider runs on, and the wire protocol spoken
//! by network-attached input agents.
//!
//! This crate has no dependency on vendor SDKs, OS input APIs or sockets.
//! Backends plug in through the raw source traits in [`engine::source`] and
//! the [`DeviceBackend`] trait.
//!
//! # Architecture overview
//!
//! An application binds logical actions to physical inputs without caring
//! which technology produced them.  Each technology is a *provider*:
//!
//! - **`domain`**: descriptors, capability reports, subscription requests,
//!   the shared profile activation set and the device-order resolver.
//!
//! - **`engine`**: the per-device [`SubscriptionRegistry`], the
//!   [`DevicePollLoop`] that samples a device on its own thread and fires
//!   callbacks only on change, and [`ProviderEngine`], which turns any
//!   [`DeviceBackend`] into an [`InputProvider`].
//!
//! - **`protocol`**: datagram encoding for network agents
//!   (`[msg_type:1][payload_len:4][bincode payload]`).

pub mod domain;
pub mod engine;
pub mod protocol;

pub use domain::descriptor::{BindingDescriptor, BindingType, DeviceDescriptor, ProfileId, SubscriberId};
pub use domain::profile::ProfileActivationSet;
pub use domain::report::{BindingCategory, BindingReport, DeviceReport, DeviceReportNode, ProviderReport};
pub use domain::subscription::{
    BindModeCallback, DetectionMode, InputCallback, InputSubscriptionRequest, OutputSubscriptionRequest,
};
pub use engine::error::{ProviderError, SourceError};
pub use engine::poll_loop::{DevicePollLoop, LoopState, PollOptions};
pub use engine::provider::{DeviceBackend, InputProvider, OutputProvider, ProviderEngine};
pub use engine::registry::SubscriptionRegistry;
pub use engine::source::{BufferedSource, DeviceSampler, RawSample, SnapshotSource};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::AgentMessage;
