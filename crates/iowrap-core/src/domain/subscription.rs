//! Subscription requests and the callback types the engine invokes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::descriptor::{BindingDescriptor, DeviceDescriptor, ProfileId, SubscriberId};
use super::report::BindingReport;

/// Receives the normalized value of a bound input each time it changes.
///
/// The binding's category decides the meaningful range; the carrier is always
/// `i16`.
pub type InputCallback = Arc<dyn Fn(i16) + Send + Sync>;

/// Receives every change on a device while it is in [`DetectionMode::Bind`]:
/// `(provider_name, device, binding, value)`.
pub type BindModeCallback =
    Arc<dyn Fn(&str, &DeviceDescriptor, &BindingReport, i16) + Send + Sync>;

/// Whether a device's changes go to subscribers or to a bind callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectionMode {
    #[default]
    Subscription,
    Bind,
}

/// A consumer's request to be told about one input.
#[derive(Clone)]
pub struct InputSubscriptionRequest {
    pub subscriber_id: SubscriberId,
    pub profile_id: ProfileId,
    pub provider_name: String,
    pub device: DeviceDescriptor,
    pub binding: BindingDescriptor,
    pub callback: InputCallback,
    /// Ask the provider to keep the input from reaching other consumers.
    pub block: bool,
}

impl InputSubscriptionRequest {
    pub fn new(
        subscriber_id: SubscriberId,
        profile_id: ProfileId,
        provider_name: impl Into<String>,
        device: DeviceDescriptor,
        binding: BindingDescriptor,
        callback: impl Fn(i16) + Send + Sync + 'static,
    ) -> Self {
        Self {
            subscriber_id,
            profile_id,
            provider_name: provider_name.into(),
            device,
            binding,
            callback: Arc::new(callback),
            block: false,
        }
    }

    pub fn blocking(mut self, block: bool) -> Self {
        self.block = block;
        self
    }
}

impl fmt::Debug for InputSubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSubscriptionRequest")
            .field("subscriber_id", &self.subscriber_id)
            .field("profile_id", &self.profile_id)
            .field("provider_name", &self.provider_name)
            .field("device", &self.device)
            .field("binding", &self.binding)
            .field("block", &self.block)
            .finish_non_exhaustive()
    }
}

/// A writer's claim on an output device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSubscriptionRequest {
    pub subscriber_id: SubscriberId,
    pub profile_id: ProfileId,
    pub provider_name: String,
    pub device: DeviceDescriptor,
}

impl OutputSubscriptionRequest {
    pub fn new(
        subscriber_id: SubscriberId,
        profile_id: ProfileId,
        provider_name: impl Into<String>,
        device: DeviceDescriptor,
    ) -> Self {
        Self {
            subscriber_id,
            profile_id,
            provider_name: provider_name.into(),
            device,
        }
    }
}
