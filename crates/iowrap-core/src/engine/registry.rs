//! Per-device subscription registry and callback fan-out.
//!
//! The registry maps each [`BindingDescriptor`] to the subscribers listening
//! on it, keyed by subscriber id so a repeated subscribe overwrites rather
//! than duplicates.
//!
//! # Snapshot / swap
//!
//! The poll loop never iterates a registry that can change under it.  Edits
//! clone the current registry, modify the clone, and swap it in; the worker
//! picks up the new `Arc` on its next tick.  That is why the registry is
//! `Clone` and callbacks are `Arc`s.
//!
//! # Fault isolation
//!
//! Each callback runs inside `catch_unwind`.  A panicking subscriber is
//! reported to the fault handler and the remaining subscribers still get the
//! value.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::domain::descriptor::{BindingDescriptor, DeviceDescriptor, SubscriberId};
use crate::domain::profile::ProfileActivationSet;
use crate::domain::subscription::InputSubscriptionRequest;

use super::error::ProviderError;

/// Receives errors raised while dispatching (currently only callback faults).
pub type FaultHandler = Arc<dyn Fn(&ProviderError) + Send + Sync>;

/// Logs the fault with `tracing::error!`.
pub fn log_fault_handler() -> FaultHandler {
    Arc::new(|fault: &ProviderError| {
        if let ProviderError::CallbackFault { subscriber, message } = fault {
            error!(%subscriber, "subscriber callback faulted: {message}");
        } else {
            error!("dispatch fault: {fault}");
        }
    })
}

type SubscriberMap = HashMap<SubscriberId, InputSubscriptionRequest>;

/// Subscriptions for one device.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    device: DeviceDescriptor,
    inputs: HashMap<BindingDescriptor, SubscriberMap>,
    /// When set, only these bindings are accepted.
    allowed: Option<Arc<HashSet<BindingDescriptor>>>,
    profiles: ProfileActivationSet,
    on_fault: FaultHandler,
}

impl SubscriptionRegistry {
    /// Creates a registry that accepts any binding.
    pub fn new(device: DeviceDescriptor, profiles: ProfileActivationSet) -> Self {
        Self {
            device,
            inputs: HashMap::new(),
            allowed: None,
            profiles,
            on_fault: log_fault_handler(),
        }
    }

    /// Restricts accepted bindings to those the device actually reports.
    pub fn restricted_to(mut self, bindings: impl IntoIterator<Item = BindingDescriptor>) -> Self {
        self.allowed = Some(Arc::new(bindings.into_iter().collect()));
        self
    }

    pub fn with_fault_handler(mut self, on_fault: FaultHandler) -> Self {
        self.on_fault = on_fault;
        self
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Inserts `request`, replacing any earlier one from the same subscriber
    /// on the same binding.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidBinding`] when the registry is
    /// restricted and the binding is not part of the device.
    pub fn add(&mut self, request: InputSubscriptionRequest) -> Result<(), ProviderError> {
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(&request.binding) {
                return Err(ProviderError::InvalidBinding {
                    device: self.device.clone(),
                    binding: request.binding,
                });
            }
        }
        debug!(
            device = %self.device,
            binding = %request.binding,
            subscriber = %request.subscriber_id,
            "adding subscription"
        );
        self.inputs
            .entry(request.binding)
            .or_default()
            .insert(request.subscriber_id, request);
        Ok(())
    }

    /// Removes the subscriber's entry on `request.binding`.
    ///
    /// Returns `true` if an entry was removed.  Empty slots are pruned so
    /// [`has_subscriptions`](Self::has_subscriptions) stays accurate.
    pub fn remove(&mut self, request: &InputSubscriptionRequest) -> bool {
        let Some(slot) = self.inputs.get_mut(&request.binding) else {
            return false;
        };
        let removed = slot.remove(&request.subscriber_id).is_some();
        if slot.is_empty() {
            self.inputs.remove(&request.binding);
        }
        if removed {
            debug!(
                device = %self.device,
                binding = %request.binding,
                subscriber = %request.subscriber_id,
                "removed subscription"
            );
        }
        removed
    }

    pub fn has_subscriptions(&self) -> bool {
        self.inputs.values().any(|slot| !slot.is_empty())
    }

    pub fn is_subscribed(&self, binding: &BindingDescriptor, subscriber: &SubscriberId) -> bool {
        self.inputs
            .get(binding)
            .is_some_and(|slot| slot.contains_key(subscriber))
    }

    /// Subscriber ids registered on `binding`.
    pub fn subscribers(&self, binding: &BindingDescriptor) -> Vec<SubscriberId> {
        self.inputs
            .get(binding)
            .map(|slot| slot.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Bindings with at least one subscriber.
    pub fn bindings(&self) -> Vec<BindingDescriptor> {
        self.inputs.keys().copied().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.inputs.values().map(HashMap::len).sum()
    }

    /// Delivers `value` to every active subscriber of `binding`.
    ///
    /// Subscriptions whose profile is inactive are skipped.  Returns `true` if
    /// any invoked subscription asked to block the input.
    pub fn fire_callbacks(&self, binding: &BindingDescriptor, value: i16) -> bool {
        let Some(slot) = self.inputs.get(binding) else {
            return false;
        };
        let mut block = false;
        for request in slot.values() {
            if !self.profiles.is_active(&request.profile_id) {
                continue;
            }
            let callback = &request.callback;
            match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => {
                    if request.block {
                        block = true;
                    }
                }
                Err(payload) => {
                    let fault = ProviderError::CallbackFault {
                        subscriber: request.subscriber_id,
                        message: panic_message(payload.as_ref()),
                    };
                    (self.on_fault)(&fault);
                }
            }
        }
        block
    }
}

/// Extracts the text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
