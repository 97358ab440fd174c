//! Identity types: which device, which input on that device, which subscriber.
//!
//! All three are immutable value types used as `HashMap` keys throughout the
//! engine, so they derive `Eq + Hash` and are cheap to clone.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the owner of a subscription.
///
/// The same logical subscriber may hold many subscriptions (one per binding),
/// but holds at most one per (device, binding) slot.
pub type SubscriberId = Uuid;

/// Identifies a profile: a group of subscriptions enabled and disabled together.
pub type ProfileId = Uuid;

/// Identifies one physical or virtual device within a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable string identity, e.g. `VID_044F&PID_B10A/0` or an agent hostname.
    pub handle: String,
    /// Distinguishes several devices that share a handle prefix (slot number,
    /// controller index). Zero when unused.
    pub instance: i32,
}

impl DeviceDescriptor {
    pub fn new(handle: impl Into<String>, instance: i32) -> Self {
        Self {
            handle: handle.into(),
            instance,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.handle, self.instance)
    }
}

/// The broad kind of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BindingType {
    Axis,
    Button,
    /// Point-of-view hat.
    Pov,
}

/// Identifies one logical input (or output) on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingDescriptor {
    pub binding_type: BindingType,
    /// Zero-based index within `binding_type`.
    pub index: u32,
    /// Secondary selector, e.g. a POV direction or a delta/event flavour.
    pub sub_index: u32,
}

impl BindingDescriptor {
    pub const fn new(binding_type: BindingType, index: u32, sub_index: u32) -> Self {
        Self {
            binding_type,
            index,
            sub_index,
        }
    }

    pub const fn axis(index: u32) -> Self {
        Self::new(BindingType::Axis, index, 0)
    }

    pub const fn button(index: u32) -> Self {
        Self::new(BindingType::Button, index, 0)
    }

    pub const fn pov(index: u32, sub_index: u32) -> Self {
        Self::new(BindingType::Pov, index, sub_index)
    }
}

impl fmt::Display for BindingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}/{}", self.binding_type, self.index, self.sub_index)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
