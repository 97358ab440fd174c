//! Errors raised by providers and the dispatch engine.

use thiserror::Error;

use crate::domain::descriptor::{BindingDescriptor, DeviceDescriptor, SubscriberId};

/// Error type for provider operations.
///
/// `UnknownDevice` and `InvalidBinding` are caller mistakes; the host-facing
/// API turns them into a `false` return.  `AcquisitionFailure` means the raw
/// source could not be opened and the caller may retry later.
/// `CallbackFault` never leaves the fan-out boundary: it is handed to the
/// registry's fault handler and delivery carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The descriptor is not part of the current enumeration.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceDescriptor),

    /// The binding is out of range for the device.
    #[error("invalid binding {binding} for device {device}")]
    InvalidBinding {
        device: DeviceDescriptor,
        binding: BindingDescriptor,
    },

    /// The raw sample source could not be opened (in use or removed).
    #[error("failed to acquire {device}: {reason}")]
    AcquisitionFailure {
        device: DeviceDescriptor,
        reason: String,
    },

    /// Bind mode was requested without a callback to receive the changes.
    #[error("bind mode on {0} needs a callback")]
    MissingBindCallback(DeviceDescriptor),

    /// A subscriber's callback panicked during dispatch.
    #[error("callback of subscriber {subscriber} faulted: {message}")]
    CallbackFault {
        subscriber: SubscriberId,
        message: String,
    },

    /// Device enumeration failed as a whole.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
}

/// Error type for raw sample sources (the per-technology collaborators).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The device could not be opened or read.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The device went away while it was being polled.
    #[error("device disconnected")]
    Disconnected,
}
