//! Host-facing provider traits and the generic polling provider.
//!
//! [`InputProvider`] and [`OutputProvider`] are what a consuming application
//! talks to.  They are object-safe so a host can keep `Arc<dyn InputProvider>`
//! values keyed by provider name.
//!
//! [`ProviderEngine`] implements [`InputProvider`] for any [`DeviceBackend`]:
//! it owns the cached [`ProviderReport`], creates a [`DevicePollLoop`] lazily
//! on first use of a device, and discards the loop once nothing needs it.
//! All structural changes go through one mutex per provider.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::descriptor::{BindingDescriptor, DeviceDescriptor, ProfileId};
use crate::domain::profile::ProfileActivationSet;
use crate::domain::report::{DeviceReport, ProviderReport};
use crate::domain::subscription::{
    BindModeCallback, DetectionMode, InputSubscriptionRequest, OutputSubscriptionRequest,
};

use super::error::ProviderError;
use super::poll_loop::{DevicePollLoop, PollOptions, DEFAULT_POLL_INTERVAL};
use super::source::DeviceSampler;

/// A source of input devices.
pub trait InputProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Cached capability report; never touches hardware.
    fn get_input_list(&self) -> ProviderReport;

    fn get_input_device_report(&self, device: &DeviceDescriptor) -> Option<DeviceReport>;

    /// Returns `false` on unknown device, invalid binding or when the device
    /// could not be acquired.
    fn subscribe_input(&self, request: InputSubscriptionRequest) -> bool;

    fn unsubscribe_input(&self, request: &InputSubscriptionRequest) -> bool;

    /// Switches every binding of `device` between subscription delivery and
    /// bind mode.  `callback` is only used in [`DetectionMode::Bind`].
    fn set_detection_mode(
        &self,
        mode: DetectionMode,
        device: &DeviceDescriptor,
        callback: Option<BindModeCallback>,
    ) -> bool;

    fn set_profile_state(&self, profile: ProfileId, active: bool) -> bool;

    /// Re-enumerates devices.
    fn refresh_devices(&self);

    /// Periodic housekeeping: removes devices that went away, keeps network
    /// peers alive.
    fn refresh_live_state(&self);

    /// Tears everything down.  Idempotent.
    fn dispose(&self);
}

/// A sink for output devices.
pub trait OutputProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    fn get_output_list(&self) -> ProviderReport;

    fn get_output_device_report(&self, device: &DeviceDescriptor) -> Option<DeviceReport>;

    fn subscribe_output_device(&self, request: OutputSubscriptionRequest) -> bool;

    fn unsubscribe_output_device(&self, request: &OutputSubscriptionRequest) -> bool;

    fn set_output_state(
        &self,
        request: &OutputSubscriptionRequest,
        binding: &BindingDescriptor,
        state: i32,
    ) -> bool;
}

/// Per-technology half of a polling provider.
pub trait DeviceBackend: Send + 'static {
    type Sampler: DeviceSampler;

    fn provider_name(&self) -> &str;

    /// Lists the devices currently present.  Called at construction and on
    /// every refresh.
    fn enumerate(&mut self) -> Result<ProviderReport, ProviderError>;

    /// Creates an unacquired sampler for a device from the last enumeration.
    fn open(&mut self, report: &DeviceReport) -> Result<Self::Sampler, ProviderError>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Called once when the provider is disposed.
    fn shutdown(&mut self) {}
}

struct EngineState<B: DeviceBackend> {
    backend: B,
    report: ProviderReport,
    loops: HashMap<DeviceDescriptor, DevicePollLoop<B::Sampler>>,
    removals_tx: Sender<DeviceDescriptor>,
    removals_rx: Receiver<DeviceDescriptor>,
    disposed: bool,
}

impl<B: DeviceBackend> EngineState<B> {
    /// Drops loops whose workers reported their device gone.
    fn evict_removed(&mut self) {
        while let Ok(device) = self.removals_rx.try_recv() {
            if let Some(mut poll) = self.loops.remove(&device) {
                poll.dispose();
            }
            if self.report.device(&device).is_some() {
                self.report.devices.remove(&device.handle);
                info!(%device, "device removed");
            }
        }
    }

    fn loop_for(
        &mut self,
        device: &DeviceDescriptor,
        provider_name: &str,
        profiles: &ProfileActivationSet,
        options: PollOptions,
    ) -> Result<&mut DevicePollLoop<B::Sampler>, ProviderError> {
        if !self.loops.contains_key(device) {
            let report = self
                .report
                .device(device)
                .filter(|r| &r.descriptor == device)
                .cloned()
                .ok_or_else(|| ProviderError::UnknownDevice(device.clone()))?;
            let sampler = self.backend.open(&report)?;
            let poll = DevicePollLoop::new(provider_name, report, sampler, profiles.clone(), options)
                .with_removal_notice(self.removals_tx.clone());
            self.loops.insert(device.clone(), poll);
        }
        self.loops
            .get_mut(device)
            .ok_or_else(|| ProviderError::UnknownDevice(device.clone()))
    }

    /// Discards the device's loop once it has nothing left to do.
    fn discard_if_unneeded(&mut self, device: &DeviceDescriptor) {
        if self.loops.get(device).is_some_and(|poll| !poll.is_needed()) {
            if let Some(mut poll) = self.loops.remove(device) {
                poll.dispose();
            }
        }
    }
}

/// An [`InputProvider`] built from a [`DeviceBackend`].
pub struct ProviderEngine<B: DeviceBackend> {
    name: String,
    profiles: ProfileActivationSet,
    options: PollOptions,
    state: Mutex<EngineState<B>>,
}

impl<B: DeviceBackend> ProviderEngine<B> {
    /// Enumerates devices once and returns the ready provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Enumeration`] if the backend cannot list its
    /// devices.
    pub fn new(mut backend: B, profiles: ProfileActivationSet) -> Result<Self, ProviderError> {
        let name = backend.provider_name().to_string();
        let report = backend.enumerate()?;
        let options = PollOptions {
            interval: backend.poll_interval(),
            ..PollOptions::default()
        };
        info!(provider = %name, devices = report.devices.len(), "provider initialised");
        let (removals_tx, removals_rx) = mpsc::channel();
        Ok(Self {
            name,
            profiles,
            options,
            state: Mutex::new(EngineState {
                backend,
                report,
                loops: HashMap::new(),
                removals_tx,
                removals_rx,
                disposed: false,
            }),
        })
    }

    /// Overrides how long `stop` waits for a worker before giving up on it.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.options.stop_timeout = stop_timeout;
        self
    }

    /// Overrides the backend's poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.options.interval = interval;
        self
    }

    /// Number of devices with a live poll loop.
    pub fn active_device_count(&self) -> usize {
        self.lock().loops.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: DeviceBackend> InputProvider for ProviderEngine<B> {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn get_input_list(&self) -> ProviderReport {
        self.lock().report.clone()
    }

    fn get_input_device_report(&self, device: &DeviceDescriptor) -> Option<DeviceReport> {
        self.lock()
            .report
            .device(device)
            .filter(|r| &r.descriptor == device)
            .cloned()
    }

    fn subscribe_input(&self, request: InputSubscriptionRequest) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }
        state.evict_removed();

        let device = request.device.clone();
        let result = state
            .loop_for(&device, &self.name, &self.profiles, self.options)
            .and_then(|poll| poll.subscribe(request));
        match result {
            Ok(()) => true,
            Err(e) => {
                match &e {
                    ProviderError::AcquisitionFailure { .. } => warn!(provider = %self.name, "{e}"),
                    _ => debug!(provider = %self.name, "subscribe rejected: {e}"),
                }
                state.discard_if_unneeded(&device);
                false
            }
        }
    }

    fn unsubscribe_input(&self, request: &InputSubscriptionRequest) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }
        state.evict_removed();

        let Some(poll) = state.loops.get_mut(&request.device) else {
            return false;
        };
        let removed = poll.unsubscribe(request);
        state.discard_if_unneeded(&request.device);
        removed
    }

    fn set_detection_mode(
        &self,
        mode: DetectionMode,
        device: &DeviceDescriptor,
        callback: Option<BindModeCallback>,
    ) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }
        state.evict_removed();

        if mode == DetectionMode::Bind && callback.is_none() {
            warn!(provider = %self.name, %device, "bind mode requested without a callback");
            return false;
        }

        if mode == DetectionMode::Subscription && !state.loops.contains_key(device) {
            // Nothing is polling this device, so it is already in subscription mode.
            return state.report.device(device).is_some();
        }

        let result = state
            .loop_for(device, &self.name, &self.profiles, self.options)
            .and_then(|poll| poll.set_detection_mode(mode, callback));
        state.discard_if_unneeded(device);
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(provider = %self.name, %device, "failed to set detection mode: {e}");
                false
            }
        }
    }

    fn set_profile_state(&self, profile: ProfileId, active: bool) -> bool {
        self.profiles.set_state(profile, active);
        true
    }

    fn refresh_devices(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.evict_removed();

        match state.backend.enumerate() {
            Ok(report) => {
                state.loops.retain(|device, poll| {
                    let present = report.device(device).is_some_and(|r| &r.descriptor == device);
                    if !present {
                        info!(%device, "device no longer enumerated");
                        poll.dispose();
                    }
                    present
                });
                debug!(provider = %self.name, devices = report.devices.len(), "devices refreshed");
                state.report = report;
            }
            Err(e) => warn!(provider = %self.name, "refresh failed, keeping previous device list: {e}"),
        }
    }

    fn refresh_live_state(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.evict_removed();
        for poll in state.loops.values_mut() {
            if poll.reap_exited_worker() {
                debug!(device = %poll.device(), "reaped exited poll worker");
            }
        }
        state.loops.retain(|_, poll| poll.is_needed());
    }

    fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        for (_, mut poll) in state.loops.drain() {
            poll.dispose();
        }
        state.backend.shutdown();
        state.report.devices.clear();
        state.disposed = true;
        info!(provider = %self.name, "provider disposed");
    }
}

impl<B: DeviceBackend> Drop for ProviderEngine<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
