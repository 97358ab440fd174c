//! The per-device poll loop.
//!
//! A [`DevicePollLoop`] owns one device's acquisition lifecycle:
//!
//! ```text
//!            first subscribe / enter bind mode
//!   Idle ───────────────────────────────────────►  Polling
//!    ▲                                               │
//!    └──────── last unsubscribe (not in bind) ───────┘
//!
//!   any state ── dispose() ──►  Disposed (terminal)
//! ```
//!
//! While polling, a dedicated named thread samples the device, routes every
//! change either to the subscription registry or to the bind-mode callback,
//! and sleeps for the configured interval.
//!
//! # Ownership of the sampler
//!
//! The sampler is acquired on the caller's thread (so acquisition failures
//! come back synchronously), then moved into the worker.  The worker releases
//! it when it leaves the loop and hands it back through its `JoinHandle`, so
//! the source is never released while a tick may still be using it.
//!
//! # Stopping
//!
//! Stopping is cooperative: a `running` flag is cleared, then the caller waits
//! (bounded by `stop_timeout`) for the worker's `active` flag to drop before
//! joining.  A worker that never comes back is logged and leaked, and the loop
//! is marked disposed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::domain::descriptor::{BindingDescriptor, DeviceDescriptor};
use crate::domain::profile::ProfileActivationSet;
use crate::domain::report::{BindingReport, DeviceReport};
use crate::domain::subscription::{BindModeCallback, DetectionMode, InputSubscriptionRequest};

use super::error::{ProviderError, SourceError};
use super::registry::{panic_message, SubscriptionRegistry};
use super::source::DeviceSampler;

/// Default sleep between ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default bound on waiting for a worker to exit.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Lifecycle state of a [`DevicePollLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Disposed,
}

struct Detection {
    mode: DetectionMode,
    callback: Option<BindModeCallback>,
}

/// State shared between the loop handle and its worker thread.
struct Shared {
    provider_name: String,
    device: DeviceDescriptor,
    report: DeviceReport,
    registry: RwLock<Arc<SubscriptionRegistry>>,
    detection: Mutex<Detection>,
    running: AtomicBool,
    active: AtomicBool,
}

impl Shared {
    fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap_registry(&self, next: SubscriptionRegistry) -> Arc<SubscriptionRegistry> {
        let mut guard = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(next))
    }

    fn restore_registry(&self, previous: Arc<SubscriptionRegistry>) {
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = previous;
    }

    fn detection(&self) -> (DetectionMode, Option<BindModeCallback>) {
        let d = self.detection.lock().unwrap_or_else(PoisonError::into_inner);
        (d.mode, d.callback.clone())
    }

    /// Routes one tick's worth of changes, strictly in order.
    fn dispatch(&self, changes: &[(BindingDescriptor, i16)]) {
        match self.detection() {
            (DetectionMode::Bind, Some(callback)) => {
                for (binding, value) in changes {
                    let report = self
                        .report
                        .find_binding(binding)
                        .cloned()
                        .unwrap_or_else(|| BindingReport::untitled(*binding));
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        callback(&self.provider_name, &self.device, &report, *value)
                    }));
                    if let Err(payload) = result {
                        error!(
                            device = %self.device,
                            "bind mode callback panicked: {}",
                            panic_message(payload.as_ref())
                        );
                    }
                }
            }
            (DetectionMode::Bind, None) => {
                debug!(device = %self.device, "bind mode without callback; dropping {} changes", changes.len());
            }
            (DetectionMode::Subscription, _) => {
                let registry = self.registry();
                for (binding, value) in changes {
                    registry.fire_callbacks(binding, *value);
                }
            }
        }
    }
}

/// Drives one device's sampler on a background thread.
pub struct DevicePollLoop<S: DeviceSampler> {
    shared: Arc<Shared>,
    sampler: Option<S>,
    worker: Option<JoinHandle<S>>,
    state: LoopState,
    options: PollOptions,
    removals: Option<Sender<DeviceDescriptor>>,
}

impl<S: DeviceSampler> DevicePollLoop<S> {
    /// Creates an idle loop for the device described by `report`.
    ///
    /// Subscriptions are restricted to the bindings the report lists.
    pub fn new(
        provider_name: impl Into<String>,
        report: DeviceReport,
        sampler: S,
        profiles: ProfileActivationSet,
        options: PollOptions,
    ) -> Self {
        let device = report.descriptor.clone();
        let registry = SubscriptionRegistry::new(device.clone(), profiles)
            .restricted_to(report.binding_descriptors());
        Self {
            shared: Arc::new(Shared {
                provider_name: provider_name.into(),
                device,
                report,
                registry: RwLock::new(Arc::new(registry)),
                detection: Mutex::new(Detection {
                    mode: DetectionMode::Subscription,
                    callback: None,
                }),
                running: AtomicBool::new(false),
                active: AtomicBool::new(false),
            }),
            sampler: Some(sampler),
            worker: None,
            state: LoopState::Idle,
            options,
            removals: None,
        }
    }

    /// Sends the device descriptor on `tx` if the device disappears mid-poll.
    pub fn with_removal_notice(mut self, tx: Sender<DeviceDescriptor>) -> Self {
        self.removals = Some(tx);
        self
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.shared.device
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn detection_mode(&self) -> DetectionMode {
        self.shared.detection().0
    }

    pub fn has_subscriptions(&self) -> bool {
        self.shared.registry().has_subscriptions()
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.shared.registry()
    }

    /// Whether the loop must keep polling.
    pub fn is_needed(&self) -> bool {
        self.has_subscriptions() || self.detection_mode() == DetectionMode::Bind
    }

    /// `true` once the worker has left its loop on its own (device removed).
    pub fn worker_exited(&self) -> bool {
        self.state == LoopState::Polling && !self.shared.active.load(Ordering::Acquire)
    }

    /// Registers `request`, starting the worker if this is the first reason
    /// to poll.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::UnknownDevice`] if the loop is disposed or the
    ///   request names another device.
    /// - [`ProviderError::InvalidBinding`] if the device has no such binding.
    /// - [`ProviderError::AcquisitionFailure`] if the source cannot be opened;
    ///   the registry is left as it was.
    pub fn subscribe(&mut self, request: InputSubscriptionRequest) -> Result<(), ProviderError> {
        if self.state == LoopState::Disposed || request.device != self.shared.device {
            return Err(ProviderError::UnknownDevice(request.device));
        }
        let mut next = (*self.shared.registry()).clone();
        next.add(request)?;
        let previous = self.shared.swap_registry(next);
        if let Err(e) = self.ensure_running() {
            self.shared.restore_registry(previous);
            return Err(e);
        }
        Ok(())
    }

    /// Removes `request`; stops the worker once nothing needs it.
    pub fn unsubscribe(&mut self, request: &InputSubscriptionRequest) -> bool {
        if self.state == LoopState::Disposed {
            return false;
        }
        let mut next = (*self.shared.registry()).clone();
        let removed = next.remove(request);
        if removed {
            self.shared.swap_registry(next);
            self.stop_if_unneeded();
        }
        removed
    }

    /// Switches between normal dispatch and bind mode.
    ///
    /// Subscriptions are untouched either way.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingBindCallback`] for bind mode without a
    /// callback, and [`ProviderError::AcquisitionFailure`] if entering bind
    /// mode needs the worker and the source cannot be opened.
    pub fn set_detection_mode(
        &mut self,
        mode: DetectionMode,
        callback: Option<BindModeCallback>,
    ) -> Result<(), ProviderError> {
        if self.state == LoopState::Disposed {
            return Err(ProviderError::UnknownDevice(self.shared.device.clone()));
        }
        if mode == DetectionMode::Bind && callback.is_none() {
            return Err(ProviderError::MissingBindCallback(self.shared.device.clone()));
        }
        let previous = {
            let mut d = self
                .shared
                .detection
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let previous = (d.mode, d.callback.take());
            d.mode = mode;
            d.callback = match mode {
                DetectionMode::Bind => callback,
                DetectionMode::Subscription => None,
            };
            previous
        };
        info!(device = %self.shared.device, ?mode, "detection mode changed");

        match mode {
            DetectionMode::Bind => {
                if let Err(e) = self.ensure_running() {
                    let mut d = self
                        .shared
                        .detection
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    (d.mode, d.callback) = previous;
                    return Err(e);
                }
            }
            DetectionMode::Subscription => self.stop_if_unneeded(),
        }
        Ok(())
    }

    /// Joins a worker that has already exited on its own and returns the
    /// loop to `Idle`.  Returns `true` if there was one to reap.
    pub fn reap_exited_worker(&mut self) -> bool {
        if !self.worker_exited() {
            return false;
        }
        self.stop();
        true
    }

    /// Stops the worker (if any) and makes the loop unusable.  Idempotent.
    pub fn dispose(&mut self) {
        if self.state == LoopState::Disposed {
            return;
        }
        self.stop();
        self.sampler = None;
        self.state = LoopState::Disposed;
        debug!(device = %self.shared.device, "poll loop disposed");
    }

    fn stop_if_unneeded(&mut self) {
        if self.state == LoopState::Polling && !self.is_needed() {
            self.stop();
        }
    }

    fn ensure_running(&mut self) -> Result<(), ProviderError> {
        if self.state == LoopState::Polling {
            return Ok(());
        }
        let device = self.shared.device.clone();
        let Some(mut sampler) = self.sampler.take() else {
            return Err(ProviderError::AcquisitionFailure {
                device,
                reason: "sampler is no longer available".to_string(),
            });
        };

        if let Err(e) = sampler.acquire() {
            warn!(%device, "failed to acquire device: {e}");
            self.sampler = Some(sampler);
            return Err(ProviderError::AcquisitionFailure {
                device,
                reason: e.to_string(),
            });
        }
        info!(%device, "acquired device");

        self.shared.running.store(true, Ordering::Release);
        self.shared.active.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let interval = self.options.interval;
        let removals = self.removals.clone();

        let spawned = thread::Builder::new()
            .name(format!("iowrap-poll-{}", device.handle))
            .spawn(move || poll_worker(sampler, shared, interval, removals));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.state = LoopState::Polling;
                Ok(())
            }
            Err(e) => {
                error!(%device, "failed to spawn poll worker: {e}");
                self.shared.running.store(false, Ordering::Release);
                self.shared.active.store(false, Ordering::Release);
                self.state = LoopState::Disposed;
                Err(ProviderError::AcquisitionFailure {
                    device,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn stop(&mut self) {
        if self.state != LoopState::Polling {
            return;
        }
        self.shared.running.store(false, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            self.state = LoopState::Idle;
            return;
        };

        // A callback running on the worker asked us to stop: the worker will
        // leave its loop and release the source by itself.
        if worker.thread().id() == thread::current().id() {
            debug!(device = %self.shared.device, "stop requested from the poll worker itself");
            self.state = LoopState::Disposed;
            return;
        }

        let deadline = Instant::now() + self.options.stop_timeout;
        while self.shared.active.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                error!(
                    device = %self.shared.device,
                    timeout = ?self.options.stop_timeout,
                    "poll worker did not stop; leaking its source"
                );
                self.state = LoopState::Disposed;
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }

        match worker.join() {
            Ok(sampler) => {
                self.sampler = Some(sampler);
                self.state = LoopState::Idle;
                info!(device = %self.shared.device, "released device");
            }
            Err(payload) => {
                error!(
                    device = %self.shared.device,
                    "poll worker panicked: {}",
                    panic_message(payload.as_ref())
                );
                self.state = LoopState::Disposed;
            }
        }
    }
}

impl<S: DeviceSampler> Drop for DevicePollLoop<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Body of the worker thread.  Returns the (released) sampler.
fn poll_worker<S: DeviceSampler>(
    mut sampler: S,
    shared: Arc<Shared>,
    interval: Duration,
    removals: Option<Sender<DeviceDescriptor>>,
) -> S {
    debug!(device = %shared.device, "poll worker started");
    let mut changes = Vec::new();

    while shared.running.load(Ordering::Acquire) {
        changes.clear();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| sampler.sample(&mut changes)));
        let lost = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => {
                error!(
                    device = %shared.device,
                    "sampler panicked: {}",
                    panic_message(payload.as_ref())
                );
                Some(SourceError::Unavailable("sampler panicked".to_string()))
            }
        };

        if let Some(reason) = lost {
            warn!(device = %shared.device, "device lost during poll: {reason}");
            shared.running.store(false, Ordering::Release);
            if let Some(tx) = &removals {
                // The receiver only disappears when the provider is gone.
                let _ = tx.send(shared.device.clone());
            }
            break;
        }

        if !changes.is_empty() {
            shared.dispatch(&changes);
        }
        thread::sleep(interval);
    }

    sampler.release();
    shared.active.store(false, Ordering::Release);
    debug!(device = %shared.device, "poll worker stopped");
    sampler
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::{BindingCategory, DeviceReportNode};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use uuid::Uuid;

    /// Sampler fed from a shared queue of per-tick change lists.
    #[derive(Clone, Default)]
    struct ScriptedSampler {
        ticks: Arc<Mutex<VecDeque<Result<Vec<(BindingDescriptor, i16)>, SourceError>>>>,
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        fail_acquire: Arc<AtomicBool>,
    }

    impl ScriptedSampler {
        fn push(&self, changes: Vec<(BindingDescriptor, i16)>) {
            self.ticks.lock().unwrap().push_back(Ok(changes));
        }
        fn push_err(&self, e: SourceError) {
            self.ticks.lock().unwrap().push_back(Err(e));
        }
    }

    impl DeviceSampler for ScriptedSampler {
        fn acquire(&mut self) -> Result<(), SourceError> {
            if self.fail_acquire.load(Ordering::SeqCst) {
                return Err(SourceError::Unavailable("in use".to_string()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
        fn sample(&mut self, changes: &mut Vec<(BindingDescriptor, i16)>) -> Result<(), SourceError> {
            match self.ticks.lock().unwrap().pop_front() {
                Some(Ok(c)) => {
                    changes.extend(c);
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn report() -> DeviceReport {
        let mut report = DeviceReport::new("Pad", DeviceDescriptor::new("pad", 0));
        report.nodes.push(DeviceReportNode::with_bindings(
            "Buttons",
            vec![
                BindingReport::new("Buttons", "1", BindingCategory::Momentary, BindingDescriptor::button(0)),
                BindingReport::new("Buttons", "2", BindingCategory::Momentary, BindingDescriptor::button(1)),
            ],
        ));
        report
    }

    fn new_loop(sampler: ScriptedSampler, profiles: ProfileActivationSet) -> DevicePollLoop<ScriptedSampler> {
        DevicePollLoop::new("test", report(), sampler, profiles, PollOptions::default())
    }

    fn recording_request(
        profile: Uuid,
        binding: BindingDescriptor,
        sink: Arc<Mutex<Vec<i16>>>,
    ) -> InputSubscriptionRequest {
        InputSubscriptionRequest::new(
            Uuid::new_v4(),
            profile,
            "test",
            DeviceDescriptor::new("pad", 0),
            binding,
            move |v| sink.lock().unwrap().push(v),
        )
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_first_subscribe_acquires_and_polls() {
        // Arrange
        let profile = Uuid::new_v4();
        let profiles = ProfileActivationSet::new();
        profiles.set_state(profile, true);
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), profiles);
        let sink = Arc::new(Mutex::new(Vec::new()));

        // Act
        poll.subscribe(recording_request(profile, BindingDescriptor::button(0), Arc::clone(&sink)))
            .unwrap();
        sampler.push(vec![(BindingDescriptor::button(0), 1)]);

        // Assert
        assert_eq!(poll.state(), LoopState::Polling);
        assert!(wait_until(|| sink.lock().unwrap().as_slice() == [1]));
        assert_eq!(sampler.acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_subscription_does_not_reacquire() {
        let profiles = ProfileActivationSet::new();
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), profiles);
        let sink = Arc::new(Mutex::new(Vec::new()));

        poll.subscribe(recording_request(Uuid::new_v4(), BindingDescriptor::button(0), Arc::clone(&sink)))
            .unwrap();
        poll.subscribe(recording_request(Uuid::new_v4(), BindingDescriptor::button(1), sink))
            .unwrap();

        assert_eq!(sampler.acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_unsubscribe_releases_and_goes_idle() {
        // Arrange
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), ProfileActivationSet::new());
        let req = recording_request(Uuid::new_v4(), BindingDescriptor::button(0), Arc::new(Mutex::new(Vec::new())));
        poll.subscribe(req.clone()).unwrap();

        // Act
        let removed = poll.unsubscribe(&req);

        // Assert
        assert!(removed);
        assert_eq!(poll.state(), LoopState::Idle);
        assert_eq!(sampler.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_binding_is_rejected_without_acquiring() {
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), ProfileActivationSet::new());

        let result = poll.subscribe(recording_request(
            Uuid::new_v4(),
            BindingDescriptor::axis(7),
            Arc::new(Mutex::new(Vec::new())),
        ));

        assert!(matches!(result, Err(ProviderError::InvalidBinding { .. })));
        assert_eq!(poll.state(), LoopState::Idle);
        assert_eq!(sampler.acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_acquisition_failure_leaves_registry_unchanged() {
        // Arrange
        let sampler = ScriptedSampler::default();
        sampler.fail_acquire.store(true, Ordering::SeqCst);
        let mut poll = new_loop(sampler, ProfileActivationSet::new());

        // Act
        let result = poll.subscribe(recording_request(
            Uuid::new_v4(),
            BindingDescriptor::button(0),
            Arc::new(Mutex::new(Vec::new())),
        ));

        // Assert
        assert!(matches!(result, Err(ProviderError::AcquisitionFailure { .. })));
        assert!(!poll.has_subscriptions());
        assert_eq!(poll.state(), LoopState::Idle);
    }

    #[test]
    fn test_bind_mode_redirects_and_subscription_mode_resumes() {
        // Arrange
        let profile = Uuid::new_v4();
        let profiles = ProfileActivationSet::new();
        profiles.set_state(profile, true);
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), profiles);
        let sink = Arc::new(Mutex::new(Vec::new()));
        poll.subscribe(recording_request(profile, BindingDescriptor::button(0), Arc::clone(&sink)))
            .unwrap();
        let bound = Arc::new(Mutex::new(Vec::new()));
        let bound_cb = Arc::clone(&bound);

        // Act: bind mode
        poll.set_detection_mode(
            DetectionMode::Bind,
            Some(Arc::new(move |provider: &str, _: &DeviceDescriptor, b: &BindingReport, v: i16| {
                bound_cb.lock().unwrap().push((provider.to_string(), b.title.clone(), v));
            })),
        )
        .unwrap();
        sampler.push(vec![(BindingDescriptor::button(0), 1)]);
        assert!(wait_until(|| bound.lock().unwrap().len() == 1));

        // Act: back to subscriptions
        poll.set_detection_mode(DetectionMode::Subscription, None).unwrap();
        sampler.push(vec![(BindingDescriptor::button(0), 0)]);

        // Assert
        assert!(wait_until(|| sink.lock().unwrap().as_slice() == [0]));
        assert_eq!(bound.lock().unwrap()[0], ("test".to_string(), "1".to_string(), 1));
        assert!(poll.has_subscriptions());
    }

    #[test]
    fn test_bind_mode_without_subscriptions_starts_and_stops_worker() {
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), ProfileActivationSet::new());

        poll.set_detection_mode(DetectionMode::Bind, Some(Arc::new(|_: &str, _: &DeviceDescriptor, _: &BindingReport, _: i16| {})))
            .unwrap();
        assert_eq!(poll.state(), LoopState::Polling);

        poll.set_detection_mode(DetectionMode::Subscription, None).unwrap();
        assert_eq!(poll.state(), LoopState::Idle);
        assert_eq!(sampler.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bind_mode_without_callback_is_rejected() {
        // Arrange
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), ProfileActivationSet::new());

        // Act
        let result = poll.set_detection_mode(DetectionMode::Bind, None);

        // Assert
        assert!(matches!(result, Err(ProviderError::MissingBindCallback(_))));
        assert_eq!(poll.state(), LoopState::Idle);
        assert_eq!(sampler.acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect_stops_worker_and_sends_removal_notice() {
        // Arrange
        let sampler = ScriptedSampler::default();
        let (tx, rx) = mpsc::channel();
        let mut poll = new_loop(sampler.clone(), ProfileActivationSet::new()).with_removal_notice(tx);
        poll.subscribe(recording_request(
            Uuid::new_v4(),
            BindingDescriptor::button(0),
            Arc::new(Mutex::new(Vec::new())),
        ))
        .unwrap();

        // Act
        sampler.push_err(SourceError::Disconnected);

        // Assert
        let removed = rx.recv_timeout(Duration::from_secs(2)).expect("removal notice");
        assert_eq!(removed, DeviceDescriptor::new("pad", 0));
        assert!(wait_until(|| poll.worker_exited()));
        assert!(poll.reap_exited_worker());
        assert_eq!(sampler.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_is_idempotent_and_terminal() {
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), ProfileActivationSet::new());
        let req = recording_request(Uuid::new_v4(), BindingDescriptor::button(0), Arc::new(Mutex::new(Vec::new())));
        poll.subscribe(req.clone()).unwrap();

        poll.dispose();
        poll.dispose();

        assert_eq!(poll.state(), LoopState::Disposed);
        assert_eq!(sampler.released.load(Ordering::SeqCst), 1);
        assert!(matches!(poll.subscribe(req), Err(ProviderError::UnknownDevice(_))));
    }

    #[test]
    fn test_changes_in_one_tick_are_delivered_in_order() {
        let profile = Uuid::new_v4();
        let profiles = ProfileActivationSet::new();
        profiles.set_state(profile, true);
        let sampler = ScriptedSampler::default();
        let mut poll = new_loop(sampler.clone(), profiles);
        let sink = Arc::new(Mutex::new(Vec::new()));
        poll.subscribe(recording_request(profile, BindingDescriptor::button(0), Arc::clone(&sink)))
            .unwrap();

        sampler.push(vec![
            (BindingDescriptor::button(0), 1),
            (BindingDescriptor::button(0), 0),
            (BindingDescriptor::button(0), 1),
        ]);

        assert!(wait_until(|| sink.lock().unwrap().len() == 3));
        assert_eq!(*sink.lock().unwrap(), vec![1, 0, 1]);
    }
}
