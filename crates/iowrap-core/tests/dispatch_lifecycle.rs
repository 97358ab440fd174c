//! Integration tests for the dispatch engine.
//!
//! These drive a [`ProviderEngine`] through the public API with a scripted
//! backend, covering acquisition lifetime, profile gating, bind mode and
//! fault isolation together.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use iowrap_core::{
    BindingCategory, BindingDescriptor, BindingReport, DetectionMode, DeviceBackend,
    DeviceDescriptor, DeviceReport, DeviceReportNode, DeviceSampler, InputProvider,
    InputSubscriptionRequest, ProfileActivationSet, ProviderEngine, ProviderError, ProviderReport,
    SourceError,
};
use uuid::Uuid;

type Changes = Vec<(BindingDescriptor, i16)>;

#[derive(Clone, Default)]
struct Script {
    ticks: Arc<Mutex<VecDeque<Changes>>>,
    acquired: Arc<AtomicUsize>,
}

impl Script {
    fn push(&self, changes: Changes) {
        self.ticks.lock().unwrap().push_back(changes);
    }
}

struct ScriptSampler(Script);

impl DeviceSampler for ScriptSampler {
    fn acquire(&mut self) -> Result<(), SourceError> {
        // Widen the window in which a racing subscriber could acquire twice.
        thread::sleep(Duration::from_millis(5));
        self.0.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {}

    fn sample(&mut self, changes: &mut Changes) -> Result<(), SourceError> {
        if let Some(tick) = self.0.ticks.lock().unwrap().pop_front() {
            changes.extend(tick);
        }
        Ok(())
    }
}

struct ScriptBackend(Script);

const BUTTONS: u32 = 8;

fn device() -> DeviceDescriptor {
    DeviceDescriptor::new("stick", 0)
}

impl DeviceBackend for ScriptBackend {
    type Sampler = ScriptSampler;

    fn provider_name(&self) -> &str {
        "script"
    }

    fn enumerate(&mut self) -> Result<ProviderReport, ProviderError> {
        let bindings = (0..BUTTONS)
            .map(|i| {
                BindingReport::new(
                    "Buttons",
                    (i + 1).to_string(),
                    BindingCategory::Momentary,
                    BindingDescriptor::button(i),
                )
            })
            .collect();
        let mut report = DeviceReport::new("Stick", device());
        report.nodes.push(DeviceReportNode::with_bindings("Buttons", bindings));
        let mut provider = ProviderReport::new("script", "Script", "Scripted devices");
        provider.insert(report);
        Ok(provider)
    }

    fn open(&mut self, _report: &DeviceReport) -> Result<ScriptSampler, ProviderError> {
        Ok(ScriptSampler(self.0.clone()))
    }
}

fn engine(profiles: ProfileActivationSet) -> (Arc<ProviderEngine<ScriptBackend>>, Script) {
    let script = Script::default();
    let engine = ProviderEngine::new(ScriptBackend(script.clone()), profiles).unwrap();
    (Arc::new(engine), script)
}

fn request(profile: Uuid, binding: BindingDescriptor, sink: Arc<Mutex<Vec<i16>>>) -> InputSubscriptionRequest {
    InputSubscriptionRequest::new(Uuid::new_v4(), profile, "script", device(), binding, move |v| {
        sink.lock().unwrap().push(v)
    })
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
fn test_concurrent_subscribes_acquire_exactly_once() {
    // Arrange
    let profiles = ProfileActivationSet::new();
    let (engine, script) = engine(profiles);
    let barrier = Arc::new(Barrier::new(BUTTONS as usize));

    // Act
    let handles: Vec<_> = (0..BUTTONS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.subscribe_input(request(Uuid::new_v4(), BindingDescriptor::button(i), Arc::default()))
            })
        })
        .collect();
    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Assert
    assert!(results.iter().all(|ok| *ok));
    assert_eq!(script.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_device_count(), 1);
}

#[test]
fn test_inactive_profile_is_suppressed_until_reactivated() {
    // Arrange
    let profiles = ProfileActivationSet::new();
    let profile = Uuid::new_v4();
    let (engine, script) = engine(profiles.clone());
    let sink = Arc::new(Mutex::new(Vec::new()));
    assert!(engine.subscribe_input(request(profile, BindingDescriptor::button(0), Arc::clone(&sink))));

    // Act: change while inactive
    script.push(vec![(BindingDescriptor::button(0), 1)]);
    assert!(wait_until(|| script.ticks.lock().unwrap().is_empty()));
    thread::sleep(Duration::from_millis(20));
    assert!(sink.lock().unwrap().is_empty());

    // Act: reactivate, then change again
    assert!(engine.set_profile_state(profile, true));
    script.push(vec![(BindingDescriptor::button(0), 0)]);

    // Assert: only the later change is delivered
    assert!(wait_until(|| !sink.lock().unwrap().is_empty()));
    assert_eq!(*sink.lock().unwrap(), vec![0]);
}

#[test]
fn test_bind_mode_suppresses_delivery_then_resumes() {
    // Arrange
    let profiles = ProfileActivationSet::new();
    let profile = Uuid::new_v4();
    profiles.set_state(profile, true);
    let (engine, script) = engine(profiles);
    let sink = Arc::new(Mutex::new(Vec::new()));
    assert!(engine.subscribe_input(request(profile, BindingDescriptor::button(2), Arc::clone(&sink))));
    let bound = Arc::new(Mutex::new(Vec::new()));
    let bound_cb = Arc::clone(&bound);

    // Act
    assert!(engine.set_detection_mode(
        DetectionMode::Bind,
        &device(),
        Some(Arc::new(move |_: &str, _: &DeviceDescriptor, b: &BindingReport, v: i16| {
            bound_cb.lock().unwrap().push((b.descriptor, v));
        })),
    ));
    script.push(vec![(BindingDescriptor::button(2), 1)]);
    assert!(wait_until(|| bound.lock().unwrap().len() == 1));
    assert!(engine.set_detection_mode(DetectionMode::Subscription, &device(), None));
    script.push(vec![(BindingDescriptor::button(2), 0)]);

    // Assert
    assert!(wait_until(|| sink.lock().unwrap().len() == 1));
    assert_eq!(*sink.lock().unwrap(), vec![0]);
    assert_eq!(bound.lock().unwrap()[0], (BindingDescriptor::button(2), 1));
}

#[test]
fn test_panicking_subscriber_does_not_block_others() {
    // Arrange
    let profiles = ProfileActivationSet::new();
    let profile = Uuid::new_v4();
    profiles.set_state(profile, true);
    let (engine, script) = engine(profiles);
    let sink = Arc::new(Mutex::new(Vec::new()));
    let faulty = InputSubscriptionRequest::new(
        Uuid::new_v4(),
        profile,
        "script",
        device(),
        BindingDescriptor::button(1),
        |_| panic!("subscriber bug"),
    );
    assert!(engine.subscribe_input(faulty));
    assert!(engine.subscribe_input(request(profile, BindingDescriptor::button(1), Arc::clone(&sink))));

    // Act
    script.push(vec![(BindingDescriptor::button(1), 1)]);
    script.push(vec![(BindingDescriptor::button(1), 0)]);

    // Assert
    assert!(wait_until(|| sink.lock().unwrap().len() == 2));
    assert_eq!(*sink.lock().unwrap(), vec![1, 0]);
}

#[test]
fn test_repeated_subscribe_overwrites_instead_of_duplicating() {
    let profiles = ProfileActivationSet::new();
    let profile = Uuid::new_v4();
    profiles.set_state(profile, true);
    let (engine, script) = engine(profiles);
    let sink = Arc::new(Mutex::new(Vec::new()));
    let req = request(profile, BindingDescriptor::button(0), Arc::clone(&sink));

    assert!(engine.subscribe_input(req.clone()));
    assert!(engine.subscribe_input(req.clone()));
    script.push(vec![(BindingDescriptor::button(0), 1)]);

    assert!(wait_until(|| !sink.lock().unwrap().is_empty()));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(*sink.lock().unwrap(), vec![1]);
    assert!(engine.unsubscribe_input(&req));
    assert!(!engine.unsubscribe_input(&req));
}
