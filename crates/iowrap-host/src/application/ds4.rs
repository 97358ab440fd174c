//! DS4 controller provider.
//!
//! A DS4 controller has two halves.  Sticks and triggers are read as a
//! snapshot and diffed like any game pad.  The touchpad instead reports
//! finger movement as relative deltas, one event per movement, so every
//! touch sample is delivered as it arrives: two equal moves in a row are
//! two changes.
//!
//! Touchpad bindings reuse axis indices 0 and 1 with sub-index 1, which is
//! how relative axes are told apart from absolute ones.

use std::collections::HashMap;
use std::time::Duration;

use iowrap_core::engine::normalize;
use iowrap_core::engine::source::{BufferedSampler, SnapshotSampler};
use iowrap_core::{
    BindingCategory, BindingDescriptor, BindingReport, BindingType, DeviceBackend, DeviceDescriptor,
    DeviceReport, DeviceReportNode, DeviceSampler, ProfileActivationSet, ProviderEngine, ProviderError,
    ProviderReport, SourceError,
};
use tracing::{debug, info};

use crate::infrastructure::sample_source::{
    touchpad_offsets, Ds4Api, Ds4State, Ds4StateSource, TouchpadSource,
};

pub const PROVIDER_NAME: &str = "Core_DS4WindowsApi";
const TITLE: &str = "DS4Windows";
const DESCRIPTION: &str = "Provides access to DS4 controllers.";

pub const SLOT_COUNT: u32 = 4;
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
const HANDLE_PREFIX: &str = "ds4";

/// Axis titles in binding-index order.
const AXES: [(&str, BindingCategory); 6] = [
    ("LS X", BindingCategory::Signed),
    ("LS Y", BindingCategory::Signed),
    ("RS X", BindingCategory::Signed),
    ("RS Y", BindingCategory::Signed),
    ("L2", BindingCategory::Unsigned),
    ("R2", BindingCategory::Unsigned),
];

pub const TOUCH_X: BindingDescriptor = BindingDescriptor::new(BindingType::Axis, 0, 1);
pub const TOUCH_Y: BindingDescriptor = BindingDescriptor::new(BindingType::Axis, 1, 1);

pub fn slot_handle(slot: u32) -> String {
    format!("{HANDLE_PREFIX}/{slot}")
}

fn slot_of(device: &DeviceDescriptor) -> Option<u32> {
    let slot: u32 = device.handle.strip_prefix(HANDLE_PREFIX)?.strip_prefix('/')?.parse().ok()?;
    (slot < SLOT_COUNT).then_some(slot)
}

/// Sticks and triggers are both bytes stretched over the whole `i16` range.
fn read_axis(state: &Ds4State, binding: &BindingDescriptor) -> i16 {
    let raw = match binding.index {
        0 => state.lx,
        1 => state.ly,
        2 => state.rx,
        3 => state.ry,
        4 => state.l2,
        5 => state.r2,
        _ => return 0,
    };
    normalize::trigger(raw)
}

fn normalize_touch(_binding: &BindingDescriptor, raw: i32) -> i16 {
    normalize::delta(raw.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16)
}

fn pad_report(slot: u32) -> DeviceReport {
    let mut report = DeviceReport::new(
        format!("DS4 Controller #{}", slot + 1),
        DeviceDescriptor::new(slot_handle(slot), slot as i32),
    );

    let axes = AXES
        .iter()
        .zip(0u32..)
        .map(|((title, category), i)| BindingReport::new("Axes", *title, *category, BindingDescriptor::axis(i)))
        .collect();
    report.nodes.push(DeviceReportNode::with_bindings("Axes", axes));

    let touch = vec![
        BindingReport::new("TouchPad", "Touch X", BindingCategory::Delta, TOUCH_X),
        BindingReport::new("TouchPad", "Touch Y", BindingCategory::Delta, TOUCH_Y),
    ];
    report.nodes.push(DeviceReportNode::with_bindings("TouchPad", touch));
    report
}

/// Drives both halves of one controller as a single device.
pub struct Ds4Sampler {
    sticks: SnapshotSampler<Ds4StateSource>,
    touchpad: BufferedSampler<TouchpadSource>,
}

impl DeviceSampler for Ds4Sampler {
    fn acquire(&mut self) -> Result<(), SourceError> {
        self.sticks.acquire()?;
        if let Err(e) = self.touchpad.acquire() {
            self.sticks.release();
            return Err(e);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.touchpad.release();
        self.sticks.release();
    }

    fn sample(&mut self, changes: &mut Vec<(BindingDescriptor, i16)>) -> Result<(), SourceError> {
        self.sticks.sample(changes)?;
        self.touchpad.sample(changes)
    }
}

pub type Ds4Provider<A> = ProviderEngine<Ds4Backend<A>>;

/// Creates a ready DS4 provider.
///
/// # Errors
///
/// Never fails today; the signature matches the other providers.
pub fn ds4_provider<A: Ds4Api>(api: A, profiles: ProfileActivationSet) -> Result<Ds4Provider<A>, ProviderError> {
    ProviderEngine::new(Ds4Backend::new(api), profiles)
}

pub struct Ds4Backend<A> {
    api: A,
}

impl<A: Ds4Api> Ds4Backend<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: Ds4Api> DeviceBackend for Ds4Backend<A> {
    type Sampler = Ds4Sampler;

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn enumerate(&mut self) -> Result<ProviderReport, ProviderError> {
        let mut report = ProviderReport::new(PROVIDER_NAME, TITLE, DESCRIPTION);
        for slot in (0..SLOT_COUNT).filter(|slot| self.api.is_connected(*slot)) {
            debug!(slot, "DS4 controller connected");
            report.insert(pad_report(slot));
        }
        info!(controllers = report.devices.len(), "DS4 enumeration complete");
        Ok(report)
    }

    fn open(&mut self, report: &DeviceReport) -> Result<Ds4Sampler, ProviderError> {
        let device = &report.descriptor;
        let slot = slot_of(device).ok_or_else(|| ProviderError::UnknownDevice(device.clone()))?;
        let sources = self
            .api
            .open(slot)
            .map_err(|e| ProviderError::AcquisitionFailure {
                device: device.clone(),
                reason: e.to_string(),
            })?;

        let (relative, absolute): (Vec<BindingDescriptor>, Vec<BindingDescriptor>) =
            report.binding_descriptors().into_iter().partition(|b| b.sub_index == 1);
        let offsets: HashMap<u32, BindingDescriptor> = relative
            .into_iter()
            .filter_map(|binding| match binding {
                TOUCH_X => Some((touchpad_offsets::DELTA_X, binding)),
                TOUCH_Y => Some((touchpad_offsets::DELTA_Y, binding)),
                _ => None,
            })
            .collect();
        Ok(Ds4Sampler {
            sticks: SnapshotSampler::new(sources.state, absolute, read_axis),
            touchpad: BufferedSampler::new(sources.touchpad, offsets, normalize_touch),
        })
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
