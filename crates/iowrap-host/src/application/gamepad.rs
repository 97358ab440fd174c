//! Snapshot game-pad provider.
//!
//! The game-pad API exposes four fixed user slots and only ever reports the
//! whole pad state, so changes are found by diffing snapshots every 10ms.

use std::time::Duration;

use iowrap_core::engine::normalize;
use iowrap_core::engine::source::SnapshotSampler;
use iowrap_core::{
    BindingCategory, BindingDescriptor, BindingReport, BindingType, DeviceBackend,
    DeviceDescriptor, DeviceReport, DeviceReportNode, ProfileActivationSet, ProviderEngine,
    ProviderError, ProviderReport,
};
use tracing::{debug, info};

use crate::infrastructure::sample_source::{gamepad_buttons as bits, GamepadApi, GamepadSource, GamepadState};

pub const PROVIDER_NAME: &str = "Core_XInput";
const TITLE: &str = "XInput (Core)";
const DESCRIPTION: &str = "Reads Xbox 360 compatible game pads.";

pub const SLOT_COUNT: u32 = 4;
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
const HANDLE_PREFIX: &str = "xb360";

/// Axis titles in binding-index order.
const AXES: [(&str, BindingCategory); 6] = [
    ("LS X", BindingCategory::Signed),
    ("LS Y", BindingCategory::Signed),
    ("RS X", BindingCategory::Signed),
    ("RS Y", BindingCategory::Signed),
    ("LT", BindingCategory::Unsigned),
    ("RT", BindingCategory::Unsigned),
];

/// Button titles and mask bits in binding-index order.
const BUTTONS: [(&str, u16); 10] = [
    ("A", bits::A),
    ("B", bits::B),
    ("X", bits::X),
    ("Y", bits::Y),
    ("LB", bits::LEFT_SHOULDER),
    ("RB", bits::RIGHT_SHOULDER),
    ("LS", bits::LEFT_THUMB),
    ("RS", bits::RIGHT_THUMB),
    ("Back", bits::BACK),
    ("Start", bits::START),
];

/// D-pad directions in sub-index order.
const DPAD: [(&str, u16); 4] = [
    ("Up", bits::DPAD_UP),
    ("Right", bits::DPAD_RIGHT),
    ("Down", bits::DPAD_DOWN),
    ("Left", bits::DPAD_LEFT),
];

pub fn slot_handle(slot: u32) -> String {
    format!("{HANDLE_PREFIX}/{slot}")
}

fn slot_of(device: &DeviceDescriptor) -> Option<u32> {
    let slot: u32 = device.handle.strip_prefix(HANDLE_PREFIX)?.strip_prefix('/')?.parse().ok()?;
    (slot < SLOT_COUNT).then_some(slot)
}

/// Reads one binding out of a pad state.
fn read_binding(state: &GamepadState, binding: &BindingDescriptor) -> i16 {
    match (binding.binding_type, binding.index) {
        (BindingType::Axis, 0) => state.thumb_lx,
        (BindingType::Axis, 1) => state.thumb_ly,
        (BindingType::Axis, 2) => state.thumb_rx,
        (BindingType::Axis, 3) => state.thumb_ry,
        (BindingType::Axis, 4) => normalize::trigger(state.left_trigger),
        (BindingType::Axis, 5) => normalize::trigger(state.right_trigger),
        (BindingType::Button, i) => BUTTONS
            .get(i as usize)
            .map_or(0, |(_, bit)| normalize::mask_bit(state.buttons, *bit)),
        (BindingType::Pov, 0) => DPAD
            .get(binding.sub_index as usize)
            .map_or(0, |(_, bit)| normalize::mask_bit(state.buttons, *bit)),
        _ => 0,
    }
}

fn pad_report(slot: u32) -> DeviceReport {
    let mut report = DeviceReport::new(
        format!("Xbox Controller {}", slot + 1),
        DeviceDescriptor::new(slot_handle(slot), slot as i32),
    );

    let buttons = BUTTONS
        .iter()
        .zip(0u32..)
        .map(|((title, _), i)| {
            BindingReport::new("Buttons", *title, BindingCategory::Momentary, BindingDescriptor::button(i))
        })
        .collect();
    report.nodes.push(DeviceReportNode::with_bindings("Buttons", buttons));

    let axes = AXES
        .iter()
        .zip(0u32..)
        .map(|((title, category), i)| BindingReport::new("Axes", *title, *category, BindingDescriptor::axis(i)))
        .collect();
    report.nodes.push(DeviceReportNode::with_bindings("Axes", axes));

    let dpad = DPAD
        .iter()
        .zip(0u32..)
        .map(|((title, _), sub)| {
            BindingReport::new("DPad", *title, BindingCategory::Momentary, BindingDescriptor::pov(0, sub))
        })
        .collect();
    report.nodes.push(DeviceReportNode::with_bindings("DPad", dpad));
    report
}

pub type GamepadSampler = SnapshotSampler<GamepadSource>;

pub type GamepadProvider<A> = ProviderEngine<GamepadBackend<A>>;

/// Creates a ready game-pad provider.
///
/// # Errors
///
/// Never fails today; the signature matches the other providers.
pub fn gamepad_provider<A: GamepadApi>(
    api: A,
    profiles: ProfileActivationSet,
) -> Result<GamepadProvider<A>, ProviderError> {
    ProviderEngine::new(GamepadBackend::new(api), profiles)
}

pub struct GamepadBackend<A> {
    api: A,
}

impl<A: GamepadApi> GamepadBackend<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: GamepadApi> DeviceBackend for GamepadBackend<A> {
    type Sampler = GamepadSampler;

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn enumerate(&mut self) -> Result<ProviderReport, ProviderError> {
        let mut report = ProviderReport::new(PROVIDER_NAME, TITLE, DESCRIPTION);
        for slot in (0..SLOT_COUNT).filter(|slot| self.api.is_connected(*slot)) {
            debug!(slot, "game pad connected");
            report.insert(pad_report(slot));
        }
        info!(pads = report.devices.len(), "game pad enumeration complete");
        Ok(report)
    }

    fn open(&mut self, report: &DeviceReport) -> Result<GamepadSampler, ProviderError> {
        let device = &report.descriptor;
        let slot = slot_of(device).ok_or_else(|| ProviderError::UnknownDevice(device.clone()))?;
        let source = self
            .api
            .open(slot)
            .map_err(|e| ProviderError::AcquisitionFailure {
                device: device.clone(),
                reason: e.to_string(),
            })?;
        Ok(SnapshotSampler::new(source, report.binding_descriptors(), read_binding))
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
