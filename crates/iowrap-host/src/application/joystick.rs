//! Buffered joystick provider.
//!
//! Generic joysticks are read through a buffered API that reports
//! `(native_offset, raw)` pairs.  Native offsets follow the classic
//! joystick state layout:
//!
//! ```text
//!  0.. 28  axes      X, Y, Z, Rx, Ry, Rz, Slider 0, Slider 1   (4 bytes each)
//! 32.. 44  POV hats  0..3                                       (4 bytes each)
//! 48..175  buttons   0..127                                     (1 byte each)
//! ```
//!
//! Device handles are `VID_xxxx&PID_xxxx/<ordinal>`.  The ordinal comes from
//! the OS calibration store when the device has an entry there; otherwise
//! the device keeps the first free ordinal it was given when first seen.

use std::collections::{BTreeSet, HashMap};

use iowrap_core::domain::device_order::{device_handle, DeviceOrderTable, UNRESOLVED_ORDINAL};
use iowrap_core::engine::normalize;
use iowrap_core::engine::source::BufferedSampler;
use iowrap_core::{
    BindingCategory, BindingDescriptor, BindingReport, BindingType, DeviceBackend,
    DeviceDescriptor, DeviceReport, DeviceReportNode, ProfileActivationSet, ProviderEngine,
    ProviderError, ProviderReport,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::infrastructure::sample_source::{CalibrationStore, JoystickApi, JoystickDevice, RawDeviceInfo};

pub const PROVIDER_NAME: &str = "Core_DirectInput";
const TITLE: &str = "DirectInput (Core)";
const DESCRIPTION: &str = "Allows reading of generic joysticks.";

/// X, Y, Z, Rx, Ry, Rz, Slider 0, Slider 1.
pub const MAX_AXES: u32 = 8;
pub const POV_BASE: u32 = 32;
pub const MAX_POVS: u32 = 4;
pub const BUTTON_BASE: u32 = 48;
pub const MAX_BUTTONS: u32 = 128;

/// Native offset of a binding.
pub fn native_offset(binding: &BindingDescriptor) -> u32 {
    match binding.binding_type {
        BindingType::Axis => binding.index * 4,
        BindingType::Pov => POV_BASE + binding.index * 4,
        BindingType::Button => BUTTON_BASE + binding.index,
    }
}

fn normalize_sample(binding: &BindingDescriptor, raw: i32) -> i16 {
    match binding.binding_type {
        BindingType::Axis => normalize::axis(raw),
        BindingType::Button => normalize::button(raw),
        BindingType::Pov => normalize::pov(raw),
    }
}

pub type JoystickSampler = BufferedSampler<Box<dyn JoystickDevice>>;

/// The joystick provider as seen by a host.
pub type JoystickProvider<A, C> = ProviderEngine<JoystickBackend<A, C>>;

/// Creates a ready joystick provider.
///
/// # Errors
///
/// Returns [`ProviderError::Enumeration`] if the joystick API cannot list
/// devices.
pub fn joystick_provider<A: JoystickApi, C: CalibrationStore>(
    api: A,
    calibration: C,
    profiles: ProfileActivationSet,
) -> Result<JoystickProvider<A, C>, ProviderError> {
    ProviderEngine::new(JoystickBackend::new(api, calibration), profiles)
}

pub struct JoystickBackend<A, C> {
    api: A,
    calibration: C,
    /// Handle to unique id, from the last enumeration.
    handles: HashMap<String, Uuid>,
    /// Ordinals handed out to devices without a calibration entry.
    first_seen: HashMap<Uuid, i32>,
}

impl<A: JoystickApi, C: CalibrationStore> JoystickBackend<A, C> {
    pub fn new(api: A, calibration: C) -> Self {
        Self {
            api,
            calibration,
            handles: HashMap::new(),
            first_seen: HashMap::new(),
        }
    }

    /// Assigns an ordinal to every device of one vendor/product pair.
    fn resolve_ordinals(&mut self, group: &[RawDeviceInfo]) -> Vec<i32> {
        let Some(first) = group.first() else {
            return Vec::new();
        };
        let records = self.calibration.calibration(first.vendor_id, first.product_id);
        let table = DeviceOrderTable::from_records(&records);

        let mut ordinals: Vec<i32> = group.iter().map(|d| table.ordinal_of(&d.unique_id)).collect();
        let mut taken: BTreeSet<i32> = ordinals.iter().copied().filter(|o| *o != UNRESOLVED_ORDINAL).collect();

        for (device, ordinal) in group.iter().zip(ordinals.iter_mut()) {
            if *ordinal != UNRESOLVED_ORDINAL {
                continue;
            }
            let previous = self.first_seen.get(&device.unique_id).copied();
            let chosen = match previous {
                Some(p) if !taken.contains(&p) => p,
                _ => (0..).find(|o| !taken.contains(o)).unwrap_or(0),
            };
            taken.insert(chosen);
            self.first_seen.insert(device.unique_id, chosen);
            *ordinal = chosen;
        }
        ordinals
    }

    fn build_report(info: &RawDeviceInfo, handle: &str, device: &dyn JoystickDevice) -> DeviceReport {
        let mut report = DeviceReport::new(info.product_name.clone(), DeviceDescriptor::new(handle, 0));

        let axes: Vec<BindingReport> = (0..MAX_AXES)
            .filter_map(|i| {
                let binding = BindingDescriptor::axis(i);
                device
                    .object_name(native_offset(&binding))
                    .map(|name| BindingReport::new("Axes", name, BindingCategory::Signed, binding))
            })
            .collect();
        if !axes.is_empty() {
            report.nodes.push(DeviceReportNode::with_bindings("Axes", axes));
        }

        let buttons: Vec<BindingReport> = (0..device.button_count().min(MAX_BUTTONS))
            .map(|i| {
                BindingReport::new(
                    "Buttons",
                    (i + 1).to_string(),
                    BindingCategory::Momentary,
                    BindingDescriptor::button(i),
                )
            })
            .collect();
        if !buttons.is_empty() {
            report.nodes.push(DeviceReportNode::with_bindings("Buttons", buttons));
        }

        let povs: Vec<BindingReport> = (0..device.pov_count().min(MAX_POVS))
            .map(|i| {
                BindingReport::new(
                    "POV Hats",
                    format!("POV {}", i + 1),
                    BindingCategory::Signed,
                    BindingDescriptor::pov(i, 0),
                )
            })
            .collect();
        if !povs.is_empty() {
            report.nodes.push(DeviceReportNode::with_bindings("POV Hats", povs));
        }
        report
    }
}

impl<A: JoystickApi, C: CalibrationStore> DeviceBackend for JoystickBackend<A, C> {
    type Sampler = JoystickSampler;

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn enumerate(&mut self) -> Result<ProviderReport, ProviderError> {
        let devices = self
            .api
            .devices()
            .map_err(|e| ProviderError::Enumeration(e.to_string()))?;

        // Group by vendor/product, keeping enumeration order inside a group.
        let mut groups: Vec<((u16, u16), Vec<RawDeviceInfo>)> = Vec::new();
        for info in devices.into_iter().filter(|d| d.device_type.is_stick()) {
            let key = (info.vendor_id, info.product_id);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(info),
                None => groups.push((key, vec![info])),
            }
        }

        let mut report = ProviderReport::new(PROVIDER_NAME, TITLE, DESCRIPTION);
        let mut handles = HashMap::new();
        for ((vendor_id, product_id), group) in &groups {
            let ordinals = self.resolve_ordinals(group);
            for (info, ordinal) in group.iter().zip(ordinals) {
                let handle = device_handle(*vendor_id, *product_id, ordinal);
                let device = match self.api.open(&info.unique_id) {
                    Ok(device) => device,
                    Err(e) => {
                        warn!(%handle, "skipping joystick that could not be opened: {e}");
                        continue;
                    }
                };
                debug!(%handle, name = %info.product_name, "found joystick");
                report.insert(Self::build_report(info, &handle, device.as_ref()));
                handles.insert(handle, info.unique_id);
            }
        }

        let present: BTreeSet<Uuid> = handles.values().copied().collect();
        self.first_seen.retain(|id, _| present.contains(id));
        self.handles = handles;
        info!(devices = report.devices.len(), "joystick enumeration complete");
        Ok(report)
    }

    fn open(&mut self, report: &DeviceReport) -> Result<JoystickSampler, ProviderError> {
        let device = &report.descriptor;
        let unique_id = self
            .handles
            .get(&device.handle)
            .ok_or_else(|| ProviderError::UnknownDevice(device.clone()))?;
        let source = self
            .api
            .open(unique_id)
            .map_err(|e| ProviderError::AcquisitionFailure {
                device: device.clone(),
                reason: e.to_string(),
            })?;
        let offsets = report
            .binding_descriptors()
            .into_iter()
            .map(|binding| (native_offset(&binding), binding))
            .collect();
        Ok(BufferedSampler::new(source, offsets, normalize_sample))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
