//! Raw sample source collaborators.
//!
//! Vendor input APIs (DirectInput-style joystick enumeration, XInput-style
//! game-pad slots, DS4 controllers with their touchpad, the OS joystick
//! calibration store) sit behind the traits
//! in this module.  Providers in the application layer only ever see these
//! traits, so every provider can be exercised with the in-memory devices in
//! [`mock`].
//!
//! # Testability
//!
//! [`mock::MockJoystickApi`], [`mock::MockGamepadApi`] and
//! [`mock::MockDs4Api`] hold shared device handles that tests use to inject samples, unplug devices and observe
//! acquire/release.

use iowrap_core::domain::device_order::CalibrationRecord;
use iowrap_core::{BufferedSource, SnapshotSource, SourceError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod mock;

// ── Joysticks ─────────────────────────────────────────────────────────────────

/// Device class reported by the joystick API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StickType {
    Joystick,
    Gamepad,
    FirstPerson,
    Flight,
    Driving,
    Supplemental,
    /// Keyboards, mice and anything else the API enumerates.
    Other,
}

impl StickType {
    /// Whether devices of this type are exposed by the joystick provider.
    pub fn is_stick(self) -> bool {
        !matches!(self, StickType::Other)
    }
}

/// Identity of one enumerated joystick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeviceInfo {
    /// Per-instance id assigned by the OS.
    pub unique_id: Uuid,
    pub product_name: String,
    pub device_type: StickType,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// An opened (not yet acquired) joystick.
pub trait JoystickDevice: BufferedSource {
    fn button_count(&self) -> u32;
    fn pov_count(&self) -> u32;
    /// Name of the object at a native offset, `None` if the device lacks it.
    fn object_name(&self, offset: u32) -> Option<String>;
}

/// Enumerates and opens joysticks.
pub trait JoystickApi: Send + 'static {
    /// Devices currently attached.
    fn devices(&self) -> Result<Vec<RawDeviceInfo>, SourceError>;

    fn open(&self, unique_id: &Uuid) -> Result<Box<dyn JoystickDevice>, SourceError>;
}

/// Reads joystick-id calibration entries for a vendor/product pair.
#[cfg_attr(test, mockall::automock)]
pub trait CalibrationStore: Send + 'static {
    fn calibration(&self, vendor_id: u16, product_id: u16) -> Vec<CalibrationRecord>;
}

/// A store with no entries; every device falls back to first-seen order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCalibration;

impl CalibrationStore for NoCalibration {
    fn calibration(&self, _vendor_id: u16, _product_id: u16) -> Vec<CalibrationRecord> {
        Vec::new()
    }
}

// ── Game pads ─────────────────────────────────────────────────────────────────

/// Digital button bits of [`GamepadState::buttons`].
pub mod gamepad_buttons {
    pub const DPAD_UP: u16 = 0x0001;
    pub const DPAD_DOWN: u16 = 0x0002;
    pub const DPAD_LEFT: u16 = 0x0004;
    pub const DPAD_RIGHT: u16 = 0x0008;
    pub const START: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LEFT_THUMB: u16 = 0x0040;
    pub const RIGHT_THUMB: u16 = 0x0080;
    pub const LEFT_SHOULDER: u16 = 0x0100;
    pub const RIGHT_SHOULDER: u16 = 0x0200;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

/// Full state of one game pad.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GamepadState {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

/// A game-pad slot opened for reading.
pub type GamepadSource = Box<dyn SnapshotSource<State = GamepadState>>;

/// Fixed-slot game-pad API.
pub trait GamepadApi: Send + 'static {
    fn is_connected(&self, slot: u32) -> bool;

    fn open(&self, slot: u32) -> Result<GamepadSource, SourceError>;
}

// ── DS4 controllers ───────────────────────────────────────────────────────────

/// Stick and trigger bytes of one DS4 controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ds4State {
    pub lx: u8,
    pub ly: u8,
    pub rx: u8,
    pub ry: u8,
    pub l2: u8,
    pub r2: u8,
}

impl Default for Ds4State {
    /// Sticks at rest report the middle of their byte range.
    fn default() -> Self {
        Self {
            lx: 128,
            ly: 128,
            rx: 128,
            ry: 128,
            l2: 0,
            r2: 0,
        }
    }
}

/// Offsets of the samples a touchpad queues for each movement event.
pub mod touchpad_offsets {
    pub const DELTA_X: u32 = 0;
    pub const DELTA_Y: u32 = 1;
}

pub type Ds4StateSource = Box<dyn SnapshotSource<State = Ds4State>>;

/// Queues one `DELTA_X` and one `DELTA_Y` sample per finger movement.
pub type TouchpadSource = Box<dyn BufferedSource>;

/// The two halves of an opened DS4 controller.
pub struct Ds4Sources {
    pub state: Ds4StateSource,
    pub touchpad: TouchpadSource,
}

/// DS4 controller API with fixed slots.
pub trait Ds4Api: Send + 'static {
    fn is_connected(&self, slot: u32) -> bool;

    fn open(&self, slot: u32) -> Result<Ds4Sources, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_other_devices_are_not_sticks() {
        for ty in [
            StickType::Joystick,
            StickType::Gamepad,
            StickType::FirstPerson,
            StickType::Flight,
            StickType::Driving,
            StickType::Supplemental,
        ] {
            assert!(ty.is_stick(), "{ty:?}");
        }
        assert!(!StickType::Other.is_stick());
    }

    #[test]
    fn test_ds4_sticks_rest_centred() {
        let state = Ds4State::default();

        assert_eq!((state.lx, state.ly, state.rx, state.ry), (128, 128, 128, 128));
        assert_eq!((state.l2, state.r2), (0, 0));
    }

    #[test]
    fn test_no_calibration_is_empty() {
        assert!(NoCalibration.calibration(0x044F, 0xB10A).is_empty());
    }
}
