//! In-memory joysticks, game pads and DS4 controllers.
//!
//! Allows tests (and the monitor's virtual device mode) to drive providers
//! without any vendor API.  Every handle is cheap to clone and shares state,
//! so a test keeps one clone to inject input while the provider owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use iowrap_core::{BufferedSource, RawSample, SnapshotSource, SourceError};
use uuid::Uuid;

use super::{
    touchpad_offsets, Ds4Api, Ds4Sources, Ds4State, GamepadApi, GamepadSource, GamepadState, JoystickApi,
    JoystickDevice, RawDeviceInfo, StickType,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Joysticks ─────────────────────────────────────────────────────────────────

struct JoystickInner {
    info: RawDeviceInfo,
    axes: Vec<(u32, String)>,
    buttons: u32,
    povs: u32,
    queue: VecDeque<RawSample>,
    connected: bool,
    busy: bool,
    acquired: bool,
    acquire_count: usize,
    release_count: usize,
}

/// A virtual joystick with a buffered input queue.
#[derive(Clone)]
pub struct MockJoystick {
    inner: Arc<Mutex<JoystickInner>>,
}

impl MockJoystick {
    /// `axes` are `(native_offset, name)` pairs.
    pub fn new(info: RawDeviceInfo, axes: Vec<(u32, String)>, buttons: u32, povs: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(JoystickInner {
                info,
                axes,
                buttons,
                povs,
                queue: VecDeque::new(),
                connected: true,
                busy: false,
                acquired: false,
                acquire_count: 0,
                release_count: 0,
            })),
        }
    }

    /// A generic stick with X/Y axes, `buttons` buttons and one hat.
    pub fn generic(product_name: &str, vendor_id: u16, product_id: u16, buttons: u32) -> Self {
        let info = RawDeviceInfo {
            unique_id: Uuid::new_v4(),
            product_name: product_name.to_string(),
            device_type: StickType::Joystick,
            vendor_id,
            product_id,
        };
        let axes = vec![(0, "X Axis".to_string()), (4, "Y Axis".to_string())];
        Self::new(info, axes, buttons, 1)
    }

    pub fn info(&self) -> RawDeviceInfo {
        lock(&self.inner).info.clone()
    }

    /// Queues a raw sample, as if the hardware reported it.
    pub fn inject(&self, offset: u32, value: i32) {
        lock(&self.inner).queue.push_back(RawSample::new(offset, value));
    }

    /// Marks the device as removed; the next read reports disconnection.
    pub fn unplug(&self) {
        lock(&self.inner).connected = false;
    }

    /// Makes acquisition fail as if another application held the device.
    pub fn set_busy(&self, busy: bool) {
        lock(&self.inner).busy = busy;
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    pub fn is_acquired(&self) -> bool {
        lock(&self.inner).acquired
    }

    pub fn acquire_count(&self) -> usize {
        lock(&self.inner).acquire_count
    }

    pub fn release_count(&self) -> usize {
        lock(&self.inner).release_count
    }
}

impl BufferedSource for MockJoystick {
    fn acquire(&mut self) -> Result<(), SourceError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(SourceError::Unavailable("device not attached".to_string()));
        }
        if inner.busy {
            return Err(SourceError::Unavailable("device in use".to_string()));
        }
        inner.acquired = true;
        inner.acquire_count += 1;
        inner.queue.clear();
        Ok(())
    }

    fn release(&mut self) {
        let mut inner = lock(&self.inner);
        inner.acquired = false;
        inner.release_count += 1;
    }

    fn poll_buffered(&mut self) -> Result<Vec<RawSample>, SourceError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(SourceError::Disconnected);
        }
        Ok(inner.queue.drain(..).collect())
    }
}

impl JoystickDevice for MockJoystick {
    fn button_count(&self) -> u32 {
        lock(&self.inner).buttons
    }

    fn pov_count(&self) -> u32 {
        lock(&self.inner).povs
    }

    fn object_name(&self, offset: u32) -> Option<String> {
        lock(&self.inner)
            .axes
            .iter()
            .find(|(o, _)| *o == offset)
            .map(|(_, name)| name.clone())
    }
}

/// A joystick API over a mutable list of [`MockJoystick`]s.
#[derive(Clone, Default)]
pub struct MockJoystickApi {
    devices: Arc<Mutex<Vec<MockJoystick>>>,
    fail_enumeration: Arc<Mutex<bool>>,
}

impl MockJoystickApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plug(&self, device: MockJoystick) {
        lock(&self.devices).push(device);
    }

    /// Detaches the device and removes it from enumeration.
    pub fn unplug(&self, unique_id: &Uuid) {
        let mut devices = lock(&self.devices);
        for device in devices.iter().filter(|d| &d.info().unique_id == unique_id) {
            device.unplug();
        }
        devices.retain(|d| d.is_connected());
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        *lock(&self.fail_enumeration) = fail;
    }
}

impl JoystickApi for MockJoystickApi {
    fn devices(&self) -> Result<Vec<RawDeviceInfo>, SourceError> {
        if *lock(&self.fail_enumeration) {
            return Err(SourceError::Unavailable("enumeration failed".to_string()));
        }
        Ok(lock(&self.devices).iter().map(MockJoystick::info).collect())
    }

    fn open(&self, unique_id: &Uuid) -> Result<Box<dyn JoystickDevice>, SourceError> {
        lock(&self.devices)
            .iter()
            .find(|d| &d.info().unique_id == unique_id)
            .map(|d| Box::new(d.clone()) as Box<dyn JoystickDevice>)
            .ok_or_else(|| SourceError::Unavailable(format!("no device {unique_id}")))
    }
}

// ── Game pads ─────────────────────────────────────────────────────────────────

/// Number of slots the game-pad API exposes.
pub const GAMEPAD_SLOTS: u32 = 4;

#[derive(Default)]
struct PadInner {
    state: GamepadState,
    connected: bool,
    acquire_count: usize,
    release_count: usize,
}

/// One virtual game-pad slot.
#[derive(Clone, Default)]
pub struct MockGamepad {
    inner: Arc<Mutex<PadInner>>,
}

impl MockGamepad {
    pub fn set_state(&self, state: GamepadState) {
        lock(&self.inner).state = state;
    }

    pub fn update(&self, f: impl FnOnce(&mut GamepadState)) {
        f(&mut lock(&self.inner).state);
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.inner).connected = connected;
    }

    pub fn acquire_count(&self) -> usize {
        lock(&self.inner).acquire_count
    }

    pub fn release_count(&self) -> usize {
        lock(&self.inner).release_count
    }
}

impl SnapshotSource for MockGamepad {
    type State = GamepadState;

    fn acquire(&mut self) -> Result<(), SourceError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(SourceError::Unavailable("pad not connected".to_string()));
        }
        inner.acquire_count += 1;
        Ok(())
    }

    fn release(&mut self) {
        lock(&self.inner).release_count += 1;
    }

    fn snapshot(&mut self) -> Result<GamepadState, SourceError> {
        let inner = lock(&self.inner);
        if !inner.connected {
            return Err(SourceError::Disconnected);
        }
        Ok(inner.state)
    }
}

/// Four fixed [`MockGamepad`] slots, all disconnected initially.
#[derive(Clone)]
pub struct MockGamepadApi {
    slots: Arc<[MockGamepad]>,
}

impl MockGamepadApi {
    pub fn new() -> Self {
        Self {
            slots: (0..GAMEPAD_SLOTS).map(|_| MockGamepad::default()).collect(),
        }
    }

    /// The pad in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= GAMEPAD_SLOTS`.
    pub fn pad(&self, slot: u32) -> MockGamepad {
        self.slots[slot as usize].clone()
    }
}

impl Default for MockGamepadApi {
    fn default() -> Self {
        Self::new()
    }
}

impl GamepadApi for MockGamepadApi {
    fn is_connected(&self, slot: u32) -> bool {
        self.slots
            .get(slot as usize)
            .is_some_and(|pad| lock(&pad.inner).connected)
    }

    fn open(&self, slot: u32) -> Result<GamepadSource, SourceError> {
        self.slots
            .get(slot as usize)
            .map(|pad| Box::new(pad.clone()) as GamepadSource)
            .ok_or_else(|| SourceError::Unavailable(format!("no slot {slot}")))
    }
}

// ── DS4 controllers ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Ds4Inner {
    state: Ds4State,
    touches: VecDeque<RawSample>,
    connected: bool,
    touchpad_busy: bool,
    acquired: bool,
    touchpad_acquired: bool,
    acquire_count: usize,
    release_count: usize,
}

/// One virtual DS4 slot.  Cloning shares the controller.
#[derive(Clone, Default)]
pub struct MockDs4 {
    inner: Arc<Mutex<Ds4Inner>>,
}

impl MockDs4 {
    pub fn update(&self, f: impl FnOnce(&mut Ds4State)) {
        f(&mut lock(&self.inner).state);
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.inner).connected = connected;
    }

    /// Makes the touchpad refuse acquisition while the sticks still accept it.
    pub fn set_touchpad_busy(&self, busy: bool) {
        lock(&self.inner).touchpad_busy = busy;
    }

    /// Queues one finger movement, as the touchpad reports it.
    pub fn touch(&self, dx: i32, dy: i32) {
        let mut inner = lock(&self.inner);
        inner.touches.push_back(RawSample::new(touchpad_offsets::DELTA_X, dx));
        inner.touches.push_back(RawSample::new(touchpad_offsets::DELTA_Y, dy));
    }

    pub fn is_acquired(&self) -> bool {
        let inner = lock(&self.inner);
        inner.acquired || inner.touchpad_acquired
    }

    pub fn acquire_count(&self) -> usize {
        lock(&self.inner).acquire_count
    }

    pub fn release_count(&self) -> usize {
        lock(&self.inner).release_count
    }
}

impl SnapshotSource for MockDs4 {
    type State = Ds4State;

    fn acquire(&mut self) -> Result<(), SourceError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(SourceError::Unavailable("controller not connected".to_string()));
        }
        inner.acquired = true;
        inner.acquire_count += 1;
        Ok(())
    }

    fn release(&mut self) {
        let mut inner = lock(&self.inner);
        inner.acquired = false;
        inner.release_count += 1;
    }

    fn snapshot(&mut self) -> Result<Ds4State, SourceError> {
        let inner = lock(&self.inner);
        if !inner.connected {
            return Err(SourceError::Disconnected);
        }
        Ok(inner.state)
    }
}

/// The touchpad half of a [`MockDs4`].
struct MockTouchpad(MockDs4);

impl BufferedSource for MockTouchpad {
    fn acquire(&mut self) -> Result<(), SourceError> {
        let mut inner = lock(&self.0.inner);
        if inner.touchpad_busy {
            return Err(SourceError::Unavailable("touchpad in use".to_string()));
        }
        inner.touchpad_acquired = true;
        inner.touches.clear();
        Ok(())
    }

    fn release(&mut self) {
        lock(&self.0.inner).touchpad_acquired = false;
    }

    fn poll_buffered(&mut self) -> Result<Vec<RawSample>, SourceError> {
        let mut inner = lock(&self.0.inner);
        if !inner.connected {
            return Err(SourceError::Disconnected);
        }
        Ok(inner.touches.drain(..).collect())
    }
}

/// Fixed [`MockDs4`] slots, all disconnected initially.
#[derive(Clone)]
pub struct MockDs4Api {
    slots: Arc<[MockDs4]>,
}

impl MockDs4Api {
    pub fn new() -> Self {
        Self {
            slots: (0..GAMEPAD_SLOTS).map(|_| MockDs4::default()).collect(),
        }
    }

    /// The controller in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= GAMEPAD_SLOTS`.
    pub fn controller(&self, slot: u32) -> MockDs4 {
        self.slots[slot as usize].clone()
    }
}

impl Default for MockDs4Api {
    fn default() -> Self {
        Self::new()
    }
}

impl Ds4Api for MockDs4Api {
    fn is_connected(&self, slot: u32) -> bool {
        self.slots
            .get(slot as usize)
            .is_some_and(|pad| lock(&pad.inner).connected)
    }

    fn open(&self, slot: u32) -> Result<Ds4Sources, SourceError> {
        let pad = self
            .slots
            .get(slot as usize)
            .ok_or_else(|| SourceError::Unavailable(format!("no slot {slot}")))?;
        Ok(Ds4Sources {
            state: Box::new(pad.clone()),
            touchpad: Box::new(MockTouchpad(pad.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_joystick_queues_until_polled() {
        // Arrange
        let mut stick = MockJoystick::generic("Stick", 0x1234, 0x0001, 4);
        stick.acquire().unwrap();

        // Act
        stick.inject(48, 128);
        stick.inject(0, 0);
        let first = stick.poll_buffered().unwrap();
        let second = stick.poll_buffered().unwrap();

        // Assert
        assert_eq!(first, vec![RawSample::new(48, 128), RawSample::new(0, 0)]);
        assert!(second.is_empty());
    }

    #[test]
    fn test_mock_joystick_unplug_reports_disconnect() {
        let mut stick = MockJoystick::generic("Stick", 0x1234, 0x0001, 4);
        stick.acquire().unwrap();

        stick.unplug();

        assert_eq!(stick.poll_buffered(), Err(SourceError::Disconnected));
    }

    #[test]
    fn test_mock_joystick_busy_refuses_acquire() {
        let mut stick = MockJoystick::generic("Stick", 0x1234, 0x0001, 4);
        stick.set_busy(true);

        assert!(stick.acquire().is_err());
        assert_eq!(stick.acquire_count(), 0);
    }

    #[test]
    fn test_mock_joystick_api_unplug_removes_from_enumeration() {
        let api = MockJoystickApi::new();
        let stick = MockJoystick::generic("Stick", 0x1234, 0x0001, 4);
        let id = stick.info().unique_id;
        api.plug(stick.clone());

        api.unplug(&id);

        assert!(api.devices().unwrap().is_empty());
        assert!(!stick.is_connected());
        assert!(api.open(&id).is_err());
    }

    #[test]
    fn test_mock_gamepad_api_slots_start_disconnected() {
        let api = MockGamepadApi::new();

        assert!((0..GAMEPAD_SLOTS).all(|slot| !api.is_connected(slot)));
        assert!(!api.is_connected(GAMEPAD_SLOTS));
    }

    #[test]
    fn test_mock_gamepad_snapshot_follows_updates() {
        let api = MockGamepadApi::new();
        api.pad(1).set_connected(true);
        let mut source = api.open(1).unwrap();
        source.acquire().unwrap();

        api.pad(1).update(|s| s.left_trigger = 200);

        assert_eq!(source.snapshot().unwrap().left_trigger, 200);
        assert_eq!(api.pad(1).acquire_count(), 1);
    }

    #[test]
    fn test_mock_ds4_touch_queues_x_then_y() {
        // Arrange
        let api = MockDs4Api::new();
        api.controller(0).set_connected(true);
        let mut sources = api.open(0).unwrap();
        sources.touchpad.acquire().unwrap();

        // Act
        api.controller(0).touch(4, -2);
        let moves = sources.touchpad.poll_buffered().unwrap();

        // Assert
        assert_eq!(
            moves,
            vec![
                RawSample::new(touchpad_offsets::DELTA_X, 4),
                RawSample::new(touchpad_offsets::DELTA_Y, -2)
            ]
        );
        assert!(sources.touchpad.poll_buffered().unwrap().is_empty());
    }
}
