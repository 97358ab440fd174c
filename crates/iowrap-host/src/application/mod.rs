//! Application layer: the concrete providers and the controller that
//! routes calls to them.
//!
//! Providers here depend only on the traits of `iowrap_core` and the vendor
//! API seams in `infrastructure::sample_source`, so each one can be driven
//! entirely by in-memory devices.
//!
//! # Sub-modules
//!
//! - **`joystick`** – Buffered joystick provider.  Enumerates sticks,
//!   resolves stable handles from the calibration store and decodes native
//!   offsets into bindings.
//!
//! - **`gamepad`** – Snapshot provider for the four fixed game-pad slots.
//!
//! - **`ds4`** – DS4 controllers: snapshot sticks plus a buffered touchpad
//!   whose relative deltas fire on every movement.
//!
//! - **`esp8266`** – Network provider for UDP agents.  Each agent is both an
//!   input device and an output device.
//!
//! - **`io_controller`** – Keeps providers by name and forwards every
//!   consumer call to the provider the request names.

pub mod ds4;
pub mod esp8266;
pub mod gamepad;
pub mod io_controller;
pub mod joystick;
