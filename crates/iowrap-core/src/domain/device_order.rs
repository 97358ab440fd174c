//! Stable ordinals for devices that share a vendor/product id.
//!
//! Raw enumeration APIs hand devices back in hardware order, which changes
//! with USB ports and reboots.  The OS keeps a calibration record per
//! vendor/product pair listing each physical unit's unique id together with a
//! "joystick id".  The unit with the lowest joystick id is considered the
//! first one, regardless of how many ids are skipped or what order the
//! records are stored in.
//!
//! Two records may carry the same joystick id; the later one takes the next
//! free id.  After that the records are sorted and numbered `0..N-1`, and the
//! ordinal becomes part of the device handle so the same stick position keeps
//! the same handle across restarts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Returned by [`DeviceOrderTable::ordinal_of`] when the device has no record.
pub const UNRESOLVED_ORDINAL: i32 = -1;

/// One entry from the OS calibration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// The device's unique instance id.
    pub unique_id: Uuid,
    /// `None` when the record carries no id value; such records are skipped.
    pub joystick_id: Option<i32>,
}

impl CalibrationRecord {
    pub fn new(unique_id: Uuid, joystick_id: i32) -> Self {
        Self {
            unique_id,
            joystick_id: Some(joystick_id),
        }
    }
}

/// Ordered joystick-id table for one vendor/product pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceOrderTable {
    by_id: BTreeMap<i32, Uuid>,
}

impl DeviceOrderTable {
    /// Builds the table, resolving duplicate joystick ids by incrementing.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CalibrationRecord>) -> Self {
        let mut by_id = BTreeMap::new();
        for record in records {
            let Some(mut id) = record.joystick_id else {
                continue;
            };
            let mut free = true;
            while by_id.contains_key(&id) {
                match id.checked_add(1) {
                    Some(next) => id = next,
                    None => {
                        free = false;
                        break;
                    }
                }
            }
            if !free {
                warn!(unique_id = %record.unique_id, "no free joystick id left, record skipped");
                continue;
            }
            by_id.insert(id, record.unique_id);
        }
        Self { by_id }
    }

    /// Position of `unique_id` in joystick-id order, or [`UNRESOLVED_ORDINAL`].
    pub fn ordinal_of(&self, unique_id: &Uuid) -> i32 {
        self.by_id
            .values()
            .position(|id| id == unique_id)
            .and_then(|p| i32::try_from(p).ok())
            .unwrap_or(UNRESOLVED_ORDINAL)
    }

    /// The joystick ids after collision resolution, ascending.
    pub fn joystick_ids(&self) -> Vec<i32> {
        self.by_id.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// `VID_xxxx&PID_xxxx`, upper-case hex.
pub fn vid_pid(vendor_id: u16, product_id: u16) -> String {
    format!("VID_{vendor_id:04X}&PID_{product_id:04X}")
}

/// The full handle for one unit: `VID_xxxx&PID_xxxx/<ordinal>`.
pub fn device_handle(vendor_id: u16, product_id: u16, ordinal: i32) -> String {
    format!("{}/{ordinal}", vid_pid(vendor_id, product_id))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
