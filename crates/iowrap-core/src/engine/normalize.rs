//! Raw-to-logical value conversion.
//!
//! Every provider reports values as `i16`.  These functions reproduce the
//! conversions hardware-compatible providers have always used, so bindings
//! behave identically whichever backend produced them.

/// Logical centre of an unsigned 16-bit axis.
pub const AXIS_CENTER: i32 = 32767;

/// Full-scale value a digital joystick button reports when pressed.
pub const BUTTON_PRESSED_RAW: i32 = 128;

/// Raw POV value meaning "hat centred".
pub const POV_CENTERED: i32 = -1;

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Unsigned axis `[0, 65535]` centred on 32767, flipped into `i16`.
///
/// `32767 -> 0`, `0 -> 32767`, `65535 -> -32768`.
pub fn axis(raw: i32) -> i16 {
    clamp_i16(-(raw - AXIS_CENTER))
}

/// Digital button reporting `0..=128`: anything below full scale is released.
pub fn button(raw: i32) -> i16 {
    clamp_i16(raw / BUTTON_PRESSED_RAW)
}

/// Analog trigger byte `0..=255` stretched over the whole `i16` range.
pub fn trigger(raw: u8) -> i16 {
    clamp_i16(i32::from(raw) * 257 - 32768)
}

/// Relative movement is passed through untouched.
pub fn delta(raw: i16) -> i16 {
    raw
}

/// POV hat in hundredths of a degree, or centred.
///
/// Returns `-1` when centred, otherwise whole degrees `0..=359`.
pub fn pov(raw: i32) -> i16 {
    // DirectInput reports centred as 0xFFFF or 0xFFFFFFFF depending on width.
    if raw == POV_CENTERED || raw == 0xFFFF || raw < 0 {
        return -1;
    }
    clamp_i16((raw / 100) % 360)
}

/// A single bit of a digital button mask.
pub fn mask_bit(mask: u16, bit: u16) -> i16 {
    i16::from(mask & bit != 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_center_maps_to_zero() {
        assert_eq!(axis(32767), 0);
    }

    #[test]
    fn test_axis_minimum_maps_to_positive_full_scale() {
        assert_eq!(axis(0), 32767);
    }

    #[test]
    fn test_axis_maximum_maps_to_negative_full_scale() {
        assert_eq!(axis(65535), -32768);
    }

    #[test]
    fn test_axis_out_of_range_is_clamped() {
        assert_eq!(axis(70000), i16::MIN);
        assert_eq!(axis(-10), i16::MAX);
    }

    #[test]
    fn test_button_released_and_pressed() {
        assert_eq!(button(0), 0);
        assert_eq!(button(128), 1);
    }

    #[test]
    fn test_button_partial_values_truncate_to_released() {
        for raw in 1..128 {
            assert_eq!(button(raw), 0, "raw {raw} must read as released");
        }
    }

    #[test]
    fn test_trigger_spans_full_range() {
        assert_eq!(trigger(0), -32768);
        assert_eq!(trigger(255), 32767);
        assert_eq!(trigger(128), 128);
    }

    #[test]
    fn test_delta_is_unmodified() {
        assert_eq!(delta(-300), -300);
        assert_eq!(delta(i16::MAX), i16::MAX);
    }

    #[test]
    fn test_pov_centered_and_angles() {
        assert_eq!(pov(-1), -1);
        assert_eq!(pov(0xFFFF), -1);
        assert_eq!(pov(0), 0);
        assert_eq!(pov(9000), 90);
        assert_eq!(pov(31500), 315);
    }

    #[test]
    fn test_mask_bit() {
        assert_eq!(mask_bit(0b0101, 0b0100), 1);
        assert_eq!(mask_bit(0b0101, 0b0010), 0);
    }
}
