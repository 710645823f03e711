//! Analog transform pipeline
//!
//! Pure value transforms plus the per-slot driver that applies them and
//! emits only changed destinations.

use super::{dpad, PadEvent, SlotState};
use crate::config::{button_bit, AxisRange, Config, ShoulderMode, TriggerMode, LEFT_Y, RIGHT_Y, TRIGGER_L, TRIGGER_R};
use crate::uinput::sys;

/// Which part of a raw slot value feeds a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisHalf {
    Full,
    Lower,
    Upper,
}

/// Press threshold above the destination minimum for binary triggers.
const BINARY_TRIGGER_MARGIN: i32 = 10;

/// Recenter a raw byte onto the signed range.
///
/// ```
/// assert_eq!(gcadapter_gw::mapping::axis::to_signed(128), 0);
/// assert_eq!(gcadapter_gw::mapping::axis::to_signed(0), -128);
/// ```
pub fn to_signed(raw: u8) -> i32 {
    raw as i32 - 128
}

/// Invert a full-range axis byte. Applying it twice returns the input.
pub fn flip_full(raw: u8) -> u8 {
    raw ^ 0xff
}

/// Invert a split axis byte within its half, preserving the sign bit so
/// the halves stay routed to their destinations.
pub fn flip_half(raw: u8) -> u8 {
    raw ^ 0x7f
}

/// Re-base a recentered value onto the slot's calibrated range.
///
/// A full axis passes through unchanged. The upper half is stretched onto
/// `[natural.min, natural.max]`; the lower half is sign-inverted and
/// stretched onto the byte-mirror of that range.
pub fn rebase(signed: i32, natural: AxisRange, half: AxisHalf) -> i32 {
    match half {
        AxisHalf::Full => signed + 128,
        AxisHalf::Upper => stretch(signed, natural.min, natural.max),
        AxisHalf::Lower => stretch(-signed, natural.max ^ 0xff, natural.min ^ 0xff),
    }
}

fn stretch(signed: i32, start: i32, end: i32) -> i32 {
    let signed_end = end - 128;
    let value = (signed as f32 * ((end - start) as f32 / signed_end as f32)) as i32;
    if value >= 0 {
        value + start
    } else {
        start
    }
}

/// Run one slot of a port record through the pipeline, appending events
/// for every destination whose value changed since the last poll.
pub fn process_slot(
    config: &Config,
    slot: usize,
    axes: &[u8],
    buttons: u16,
    state: &mut SlotState,
    out: &mut Vec<PadEvent>,
) {
    if slot < TRIGGER_L {
        let mode = config.thumb_mode(slot);
        if mode.emulates_dpad() {
            dpad::process_dpad(config, slot, axes, mode, state, out);
            return;
        }
    }
    let pair = config.axes[slot];
    let upper_half = if pair.lo.is_none() { AxisHalf::Full } else { AxisHalf::Upper };
    process_half(config, slot, axes, buttons, pair.hi, upper_half, state, out);
    process_half(config, slot, axes, buttons, pair.lo, AxisHalf::Lower, state, out);
}

#[allow(clippy::too_many_arguments)]
fn process_half(
    config: &Config,
    slot: usize,
    axes: &[u8],
    buttons: u16,
    code: Option<u16>,
    half: AxisHalf,
    state: &mut SlotState,
    out: &mut Vec<PadEvent>,
) {
    let Some(code) = code else { return };

    let mut raw = axes[slot];
    if config.flip_y && (slot == LEFT_Y || slot == RIGHT_Y) {
        raw = if half == AxisHalf::Full { flip_full(raw) } else { flip_half(raw) };
    }
    let mut value = rebase(to_signed(raw), config.natural_ranges[slot], half);

    let is_trigger = slot == TRIGGER_L || slot == TRIGGER_R;
    let shoulder_held = match slot {
        TRIGGER_L => buttons & (1 << button_bit::L) != 0,
        TRIGGER_R => buttons & (1 << button_bit::R) != 0,
        _ => false,
    };

    if is_trigger && config.trigger_mode(slot) == TriggerMode::Binary {
        let mut pressed = value > config.absinfo.min_of(code) + BINARY_TRIGGER_MARGIN;
        if config.shoulder == ShoulderMode::NandTrigger {
            pressed = pressed && !shoulder_held;
        }
        if state.trigger_pressed != pressed {
            let button = if slot == TRIGGER_L { sys::BTN_TL2 } else { sys::BTN_TR2 };
            out.push(PadEvent::Key { code: button, pressed });
            state.trigger_pressed = pressed;
        }
        return;
    }
    if is_trigger && config.shoulder == ShoulderMode::NandTrigger && shoulder_held {
        // the click wins: park the analog trigger at its minimum
        value = config.absinfo.min_of(code);
    }

    let last = match half {
        AxisHalf::Lower => &mut state.lo,
        _ => &mut state.hi,
    };
    emit_abs(config, code, value, last, out);
}

/// Clamp to the advertised range, diff against the last emitted value,
/// and apply any post-clamp output scale on the way out.
fn emit_abs(config: &Config, code: u16, value: i32, last: &mut u8, out: &mut Vec<PadEvent>) {
    let min = config.absinfo.min_of(code);
    let max = config.absinfo.max_of(code);
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if *last as i32 == clamped {
        return;
    }
    *last = clamped as u8;

    let emitted = match config.scales.get(&code) {
        None => clamped,
        Some(scale) => {
            let t = if max > min {
                (clamped - min) as f32 / (max - min) as f32
            } else {
                0.0
            };
            scale.start + (t * (scale.end - scale.start) as f32) as i32
        }
    };
    out.push(PadEvent::Abs { code, value: emitted });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::config::{AxisScale, TRIGGER_L};
    use clap::Parser;
    use proptest::prelude::*;

    fn config_from(args: &[&str]) -> Config {
        let mut argv = vec!["gcadapter-gw"];
        argv.extend_from_slice(args);
        Config::from_cli(&Cli::parse_from(argv))
    }

    fn run_slot(config: &Config, slot: usize, axes: &[u8; 6], state: &mut SlotState) -> Vec<PadEvent> {
        let mut out = Vec::new();
        process_slot(config, slot, axes, 0, state, &mut out);
        out
    }

    #[test]
    fn test_center_byte_lands_midrange() {
        let config = config_from(&["--unflip-y-axis"]);
        let mut state = SlotState::default();
        let events = run_slot(&config, 0, &[128; 6], &mut state);
        let PadEvent::Abs { code, value } = events[0] else {
            panic!("expected an axis event");
        };
        assert_eq!(code, sys::ABS_X);
        // near the midpoint of the advertised [35, 218] range
        let midpoint = (35 + 218) / 2;
        assert!((value - midpoint).abs() <= 2, "value {value} too far from {midpoint}");
    }

    #[test]
    fn test_unchanged_byte_emits_nothing() {
        let config = config_from(&[]);
        let mut state = SlotState::default();
        let first = run_slot(&config, 0, &[77; 6], &mut state);
        assert_eq!(first.len(), 1);
        let second = run_slot(&config, 0, &[77; 6], &mut state);
        assert!(second.is_empty());
    }

    #[test]
    fn test_full_axis_clamps_to_advertised_range() {
        let config = config_from(&["--unflip-y-axis"]);
        let mut state = SlotState::default();
        let events = run_slot(&config, 0, &[255; 6], &mut state);
        assert_eq!(events, vec![PadEvent::Abs { code: sys::ABS_X, value: 218 }]);
        let events = run_slot(&config, 0, &[0; 6], &mut state);
        assert_eq!(events, vec![PadEvent::Abs { code: sys::ABS_X, value: 35 }]);
    }

    #[test]
    fn test_split_slot_routes_halves() {
        let config = config_from(&["--axes-map", "Y=brake+gas", "--unflip-y-axis"]);
        let mut state = SlotState::default();

        // center: gas at its minimum, brake just above its own
        let events = run_slot(&config, 1, &[128; 6], &mut state);
        assert_eq!(
            events,
            vec![
                PadEvent::Abs { code: sys::ABS_GAS, value: 35 },
                PadEvent::Abs { code: sys::ABS_BRAKE, value: 37 },
            ]
        );

        // full positive deflection saturates gas, leaves brake parked
        let events = run_slot(&config, 1, &[255; 6], &mut state);
        assert_eq!(events, vec![PadEvent::Abs { code: sys::ABS_GAS, value: 218 }]);
    }

    #[test]
    fn test_binary_trigger_threshold() {
        let config = config_from(&["--triggers", "buttons"]);
        let mut state = SlotState::default();
        let mut axes = [128u8; 6];

        // ABS_Z advertises min 40; press point is 50
        axes[TRIGGER_L] = 50;
        let events = run_slot(&config, TRIGGER_L, &axes, &mut state);
        assert!(events.is_empty());

        axes[TRIGGER_L] = 51;
        let events = run_slot(&config, TRIGGER_L, &axes, &mut state);
        assert_eq!(events, vec![PadEvent::Key { code: sys::BTN_TL2, pressed: true }]);

        // held: no repeat
        let events = run_slot(&config, TRIGGER_L, &axes, &mut state);
        assert!(events.is_empty());

        axes[TRIGGER_L] = 40;
        let events = run_slot(&config, TRIGGER_L, &axes, &mut state);
        assert_eq!(events, vec![PadEvent::Key { code: sys::BTN_TL2, pressed: false }]);
    }

    #[test]
    fn test_nand_shoulder_forces_trigger_off() {
        let config = config_from(&["--triggers", "buttons", "--shoulder", "nand-trigger"]);
        let mut state = SlotState::default();
        let mut axes = [128u8; 6];
        axes[TRIGGER_L] = 230;

        let mut out = Vec::new();
        let shoulder_held = 1u16 << button_bit::L;
        process_slot(&config, TRIGGER_L, &axes, shoulder_held, &mut state, &mut out);
        assert!(out.is_empty(), "shoulder click must mask the trigger press");

        out.clear();
        process_slot(&config, TRIGGER_L, &axes, 0, &mut state, &mut out);
        assert_eq!(out, vec![PadEvent::Key { code: sys::BTN_TL2, pressed: true }]);
    }

    #[test]
    fn test_nand_parks_analog_trigger_while_clicked() {
        let config = config_from(&["--shoulder", "nand-trigger"]);
        let mut state = SlotState::default();
        let mut axes = [128u8; 6];
        axes[TRIGGER_L] = 230;

        let mut out = Vec::new();
        process_slot(&config, TRIGGER_L, &axes, 1 << button_bit::L, &mut state, &mut out);
        assert_eq!(out, vec![PadEvent::Abs { code: sys::ABS_Z, value: 40 }]);
    }

    #[test]
    fn test_output_scale_applies_after_diff() {
        let mut config = config_from(&["--unflip-y-axis"]);
        config.scales.insert(sys::ABS_X, AxisScale { start: 0, end: 255 });
        let mut state = SlotState::default();

        let events = run_slot(&config, 0, &[255; 6], &mut state);
        assert_eq!(events, vec![PadEvent::Abs { code: sys::ABS_X, value: 255 }]);
        // state remembers the pre-scale value, so the same byte stays quiet
        let events = run_slot(&config, 0, &[255; 6], &mut state);
        assert!(events.is_empty());
    }

    proptest! {
        #[test]
        fn prop_flip_is_an_involution(raw: u8) {
            prop_assert_eq!(flip_full(flip_full(raw)), raw);
            prop_assert_eq!(flip_half(flip_half(raw)), raw);
        }

        #[test]
        fn prop_identical_polls_are_silent(bytes: [u8; 6], buttons: u16) {
            let config = config_from(&[]);
            let mut states: Vec<SlotState> = (0..6).map(|_| SlotState::default()).collect();
            let mut first = Vec::new();
            for slot in 0..6 {
                process_slot(&config, slot, &bytes, buttons, &mut states[slot], &mut first);
            }
            let mut second = Vec::new();
            for slot in 0..6 {
                process_slot(&config, slot, &bytes, buttons, &mut states[slot], &mut second);
            }
            prop_assert!(second.is_empty());
        }
    }
}
