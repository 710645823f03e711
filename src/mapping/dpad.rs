//! Thumbstick-to-D-pad emulation
//!
//! Direction detection with an integer ratio test, plus the duty-cycle
//! modulator that pulses the buttons in proportion to tilt strength in
//! the sensitive mode. The destination has no analog D-pad here, so the
//! waveform's mark:space ratio is the only way to convey tilt.

use super::{axis, PadEvent, SlotState};
use crate::config::{Config, ThumbstickMode};
use crate::uinput::sys;

/// Buttons for left/right/down/up, indexed by `2*vertical + positive`.
pub const DPAD_CODES: [u16; 4] = [
    sys::BTN_DPAD_LEFT,
    sys::BTN_DPAD_RIGHT,
    sys::BTN_DPAD_DOWN,
    sys::BTN_DPAD_UP,
];

/// Minimum recentered magnitude before a direction counts as pressed.
pub const DEADZONE: i32 = 20;

/// `250 * tan(3pi/8)`, truncated. The capture cone reaches 67.5 degrees
/// off-axis, so diagonals press both directions.
const SLOPE_LIMIT: i32 = 603;

/// Angle-and-deadzone test for one direction axis.
pub fn direction_pressed(axis_value: i32, perpendicular: i32, deadzone: i32) -> bool {
    let axis_value = axis_value.abs();
    if axis_value < deadzone || axis_value == 0 {
        return false;
    }
    (perpendicular * 250 / axis_value).abs() <= SLOPE_LIMIT
}

/// Squared-percentage thresholds selecting the seven duty cycles
/// 0, 1/4, 1/3, 1/2, 2/3, 3/4, 1. Squares avoid a root on the hot path.
const STEP_LEVELS: [i32; 7] = [
    15 * 15,
    37 * 37,
    50 * 50,
    64 * 64,
    75 * 75,
    87 * 87,
    99 * 99,
];

/// Pick a duty cycle for a squared tilt percentage.
///
/// Encoding: a non-negative `n` means `n` on-units to one off-unit; a
/// negative value (one's complement) means one on-unit to `!n` off-units.
pub fn duty_cycle(percent_squared: i32) -> i8 {
    if percent_squared <= STEP_LEVELS[0] {
        return 0;
    }
    if percent_squared > STEP_LEVELS[4] {
        if percent_squared > STEP_LEVELS[5] {
            !0
        } else {
            3
        }
    } else if percent_squared <= STEP_LEVELS[2] {
        if percent_squared <= STEP_LEVELS[1] {
            !3
        } else {
            !2
        }
    } else if percent_squared <= STEP_LEVELS[3] {
        1
    } else {
        2
    }
}

/// Delta modulator producing a boolean waveform whose mark:space ratio
/// approximates the analog tilt.
#[derive(Debug, Clone, Copy)]
pub struct DeltaModulator {
    /// Polls per waveform unit.
    unit_duration: u8,
    /// Current duty cycle, in the [`duty_cycle`] encoding.
    duty_units: i8,
    /// Poll counter within the waveform period.
    phase: u8,
}

impl Default for DeltaModulator {
    fn default() -> Self {
        Self {
            unit_duration: 4,
            duty_units: 0,
            phase: 0,
        }
    }
}

impl DeltaModulator {
    /// Re-target the duty cycle, restarting the waveform when the phase
    /// counter would fall outside the new period.
    pub fn update(&mut self, percent_squared: i32) {
        let duty = duty_cycle(percent_squared);
        self.duty_units = duty;
        let units = if duty < 0 { !duty } else { duty } as u8;
        let period = (units + 1) * self.unit_duration;
        if self.phase >= period {
            self.phase = 0;
        }
    }

    /// Sample the waveform and advance the phase.
    pub fn read(&mut self) -> bool {
        let on_units = if self.duty_units < 0 { 1 } else { self.duty_units as u8 };
        let on = self.phase < on_units * self.unit_duration;
        self.phase = self.phase.wrapping_add(1);
        on
    }

    /// Restart the waveform so the next press opens with an on-phase.
    pub fn reset(&mut self) {
        self.phase = 0;
    }
}

/// Emulate D-pad buttons from one thumbstick axis.
///
/// Works in right-handed 2D coordinates on the raw, unflipped bytes; the
/// perpendicular axis is the slot's partner in the same stick.
pub fn process_dpad(
    config: &Config,
    slot: usize,
    axes: &[u8],
    mode: ThumbstickMode,
    state: &mut SlotState,
    out: &mut Vec<PadEvent>,
) {
    let value = axis::to_signed(axes[slot]);
    let perpendicular = axis::to_signed(axes[slot ^ 1]);
    let mut pressed = direction_pressed(value, perpendicular, DEADZONE);

    if mode == ThumbstickMode::DpadSensitive {
        if pressed {
            let full_tilt = config.natural_ranges[slot].max - 128;
            let percent_squared = value * value * 10_000 / (full_tilt * full_tilt);
            state.modulator.update(percent_squared);
            pressed = state.modulator.read();
        } else {
            state.modulator.reset();
        }
    }

    let vertical = slot & 1 == 1;
    let positive = value >= 0;
    let index = 2 * usize::from(vertical) + usize::from(positive);

    // let go of the opposite direction when the sign flips while held
    if state.dpad_pressed && state.dpad_positive != positive {
        out.push(PadEvent::Key {
            code: DPAD_CODES[index ^ 1],
            pressed: false,
        });
    }
    let was_pressed = state.dpad_pressed && state.dpad_positive == positive;
    if pressed != was_pressed {
        out.push(PadEvent::Key {
            code: DPAD_CODES[index],
            pressed,
        });
    }
    state.dpad_positive = positive;
    state.dpad_pressed = pressed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn config_from(args: &[&str]) -> Config {
        let mut argv = vec!["gcadapter-gw"];
        argv.extend_from_slice(args);
        Config::from_cli(&Cli::parse_from(argv))
    }

    #[test]
    fn test_direction_deadzone_and_cone() {
        assert!(!direction_pressed(0, 0, DEADZONE));
        assert!(!direction_pressed(19, 0, DEADZONE));
        assert!(direction_pressed(20, 0, DEADZONE));
        assert!(direction_pressed(-90, 0, DEADZONE));
        // 45 degrees: inside the cone for both axes
        assert!(direction_pressed(60, 60, DEADZONE));
        // nearly perpendicular: outside
        assert!(!direction_pressed(25, 90, DEADZONE));
    }

    #[test]
    fn test_duty_cycle_thresholds() {
        assert_eq!(duty_cycle(0), 0);
        assert_eq!(duty_cycle(15 * 15), 0);
        assert_eq!(duty_cycle(15 * 15 + 1), !3); // 1/4
        assert_eq!(duty_cycle(37 * 37 + 1), !2); // 1/3
        assert_eq!(duty_cycle(50 * 50 + 1), 1); // 1/2
        assert_eq!(duty_cycle(64 * 64 + 1), 2); // 2/3
        assert_eq!(duty_cycle(75 * 75 + 1), 3); // 3/4
        assert_eq!(duty_cycle(87 * 87 + 1), !0); // 1
        assert_eq!(duty_cycle(10_000), !0);
    }

    /// Count on-samples over `period` polls at a constant input.
    fn sample(modulator: &mut DeltaModulator, percent_squared: i32, period: usize) -> usize {
        (0..period)
            .filter(|_| {
                modulator.update(percent_squared);
                modulator.read()
            })
            .count()
    }

    #[test]
    fn test_waveform_half_duty() {
        // duty 1/2: exactly 4 on then 4 off over the 8-poll period
        let mut modulator = DeltaModulator::default();
        let on: Vec<bool> = (0..8)
            .map(|_| {
                modulator.update(51 * 51);
                modulator.read()
            })
            .collect();
        assert_eq!(on, [true, true, true, true, false, false, false, false]);
    }

    #[test]
    fn test_waveform_duty_ratios() {
        assert_eq!(sample(&mut DeltaModulator::default(), 0, 8), 0);
        assert_eq!(sample(&mut DeltaModulator::default(), 16 * 16, 16), 4); // 1/4
        assert_eq!(sample(&mut DeltaModulator::default(), 40 * 40, 12), 4); // 1/3
        assert_eq!(sample(&mut DeltaModulator::default(), 70 * 70, 12), 8); // 2/3
        assert_eq!(sample(&mut DeltaModulator::default(), 80 * 80, 16), 12); // 3/4
        assert_eq!(sample(&mut DeltaModulator::default(), 10_000, 8), 8); // full on
    }

    #[test]
    fn test_emulated_press_and_direction_flip() {
        let config = config_from(&["--thumbstick-left", "dpad"]);
        let mut state = SlotState::default();
        let mut out = Vec::new();

        // push right
        let mut axes = [128u8; 6];
        axes[0] = 128 + 90;
        process_dpad(&config, 0, &axes, ThumbstickMode::Dpad, &mut state, &mut out);
        assert_eq!(out, vec![PadEvent::Key { code: sys::BTN_DPAD_RIGHT, pressed: true }]);

        // snap to the left: release right, press left
        out.clear();
        axes[0] = 128 - 90;
        process_dpad(&config, 0, &axes, ThumbstickMode::Dpad, &mut state, &mut out);
        assert_eq!(
            out,
            vec![
                PadEvent::Key { code: sys::BTN_DPAD_RIGHT, pressed: false },
                PadEvent::Key { code: sys::BTN_DPAD_LEFT, pressed: true },
            ]
        );

        // back to center: release left
        out.clear();
        axes[0] = 128;
        process_dpad(&config, 0, &axes, ThumbstickMode::Dpad, &mut state, &mut out);
        assert_eq!(out, vec![PadEvent::Key { code: sys::BTN_DPAD_LEFT, pressed: false }]);
    }

    #[test]
    fn test_vertical_slot_uses_up_down() {
        let config = config_from(&["--thumbstick-left", "dpad"]);
        let mut state = SlotState::default();
        let mut out = Vec::new();

        let mut axes = [128u8; 6];
        axes[1] = 128 + 90;
        process_dpad(&config, 1, &axes, ThumbstickMode::Dpad, &mut state, &mut out);
        assert_eq!(out, vec![PadEvent::Key { code: sys::BTN_DPAD_UP, pressed: true }]);
    }

    #[test]
    fn test_sensitive_mode_resets_phase_on_release() {
        let config = config_from(&["--thumbstick-left", "dpad-sensitive"]);
        let mut state = SlotState::default();
        let mut out = Vec::new();

        // half tilt: the opening samples of the waveform are on
        let mut axes = [128u8; 6];
        axes[0] = 128 + 58; // ~64% of the 90 full tilt
        process_dpad(&config, 0, &axes, ThumbstickMode::DpadSensitive, &mut state, &mut out);
        assert_eq!(out.len(), 1);

        // release resets the phase, so the next press opens with a press
        out.clear();
        axes[0] = 128;
        process_dpad(&config, 0, &axes, ThumbstickMode::DpadSensitive, &mut state, &mut out);
        out.clear();
        axes[0] = 128 + 58;
        process_dpad(&config, 0, &axes, ThumbstickMode::DpadSensitive, &mut state, &mut out);
        assert_eq!(out, vec![PadEvent::Key { code: sys::BTN_DPAD_RIGHT, pressed: true }]);
    }
}
