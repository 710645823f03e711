//! Input remapping engine
//!
//! Converts one port's raw button mask and axis bytes into the minimal set
//! of events the virtual pad needs: pure transforms in `axis`, mask
//! diffing in `buttons`, and the D-pad emulation filter in `dpad`.

pub mod axis;
pub mod buttons;
pub mod dpad;

use dpad::DeltaModulator;

/// One event bound for a virtual pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadEvent {
    /// Digital transition.
    Key { code: u16, pressed: bool },
    /// Absolute axis position.
    Abs { code: u16, value: i32 },
}

/// Differ memory for one analog slot. Which fields carry state depends on
/// the slot's configured mode.
#[derive(Debug, Clone, Default)]
pub struct SlotState {
    /// Last value emitted toward the full/upper destination.
    pub hi: u8,
    /// Last value emitted toward the lower destination.
    pub lo: u8,
    /// Binary-trigger latch.
    pub trigger_pressed: bool,
    /// D-pad latch: the latched direction is the positive one.
    pub dpad_positive: bool,
    /// D-pad latch: that direction is currently held.
    pub dpad_pressed: bool,
    /// Waveform state for the sensitive D-pad mode.
    pub modulator: DeltaModulator,
}
