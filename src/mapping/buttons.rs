//! Digital remapping engine
//!
//! Diffs the 16-bit report mask against the last emitted state and turns
//! each effective change into one key event.

use super::PadEvent;
use crate::config::{Config, TriggerMode, BUTTON_COUNT};
use crate::uinput::sys;

/// Diff `mask` against `previous`, appending one event per changed bit.
/// Returns the updated state mask.
///
/// Bits without a destination never touch the state. Bits whose
/// destination is currently driven by a binary trigger update the state
/// silently, so the shoulder/trigger logic still observes them.
pub fn diff_buttons(config: &Config, previous: u16, mask: u16, out: &mut Vec<PadEvent>) -> u16 {
    let mut state = previous;
    for bit in 0..BUTTON_COUNT {
        let Some(code) = config.buttons[bit] else { continue };
        let single = 1u16 << bit;
        if state & single == mask & single {
            continue;
        }
        let driven_elsewhere = (config.trigger_left == TriggerMode::Binary && code == sys::BTN_TL2)
            || (config.trigger_right == TriggerMode::Binary && code == sys::BTN_TR2);
        if !driven_elsewhere {
            out.push(PadEvent::Key {
                code,
                pressed: mask & single != 0,
            });
        }
        state = (state & !single) | (mask & single);
    }
    state
}
