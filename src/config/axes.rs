//! Parsers for the analog-axis option expressions.
//!
//! `--axes-map`, `--axes-scale` and the absinfo overrides all share the
//! comma-separated `key=value` shape. A malformed fragment is reported and
//! skipped; the rest of the expression still applies.

use std::collections::HashMap;
use tracing::{info, warn};

use super::{AxisPair, AxisScale, AXIS_COUNT, LEFT_X, LEFT_Y, RIGHT_X, RIGHT_Y, TRIGGER_L, TRIGGER_R};
use crate::uinput::sys;

/// A rejected expression fragment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("missing '=' in \"{0}\"")]
    MissingAssignment(String),
    #[error("unknown axis name \"{0}\"")]
    UnknownAxis(String),
    #[error("unsupported analog input \"{0}\"")]
    UnknownSlot(String),
    #[error("invalid number \"{0}\"")]
    InvalidNumber(String),
}

/// Output axis names accepted in expressions, sorted for binary search.
/// `none` detaches a destination.
const AXIS_NAMES: &[(&str, Option<u16>)] = &[
    ("brake", Some(sys::ABS_BRAKE)),
    ("dpadx", Some(sys::ABS_HAT0X)),
    ("dpady", Some(sys::ABS_HAT0Y)),
    ("gas", Some(sys::ABS_GAS)),
    ("lx", Some(sys::ABS_X)),
    ("ly", Some(sys::ABS_Y)),
    ("lz", Some(sys::ABS_Z)),
    ("none", None),
    ("rudder", Some(sys::ABS_RUDDER)),
    ("rx", Some(sys::ABS_RX)),
    ("ry", Some(sys::ABS_RY)),
    ("rz", Some(sys::ABS_RZ)),
    ("throttle", Some(sys::ABS_THROTTLE)),
    ("wheel", Some(sys::ABS_WHEEL)),
    ("x", Some(sys::ABS_X)),
    ("y", Some(sys::ABS_Y)),
    ("z", Some(sys::ABS_Z)),
];

/// Integer literal in decimal or `0x` hex, optionally signed.
pub fn parse_int(text: &str) -> Option<i32> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    let value = if negative { -value } else { value };
    i32::try_from(value).ok()
}

/// Parse an axis name off the front of `expr`.
///
/// Alphanumerics are folded to lower case, spaces, `-` and `_` are
/// dropped, and the scan stops at the first other character (so `y+gas`
/// leaves `+gas` as the remainder). Returns the looked-up destination
/// (`Ok(None)` for the literal `none`) and the unscanned remainder.
pub fn parse_axis_name(expr: &str) -> (Result<Option<u16>, ExprError>, &str) {
    let mut name = String::new();
    let mut consumed = expr.len();
    for (offset, c) in expr.char_indices() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !(c.is_whitespace() || c == '-' || c == '_') {
            consumed = offset;
            break;
        }
    }
    let remainder = &expr[consumed..];
    let code = AXIS_NAMES
        .binary_search_by_key(&name.as_str(), |(n, _)| *n)
        .map(|i| AXIS_NAMES[i].1)
        .map_err(|_| ExprError::UnknownAxis(name));
    (code, remainder)
}

/// Map an expression key to an analog slot index (`x`, `ly`, `r`, ...).
pub fn parse_slot(key: &str) -> Result<usize, ExprError> {
    let bytes = key.trim().as_bytes();
    let first = bytes.first().map(u8::to_ascii_lowercase);
    let second = bytes.get(1).map(u8::to_ascii_lowercase);
    match first {
        Some(b'x') => Ok(LEFT_X),
        Some(b'y') => Ok(LEFT_Y),
        Some(b'z') => Ok(TRIGGER_L),
        Some(b'l') => Ok(match second {
            Some(b'x') => LEFT_X,
            Some(b'y') => LEFT_Y,
            _ => TRIGGER_L,
        }),
        Some(b'r') => Ok(match second {
            Some(b'x') => RIGHT_X,
            Some(b'y') => RIGHT_Y,
            _ => TRIGGER_R,
        }),
        _ => Err(ExprError::UnknownSlot(key.to_string())),
    }
}

/// Apply an `--axes-map` expression to the slot table.
///
/// `SLOT=name` routes the whole slot to one destination; `SLOT=a+b` splits
/// it, `a` taking the lower half (inverted) and `b` the upper half.
pub fn apply_map(table: &mut [AxisPair; AXIS_COUNT], expr: &str) {
    for fragment in expr.split(',').filter(|f| !f.trim().is_empty()) {
        if let Err(e) = apply_map_fragment(table, fragment) {
            warn!(fragment, error = %e, "ignoring --axes-map fragment");
        }
    }
}

fn apply_map_fragment(table: &mut [AxisPair; AXIS_COUNT], fragment: &str) -> Result<(), ExprError> {
    let (key, value) = fragment
        .split_once('=')
        .ok_or_else(|| ExprError::MissingAssignment(fragment.to_string()))?;
    let slot = parse_slot(key)?;
    let (first, remainder) = parse_axis_name(value);
    let first = first?;
    if let Some(upper) = remainder.strip_prefix('+') {
        let (second, _) = parse_axis_name(upper);
        let second = second?;
        // combined: only the named halves change
        if first.is_some() {
            table[slot].lo = first;
        }
        if second.is_some() {
            table[slot].hi = second;
        }
    } else {
        table[slot] = AxisPair { lo: None, hi: first };
    }
    info!(fragment, "axis mapping applied");
    Ok(())
}

/// Apply an `--axes-scale` expression: `name=end` or `name=start:end`;
/// an empty value removes the scale for that destination.
pub fn apply_scales(scales: &mut HashMap<u16, AxisScale>, expr: &str) {
    for fragment in expr.split(',').filter(|f| !f.trim().is_empty()) {
        if let Err(e) = apply_scale_fragment(scales, fragment) {
            warn!(fragment, error = %e, "ignoring --axes-scale fragment");
        }
    }
}

fn apply_scale_fragment(scales: &mut HashMap<u16, AxisScale>, fragment: &str) -> Result<(), ExprError> {
    let (key, value) = fragment
        .split_once('=')
        .ok_or_else(|| ExprError::MissingAssignment(fragment.to_string()))?;
    let (code, _) = parse_axis_name(key);
    let Some(code) = code? else {
        return Ok(());
    };
    let value = value.trim();
    if value.is_empty() {
        scales.remove(&code);
        return Ok(());
    }
    let scale = match value.split_once(':') {
        Some((start, end)) => AxisScale {
            start: parse_int(start).ok_or_else(|| ExprError::InvalidNumber(start.to_string()))?,
            end: parse_int(end).ok_or_else(|| ExprError::InvalidNumber(end.to_string()))?,
        },
        None => AxisScale {
            start: 0,
            end: parse_int(value).ok_or_else(|| ExprError::InvalidNumber(value.to_string()))?,
        },
    };
    scales.insert(code, scale);
    Ok(())
}

/// Apply a per-axis absinfo override expression (`--deadzone`,
/// `--change-tolerance`, `--min-value`, `--max-value`).
pub fn apply_absinfo(array: &mut [i32; sys::ABS_CNT], option: &str, expr: &str) {
    for fragment in expr.split(',').filter(|f| !f.trim().is_empty()) {
        if let Err(e) = apply_absinfo_fragment(array, fragment) {
            warn!(option, fragment, error = %e, "ignoring override fragment");
        }
    }
}

fn apply_absinfo_fragment(array: &mut [i32; sys::ABS_CNT], fragment: &str) -> Result<(), ExprError> {
    let (key, value) = fragment
        .split_once('=')
        .ok_or_else(|| ExprError::MissingAssignment(fragment.to_string()))?;
    let (code, _) = parse_axis_name(key);
    let Some(code) = code? else {
        return Ok(());
    };
    let value = parse_int(value).ok_or_else(|| ExprError::InvalidNumber(value.to_string()))?;
    array[code as usize] = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_accepts_hex_and_decimal() {
        assert_eq!(parse_int("218"), Some(218));
        assert_eq!(parse_int("0x57e"), Some(0x57e));
        assert_eq!(parse_int("-12"), Some(-12));
        assert_eq!(parse_int("twelve"), None);
    }

    #[test]
    fn test_axis_name_normalization() {
        let (code, rest) = parse_axis_name("THROTTLE");
        assert_eq!(code, Ok(Some(sys::ABS_THROTTLE)));
        assert_eq!(rest, "");

        let (code, rest) = parse_axis_name("dpad_x");
        assert_eq!(code, Ok(Some(sys::ABS_HAT0X)));
        assert_eq!(rest, "");

        let (code, rest) = parse_axis_name("brake+gas");
        assert_eq!(code, Ok(Some(sys::ABS_BRAKE)));
        assert_eq!(rest, "+gas");
    }

    #[test]
    fn test_unknown_axis_name_is_an_error() {
        let (code, _) = parse_axis_name("warp");
        assert!(code.is_err());
    }

    #[test]
    fn test_parse_slot_shorthand() {
        assert_eq!(parse_slot("X"), Ok(LEFT_X));
        assert_eq!(parse_slot("ly"), Ok(LEFT_Y));
        assert_eq!(parse_slot("z"), Ok(TRIGGER_L));
        assert_eq!(parse_slot("l"), Ok(TRIGGER_L));
        assert_eq!(parse_slot("R"), Ok(TRIGGER_R));
        assert_eq!(parse_slot("ry"), Ok(RIGHT_Y));
        assert!(parse_slot("q").is_err());
    }

    #[test]
    fn test_apply_map_single_and_split() {
        let mut table = crate::config::DEFAULT_AXES;
        apply_map(&mut table, "X=wheel,Y=brake+gas");
        assert_eq!(
            table[LEFT_X],
            AxisPair { lo: None, hi: Some(sys::ABS_WHEEL) }
        );
        assert_eq!(
            table[LEFT_Y],
            AxisPair { lo: Some(sys::ABS_BRAKE), hi: Some(sys::ABS_GAS) }
        );
        // untouched slots keep their defaults
        assert_eq!(table[RIGHT_X], AxisPair { lo: None, hi: Some(sys::ABS_RX) });
    }

    #[test]
    fn test_apply_map_none_detaches_slot() {
        let mut table = crate::config::DEFAULT_AXES;
        apply_map(&mut table, "RY=none");
        assert_eq!(table[RIGHT_Y], AxisPair { lo: None, hi: None });
    }

    #[test]
    fn test_apply_map_skips_bad_fragment() {
        let mut table = crate::config::DEFAULT_AXES;
        apply_map(&mut table, "X=warp,Y=wheel");
        // bad fragment ignored, good one applied
        assert_eq!(table[LEFT_X], AxisPair { lo: None, hi: Some(sys::ABS_X) });
        assert_eq!(table[LEFT_Y], AxisPair { lo: None, hi: Some(sys::ABS_WHEEL) });
    }

    #[test]
    fn test_apply_scales() {
        let mut scales = HashMap::new();
        apply_scales(&mut scales, "x=0x0:255,ry=100:-100");
        assert_eq!(scales[&sys::ABS_X], AxisScale { start: 0, end: 255 });
        assert_eq!(scales[&sys::ABS_RY], AxisScale { start: 100, end: -100 });

        apply_scales(&mut scales, "x=128");
        assert_eq!(scales[&sys::ABS_X], AxisScale { start: 0, end: 128 });

        apply_scales(&mut scales, "x=");
        assert!(!scales.contains_key(&sys::ABS_X));
    }

    #[test]
    fn test_apply_absinfo_override() {
        let mut flat = [0i32; sys::ABS_CNT];
        apply_absinfo(&mut flat, "--deadzone", "z=35, rz=35,bogus");
        assert_eq!(flat[sys::ABS_Z as usize], 35);
        assert_eq!(flat[sys::ABS_RZ as usize], 35);
    }
}
