//! Immutable runtime configuration
//!
//! Everything the workers consult is assembled here, once, before any
//! adapter opens. Workers receive the snapshot behind an `Arc` and never
//! mutate it.

pub mod axes;

use std::collections::HashMap;

use tracing::{info, warn};

use crate::cli::Cli;
use crate::uinput::sys::{self, ABS_CNT};

/// Analog slots on a controller, in report order.
pub const AXIS_COUNT: usize = 6;
pub const LEFT_X: usize = 0;
pub const LEFT_Y: usize = 1;
pub const RIGHT_X: usize = 2;
pub const RIGHT_Y: usize = 3;
pub const TRIGGER_L: usize = 4;
pub const TRIGGER_R: usize = 5;

/// Digital buttons in the report mask.
pub const BUTTON_COUNT: usize = 16;

/// Bit positions of the digital buttons in the report mask.
pub mod button_bit {
    pub const START: usize = 0;
    pub const Z: usize = 1;
    pub const R: usize = 2;
    pub const L: usize = 3;
    pub const A: usize = 8;
    pub const B: usize = 9;
    pub const X: usize = 10;
    pub const Y: usize = 11;
    pub const LEFT: usize = 12;
    pub const RIGHT: usize = 13;
    pub const DOWN: usize = 14;
    pub const UP: usize = 15;
}

/// Default code for the Z button.
pub const DEFAULT_Z_CODE: u16 = sys::BTN_THUMBL;

/// Base layout emitting the historical letter codes.
const BUTTONS_LITERAL: [Option<u16>; BUTTON_COUNT] = [
    Some(sys::BTN_START),
    Some(sys::BTN_THUMBL),
    Some(sys::BTN_TR2),
    Some(sys::BTN_TL2),
    None,
    None,
    None,
    None,
    Some(sys::BTN_A),
    Some(sys::BTN_B),
    Some(sys::BTN_X),
    Some(sys::BTN_Y),
    Some(sys::BTN_DPAD_LEFT),
    Some(sys::BTN_DPAD_RIGHT),
    Some(sys::BTN_DPAD_DOWN),
    Some(sys::BTN_DPAD_UP),
];

/// Base layout placing A/B/X/Y like a foreign (Xbox-style) pad: cardinal
/// direction codes instead of letter codes.
const BUTTONS_FOREIGN: [Option<u16>; BUTTON_COUNT] = [
    Some(sys::BTN_START),
    Some(sys::BTN_THUMBL),
    Some(sys::BTN_TR2),
    Some(sys::BTN_TL2),
    None,
    None,
    None,
    None,
    Some(sys::BTN_SOUTH),
    Some(sys::BTN_WEST),
    Some(sys::BTN_EAST),
    Some(sys::BTN_NORTH),
    Some(sys::BTN_DPAD_LEFT),
    Some(sys::BTN_DPAD_RIGHT),
    Some(sys::BTN_DPAD_DOWN),
    Some(sys::BTN_DPAD_UP),
];

/// Substitute codes for left/right/down/up when the D-pad is remapped to
/// buttons the controller does not physically have.
const REMAPPED_DPAD: [u16; 4] = [sys::BTN_TL, sys::BTN_TR, sys::BTN_THUMBR, sys::BTN_SELECT];

/// Where a raw slot's halves go. A slot with both halves unset is inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisPair {
    /// Destination of the negative half, driven sign-inverted. Unset for
    /// an unsplit slot.
    pub lo: Option<u16>,
    /// Destination of the non-negative half, or of the whole slot when
    /// `lo` is unset.
    pub hi: Option<u16>,
}

/// The stock slot routing: one full-range destination per slot.
pub const DEFAULT_AXES: [AxisPair; AXIS_COUNT] = [
    AxisPair { lo: None, hi: Some(sys::ABS_X) },
    AxisPair { lo: None, hi: Some(sys::ABS_Y) },
    AxisPair { lo: None, hi: Some(sys::ABS_RX) },
    AxisPair { lo: None, hi: Some(sys::ABS_RY) },
    AxisPair { lo: None, hi: Some(sys::ABS_Z) },
    AxisPair { lo: None, hi: Some(sys::ABS_RZ) },
];

/// Inclusive raw value range an analog input actually produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

/// Value ranges observed from real controllers. Units vary, so these are a
/// little wider than any one controller reaches.
pub const NATURAL_RANGES: [AxisRange; AXIS_COUNT] = [
    AxisRange { min: 35, max: 218 },
    AxisRange { min: 35, max: 218 },
    AxisRange { min: 40, max: 215 },
    AxisRange { min: 40, max: 215 },
    // 230 is fully depressed; the shoulder click engages around 200
    AxisRange { min: 35, max: 230 },
    AxisRange { min: 35, max: 230 },
];

/// Affine output remap applied after clamping. A bare `end` value means
/// `start` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisScale {
    pub start: i32,
    pub end: i32,
}

/// Advertised absinfo per output code: value bounds plus the fuzz and flat
/// amounts the kernel filters with.
#[derive(Debug, Clone)]
pub struct AbsInfoTable {
    pub min: [i32; ABS_CNT],
    pub max: [i32; ABS_CNT],
    pub fuzz: [i32; ABS_CNT],
    pub flat: [i32; ABS_CNT],
}

impl AbsInfoTable {
    pub fn min_of(&self, code: u16) -> i32 {
        self.min[code as usize]
    }

    pub fn max_of(&self, code: u16) -> i32 {
        self.max[code as usize]
    }

    /// Advertise the untransformed byte range on every mappable code.
    pub fn set_raw(&mut self) {
        for code in MAPPABLE_CODES {
            self.min[code as usize] = 0;
            self.max[code as usize] = 255;
        }
    }

    /// Mirror a code's bounds for a flipped axis: flipping a byte turns
    /// range `[min, max]` into `[max ^ 0xff, min ^ 0xff]`.
    pub fn flip_bounds(&mut self, code: u16) {
        let i = code as usize;
        let old_max = self.max[i];
        self.max[i] = self.min[i] ^ 0xff;
        self.min[i] = old_max ^ 0xff;
    }

    fn set(&mut self, code: u16, min: i32, max: i32, fuzz: i32) {
        let i = code as usize;
        self.min[i] = min;
        self.max[i] = max;
        self.fuzz[i] = fuzz;
        self.flat[i] = 0;
    }
}

/// Every output code an expression can route a slot to.
const MAPPABLE_CODES: [u16; 13] = [
    sys::ABS_X,
    sys::ABS_Y,
    sys::ABS_RX,
    sys::ABS_RY,
    sys::ABS_Z,
    sys::ABS_RZ,
    sys::ABS_HAT0X,
    sys::ABS_HAT0Y,
    sys::ABS_THROTTLE,
    sys::ABS_RUDDER,
    sys::ABS_GAS,
    sys::ABS_BRAKE,
    sys::ABS_WHEEL,
];

impl Default for AbsInfoTable {
    fn default() -> Self {
        let mut table = AbsInfoTable {
            min: [0; ABS_CNT],
            max: [0; ABS_CNT],
            fuzz: [0; ABS_CNT],
            flat: [0; ABS_CNT],
        };
        table.set(sys::ABS_X, 35, 218, 1);
        table.set(sys::ABS_Y, 35, 218, 1);
        table.set(sys::ABS_RX, 43, 215, 1);
        table.set(sys::ABS_RY, 43, 215, 1);
        table.set(sys::ABS_HAT0X, 43, 215, 1);
        table.set(sys::ABS_HAT0Y, 43, 215, 1);
        table.set(sys::ABS_Z, 40, 190, 4);
        table.set(sys::ABS_RZ, 40, 190, 4);
        // 210 or more means fully depressed when used with triggers
        table.set(sys::ABS_THROTTLE, 43, 215, 4);
        table.set(sys::ABS_RUDDER, 43, 215, 4);
        table.set(sys::ABS_WHEEL, 35, 218, 1);
        table.set(sys::ABS_BRAKE, 35, 218, 4);
        table.set(sys::ABS_GAS, 35, 218, 4);
        table
    }
}

/// How A/B/X/Y are laid out on the virtual pad.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonLayout {
    /// Letter codes: A is BTN_A, and so on.
    Literal,
    /// Cardinal codes in Xbox positions: A is BTN_SOUTH, B is BTN_WEST.
    Foreign,
}

/// What a thumbstick drives.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbstickMode {
    /// Analog passthrough to the slot's mapped destinations.
    Normal,
    /// Slot disabled entirely.
    None,
    /// Boolean D-pad buttons from stick direction.
    Dpad,
    /// D-pad buttons pulsed with a duty cycle matching the tilt strength.
    DpadSensitive,
    /// Analog values on the hat axes.
    AnalogDpad,
    /// Analog values on the hat axes with X and Y exchanged.
    AnalogDpadFlipped,
}

impl ThumbstickMode {
    /// Modes that synthesize boolean D-pad button events.
    pub fn emulates_dpad(self) -> bool {
        matches!(self, ThumbstickMode::Dpad | ThumbstickMode::DpadSensitive)
    }
}

/// What the analog triggers drive.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Analog axis values (default).
    #[value(name = "axes")]
    Analog,
    /// Collapse to the trigger buttons at a fixed threshold.
    #[value(name = "buttons")]
    Binary,
    /// Ignore the analog travel; only the full-depression button bits count.
    #[value(name = "none")]
    None,
}

/// Relationship between the shoulder click and the trigger travel.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShoulderMode {
    /// Shoulder clicks emit the trigger-button codes too (default).
    None,
    /// Shoulder and trigger are mutually exclusive; the click wins.
    NandTrigger,
    /// Shoulder codes fire alongside the trigger when fully depressed.
    AlsoTrigger,
}

/// Identity advertised by the virtual pads.
#[derive(Debug, Clone, Copy)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
    pub flips_y_axis: bool,
}

/// Identities selectable with `--spoof-foreign`; index 0 is the adapter's
/// own. Vendor/product pairs from the public USB id lists.
pub const DEVICE_IDENTITIES: &[DeviceIdentity] = &[
    DeviceIdentity { vendor_id: 0x057e, product_id: 0x0337, name: "Wii U GameCube Adapter Port %d", flips_y_axis: true },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x028e, name: "Microsoft X-Box 360 pad", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x02a1, name: "Xbox 360 Wireless Receiver", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x0b12, name: "Xbox Wireless Controller", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x0287, name: "Microsoft Xbox Controller", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x02d1, name: "Xbox One Controller", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x02dd, name: "Xbox One Controller", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x02ea, name: "Xbox Wireless Controller", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x02e3, name: "Xbox One Elite Controller", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x0b00, name: "Xbox One Elite Controller", flips_y_axis: false },
    DeviceIdentity { vendor_id: 0x045e, product_id: 0x0b05, name: "Xbox One Elite Controller", flips_y_axis: false },
];

/// The frozen runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Virtual pad name template; `%d` becomes the 1-based port number.
    pub device_name: String,
    pub buttons: [Option<u16>; BUTTON_COUNT],
    pub axes: [AxisPair; AXIS_COUNT],
    pub natural_ranges: [AxisRange; AXIS_COUNT],
    pub absinfo: AbsInfoTable,
    pub scales: HashMap<u16, AxisScale>,
    pub flip_y: bool,
    pub thumb_left: ThumbstickMode,
    pub thumb_right: ThumbstickMode,
    pub trigger_left: TriggerMode,
    pub trigger_right: TriggerMode,
    pub shoulder: ShoulderMode,
    pub claim_interface: bool,
    pub quit_on_interrupt: bool,
}

impl Config {
    /// Assemble the snapshot from parsed command-line options.
    pub fn from_cli(cli: &Cli) -> Self {
        let identity = match cli.spoof_foreign {
            Some(index) => DEVICE_IDENTITIES.get(index).unwrap_or_else(|| {
                warn!(index, "unknown spoof identity, keeping the adapter's own");
                &DEVICE_IDENTITIES[0]
            }),
            None => &DEVICE_IDENTITIES[0],
        };
        let mut flip_y = identity.flips_y_axis;

        // analog slot routing
        let mut axes_table = DEFAULT_AXES;
        if cli.throttle_rudder {
            axes::apply_map(&mut axes_table, "RY=throttle,RX=rudder");
            flip_y = false;
        }
        if cli.brake_gas_wheel {
            axes::apply_map(&mut axes_table, "Y=brake+gas,X=wheel");
            flip_y = false;
        }
        if cli.default_axes_map {
            axes_table = DEFAULT_AXES;
        }
        if let Some(map) = &cli.axes_map {
            axes::apply_map(&mut axes_table, map);
        }

        // a non-normal thumbstick mode overrides the slot routing
        let thumb = [(cli.thumbstick_left, LEFT_X, LEFT_Y), (cli.thumbstick_right, RIGHT_X, RIGHT_Y)];
        for (mode, x_slot, y_slot) in thumb {
            if mode == ThumbstickMode::Normal {
                continue;
            }
            axes_table[x_slot] = AxisPair::default();
            axes_table[y_slot] = AxisPair::default();
            match mode {
                ThumbstickMode::AnalogDpad => {
                    axes_table[x_slot].hi = Some(sys::ABS_HAT0X);
                    axes_table[y_slot].hi = Some(sys::ABS_HAT0Y);
                }
                ThumbstickMode::AnalogDpadFlipped => {
                    axes_table[x_slot].hi = Some(sys::ABS_HAT0Y);
                    axes_table[y_slot].hi = Some(sys::ABS_HAT0X);
                }
                _ => {}
            }
        }

        // binary triggers always drive the stock trigger axes; the press
        // threshold is relative to that axis's advertised minimum
        match cli.triggers {
            TriggerMode::Analog => {}
            TriggerMode::Binary => {
                axes_table[TRIGGER_L] = AxisPair { lo: None, hi: Some(sys::ABS_Z) };
                axes_table[TRIGGER_R] = AxisPair { lo: None, hi: Some(sys::ABS_RZ) };
            }
            TriggerMode::None => {
                axes_table[TRIGGER_L] = AxisPair::default();
                axes_table[TRIGGER_R] = AxisPair::default();
            }
        }

        // digital button table
        let layout = if cli.enable_abxyz { ButtonLayout::Literal } else { cli.layout };
        let mut buttons = match layout {
            ButtonLayout::Literal => BUTTONS_LITERAL,
            ButtonLayout::Foreign => BUTTONS_FOREIGN,
        };
        let z_code = match cli.z_to {
            Some(target) => target.code(),
            None if cli.enable_abxyz => sys::BTN_Z,
            None => DEFAULT_Z_CODE,
        };
        buttons[button_bit::Z] = Some(z_code);
        if cli.remap_dpad {
            for (i, code) in REMAPPED_DPAD.into_iter().enumerate() {
                buttons[button_bit::LEFT + i] = Some(code);
            }
            if z_code != DEFAULT_Z_CODE {
                // the direction whose substitute collides with Z takes
                // Z's default code instead
                if let Some(i) = REMAPPED_DPAD.iter().position(|&code| code == z_code) {
                    buttons[button_bit::LEFT + i] = Some(DEFAULT_Z_CODE);
                }
            }
        }
        if cli.shoulder == ShoulderMode::None {
            buttons[button_bit::L] = Some(sys::BTN_TL2);
            buttons[button_bit::R] = Some(sys::BTN_TR2);
        } else {
            buttons[button_bit::L] = Some(sys::BTN_TL);
            buttons[button_bit::R] = Some(sys::BTN_TR);
        }

        // explicit flip flags beat identity and convenience defaults
        if cli.flip_y_axis {
            flip_y = true;
        } else if cli.unflip_y_axis {
            flip_y = false;
        }

        // advertised ranges
        let mut absinfo = AbsInfoTable::default();
        if cli.raw {
            info!("raw mode enabled");
            absinfo.set_raw();
        }
        if let Some(expr) = &cli.deadzone {
            axes::apply_absinfo(&mut absinfo.flat, "--deadzone", expr);
        }
        if let Some(expr) = &cli.change_tolerance {
            axes::apply_absinfo(&mut absinfo.fuzz, "--change-tolerance", expr);
        }
        if let Some(expr) = &cli.min_value {
            axes::apply_absinfo(&mut absinfo.min, "--min-value", expr);
        }
        if let Some(expr) = &cli.max_value {
            axes::apply_absinfo(&mut absinfo.max, "--max-value", expr);
        }
        if flip_y {
            for slot in [LEFT_Y, RIGHT_Y] {
                for code in [axes_table[slot].lo, axes_table[slot].hi].into_iter().flatten() {
                    absinfo.flip_bounds(code);
                }
            }
        }

        let mut scales = HashMap::new();
        if let Some(expr) = &cli.axes_scale {
            axes::apply_scales(&mut scales, expr);
        }

        Config {
            vendor_id: cli.vendor.unwrap_or(identity.vendor_id),
            product_id: cli.product.unwrap_or(identity.product_id),
            device_name: cli.device_name.clone().unwrap_or_else(|| identity.name.to_string()),
            buttons,
            axes: axes_table,
            natural_ranges: NATURAL_RANGES,
            absinfo,
            scales,
            flip_y,
            thumb_left: cli.thumbstick_left,
            thumb_right: cli.thumbstick_right,
            trigger_left: cli.triggers,
            trigger_right: cli.triggers,
            shoulder: cli.shoulder,
            claim_interface: cli.claim,
            quit_on_interrupt: cli.quit_on_interrupt,
        }
    }

    /// Virtual pad name for a port, substituting the 1-based port number.
    pub fn name_for_port(&self, port: usize) -> String {
        self.device_name.replacen("%d", &(port + 1).to_string(), 1)
    }

    pub fn thumb_mode(&self, slot: usize) -> ThumbstickMode {
        if slot <= LEFT_Y {
            self.thumb_left
        } else {
            self.thumb_right
        }
    }

    pub fn trigger_mode(&self, slot: usize) -> TriggerMode {
        if slot == TRIGGER_L {
            self.trigger_left
        } else {
            self.trigger_right
        }
    }
}
