//! Command-line surface
//!
//! Every option feeds one field of the immutable configuration snapshot
//! built in `main`; see [`crate::config::Config::from_cli`] for the
//! assembly rules and precedence between related options.

use clap::Parser;

use crate::config::{ButtonLayout, ShoulderMode, ThumbstickMode, TriggerMode};
use crate::uinput::sys;

/// Expose Wii U GameCube adapter ports as virtual Linux gamepads.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Advertise raw 0-255 axis ranges instead of the calibrated controller ranges
    #[arg(short, long)]
    pub raw: bool,

    /// Reverse incoming thumbstick Y values (the adapter identity's default)
    #[arg(long, overrides_with = "unflip_y_axis")]
    pub flip_y_axis: bool,

    /// Pass thumbstick Y values through as they arrive
    #[arg(long)]
    pub unflip_y_axis: bool,

    /// Vendor id advertised by the virtual pads (hex accepted)
    #[arg(long, value_parser = parse_id)]
    pub vendor: Option<u16>,

    /// Product id advertised by the virtual pads (hex accepted)
    #[arg(long, value_parser = parse_id)]
    pub product: Option<u16>,

    /// Virtual pad name template; %d becomes the 1-based port number
    #[arg(long, value_name = "NAME")]
    pub device_name: Option<String>,

    /// Imitate a foreign pad identity (index into the identity table)
    #[arg(long, value_name = "INDEX")]
    pub spoof_foreign: Option<usize>,

    /// Explicitly claim USB interface 0, retrying until it succeeds
    #[arg(long, overrides_with = "implicit_use")]
    pub claim: bool,

    /// Rely on implicit interface use (default)
    #[arg(long)]
    pub implicit_use: bool,

    /// Button the physical Z button activates (default: thumbl)
    #[arg(long, value_enum, value_name = "TARGET")]
    pub z_to: Option<ZTarget>,

    /// Literal A/B/X/Y layout with Z emitting BTN_Z
    #[arg(long)]
    pub enable_abxyz: bool,

    /// Button layout for A/B/X/Y
    #[arg(long, value_enum, default_value = "literal")]
    pub layout: ButtonLayout,

    /// Emit substitute buttons on the D-pad instead of its literal codes
    #[arg(long, overrides_with = "literal_dpad")]
    pub remap_dpad: bool,

    /// Emit the literal D-pad codes (default)
    #[arg(long)]
    pub literal_dpad: bool,

    /// Free mapping of the six analog slots, e.g. "X=wheel,Y=brake+gas"
    #[arg(long, value_name = "MAP")]
    pub axes_map: Option<String>,

    /// Reset the analog mapping to "X=x,Y=y,L=z,RX=rx,RY=ry,R=rz"
    #[arg(long)]
    pub default_axes_map: bool,

    /// Map RY=throttle,RX=rudder and leave Y unflipped
    #[arg(long)]
    pub throttle_rudder: bool,

    /// Map Y=brake+gas,X=wheel and leave Y unflipped
    #[arg(long)]
    pub brake_gas_wheel: bool,

    /// Post-clamp output scaling, e.g. "x=0:255,ry=128"; empty value removes a scale
    #[arg(long, value_name = "SCALES")]
    pub axes_scale: Option<String>,

    /// Left thumbstick handling
    #[arg(long, value_enum, value_name = "MODE", default_value = "normal")]
    pub thumbstick_left: ThumbstickMode,

    /// Right thumbstick handling
    #[arg(long, value_enum, value_name = "MODE", default_value = "normal")]
    pub thumbstick_right: ThumbstickMode,

    /// Trigger handling for L and R
    #[arg(long, value_enum, value_name = "MODE", default_value = "axes")]
    pub triggers: TriggerMode,

    /// Shoulder click policy for fully depressed L and R
    #[arg(long, value_enum, value_name = "POLICY", default_value = "none")]
    pub shoulder: ShoulderMode,

    /// Stop an adapter worker on a transfer error instead of retrying
    #[arg(long, overrides_with = "continue_on_interrupt")]
    pub quit_on_interrupt: bool,

    /// Sleep and retry after transfer errors (default)
    #[arg(long)]
    pub continue_on_interrupt: bool,

    /// Advertised per-axis deadzone, e.g. "z=35,rz=35"
    #[arg(long, value_name = "VALUES")]
    pub deadzone: Option<String>,

    /// Advertised per-axis change tolerance, e.g. "x=1"
    #[arg(long, value_name = "VALUES")]
    pub change_tolerance: Option<String>,

    /// Lowest value emitted per axis, e.g. "x=35"
    #[arg(long, value_name = "VALUES")]
    pub min_value: Option<String>,

    /// Highest value emitted per axis, e.g. "x=218"
    #[arg(long, value_name = "VALUES")]
    pub max_value: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Destinations selectable for the physical Z button.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZTarget {
    /// Left thumbstick click; most games know this one.
    Thumbl,
    /// Right thumbstick click.
    Thumbr,
    /// Left bumper.
    Bumpl,
    /// Right bumper.
    Bumpr,
    /// Back/select.
    Select,
    /// The literal BTN_Z, which few games recognize.
    Z,
}

impl ZTarget {
    pub fn code(self) -> u16 {
        match self {
            ZTarget::Thumbl => sys::BTN_THUMBL,
            ZTarget::Thumbr => sys::BTN_THUMBR,
            ZTarget::Bumpl => sys::BTN_TL,
            ZTarget::Bumpr => sys::BTN_TR,
            ZTarget::Select => sys::BTN_SELECT,
            ZTarget::Z => sys::BTN_Z,
        }
    }
}

fn parse_id(text: &str) -> Result<u16, String> {
    crate::config::axes::parse_int(text)
        .and_then(|value| u16::try_from(value).ok())
        .ok_or_else(|| format!("invalid id \"{text}\""))
}
