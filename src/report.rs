//! Adapter wire protocol
//!
//! Parsing for the adapter's fixed-layout status report and framing for the
//! outbound rumble command.

/// Inbound interrupt endpoint carrying status reports.
pub const ENDPOINT_IN: u8 = 0x81;

/// Outbound interrupt endpoint for commands.
pub const ENDPOINT_OUT: u8 = 0x02;

/// Single-byte activation command; the adapter stays silent until it arrives.
pub const HANDSHAKE: [u8; 1] = [0x13];

/// First byte of every valid status report.
pub const REPORT_MARKER: u8 = 0x21;

/// Total report length: marker byte plus four port records.
pub const REPORT_LEN: usize = 37;

/// Controller ports multiplexed by one adapter.
pub const PORT_COUNT: usize = 4;

/// Bytes per port record: status byte, two button bytes, six axis bytes.
pub const PORT_RECORD_LEN: usize = 9;

/// Command byte of the outbound rumble vector.
pub const RUMBLE_COMMAND: u8 = 0x11;

/// Rumble command at rest: command byte plus one zero intensity per port.
pub const RUMBLE_IDLE: [u8; 5] = [RUMBLE_COMMAND, 0, 0, 0, 0];

const STATUS_STANDARD: u8 = 0x10;
const STATUS_WIRELESS: u8 = 0x20;
const STATUS_EXTRA_POWER: u8 = 0x04;

/// Kind of controller a port reports in its status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerKind {
    /// Nothing plugged into the port.
    #[default]
    None,
    /// Wired controller; the only kind that can rumble.
    Standard,
    /// WaveBird receiver. Radio powered, never rumbles.
    Wavebird,
}

impl ControllerKind {
    /// Decode the controller-type nibble. Unknown bit combinations
    /// (including both bits at once) read as nothing connected.
    pub fn from_status(status: u8) -> Self {
        match status & (STATUS_STANDARD | STATUS_WIRELESS) {
            STATUS_STANDARD => ControllerKind::Standard,
            STATUS_WIRELESS => ControllerKind::Wavebird,
            _ => ControllerKind::None,
        }
    }

    pub fn is_connected(self) -> bool {
        self != ControllerKind::None
    }
}

/// One port's 9-byte slice of a status report.
#[derive(Debug, Clone, Copy)]
pub struct PortRecord<'a> {
    bytes: &'a [u8],
}

impl<'a> PortRecord<'a> {
    pub fn kind(&self) -> ControllerKind {
        ControllerKind::from_status(self.bytes[0])
    }

    /// Whether the port can drive a rumble motor (wired power available).
    pub fn extra_power(&self) -> bool {
        self.bytes[0] & STATUS_EXTRA_POWER != 0
    }

    /// The 16-bit button mask, big-endian on the wire.
    pub fn buttons(&self) -> u16 {
        u16::from_be_bytes([self.bytes[1], self.bytes[2]])
    }

    /// The six raw axis bytes, in slot order.
    pub fn axes(&self) -> &'a [u8] {
        &self.bytes[3..PORT_RECORD_LEN]
    }
}

/// A validated 37-byte adapter status report.
#[derive(Debug, Clone, Copy)]
pub struct StatusReport<'a> {
    bytes: &'a [u8],
}

impl<'a> StatusReport<'a> {
    /// Validate length and marker. Anything else is not a status report
    /// and the poll that read it is skipped.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() != REPORT_LEN || bytes[0] != REPORT_MARKER {
            return None;
        }
        Some(Self { bytes })
    }

    pub fn port(&self, index: usize) -> PortRecord<'a> {
        let start = 1 + index * PORT_RECORD_LEN;
        PortRecord {
            bytes: &self.bytes[start..start + PORT_RECORD_LEN],
        }
    }

    pub fn ports(&self) -> impl Iterator<Item = PortRecord<'a>> + '_ {
        (0..PORT_COUNT).map(|i| self.port(i))
    }
}
