//! CAN frame types and the fixed identifiers used on the bus

use snafu::Snafu;

/// A CAN identifier, either an 11-bit standard or a 29-bit extended ID
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanId {
    /// An extended 29-bit identifier
    Extended(u32),
    /// A standard 11-bit identifier
    Std(u16),
}

impl CanId {
    /// Create an extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id)
    }

    /// Create a standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id)
    }

    /// Get the raw ID as a u32
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true if this is an extended ID
    pub fn is_extended(&self) -> bool {
        match self {
            CanId::Extended(_) => true,
            CanId::Std(_) => false,
        }
    }
}

const MAX_DATA_LENGTH: usize = 8;

/// A classic CAN data frame
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanMessage {
    /// Payload buffer. Bytes beyond `dlc` are always zero.
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid payload bytes
    pub dlc: u8,
    /// Frame identifier
    pub id: CanId,
    rtr: bool,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            id: CanId::Std(0),
            rtr: false,
        }
    }
}

impl CanMessage {
    /// Create a new data frame
    ///
    /// Payloads longer than 8 bytes are truncated.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..dlc].copy_from_slice(&data[0..dlc]);

        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            rtr: false,
        }
    }

    /// Create a new remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            rtr: true,
            ..Default::default()
        }
    }

    /// Get the frame identifier
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the valid portion of the payload
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }

    /// Returns true if this is an RTR frame
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }

    /// Returns true if both frames carry the same identifier and payload
    pub fn same_frame(&self, other: &CanMessage) -> bool {
        self.id == other.id && self.data() == other.data()
    }
}

/// Bus error conditions reported by a CAN controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanError {
    /// Transmitted bit was not read back
    Bit,
    /// Bit stuffing rule violated
    Stuff,
    /// Fixed-format field contained an illegal bit
    Form,
    /// Transmitted frame was not acknowledged
    Ack,
    /// CRC mismatch
    Crc,
    /// Any other controller error
    #[snafu(display("Unknown CAN error 0x{raw:x}"))]
    Other {
        /// Raw error bits
        raw: u8,
    },
}

impl CanError {
    /// Convert the error-class bits of a CAN error frame
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => Self::Bit,
            0x02 => Self::Stuff,
            0x04 => Self::Form,
            0x08 => Self::Ack,
            0x10 => Self::Crc,
            _ => Self::Other { raw },
        }
    }
}

/// COB-ID for NMT commands
pub const NMT_CMD_ID: CanId = CanId::Std(0);
/// Base ID for heartbeat and bootloader frames (node ID is OR'd in)
pub const HEARTBEAT_ID: u16 = 0x700;
/// The default base ID for sending SDO requests (server node ID is added)
pub const SDO_REQ_BASE: u16 = 0x600;
/// The default base ID for sending SDO responses (server node ID is added)
pub const SDO_RESP_BASE: u16 = 0x580;

/// Errors parsing a frame into a typed message
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum MessageError {
    /// The payload was shorter than the message requires
    MessageTooShort,
    /// The message ID was not the expected value
    #[snafu(display("Unexpected message ID found: {cob_id:?}, expected: {expected:?}"))]
    UnexpectedId {
        /// The received ID
        cob_id: CanId,
        /// The ID the message type requires
        expected: CanId,
    },
    /// A field held a value outside its defined set
    InvalidField,
}
