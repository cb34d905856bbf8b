//! Types for representing node IDs
//!

use crate::messages::{CanId, HEARTBEAT_ID, SDO_REQ_BASE, SDO_RESP_BASE};

/// A newtype on u8 to enforce a valid node ID (1-127)
///
/// Every CAN identifier the bring-up sequence uses is derived from this address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "std", serde(try_from = "u8", into = "u8"))]
pub struct NodeId(u8);

impl NodeId {
    /// The lowest assignable node ID
    pub const MIN: u8 = 0x01;
    /// The highest assignable node ID
    pub const MAX: u8 = 0x7F;

    /// Try to create a new NodeId
    ///
    /// It will fail if value is invalid (i.e. <1 or >127)
    pub const fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if value >= Self::MIN && value <= Self::MAX {
            Ok(NodeId(value))
        } else {
            Err(InvalidNodeIdError(value))
        }
    }

    /// Get the raw node ID as a u8
    pub fn raw(&self) -> u8 {
        self.0
    }

    /// The COB-ID this node's SDO server listens on
    pub fn sdo_request_id(&self) -> CanId {
        CanId::Std(SDO_REQ_BASE + self.0 as u16)
    }

    /// The COB-ID this node's SDO server responds on, using the standard base
    pub fn sdo_response_id(&self) -> CanId {
        self.sdo_response_id_with_base(SDO_RESP_BASE)
    }

    /// The COB-ID this node's SDO server responds on, for devices using a non-standard base
    pub fn sdo_response_id_with_base(&self, base: u16) -> CanId {
        CanId::Std(base + self.0 as u16)
    }

    /// The COB-ID carrying this node's heartbeat and bootloader status frames
    pub fn heartbeat_id(&self) -> CanId {
        CanId::Std(HEARTBEAT_ID | self.0 as u16)
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.raw()
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

/// Error for converting u8 to a NodeId
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidNodeIdError(pub u8);

impl core::fmt::Display for InvalidNodeIdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Invalid node ID 0x{:02X}. Must be in range 0x01 to 0x7F.",
            self.0
        )
    }
}
impl core::error::Error for InvalidNodeIdError {}
