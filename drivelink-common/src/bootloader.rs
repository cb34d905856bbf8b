//! Bootloader command frames and the status frames a drive emits while starting up
//!
//! The bootloader accepts two-byte commands on a raw command COB-ID and replies with frames
//! identified by a two byte signature rather than by COB-ID.

use crate::{
    messages::{CanId, CanMessage},
    nmt::NmtState,
    node_id::NodeId,
};

/// Signature of an activation acknowledgement
pub const ACTIVATION_ACK_SIGNATURE: [u8; 2] = [0xAA, 0xBB];
/// Signature of a bootloader version reply
pub const VERSION_REPLY_SIGNATURE: [u8; 2] = [0xCC, 0xDD];

/// Commands accepted by the drive bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootloaderCommand {
    /// Ask the bootloader to report its version
    QueryVersion,
    /// Leave the bootloader and start the application
    Activate,
}

impl BootloaderCommand {
    /// The fixed command payload
    pub fn payload(&self) -> [u8; 2] {
        match self {
            BootloaderCommand::QueryVersion => [0x20, 0x20],
            BootloaderCommand::Activate => [0x10, 0x10],
        }
    }

    /// Build the command frame on the given COB-ID
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        CanMessage::new(id, &self.payload())
    }
}

/// Events which the bring-up sequence waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootloaderEvent {
    /// All-zero frame on the node's heartbeat COB-ID, sent by the bootloader after reset
    Heartbeat,
    /// Pre-operational heartbeat, sent once the CANopen application is running
    CanopenConfirmation,
    /// Reply to [`BootloaderCommand::Activate`]
    ActivationAck,
    /// Reply to [`BootloaderCommand::QueryVersion`]
    VersionReply,
}

impl BootloaderEvent {
    /// Number of distinct events
    pub const COUNT: usize = 4;

    /// A stable index for storing per-event state
    pub const fn index(&self) -> usize {
        match self {
            BootloaderEvent::Heartbeat => 0,
            BootloaderEvent::CanopenConfirmation => 1,
            BootloaderEvent::ActivationAck => 2,
            BootloaderEvent::VersionReply => 3,
        }
    }

    /// Classify a received frame for the given node
    ///
    /// Acknowledge and version replies are recognised by their payload signature on any COB-ID,
    /// since drives differ in which identifier they answer on.
    pub fn classify(msg: &CanMessage, node_id: NodeId) -> Option<BootloaderEvent> {
        let data = msg.data();
        if data.starts_with(&ACTIVATION_ACK_SIGNATURE) {
            return Some(BootloaderEvent::ActivationAck);
        }
        if data.starts_with(&VERSION_REPLY_SIGNATURE) {
            return Some(BootloaderEvent::VersionReply);
        }
        if msg.id() == node_id.heartbeat_id() && !data.is_empty() {
            if data.iter().all(|b| *b == 0) {
                return Some(BootloaderEvent::Heartbeat);
            }
            if data[0] == NmtState::PreOperational as u8 {
                return Some(BootloaderEvent::CanopenConfirmation);
            }
        }
        None
    }
}

/// Read the version number out of a version reply, if it carries one
pub fn reply_version(msg: &CanMessage) -> Option<u16> {
    match msg.data() {
        [0xCC, 0xDD, major, minor, ..] => Some(u16::from_be_bytes([*major, *minor])),
        _ => None,
    }
}
