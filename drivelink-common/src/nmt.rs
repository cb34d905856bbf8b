//! Definitions for the NMT protocol

use crate::messages::{CanId, CanMessage, MessageError, NMT_CMD_ID};

/// Possible NMT states for a node
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NmtState {
    /// Bootup
    ///
    /// A node never remains in this state, as all nodes should transition automatically into PreOperational
    Bootup = 0,
    /// Node has been stopped
    Stopped = 4,
    /// Normal operational state
    Operational = 5,
    /// Node is awaiting command to enter operation
    PreOperational = 127,
}

impl core::fmt::Display for NmtState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NmtState::Bootup => write!(f, "Bootup"),
            NmtState::Stopped => write!(f, "Stopped"),
            NmtState::Operational => write!(f, "Operational"),
            NmtState::PreOperational => write!(f, "PreOperational"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
/// An error for [`NmtState::try_from()`]
pub struct InvalidNmtStateError(pub u8);

impl TryFrom<u8> for NmtState {
    type Error = InvalidNmtStateError;

    /// Attempt to convert a u8 to an NmtState enum
    ///
    /// Fails with BadNmtStateError if value is not a valid state
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use NmtState::*;
        match value {
            x if x == Bootup as u8 => Ok(Bootup),
            x if x == Stopped as u8 => Ok(Stopped),
            x if x == Operational as u8 => Ok(Operational),
            x if x == PreOperational as u8 => Ok(PreOperational),
            _ => Err(InvalidNmtStateError(value)),
        }
    }
}

/// NMT command specifiers
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NmtCommandCmd {
    /// Enter operational
    Start = 1,
    /// Enter stopped
    Stop = 2,
    /// Enter pre-operational
    EnterPreOp = 128,
    /// Reset the application
    ResetApp = 129,
    /// Reset communications
    ResetComm = 130,
}

impl NmtCommandCmd {
    /// Parse a command specifier byte
    pub fn from_byte(b: u8) -> Result<Self, MessageError> {
        match b {
            1 => Ok(Self::Start),
            2 => Ok(Self::Stop),
            128 => Ok(Self::EnterPreOp),
            129 => Ok(Self::ResetApp),
            130 => Ok(Self::ResetComm),
            _ => Err(MessageError::InvalidField),
        }
    }
}

/// An NMT command frame
///
/// A `node` of 0 addresses every node on the bus.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NmtCommand {
    /// The command
    pub cmd: NmtCommandCmd,
    /// Target node, or 0 for broadcast
    pub node: u8,
}

impl NmtCommand {
    /// Parse the two byte command payload, regardless of the COB-ID it arrived on
    pub fn from_payload(payload: &[u8]) -> Result<Self, MessageError> {
        if payload.len() < 2 {
            return Err(MessageError::MessageTooShort);
        }
        let cmd = NmtCommandCmd::from_byte(payload[0])?;
        Ok(NmtCommand {
            cmd,
            node: payload[1],
        })
    }

    /// Build the command frame on the given COB-ID
    ///
    /// Drives which take NMT commands on their own command COB-ID rather than on [`NMT_CMD_ID`]
    /// are addressed this way.
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        CanMessage::new(id, &[self.cmd as u8, self.node])
    }
}

impl TryFrom<CanMessage> for NmtCommand {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        if msg.id() != NMT_CMD_ID {
            return Err(MessageError::UnexpectedId {
                cob_id: msg.id(),
                expected: NMT_CMD_ID,
            });
        }
        Self::from_payload(msg.data())
    }
}

impl From<NmtCommand> for CanMessage {
    fn from(cmd: NmtCommand) -> Self {
        cmd.to_can_message(NMT_CMD_ID)
    }
}
