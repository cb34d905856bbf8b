//! Failure causes of a bring-up run
use std::time::Duration;

use drivelink_common::node_id::InvalidNodeIdError;
use snafu::Snafu;

use crate::sdo_client::SdoClientError;

/// Everything which can end a bring-up run in [`ActivationFailed`](crate::BringupState::ActivationFailed)
///
/// Each cause is logged where it occurs. The state machine does not carry it forward; all causes
/// lead to the same terminal state.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ActivationError {
    /// The transport refused a frame
    #[snafu(display("Transmit failed: {message}"))]
    TransmitFailure {
        /// Description from the transport
        message: String,
    },
    /// The transport did not accept a frame in time
    #[snafu(display("Transmit did not complete within {timeout:?}"))]
    TransmitTimeout {
        /// The transmit timeout
        timeout: Duration,
    },
    /// An awaited frame or SDO response never arrived
    #[snafu(display("No response while waiting for {what}"))]
    ResponseTimeout {
        /// What was being waited for
        what: String,
    },
    /// A node address outside 0x01..=0x7F
    #[snafu(display("{source}"))]
    InvalidNodeId {
        /// The validation error
        source: InvalidNodeIdError,
    },
    /// The node answered an SDO request with an abort or an unusable response
    #[snafu(display("SDO exchange rejected: {message}"))]
    SdoRejected {
        /// Description of the response
        message: String,
    },
    /// The motion sequence could not be completed
    #[snafu(display("Motion aborted: {reason}"))]
    MotionAbort {
        /// Why the motion was abandoned
        reason: String,
    },
}

impl From<SdoClientError> for ActivationError {
    fn from(e: SdoClientError) -> Self {
        match e {
            SdoClientError::TransmitFailed { message } => ActivationError::TransmitFailure { message },
            SdoClientError::TransmitTimeout { timeout } => ActivationError::TransmitTimeout { timeout },
            SdoClientError::NoResponse { index, sub } => ActivationError::ResponseTimeout {
                what: format!("SDO response for 0x{index:04X}sub{sub}"),
            },
            other => ActivationError::SdoRejected {
                message: other.to_string(),
            },
        }
    }
}

impl From<InvalidNodeIdError> for ActivationError {
    fn from(source: InvalidNodeIdError) -> Self {
        ActivationError::InvalidNodeId { source }
    }
}

impl ActivationError {
    /// True if the error happened before a frame reached the bus
    pub fn is_transmit_error(&self) -> bool {
        matches!(
            self,
            ActivationError::TransmitFailure { .. } | ActivationError::TransmitTimeout { .. }
        )
    }
}
