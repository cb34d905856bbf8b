//! The bring-up state machine
//!
//! A [`BringupMachine`] walks a drive from its bootloader into CANopen mode, runs the configured
//! final stage, and resets it. It is driven by periodic calls to [`BringupMachine::tick`], each
//! of which advances at most one state. Events from the drive are read from a shared
//! [`EventMailbox`], which is filled by the receive path (see [`Dispatcher`](crate::Dispatcher)).
use std::sync::Arc;
use std::time::Duration;

use drivelink_common::{
    bootloader::{reply_version, BootloaderCommand, BootloaderEvent},
    constants::{
        object_ids,
        values::{BRAKE_RELEASE, SAVE_CMD},
    },
    nmt::{NmtCommand, NmtCommandCmd},
    sdo::SdoWidth,
    traits::{AsyncCanReceiver, AsyncCanSender},
    CanMessage, EventMailbox, NodeId,
};
use tokio::time::MissedTickBehavior;

use crate::{
    config::{BringupConfig, FinalStage},
    deadline::Deadline,
    error::ActivationError,
    motion::MotionSequencer,
    sdo_client::SdoClient,
};

/// Pause after each write of a node ID change
const NODE_ID_WRITE_PAUSE: Duration = Duration::from_millis(100);

/// Registers read back by the CHECK_SDO stage
const CHECK_SDO_OBJECTS: [(u16, SdoWidth, &str); 4] = [
    (object_ids::CONTROL_WORD, SdoWidth::U16, "control word"),
    (object_ids::STATUS_WORD, SdoWidth::U16, "status word"),
    (object_ids::MODE_OF_OPERATION, SdoWidth::U8, "mode of operation"),
    (object_ids::TARGET_POSITION, SdoWidth::U32, "target position"),
];

/// The states of a bring-up run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupState {
    /// Idle, waiting for [`BringupMachine::start`]
    Init,
    /// Waiting for the bootloader heartbeat
    WaitHeartbeat,
    /// Send the version query
    GetBootloaderVersion,
    /// Waiting for the version reply
    WaitVersionResponse,
    /// Send the activation command
    SendActivation,
    /// Waiting for the activation acknowledgement
    WaitActivationResponse,
    /// Waiting for the pre-operational heartbeat of the CANopen application
    ConfirmCanopenMode,
    /// Read back the drive's control registers
    CheckSdo,
    /// Release the holding brake
    ReleaseBrake,
    /// Settle before changing the node ID
    ReadyForNodeIdChange,
    /// Write and store the new node ID
    ChangeNodeId,
    /// Run the motion sequence
    Motion,
    /// Send the NMT reset
    SoftReset,
    /// Terminal: the run succeeded
    ActivationSuccess,
    /// Terminal: the run failed
    ActivationFailed,
}

impl BringupState {
    /// True for the two terminal pass-through states
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BringupState::ActivationSuccess | BringupState::ActivationFailed
        )
    }

    /// The event a wait state is waiting for
    pub fn awaited_event(&self) -> Option<BootloaderEvent> {
        match self {
            BringupState::WaitHeartbeat => Some(BootloaderEvent::Heartbeat),
            BringupState::WaitVersionResponse => Some(BootloaderEvent::VersionReply),
            BringupState::WaitActivationResponse => Some(BootloaderEvent::ActivationAck),
            BringupState::ConfirmCanopenMode => Some(BootloaderEvent::CanopenConfirmation),
            _ => None,
        }
    }
}

impl core::fmt::Display for BringupState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            BringupState::Init => "INIT",
            BringupState::WaitHeartbeat => "WAIT_HEARTBEAT",
            BringupState::GetBootloaderVersion => "GET_BOOTLOADER_VERSION",
            BringupState::WaitVersionResponse => "WAIT_VERSION_RESPONSE",
            BringupState::SendActivation => "SEND_ACTIVATION",
            BringupState::WaitActivationResponse => "WAIT_ACTIVATION_RESPONSE",
            BringupState::ConfirmCanopenMode => "CONFIRM_CANOPEN_MODE",
            BringupState::CheckSdo => "CHECK_SDO",
            BringupState::ReleaseBrake => "RELEASE_BRAKE",
            BringupState::ReadyForNodeIdChange => "READY_FOR_NODE_ID_CHANGE",
            BringupState::ChangeNodeId => "CHANGE_NODE_ID",
            BringupState::Motion => "MOTION",
            BringupState::SoftReset => "SOFT_RESET",
            BringupState::ActivationSuccess => "ACTIVATION_SUCCESS",
            BringupState::ActivationFailed => "ACTIVATION_FAILED",
        };
        write!(f, "{name}")
    }
}

/// How a bring-up run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupOutcome {
    /// The drive was reset after completing every stage
    Success,
    /// A stage failed
    Failed,
}

/// Callback invoked when a run reaches a terminal state
pub type CompletionCallback = Box<dyn FnMut(BringupOutcome) + Send>;

/// Drives one node through the bring-up sequence
///
/// All traffic to the node, including the raw bootloader and NMT commands, goes through the
/// owned [`SdoClient`] so that every frame is subject to the same transmit timeout.
#[allow(missing_debug_implementations)]
pub struct BringupMachine<S, R> {
    config: BringupConfig,
    mbox: Arc<EventMailbox>,
    sdo: SdoClient<S, R>,
    state: BringupState,
    deadline: Deadline,
    outcome: Option<BringupOutcome>,
    bootloader_version: Option<u16>,
    completion_cb: Option<CompletionCallback>,
}

impl<S: AsyncCanSender, R: AsyncCanReceiver> BringupMachine<S, R> {
    /// Create a machine in the `Init` state
    ///
    /// `sdo_receiver` must deliver the SDO responses of the configured node; the remaining
    /// traffic is expected to reach `mbox`.
    pub fn new(config: BringupConfig, mbox: Arc<EventMailbox>, sender: S, sdo_receiver: R) -> Self {
        let mut sdo = SdoClient::new(
            config.node_id.sdo_request_id(),
            config.sdo_response_cob_id(),
            sender,
            sdo_receiver,
        );
        sdo.set_timeout(config.sdo_timeout());
        sdo.set_transmit_timeout(config.transmit_timeout());
        let deadline = Deadline::arm(config.state_timeout());
        Self {
            config,
            mbox,
            sdo,
            state: BringupState::Init,
            deadline,
            outcome: None,
            bootloader_version: None,
            completion_cb: None,
        }
    }

    /// The current state
    pub fn state(&self) -> BringupState {
        self.state
    }

    /// The node being brought up
    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// The outcome of the last completed run
    pub fn outcome(&self) -> Option<BringupOutcome> {
        self.outcome
    }

    /// The version reported by the bootloader during the last run, if it was queried
    pub fn bootloader_version(&self) -> Option<u16> {
        self.bootloader_version
    }

    /// Register a callback to be called when a run ends
    pub fn set_completion_callback(&mut self, cb: CompletionCallback) {
        self.completion_cb = Some(cb);
    }

    /// Begin a run
    ///
    /// Has no effect unless the machine is in `Init`.
    pub fn start(&mut self) {
        if self.state != BringupState::Init {
            log::warn!("Bring-up already running in {}", self.state);
            return;
        }
        log::info!("Starting bring-up of node {}", self.config.node_id);
        self.outcome = None;
        self.bootloader_version = None;
        self.mbox.clear(BootloaderEvent::Heartbeat);
        self.transition(BringupState::WaitHeartbeat);
    }

    /// Abandon the current run and return to `Init`
    ///
    /// The completion callback is not called.
    pub fn reset(&mut self) {
        if self.state != BringupState::Init {
            log::warn!("Bring-up reset from {}", self.state);
        }
        self.mbox.clear_all();
        self.state = BringupState::Init;
    }

    /// Start a run and tick it until the machine returns to `Init`
    pub async fn run(&mut self) -> BringupOutcome {
        self.start();
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.tick().await == BringupState::Init {
                return self.outcome.unwrap_or(BringupOutcome::Failed);
            }
        }
    }

    /// Advance the machine by at most one state
    ///
    /// Returns the state after the tick.
    pub async fn tick(&mut self) -> BringupState {
        match self.state {
            BringupState::Init => (),
            BringupState::WaitHeartbeat
            | BringupState::WaitVersionResponse
            | BringupState::WaitActivationResponse
            | BringupState::ConfirmCanopenMode => self.poll_wait(),
            BringupState::GetBootloaderVersion => {
                self.mbox.clear(BootloaderEvent::VersionReply);
                self.send_command(BootloaderCommand::QueryVersion).await;
            }
            BringupState::SendActivation => {
                self.mbox.clear(BootloaderEvent::ActivationAck);
                self.mbox.clear(BootloaderEvent::CanopenConfirmation);
                self.send_command(BootloaderCommand::Activate).await;
            }
            BringupState::CheckSdo => {
                self.check_sdo().await;
                self.advance();
            }
            BringupState::ReleaseBrake => match self.release_brake().await {
                Ok(()) => self.advance(),
                Err(e) => self.fail(e),
            },
            BringupState::ReadyForNodeIdChange => {
                if self.deadline.expired() {
                    self.advance();
                }
            }
            BringupState::ChangeNodeId => {
                if let FinalStage::ChangeNodeId { new_id, .. } = self.config.path.final_stage {
                    if let Err(e) = self.change_node_id(new_id).await {
                        log::error!("Node ID change abandoned: {e}");
                    }
                }
                self.advance();
            }
            BringupState::Motion => {
                let mut sequencer = MotionSequencer::new(
                    &mut self.sdo,
                    self.config.node_id,
                    self.config.nmt_cob_id(),
                    &self.config.motion,
                    self.config.sdo_timeout(),
                );
                match sequencer.run().await {
                    Ok(()) => self.advance(),
                    Err(e) => self.fail(e),
                }
            }
            BringupState::SoftReset => {
                let reset = NmtCommand {
                    cmd: NmtCommandCmd::ResetApp,
                    node: 0,
                }
                .to_can_message(self.config.nmt_cob_id());
                match self.sdo.transmit(reset).await {
                    Ok(()) => {
                        log::info!("Soft reset sent");
                        self.complete(BringupOutcome::Success);
                    }
                    Err(e) => self.fail(e.into()),
                }
            }
            BringupState::ActivationSuccess => {
                log::info!("Activation process completed successfully");
                self.state = BringupState::Init;
            }
            BringupState::ActivationFailed => {
                log::error!("Activation failed");
                self.state = BringupState::Init;
            }
        }
        self.state
    }

    /// Write a new node ID to the drive and store it
    ///
    /// The ID is validated before anything is sent. Each write only waits for the frame to be
    /// sent; the drive does not acknowledge them reliably while it is storing parameters.
    pub async fn change_node_id(&mut self, new_id: u8) -> Result<(), ActivationError> {
        let new_id = NodeId::new(new_id).inspect_err(|e| log::error!("{e}"))?;

        log::info!(
            "Changing node ID of node {} to {new_id}",
            self.config.node_id
        );
        self.sdo
            .send_write(object_ids::NODE_ID, 0, new_id.raw())
            .await?;
        tokio::time::sleep(NODE_ID_WRITE_PAUSE).await;
        self.sdo
            .send_write(object_ids::SAVE_OBJECTS, 1, SAVE_CMD)
            .await?;
        tokio::time::sleep(NODE_ID_WRITE_PAUSE).await;
        log::info!("Node ID set to {new_id} and saved");
        Ok(())
    }

    /// The state following `from` on the configured path
    pub fn next_state(&self, from: BringupState) -> BringupState {
        let path = &self.config.path;
        let after_final = |stage: FinalStage| match stage {
            FinalStage::None => BringupState::SoftReset,
            FinalStage::ChangeNodeId { .. } => BringupState::ReadyForNodeIdChange,
            FinalStage::Motion => BringupState::Motion,
        };
        let after_brake = || after_final(path.final_stage);
        let after_check = || {
            if path.release_brake {
                BringupState::ReleaseBrake
            } else {
                after_brake()
            }
        };

        match from {
            BringupState::Init => BringupState::WaitHeartbeat,
            BringupState::WaitHeartbeat if path.version_check => {
                BringupState::GetBootloaderVersion
            }
            BringupState::WaitHeartbeat => BringupState::SendActivation,
            BringupState::GetBootloaderVersion => BringupState::WaitVersionResponse,
            BringupState::WaitVersionResponse => BringupState::SendActivation,
            BringupState::SendActivation if path.await_activation_ack => {
                BringupState::WaitActivationResponse
            }
            BringupState::SendActivation => BringupState::ConfirmCanopenMode,
            BringupState::WaitActivationResponse => BringupState::ConfirmCanopenMode,
            BringupState::ConfirmCanopenMode if path.check_sdo => BringupState::CheckSdo,
            BringupState::ConfirmCanopenMode => after_check(),
            BringupState::CheckSdo => after_check(),
            BringupState::ReleaseBrake => after_brake(),
            BringupState::ReadyForNodeIdChange => BringupState::ChangeNodeId,
            BringupState::ChangeNodeId | BringupState::Motion => BringupState::SoftReset,
            BringupState::SoftReset => BringupState::ActivationSuccess,
            BringupState::ActivationSuccess | BringupState::ActivationFailed => BringupState::Init,
        }
    }

    fn transition(&mut self, next: BringupState) {
        log::debug!("{} -> {}", self.state, next);
        self.state = next;
        let timeout = match (next, self.config.path.final_stage) {
            (BringupState::ReadyForNodeIdChange, FinalStage::ChangeNodeId { settle_ms, .. }) => {
                Duration::from_millis(settle_ms)
            }
            _ => self.config.state_timeout(),
        };
        self.deadline = Deadline::arm(timeout);
    }

    fn advance(&mut self) {
        self.transition(self.next_state(self.state));
    }

    fn fail(&mut self, e: ActivationError) {
        log::error!("Bring-up failed in {}: {e}", self.state);
        self.complete(BringupOutcome::Failed);
    }

    fn complete(&mut self, outcome: BringupOutcome) {
        self.transition(match outcome {
            BringupOutcome::Success => BringupState::ActivationSuccess,
            BringupOutcome::Failed => BringupState::ActivationFailed,
        });
        self.outcome = Some(outcome);
        if let Some(cb) = &mut self.completion_cb {
            cb(outcome);
        }
    }

    /// Check a wait state's event, or its deadline
    ///
    /// The awaited event was cleared when the wait began: at `start` for the heartbeat, and just
    /// before the provoking command was sent for the others.
    fn poll_wait(&mut self) {
        let Some(event) = self.state.awaited_event() else {
            return;
        };
        if let Some(frame) = self.mbox.take(event) {
            self.on_event(event, &frame);
            self.advance();
        } else if self.deadline.expired() {
            self.fail(ActivationError::ResponseTimeout {
                what: format!("{event:?}"),
            });
        }
    }

    fn on_event(&mut self, event: BootloaderEvent, frame: &CanMessage) {
        match event {
            BootloaderEvent::Heartbeat => log::info!("Heartbeat received"),
            BootloaderEvent::VersionReply => {
                self.bootloader_version = reply_version(frame);
                match self.bootloader_version {
                    Some(version) => log::info!("Bootloader version: 0x{version:04X}"),
                    None => log::info!("Bootloader version response received"),
                }
            }
            BootloaderEvent::ActivationAck => log::info!("Activation acknowledged"),
            BootloaderEvent::CanopenConfirmation => log::info!("CANopen mode confirmed"),
        }
    }

    async fn send_command(&mut self, cmd: BootloaderCommand) {
        let msg = cmd.to_can_message(self.config.command_cob_id());
        match self.sdo.transmit(msg).await {
            Ok(()) => {
                log::info!("Sent {cmd:?} command");
                self.advance();
            }
            Err(e) => self.fail(e.into()),
        }
    }

    async fn check_sdo(&mut self) {
        let timeout = self.config.sdo_timeout();
        for (index, width, name) in CHECK_SDO_OBJECTS {
            match self.sdo.request_read(index, 0, width, timeout).await {
                Ok(value) => log::info!("{name} (0x{index:04X}) = 0x{value:08X}"),
                Err(e) => log::warn!("Failed to read {name} (0x{index:04X}): {e}"),
            }
        }
    }

    async fn release_brake(&mut self) -> Result<(), ActivationError> {
        match self
            .sdo
            .request_write(object_ids::BRAKE, 0, BRAKE_RELEASE, self.config.sdo_timeout())
            .await
        {
            Ok(()) => {
                log::info!("Brake released");
                Ok(())
            }
            Err(e) if e.is_transmit_error() => Err(e.into()),
            Err(e) => {
                log::warn!("Brake release not confirmed: {e}");
                Ok(())
            }
        }
    }
}
