//! A simulated motor drive, with a bootloader and a minimal CANopen object dictionary
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use drivelink_common::{
    bootloader::{ACTIVATION_ACK_SIGNATURE, VERSION_REPLY_SIGNATURE},
    constants::{object_ids, values::status},
    messages::{CanId, CanMessage},
    nmt::{NmtCommand, NmtCommandCmd, NmtState},
    sdo::{SdoRequest, SdoResponse, SdoValue},
    traits::AsyncCanSender,
    NodeId,
};
use tokio::{task::JoinHandle, time::Instant};

use crate::sim_bus::{BusDevice, SimBusSender};

/// Abort code returned for objects listed in [`DriveSettings::abort_objects`]
pub const ABORT_READ_ONLY: u32 = 0x0601_0002;

/// Control word which starts a move
const START_MOVE: u16 = 0x005F;

/// What the drive is currently running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveMode {
    /// Powered down: ignores the bus and sends nothing
    Off,
    /// In the bootloader, answering bootloader commands
    Bootloader,
    /// Running the CANopen application
    Canopen,
}

#[derive(Clone, Debug)]
pub struct DriveSettings {
    /// Answer the version query
    pub answer_version: bool,
    /// Acknowledge the activation command
    pub ack_activation: bool,
    /// COB-ID bootloader replies are sent on
    pub reply_cob_id: CanId,
    /// COB-ID the drive takes NMT commands on. Broadcasts on 0x000 are ignored unless this is
    /// set to it.
    pub nmt_cob_id: CanId,
    /// Report servo ready in the status word
    pub servo_ready: bool,
    /// Time from the start control word until "target reached"; `None` never reaches it
    pub move_duration: Option<Duration>,
    /// Objects whose writes are refused with [`ABORT_READ_ONLY`]
    pub abort_objects: Vec<u16>,
    /// Heartbeat period
    pub heartbeat_period: Duration,
}

impl DriveSettings {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            answer_version: true,
            ack_activation: true,
            reply_cob_id: node_id.sdo_response_id(),
            nmt_cob_id: CanId::std(node_id.raw() as u16),
            servo_ready: true,
            move_duration: Some(Duration::from_millis(3000)),
            abort_objects: Vec::new(),
            heartbeat_period: Duration::from_millis(100),
        }
    }
}

/// A write received by the drive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedWrite {
    pub time: Instant,
    pub index: u16,
    pub sub: u8,
    pub value: u32,
}

struct DriveState {
    mode: DriveMode,
    operational: bool,
    registers: HashMap<(u16, u8), u32>,
    writes: Vec<RecordedWrite>,
    reads: Vec<(u16, u8)>,
    move_started: Option<Instant>,
    resets: usize,
}

pub struct SimDrive {
    node_id: NodeId,
    settings: DriveSettings,
    state: Mutex<DriveState>,
}

impl SimDrive {
    pub fn new(node_id: NodeId, settings: DriveSettings) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            settings,
            state: Mutex::new(DriveState {
                mode: DriveMode::Bootloader,
                operational: false,
                registers: HashMap::new(),
                writes: Vec::new(),
                reads: Vec::new(),
                move_started: None,
                resets: 0,
            }),
        })
    }

    pub fn with_defaults(node_id: NodeId) -> Arc<Self> {
        Self::new(node_id, DriveSettings::new(node_id))
    }

    pub fn mode(&self) -> DriveMode {
        self.state.lock().unwrap().mode
    }

    pub fn set_mode(&self, mode: DriveMode) {
        self.state.lock().unwrap().mode = mode;
    }

    pub fn is_operational(&self) -> bool {
        self.state.lock().unwrap().operational
    }

    pub fn register(&self, index: u16, sub: u8) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .registers
            .get(&(index, sub))
            .copied()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Values written to one object, in order
    pub fn writes_to(&self, index: u16) -> Vec<u32> {
        self.writes()
            .iter()
            .filter(|w| w.index == index)
            .map(|w| w.value)
            .collect()
    }

    pub fn reads(&self) -> Vec<(u16, u8)> {
        self.state.lock().unwrap().reads.clone()
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    /// The heartbeat the drive currently emits
    pub fn heartbeat(&self) -> Option<CanMessage> {
        let id = self.node_id.heartbeat_id();
        match self.mode() {
            DriveMode::Off => None,
            DriveMode::Bootloader => Some(CanMessage::new(id, &[0; 8])),
            DriveMode::Canopen => Some(CanMessage::new(id, &[NmtState::PreOperational as u8])),
        }
    }

    /// Spawn a task which sends the drive's heartbeat periodically
    pub fn spawn_heartbeat(self: &Arc<Self>, mut sender: SimBusSender) -> JoinHandle<()> {
        let drive = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(drive.settings.heartbeat_period);
            loop {
                interval.tick().await;
                if let Some(msg) = drive.heartbeat() {
                    sender.send(msg).await.ok();
                }
            }
        })
    }

    fn status_word(&self, state: &DriveState, now: Instant) -> u16 {
        let mut word = 0;
        if self.settings.servo_ready {
            word |= status::SERVO_READY;
        }
        if let (Some(started), Some(duration)) = (state.move_started, self.settings.move_duration) {
            if now.duration_since(started) >= duration {
                word |= status::TARGET_REACHED;
            }
        }
        word
    }

    fn handle_nmt(&self, state: &mut DriveState, cmd: NmtCommand) {
        if cmd.node != 0 && cmd.node != self.node_id.raw() {
            return;
        }
        match cmd.cmd {
            NmtCommandCmd::Start => state.operational = true,
            NmtCommandCmd::ResetApp | NmtCommandCmd::ResetComm => {
                state.resets += 1;
                state.operational = false;
                state.move_started = None;
                state.mode = DriveMode::Bootloader;
            }
            _ => (),
        }
    }

    fn handle_bootloader(&self, state: &mut DriveState, msg: &CanMessage) -> Vec<CanMessage> {
        match msg.data() {
            [0x20, 0x20, ..] if self.settings.answer_version => {
                let mut reply = [0u8; 4];
                reply[..2].copy_from_slice(&VERSION_REPLY_SIGNATURE);
                reply[2..].copy_from_slice(&[0x01, 0x02]);
                vec![CanMessage::new(self.settings.reply_cob_id, &reply)]
            }
            [0x10, 0x10, ..] => {
                state.mode = DriveMode::Canopen;
                let mut replies = Vec::new();
                if self.settings.ack_activation {
                    replies.push(CanMessage::new(
                        self.settings.reply_cob_id,
                        &ACTIVATION_ACK_SIGNATURE,
                    ));
                }
                replies.push(CanMessage::new(
                    self.node_id.heartbeat_id(),
                    &[NmtState::PreOperational as u8],
                ));
                replies
            }
            _ => Vec::new(),
        }
    }

    fn handle_sdo(&self, state: &mut DriveState, msg: &CanMessage, now: Instant) -> Vec<CanMessage> {
        let Ok(request) = SdoRequest::try_from(msg.data()) else {
            return Vec::new();
        };
        let resp = match request {
            SdoRequest::InitiateDownload { index, sub, value } => {
                if self.settings.abort_objects.contains(&index) {
                    SdoResponse::abort(index, sub, ABORT_READ_ONLY)
                } else {
                    let value = value.as_u32();
                    state.registers.insert((index, sub), value);
                    state.writes.push(RecordedWrite {
                        time: now,
                        index,
                        sub,
                        value,
                    });
                    if index == object_ids::CONTROL_WORD && value == START_MOVE as u32 {
                        state.move_started = Some(now);
                    }
                    SdoResponse::download_acknowledge(index, sub)
                }
            }
            SdoRequest::InitiateUpload { index, sub } => {
                state.reads.push((index, sub));
                let value = if index == object_ids::STATUS_WORD {
                    self.status_word(state, now) as u32
                } else {
                    state.registers.get(&(index, sub)).copied().unwrap_or(0)
                };
                SdoResponse::expedited_upload(index, sub, SdoValue::U32(value))
            }
        };
        vec![resp.to_can_message(self.node_id.sdo_response_id())]
    }
}

impl BusDevice for SimDrive {
    fn handle(&self, msg: &CanMessage) -> Vec<CanMessage> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        if state.mode == DriveMode::Off {
            return Vec::new();
        }
        let id = msg.id();
        if id == self.settings.nmt_cob_id {
            if let Ok(cmd) = NmtCommand::from_payload(msg.data()) {
                self.handle_nmt(&mut state, cmd);
                return Vec::new();
            }
        }
        if id == CanId::std(self.node_id.raw() as u16) && state.mode == DriveMode::Bootloader {
            self.handle_bootloader(&mut state, msg)
        } else if id == self.node_id.sdo_request_id() && state.mode == DriveMode::Canopen {
            self.handle_sdo(&mut state, msg, now)
        } else {
            Vec::new()
        }
    }
}
