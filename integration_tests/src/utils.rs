#![allow(dead_code)]
use std::sync::Arc;

use drivelink_client::{
    BringupConfig, BringupMachine, Dispatcher, SdoClient, SdoResponseReceiver,
};
use drivelink_common::{
    bootloader::BootloaderEvent,
    sdo::{SdoRequest, SdoResponse},
    traits::AsyncCanReceiver,
    EventMailbox, NodeId,
};
use tokio::task::JoinHandle;

use crate::sim_bus::{SendMode, SimBus, SimBusReceiver, SimBusSender};
use crate::sim_drive::{DriveSettings, SimDrive};

pub fn get_sdo_client(
    bus: &mut SimBus,
    node_id: u8,
) -> SdoClient<SimBusSender, SimBusReceiver> {
    let sender = bus.new_sender();
    let receiver = bus.new_receiver();
    SdoClient::new_std(NodeId::new(node_id).unwrap(), sender, receiver)
}

/// A drive on a simulated bus, plus a bring-up machine wired up to talk to it
pub struct TestRig {
    pub bus: SimBus,
    pub drive: Arc<SimDrive>,
    pub mbox: Arc<EventMailbox>,
    pub machine: BringupMachine<SimBusSender, SdoResponseReceiver>,
    _dispatcher: Dispatcher,
    heartbeat: JoinHandle<()>,
}

impl TestRig {
    pub fn new(config: BringupConfig, settings: DriveSettings) -> Self {
        Self::with_send_mode(config, settings, SendMode::Deliver)
    }

    /// Create a rig whose bring-up machine sends through a sender in `mode`
    pub fn with_send_mode(config: BringupConfig, settings: DriveSettings, mode: SendMode) -> Self {
        let mut bus = SimBus::new();
        let drive = SimDrive::new(config.node_id, settings);
        bus.add_device(drive.clone());
        let heartbeat = drive.spawn_heartbeat(bus.new_sender());

        let mbox = Arc::new(EventMailbox::new(
            config.node_id,
            config.sdo_response_cob_id(),
        ));
        let (dispatcher, sdo_rx) = Dispatcher::spawn(bus.new_receiver(), mbox.clone());
        let machine = BringupMachine::new(config, mbox.clone(), bus.new_sender_with(mode), sdo_rx);
        Self {
            bus,
            drive,
            mbox,
            machine,
            _dispatcher: dispatcher,
            heartbeat,
        }
    }
}

impl Drop for TestRig {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

pub struct BusLogger {
    rx: SimBusReceiver,
    node_id: NodeId,
}

impl BusLogger {
    pub fn new(rx: SimBusReceiver, node_id: NodeId) -> Self {
        Self { rx, node_id }
    }

    pub fn print(&mut self) {
        println!("Bus message history");
        println!("-------------------");
        while let Some(msg) = self.rx.try_recv() {
            if let Some(event) = BootloaderEvent::classify(&msg, self.node_id) {
                println!("{:?} {:?}", event, msg);
            } else if msg.id() == self.node_id.sdo_request_id() {
                match SdoRequest::try_from(msg.data()) {
                    Ok(req) => println!("{:?}", req),
                    Err(_) => println!("{:?}", msg),
                }
            } else if msg.id() == self.node_id.sdo_response_id() {
                match SdoResponse::try_from(msg) {
                    Ok(resp) => println!("{:?}", resp),
                    Err(_) => println!("{:?}", msg),
                }
            } else {
                println!("{:?}", msg);
            }
        }
    }
}
