use std::sync::{Arc, Mutex};

use drivelink_common::messages::CanMessage;
use drivelink_common::traits::{AsyncCanReceiver, AsyncCanSender};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Something attached to the simulated bus which answers frames
pub trait BusDevice: Send + Sync {
    /// Handle a frame seen on the bus, returning any frames sent in reply
    fn handle(&self, msg: &CanMessage) -> Vec<CanMessage>;
}

/// How a [`SimBusSender`] treats frames handed to it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendMode {
    /// Put the frame on the bus
    #[default]
    Deliver,
    /// Refuse every frame
    Reject,
    /// Never complete a send
    Stall,
}

#[derive(Clone, Default)]
pub struct SimBus {
    devices: Arc<Mutex<Vec<Arc<dyn BusDevice>>>>,
    // External channels for sending messages to, e.g. test listeners
    external_channels: Arc<Mutex<Vec<UnboundedSender<CanMessage>>>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, device: Arc<dyn BusDevice>) {
        self.devices.lock().unwrap().push(device);
    }

    pub fn new_receiver(&mut self) -> SimBusReceiver {
        let (tx, rx) = unbounded_channel();
        self.external_channels.lock().unwrap().push(tx);
        SimBusReceiver { channel_rx: rx }
    }

    pub fn new_sender(&mut self) -> SimBusSender {
        self.new_sender_with(SendMode::Deliver)
    }

    pub fn new_sender_with(&mut self, mode: SendMode) -> SimBusSender {
        SimBusSender {
            bus: self.clone(),
            mode,
        }
    }

    fn broadcast(&self, msg: CanMessage) {
        for ext in self.external_channels.lock().unwrap().iter() {
            // A dropped listener is not an error
            ext.send(msg).ok();
        }
    }

    /// Put a frame on the bus, along with every reply it provokes from the attached devices
    fn deliver(&self, msg: CanMessage) {
        self.broadcast(msg);
        let devices = self.devices.lock().unwrap().clone();
        for device in devices {
            for reply in device.handle(&msg) {
                self.broadcast(reply);
            }
        }
    }
}

pub struct SimBusSender {
    bus: SimBus,
    mode: SendMode,
}

impl AsyncCanSender for SimBusSender {
    type Error = CanMessage;

    async fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        match self.mode {
            SendMode::Deliver => {
                self.bus.deliver(msg);
                Ok(())
            }
            SendMode::Reject => Err(msg),
            SendMode::Stall => std::future::pending().await,
        }
    }
}

pub struct SimBusReceiver {
    channel_rx: UnboundedReceiver<CanMessage>,
}

impl AsyncCanReceiver for SimBusReceiver {
    type Error = ();

    async fn recv(&mut self) -> Result<CanMessage, Self::Error> {
        self.channel_rx.recv().await.ok_or(())
    }

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.channel_rx.try_recv().ok()
    }

    fn flush(&mut self) {
        while self.channel_rx.try_recv().is_ok() {}
    }
}
