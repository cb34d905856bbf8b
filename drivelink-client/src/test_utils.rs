//! Test utils
//!
//! Only available with `#[cfg(test)]`
use drivelink_common::{
    traits::{AsyncCanReceiver, AsyncCanSender},
    CanMessage,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A sender which pushes frames into a channel, or refuses them all when `reject` is set
pub struct ChannelSender {
    pub tx: UnboundedSender<CanMessage>,
    pub reject: bool,
}

impl AsyncCanSender for ChannelSender {
    type Error = CanMessage;

    async fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        if self.reject {
            return Err(msg);
        }
        self.tx.send(msg).map_err(|e| e.0)
    }
}

/// A receiver fed from a channel
pub struct ChannelReceiver {
    pub rx: UnboundedReceiver<CanMessage>,
}

impl AsyncCanReceiver for ChannelReceiver {
    type Error = ();

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.rx.try_recv().ok()
    }

    async fn recv(&mut self) -> Result<CanMessage, ()> {
        self.rx.recv().await.ok_or(())
    }
}

/// Create a sender/receiver pair, along with the far ends of both channels
///
/// Returns `(sender, receiver, sent frames, injected responses)`
pub fn channel_pair(
    reject: bool,
) -> (
    ChannelSender,
    ChannelReceiver,
    UnboundedReceiver<CanMessage>,
    UnboundedSender<CanMessage>,
) {
    let (bus_tx, bus_rx) = unbounded_channel();
    let (resp_tx, resp_rx) = unbounded_channel();
    (
        ChannelSender { tx: bus_tx, reject },
        ChannelReceiver { rx: resp_rx },
        bus_rx,
        resp_tx,
    )
}

/// Drain every frame sent so far
pub fn sent_frames(bus_rx: &mut UnboundedReceiver<CanMessage>) -> Vec<CanMessage> {
    let mut frames = Vec::new();
    while let Ok(msg) = bus_rx.try_recv() {
        frames.push(msg);
    }
    frames
}
