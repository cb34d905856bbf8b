//! Routes received frames to the event mailbox and the SDO client
use std::sync::Arc;
use std::time::Duration;

use drivelink_common::{traits::AsyncCanReceiver, CanMessage, EventMailbox};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

/// Pass one received frame to the mailbox, forwarding anything it does not consume to the SDO
/// response queue
///
/// This is the whole receive path, and never blocks, so it can be driven directly from tests or
/// from a receive interrupt.
pub fn dispatch_frame(mbox: &EventMailbox, sdo_tx: &UnboundedSender<CanMessage>, msg: CanMessage) {
    if let Err(msg) = mbox.store_message(msg) {
        if msg.id() == mbox.sdo_response_cob_id() {
            // A closed channel only means the client is gone
            sdo_tx.send(msg).ok();
        } else {
            log::trace!("Unhandled RX message: {:?}", msg);
        }
    }
}

/// A background task which drains a CAN receiver into an [`EventMailbox`]
///
/// The task is aborted when the dispatcher is dropped.
#[derive(Debug)]
pub struct Dispatcher {
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the receive task
    ///
    /// Returns the dispatcher handle and the receiver SDO responses are delivered to, for use by
    /// an [`SdoClient`](crate::SdoClient).
    pub fn spawn<R>(mut receiver: R, mbox: Arc<EventMailbox>) -> (Self, SdoResponseReceiver)
    where
        R: AsyncCanReceiver + 'static,
    {
        let (sdo_tx, sdo_rx) = unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                let msg = match receiver.recv().await {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::error!("Error receiving message: {e:?}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                dispatch_frame(&mbox, &sdo_tx, msg);
            }
        });
        (Self { task }, SdoResponseReceiver { channel_rx: sdo_rx })
    }

    /// Create a response receiver fed by [`dispatch_frame`] calls made by the caller
    pub fn channel() -> (UnboundedSender<CanMessage>, SdoResponseReceiver) {
        let (tx, rx) = unbounded_channel();
        (tx, SdoResponseReceiver { channel_rx: rx })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Receives the SDO responses separated out by the dispatcher
#[derive(Debug)]
pub struct SdoResponseReceiver {
    channel_rx: UnboundedReceiver<CanMessage>,
}

/// Returned when the dispatcher has stopped
#[derive(Debug, Clone, Copy)]
pub struct DispatcherClosed;

impl AsyncCanReceiver for SdoResponseReceiver {
    type Error = DispatcherClosed;

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.channel_rx.try_recv().ok()
    }

    async fn recv(&mut self) -> Result<CanMessage, Self::Error> {
        self.channel_rx.recv().await.ok_or(DispatcherClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelink_common::{bootloader::BootloaderEvent, CanId, NodeId};

    #[tokio::test]
    async fn test_dispatch_routes_sdo_responses() {
        let node = NodeId::new(3).unwrap();
        let mbox = EventMailbox::new(node, node.sdo_response_id());
        let (tx, mut rx) = Dispatcher::channel();

        let heartbeat = CanMessage::new(CanId::Std(0x703), &[0; 8]);
        let resp = CanMessage::new(CanId::Std(0x583), &[0x60, 0x40, 0x60, 0, 0, 0, 0, 0]);
        dispatch_frame(&mbox, &tx, heartbeat);
        dispatch_frame(&mbox, &tx, resp);
        dispatch_frame(&mbox, &tx, resp);

        assert!(mbox.take(BootloaderEvent::Heartbeat).is_some());
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
    }
}
