//! Implements a mailbox for receiving bring-up events from a drive
use defmt_or_log::debug;

use crate::{
    bootloader::BootloaderEvent,
    messages::{CanId, CanMessage},
    node_id::NodeId,
    AtomicCell,
};

/// A data structure shared between a receiving context (e.g. a CAN controller IRQ, or a receive
/// task) and the bring-up state machine.
///
/// Incoming messages should be passed to [EventMailbox::store_message]. Each recognised event is
/// latched along with the frame which triggered it, and stays latched until it is taken or
/// cleared.
#[derive(Debug)]
pub struct EventMailbox {
    node_id: NodeId,
    sdo_resp_cob_id: CanId,
    last_frame: AtomicCell<Option<CanMessage>>,
    events: [AtomicCell<Option<CanMessage>>; BootloaderEvent::COUNT],
}

impl EventMailbox {
    /// Create a mailbox for a node, using its standard SDO response COB-ID
    pub const fn new(node_id: NodeId, sdo_resp_cob_id: CanId) -> Self {
        Self {
            node_id,
            sdo_resp_cob_id,
            last_frame: AtomicCell::new(None),
            events: [
                AtomicCell::new(None),
                AtomicCell::new(None),
                AtomicCell::new(None),
                AtomicCell::new(None),
            ],
        }
    }

    /// The node this mailbox listens for
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The COB-ID whose frames are handed back as SDO responses
    pub fn sdo_response_cob_id(&self) -> CanId {
        self.sdo_resp_cob_id
    }

    /// Store a received CAN message
    ///
    /// Returns `Err(msg)` for frames the mailbox does not consume. This includes every SDO
    /// response from the node, which the caller should route to its SDO client. SDO responses are
    /// never deduplicated, since repeated polls of a register legitimately return identical
    /// frames.
    pub fn store_message(&self, msg: CanMessage) -> Result<(), CanMessage> {
        let event = BootloaderEvent::classify(&msg, self.node_id);

        if msg.id() == self.sdo_resp_cob_id && event.is_none() {
            return Err(msg);
        }

        if let Some(last) = self.last_frame.swap(Some(msg)) {
            if last.same_frame(&msg) {
                return Ok(());
            }
        }

        debug!(
            "Received CAN message: ID=0x{:X}, DLC={}, Data={:02X?}",
            msg.id().raw(),
            msg.dlc,
            msg.data()
        );

        match event {
            Some(event) => {
                self.events[event.index()].store(Some(msg));
                Ok(())
            }
            None => Err(msg),
        }
    }

    /// Take a latched event, clearing it
    pub fn take(&self, event: BootloaderEvent) -> Option<CanMessage> {
        self.events[event.index()].take()
    }

    /// Check whether an event is latched without consuming it
    pub fn peek(&self, event: BootloaderEvent) -> Option<CanMessage> {
        self.events[event.index()].load()
    }

    /// Discard a latched event before beginning a new wait for it
    ///
    /// The dedup entry is forgotten as well, so that a periodic frame (e.g. a heartbeat) which
    /// was seen before the wait began is accepted again.
    pub fn clear(&self, event: BootloaderEvent) {
        self.events[event.index()].store(None);
        self.last_frame.store(None);
    }

    /// Discard every latched event
    pub fn clear_all(&self) {
        for event in &self.events {
            event.store(None);
        }
        self.last_frame.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mbox() -> EventMailbox {
        let node = NodeId::new(3).unwrap();
        EventMailbox::new(node, node.sdo_response_id())
    }

    #[test]
    fn test_duplicate_frames_dispatch_once() {
        let mbox = mbox();
        let heartbeat = CanMessage::new(CanId::Std(0x703), &[0; 8]);

        assert!(mbox.store_message(heartbeat).is_ok());
        assert!(mbox.take(BootloaderEvent::Heartbeat).is_some());

        // The identical follow-up frame is dropped before dispatch
        assert!(mbox.store_message(heartbeat).is_ok());
        assert!(mbox.take(BootloaderEvent::Heartbeat).is_none());
    }

    #[test]
    fn test_clear_forgets_last_frame() {
        let mbox = mbox();
        let heartbeat = CanMessage::new(CanId::Std(0x703), &[0; 8]);
        mbox.store_message(heartbeat).ok();
        mbox.clear(BootloaderEvent::Heartbeat);
        assert!(mbox.peek(BootloaderEvent::Heartbeat).is_none());

        mbox.store_message(heartbeat).ok();
        assert!(mbox.peek(BootloaderEvent::Heartbeat).is_some());
    }

    #[test]
    fn test_event_carries_frame() {
        let mbox = mbox();
        let reply = CanMessage::new(CanId::Std(0x583), &[0xCC, 0xDD, 0x02, 0x04]);
        assert!(mbox.store_message(reply).is_ok());
        let latched = mbox.take(BootloaderEvent::VersionReply).unwrap();
        assert_eq!(latched.data(), &[0xCC, 0xDD, 0x02, 0x04]);
    }

    #[test]
    fn test_sdo_responses_pass_through() {
        let mbox = mbox();
        let resp = CanMessage::new(CanId::Std(0x583), &[0x4F, 0x41, 0x60, 0, 1, 0, 0, 0]);
        assert!(mbox.store_message(resp).is_err());
        assert!(mbox.store_message(resp).is_err());

        let other = CanMessage::new(CanId::Std(0x181), &[1, 2, 3]);
        assert!(mbox.store_message(other).is_err());
    }
}
