use std::sync::Arc;

use crate::{
    messages::{CanError, CanId, CanMessage},
    traits::{AsyncCanReceiver, AsyncCanSender, CanSendError},
};
use snafu::{ResultExt, Snafu};
use socketcan::{CanFilter, CanFrame, CanSocket, EmbeddedFrame, Frame, ShouldRetry, Socket, SocketOptions};
use tokio::io::{unix::AsyncFd, Interest};

fn socketcan_id_to_drivelink_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn drivelink_id_to_socketcan_id(id: CanId) -> Option<socketcan::CanId> {
    match id {
        CanId::Extended(id) => socketcan::ExtendedId::new(id).map(Into::into),
        CanId::Std(id) => socketcan::StandardId::new(id).map(Into::into),
    }
}

fn socketcan_frame_to_drivelink_message(frame: socketcan::CanFrame) -> Result<CanMessage, CanError> {
    let id = socketcan_id_to_drivelink_id(frame.can_id());

    match frame {
        CanFrame::Data(frame) => Ok(CanMessage::new(id, frame.data())),
        CanFrame::Remote(_) => Ok(CanMessage::new_rtr(id)),
        CanFrame::Error(frame) => Err(CanError::from_raw(frame.error_bits() as u8)),
    }
}

fn drivelink_message_to_socket_frame(frame: CanMessage) -> Option<socketcan::CanFrame> {
    let id = drivelink_id_to_socketcan_id(frame.id())?;

    if frame.is_rtr() {
        socketcan::CanFrame::new_remote(id, 0)
    } else {
        socketcan::CanFrame::new(id, frame.data())
    }
}

/// Receiving half of a socketcan device
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<AsyncCanSocket>,
}

/// Error returned by [`SocketCanReceiver`]
#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// The socket returned an IO error
    Io {
        /// The underlying error
        source: socketcan::IoError,
    },
    /// The controller reported a bus error
    Can {
        /// The underlying error
        source: CanError,
    },
}

/// Create an Async socket around a socketcan CanSocket. This is just a reimplemenation of the tokio
/// socket in the `socketcan` crate, but with support for `try_read_frame` added.
#[derive(Debug)]
struct AsyncCanSocket(AsyncFd<CanSocket>);

impl AsyncCanSocket {
    pub fn open(ifname: &str) -> Result<Self, std::io::Error> {
        let socket = CanSocket::open(ifname)?;
        socket.set_nonblocking(true)?;
        Ok(Self(AsyncFd::new(socket)?))
    }

    /// Attempt to read a CAN frame from the socket without blocking
    ///
    /// If no message is immediately available, a WouldBlock error is returned.
    pub fn try_read_frame(&self) -> Result<CanFrame, std::io::Error> {
        self.0.get_ref().read_frame()
    }

    /// Read a CAN frame from the socket asynchronously
    pub async fn read_frame(&self) -> Result<CanFrame, std::io::Error> {
        self.0
            .async_io(Interest::READABLE, |inner| inner.read_frame())
            .await
    }

    pub async fn write_frame(&self, frame: &CanFrame) -> Result<(), std::io::Error> {
        self.0
            .async_io(Interest::WRITABLE, |inner| inner.write_frame(frame))
            .await
    }

    pub fn set_filters(&self, filters: &[CanFilter]) -> Result<(), std::io::Error> {
        self.0.get_ref().set_filters(filters)
    }
}

impl AsyncCanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        match self.socket.try_read_frame() {
            Ok(frame) => socketcan_frame_to_drivelink_message(frame).ok(),
            _ => None,
        }
    }

    async fn recv(&mut self) -> Result<CanMessage, ReceiveError> {
        loop {
            match self.socket.read_frame().await {
                Ok(frame) => return socketcan_frame_to_drivelink_message(frame).context(CanSnafu),
                Err(e) => {
                    if !e.should_retry() {
                        return Err(ReceiveError::Io { source: e });
                    }
                }
            }
        }
    }
}

impl SocketCanReceiver {
    /// Only accept frames where `received_id & mask == id & mask`
    ///
    /// The socket accepts every frame until a filter is set; `set_filter(0, 0)` restores that.
    pub fn set_filter(&self, id: u32, mask: u32) -> Result<(), socketcan::IoError> {
        self.socket.set_filters(&[CanFilter::new(id, mask)])
    }
}

/// Error returned by [`SocketCanSender`]
#[derive(Debug)]
pub struct SocketCanSendError {
    msg: CanMessage,
    reason: String,
}

impl CanSendError for SocketCanSendError {
    fn into_can_message(self) -> CanMessage {
        self.msg
    }

    fn message(&self) -> String {
        self.reason.clone()
    }
}

/// Transmitting half of a socketcan device
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<AsyncCanSocket>,
}

impl AsyncCanSender for SocketCanSender {
    type Error = SocketCanSendError;

    async fn send(&mut self, msg: CanMessage) -> Result<(), SocketCanSendError> {
        let Some(socketcan_frame) = drivelink_message_to_socket_frame(msg) else {
            return Err(SocketCanSendError {
                msg,
                reason: format!("Cannot build a frame for ID {:?}", msg.id()),
            });
        };

        self.socket
            .write_frame(&socketcan_frame)
            .await
            .map_err(|e| SocketCanSendError {
                msg,
                reason: e.to_string(),
            })
    }
}

/// Open a socketcan device and split it into a sender and receiver object for use with the
/// drivelink library
///
/// # Arguments
/// * `device` - The name of the socketcan device to open, e.g. "vcan0", or "can0"
///
/// A key benefit of this is that by creating both sender and receiver objects from a shared socket,
/// the receiver will not receive messages sent by the sender.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub fn open_socketcan<S: AsRef<str>>(
    device: S,
) -> Result<(SocketCanSender, SocketCanReceiver), socketcan::IoError> {
    let device: &str = device.as_ref();
    let socket = Arc::new(AsyncCanSocket::open(device)?);
    let receiver = SocketCanReceiver {
        socket: socket.clone(),
    };
    let sender = SocketCanSender { socket };
    Ok((sender, receiver))
}
