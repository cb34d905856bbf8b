use std::time::Duration;

use drivelink_common::{
    messages::CanId,
    sdo::{SdoRequest, SdoResponse, SdoValue, SdoWidth},
    traits::{AsyncCanReceiver, AsyncCanSender, CanSendError as _},
    CanMessage, NodeId,
};
use snafu::Snafu;
use tokio::time::Instant;

/// Default time to wait for a matching SDO response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(6000);
/// Default time to wait for the transport to accept a frame
pub const DEFAULT_TRANSMIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Error returned by [`SdoClient`] methods
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum SdoClientError {
    /// Timeout while awaiting an expected response
    #[snafu(display("No response to SDO request for 0x{index:04X}sub{sub}"))]
    NoResponse {
        /// Index of the requested object
        index: u16,
        /// Sub index of the requested object
        sub: u8,
    },
    /// Received a response that could not be interpreted
    MalformedResponse,
    /// Received a valid SdoResponse, but with an unexpected command specifier
    #[snafu(display("Unexpected SDO response. Expected {expecting}, got {response:?}"))]
    UnexpectedResponse {
        /// The type of response which was expected
        expecting: String,
        /// The response which was received
        response: SdoResponse,
    },
    /// Received a ServerAbort response from the node
    #[snafu(display("Received abort accessing object 0x{index:X}sub{sub}: 0x{abort_code:08X}"))]
    ServerAbort {
        /// Index of the SDO access which was aborted
        index: u16,
        /// Sub index of the SDO access which was aborted
        sub: u8,
        /// Reason for the abort
        abort_code: u32,
    },
    /// The transport refused the frame
    #[snafu(display("Failed to send CAN message: {message}"))]
    TransmitFailed {
        /// A string describing the error reason
        message: String,
    },
    /// The transport did not accept the frame within the transmit timeout
    #[snafu(display("Timed out after {timeout:?} waiting for message to be sent"))]
    TransmitTimeout {
        /// The transmit timeout which elapsed
        timeout: Duration,
    },
}

impl SdoClientError {
    /// True if the error happened before the frame reached the bus
    pub fn is_transmit_error(&self) -> bool {
        matches!(
            self,
            SdoClientError::TransmitFailed { .. } | SdoClientError::TransmitTimeout { .. }
        )
    }
}

type Result<T> = std::result::Result<T, SdoClientError>;

/// Convenience macro for expecting a particular variant of a response and erroring on abort of
/// unexpected variant
macro_rules! match_response  {
    ($resp: ident, $expecting: literal, $($match:pat => $code : expr),*) => {
                match $resp {
                    $($match => $code),*
                    SdoResponse::Abort {
                        index,
                        sub,
                        abort_code,
                    } => {
                        return ServerAbortSnafu {
                            index,
                            sub,
                            abort_code,
                        }
                        .fail()
                    }
                    #[allow(unreachable_patterns)]
                    _ => {
                        return UnexpectedResponseSnafu {
                            expecting: $expecting,
                            response: $resp,
                        }
                        .fail()
                    }
                }
    };
}

use paste::paste;
macro_rules! access_methods {
    ($type: ty, $width: expr) => {

        paste! {
            #[doc = concat!("Read a ", stringify!($type), " sub object from the SDO server, using the default timeout")]
            pub async fn [<read_ $type>](&mut self, index: u16, sub: u8) -> Result<$type> {
                let value = self.request_read(index, sub, $width, self.timeout).await?;
                Ok(value as $type)
            }

            #[doc = concat!("Write a ", stringify!($type), " sub object on the SDO server and wait for the acknowledgement\n\n")]
            #[doc = "Uses the default timeout"]
            pub async fn [<write_ $type>](&mut self, index: u16, sub: u8, value: $type) -> Result<()> {
                self.request_write(index, sub, value, self.timeout).await
            }
        }
    };
}

#[derive(Debug)]
/// A client for accessing a node's SDO server
///
/// Performs one expedited request/response exchange at a time. Failed exchanges are never
/// retried; that is left to the caller.
pub struct SdoClient<S, R> {
    req_cob_id: CanId,
    resp_cob_id: CanId,
    timeout: Duration,
    transmit_timeout: Duration,
    sender: S,
    receiver: R,
}

impl<S: AsyncCanSender, R: AsyncCanReceiver> SdoClient<S, R> {
    /// Create a new SdoClient using a node ID
    ///
    /// Nodes have a default SDO server, which uses a COB ID based on the node ID. This is a
    /// shortcut to create a client that that default SDO server.
    pub fn new_std(server_node_id: NodeId, sender: S, receiver: R) -> Self {
        Self::new(
            server_node_id.sdo_request_id(),
            server_node_id.sdo_response_id(),
            sender,
            receiver,
        )
    }

    /// Create a new SdoClient from request and response COB IDs
    pub fn new(req_cob_id: CanId, resp_cob_id: CanId, sender: S, receiver: R) -> Self {
        Self {
            req_cob_id,
            resp_cob_id,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
            transmit_timeout: DEFAULT_TRANSMIT_TIMEOUT,
            sender,
            receiver,
        }
    }

    /// Set the default timeout for waiting on SDO server responses
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Get the default timeout for waiting on SDO server responses
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the time allowed for the transport to accept each frame
    pub fn set_transmit_timeout(&mut self, timeout: Duration) {
        self.transmit_timeout = timeout;
    }

    /// The COB ID responses are expected on
    pub fn response_cob_id(&self) -> CanId {
        self.resp_cob_id
    }

    /// Send a frame, waiting at most the transmit timeout for the transport to accept it
    ///
    /// This is also used for raw (non-SDO) command frames, so that all traffic to the node shares
    /// one transmit path.
    pub async fn transmit(&mut self, msg: CanMessage) -> Result<()> {
        match tokio::time::timeout(self.transmit_timeout, self.sender.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                log::error!("Error sending command to CAN: {}", e.message());
                TransmitFailedSnafu {
                    message: e.message(),
                }
                .fail()
            }
            Err(_) => {
                log::error!("Timeout waiting for message to be sent.");
                TransmitTimeoutSnafu {
                    timeout: self.transmit_timeout,
                }
                .fail()
            }
        }
    }

    async fn send_request(&mut self, request: SdoRequest) -> Result<()> {
        // Let the receive task forward anything already in flight, then drop stale responses
        // from earlier exchanges
        tokio::task::yield_now().await;
        self.receiver.flush();
        self.transmit(request.to_can_message(self.req_cob_id)).await
    }

    /// Read a sub-object, waiting up to `timeout` for the response
    pub async fn request_read(
        &mut self,
        index: u16,
        sub: u8,
        width: SdoWidth,
        timeout: Duration,
    ) -> Result<u32> {
        let request = SdoRequest::initiate_upload(index, sub);
        log::debug!("SDO read 0x{index:04X}sub{sub}");
        self.send_request(request).await?;

        let resp = self.wait_for_response(&request, timeout).await?;
        match_response!(
            resp,
            "ConfirmUpload",
            SdoResponse::ConfirmUpload { e: true, .. } => {
                let value = resp.value(width).ok_or(SdoClientError::MalformedResponse)?;
                log::info!("SDO response: Index=0x{index:04X}, Value=0x{value:08X}");
                Ok(value)
            }
        )
    }

    /// Write a sub-object, waiting up to `timeout` for the acknowledgement
    pub async fn request_write(
        &mut self,
        index: u16,
        sub: u8,
        value: impl Into<SdoValue>,
        timeout: Duration,
    ) -> Result<()> {
        let value = value.into();
        let request = SdoRequest::expedited_download(index, sub, value);
        log::debug!(
            "SDO write 0x{index:04X}sub{sub} = 0x{:X}",
            value.as_u32()
        );
        self.send_request(request).await?;

        let resp = self.wait_for_response(&request, timeout).await?;
        match_response!(
            resp,
            "ConfirmDownload",
            SdoResponse::ConfirmDownload { .. } => {
                log::debug!("SDO write 0x{index:04X}sub{sub} acknowledged");
                Ok(())
            }
        )
    }

    /// Write a sub-object without waiting for an acknowledgement
    ///
    /// Completes once the transport has accepted the frame.
    pub async fn send_write(&mut self, index: u16, sub: u8, value: impl Into<SdoValue>) -> Result<()> {
        let request = SdoRequest::expedited_download(index, sub, value);
        self.send_request(request).await
    }

    access_methods!(u8, SdoWidth::U8);
    access_methods!(u16, SdoWidth::U16);
    access_methods!(u32, SdoWidth::U32);

    async fn wait_for_response(
        &mut self,
        request: &SdoRequest,
        timeout: Duration,
    ) -> Result<SdoResponse> {
        let wait_until = Instant::now() + timeout;
        let (index, sub) = (request.index(), request.sub());
        loop {
            match tokio::time::timeout_at(wait_until, self.receiver.recv()).await {
                // Err indicates the timeout elapsed, so return
                Err(_) => {
                    log::error!("Timeout waiting for SDO response for 0x{index:04X}sub{sub}");
                    return NoResponseSnafu { index, sub }.fail();
                }
                // Message was recieved. If it is the resp, return. Otherwise, keep waiting
                Ok(Ok(msg)) => {
                    if msg.id != self.resp_cob_id {
                        continue;
                    }
                    match SdoResponse::try_from(msg) {
                        Ok(resp) if resp.matches(request) => return Ok(resp),
                        Ok(resp) => {
                            log::debug!(
                                "Ignoring SDO response {resp:?} while waiting for 0x{index:04X}sub{sub}"
                            );
                        }
                        Err(e) => log::warn!("Ignoring malformed SDO response: {e}"),
                    }
                }
                // Recv returned an error
                Ok(Err(e)) => {
                    log::error!("Error reading from socket: {e:?}");
                    return NoResponseSnafu { index, sub }.fail();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{channel_pair, ChannelReceiver, ChannelSender};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    type TestClient = SdoClient<ChannelSender, ChannelReceiver>;

    fn client(
        reject: bool,
    ) -> (
        TestClient,
        UnboundedReceiver<CanMessage>,
        UnboundedSender<CanMessage>,
    ) {
        let (sender, receiver, bus_rx, resp_tx) = channel_pair(reject);
        let node = NodeId::new(3).unwrap();
        let client = SdoClient::new_std(node, sender, receiver);
        (client, bus_rx, resp_tx)
    }

    #[tokio::test]
    async fn test_read_ignores_other_objects() {
        let (mut client, mut bus_rx, resp_tx) = client(false);
        let task = tokio::spawn(async move {
            let req = bus_rx.recv().await.unwrap();
            assert_eq!(req.id(), CanId::Std(0x603));
            assert_eq!(req.data(), &[0x40, 0x41, 0x60, 0x00, 0, 0, 0, 0]);
            // A response for another object first, which must be skipped
            let other = SdoResponse::expedited_upload(0x6040, 0, SdoValue::U16(7));
            resp_tx.send(other.to_can_message(CanId::Std(0x583))).unwrap();
            resp_tx
                .send(CanMessage::new(
                    CanId::Std(0x583),
                    &[0x4F, 0x41, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00],
                ))
                .unwrap();
        });

        let value = client.read_u16(0x6041, 0).await.unwrap();
        assert_eq!(value, 0x0001);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_ignores_write_ack_for_same_object() {
        let (mut client, mut bus_rx, resp_tx) = client(false);
        let task = tokio::spawn(async move {
            bus_rx.recv().await.unwrap();
            // A late acknowledgement of an earlier write to the status word
            resp_tx
                .send(SdoResponse::download_acknowledge(0x6041, 0).to_can_message(CanId::Std(0x583)))
                .unwrap();
            resp_tx
                .send(
                    SdoResponse::expedited_upload(0x6041, 0, SdoValue::U16(0x0237))
                        .to_can_message(CanId::Std(0x583)),
                )
                .unwrap();
        });

        assert_eq!(client.read_u16(0x6041, 0).await.unwrap(), 0x0237);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_response_in_flight_before_request_is_dropped() {
        let (mut client, mut bus_rx, resp_tx) = client(false);
        // Not run until the client first yields: stands in for a receive task still holding the
        // answer to an earlier poll
        let stale_tx = resp_tx.clone();
        tokio::spawn(async move {
            stale_tx
                .send(
                    SdoResponse::expedited_upload(0x6041, 0, SdoValue::U16(0xDEAD))
                        .to_can_message(CanId::Std(0x583)),
                )
                .unwrap();
        });
        let task = tokio::spawn(async move {
            bus_rx.recv().await.unwrap();
            resp_tx
                .send(
                    SdoResponse::expedited_upload(0x6041, 0, SdoValue::U16(0x0237))
                        .to_can_message(CanId::Std(0x583)),
                )
                .unwrap();
        });

        assert_eq!(client.read_u16(0x6041, 0).await.unwrap(), 0x0237);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_times_out_without_ack() {
        let (mut client, mut bus_rx, _resp_tx) = client(false);
        let start = Instant::now();
        let result = client
            .request_write(0x6083, 0, 1000u32, Duration::from_millis(200))
            .await;
        assert_eq!(
            result,
            Err(SdoClientError::NoResponse {
                index: 0x6083,
                sub: 0
            })
        );
        assert!(start.elapsed() >= Duration::from_millis(200));
        let sent = bus_rx.try_recv().unwrap();
        assert_eq!(sent.data(), &[0x23, 0x83, 0x60, 0x00, 0xE8, 0x03, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_abort_is_reported() {
        let (mut client, _bus_rx, resp_tx) = client(false);
        resp_tx
            .send(SdoResponse::abort(0x2058, 0, 0x0601_0002).to_can_message(CanId::Std(0x583)))
            .unwrap();
        // The queued abort predates the request and is flushed, so deliver it again afterwards
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resp_tx
                .send(SdoResponse::abort(0x2058, 0, 0x0601_0002).to_can_message(CanId::Std(0x583)))
                .unwrap();
        });
        let result = client.write_u8(0x2058, 0, 3).await;
        assert!(matches!(
            result,
            Err(SdoClientError::ServerAbort {
                index: 0x2058,
                sub: 0,
                abort_code: 0x0601_0002
            })
        ));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_frame_is_transmit_failure() {
        let (mut client, _bus_rx, _resp_tx) = client(true);
        let err = client.send_write(0x2026, 0, 5u8).await.unwrap_err();
        assert!(err.is_transmit_error());
        assert!(matches!(err, SdoClientError::TransmitFailed { .. }));
    }
}
