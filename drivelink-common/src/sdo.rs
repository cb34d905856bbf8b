//! Expedited SDO request and response encoding
//!
//! Only single-frame (expedited) transfers of up to 4 bytes are supported. Requests and responses
//! always occupy a full 8 byte frame:
//!
//! | byte | content                                   |
//! |------|-------------------------------------------|
//! | 0    | command specifier                         |
//! | 1..3 | object index, little-endian               |
//! | 3    | sub-index                                 |
//! | 4..8 | value, little-endian, zero padded         |

use snafu::Snafu;

use crate::messages::{CanId, CanMessage};

/// Specifies the possible server command specifier (SCS) values in SDO response packets
#[derive(Debug, Clone, Copy, PartialEq)]
enum ServerCommand {
    Upload = 2,
    /// Acknowledge a download command
    Download = 3,
    Abort = 4,
}

impl TryFrom<u8> for ServerCommand {
    type Error = SdoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ServerCommand::*;
        match value {
            2 => Ok(Upload),
            3 => Ok(Download),
            4 => Ok(Abort),
            _ => UnsupportedCommandSnafu { command: value }.fail(),
        }
    }
}

/// Specifies the client command specifier (CCS) values in SDO request packets
#[derive(Debug, Clone, Copy, PartialEq)]
enum ClientCommand {
    InitiateDownload = 1,
    InitiateUpload = 2,
}

impl TryFrom<u8> for ClientCommand {
    type Error = SdoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ClientCommand::*;
        match value {
            1 => Ok(InitiateDownload),
            2 => Ok(InitiateUpload),
            _ => UnsupportedCommandSnafu { command: value }.fail(),
        }
    }
}

/// Error decoding an SDO frame
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum SdoError {
    /// Fewer than 8 bytes were provided
    FrameTooShort,
    /// The command specifier is not one of the expedited transfer commands
    #[snafu(display("Unsupported SDO command specifier {command}"))]
    UnsupportedCommand {
        /// The 3-bit command specifier
        command: u8,
    },
    /// A download or upload was not flagged as expedited with a valid size
    NotExpedited,
}

/// Size of the value carried by an expedited transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum SdoWidth {
    /// One byte
    U8,
    /// Two bytes
    U16,
    /// Four bytes
    U32,
}

impl SdoWidth {
    /// The number of payload bytes
    pub const fn len(&self) -> usize {
        match self {
            SdoWidth::U8 => 1,
            SdoWidth::U16 => 2,
            SdoWidth::U32 => 4,
        }
    }

    fn from_unused(n: u8) -> Option<Self> {
        match n {
            3 => Some(SdoWidth::U8),
            2 => Some(SdoWidth::U16),
            0 => Some(SdoWidth::U32),
            _ => None,
        }
    }

    /// Extract a value of this width from the 4 data bytes of a frame
    pub fn extract(&self, data: [u8; 4]) -> u32 {
        match self {
            SdoWidth::U8 => data[0] as u32,
            SdoWidth::U16 => u16::from_le_bytes([data[0], data[1]]) as u32,
            SdoWidth::U32 => u32::from_le_bytes(data),
        }
    }
}

/// A value written by an expedited download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdoValue {
    /// One byte value
    U8(u8),
    /// Two byte value
    U16(u16),
    /// Four byte value
    U32(u32),
}

impl SdoValue {
    /// Width of this value
    pub fn width(&self) -> SdoWidth {
        match self {
            SdoValue::U8(_) => SdoWidth::U8,
            SdoValue::U16(_) => SdoWidth::U16,
            SdoValue::U32(_) => SdoWidth::U32,
        }
    }

    /// The value widened to u32
    pub fn as_u32(&self) -> u32 {
        match *self {
            SdoValue::U8(v) => v as u32,
            SdoValue::U16(v) => v as u32,
            SdoValue::U32(v) => v,
        }
    }

    fn to_le_bytes(self) -> [u8; 4] {
        self.as_u32().to_le_bytes()
    }

    fn from_parts(width: SdoWidth, data: [u8; 4]) -> Self {
        let raw = width.extract(data);
        match width {
            SdoWidth::U8 => SdoValue::U8(raw as u8),
            SdoWidth::U16 => SdoValue::U16(raw as u16),
            SdoWidth::U32 => SdoValue::U32(raw),
        }
    }
}

impl From<u8> for SdoValue {
    fn from(value: u8) -> Self {
        SdoValue::U8(value)
    }
}

impl From<u16> for SdoValue {
    fn from(value: u16) -> Self {
        SdoValue::U16(value)
    }
}

impl From<u32> for SdoValue {
    fn from(value: u32) -> Self {
        SdoValue::U32(value)
    }
}

impl From<i32> for SdoValue {
    fn from(value: i32) -> Self {
        SdoValue::U32(value as u32)
    }
}

/// An expedited SDO request from client to server
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdoRequest {
    /// Write a value to a sub-object
    InitiateDownload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Value to write
        value: SdoValue,
    },
    /// Read a sub-object
    InitiateUpload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
}

impl SdoRequest {
    /// Create an expedited download (write) request
    pub fn expedited_download(index: u16, sub: u8, value: impl Into<SdoValue>) -> Self {
        SdoRequest::InitiateDownload {
            index,
            sub,
            value: value.into(),
        }
    }

    /// Create an upload (read) request
    pub fn initiate_upload(index: u16, sub: u8) -> Self {
        SdoRequest::InitiateUpload { index, sub }
    }

    /// Object index addressed by this request
    pub fn index(&self) -> u16 {
        match self {
            SdoRequest::InitiateDownload { index, .. } => *index,
            SdoRequest::InitiateUpload { index, .. } => *index,
        }
    }

    /// Sub-index addressed by this request
    pub fn sub(&self) -> u8 {
        match self {
            SdoRequest::InitiateDownload { sub, .. } => *sub,
            SdoRequest::InitiateUpload { sub, .. } => *sub,
        }
    }

    /// Serialize the request into an 8 byte frame payload
    pub fn to_bytes(self) -> [u8; 8] {
        let mut payload = [0; 8];

        match self {
            SdoRequest::InitiateDownload { index, sub, value } => {
                let n = (4 - value.width().len()) as u8;
                // e=1, s=1
                payload[0] = (ClientCommand::InitiateDownload as u8) << 5 | (n << 2) | 0b11;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
                payload[4..8].copy_from_slice(&value.to_le_bytes());
            }
            SdoRequest::InitiateUpload { index, sub } => {
                payload[0] = (ClientCommand::InitiateUpload as u8) << 5;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
            }
        }
        payload
    }

    /// Build the request frame on the given COB-ID
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        CanMessage::new(id, &self.to_bytes())
    }
}

impl TryFrom<&[u8]> for SdoRequest {
    type Error = SdoError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < 8 {
            return FrameTooShortSnafu.fail();
        }
        let ccs: ClientCommand = (value[0] >> 5).try_into()?;
        let index = u16::from_le_bytes([value[1], value[2]]);
        let sub = value[3];

        match ccs {
            ClientCommand::InitiateDownload => {
                let n = (value[0] >> 2) & 0x3;
                let e = (value[0] & (1 << 1)) != 0;
                let s = (value[0] & (1 << 0)) != 0;
                let width = match (e, s, SdoWidth::from_unused(n)) {
                    (true, true, Some(width)) => width,
                    _ => return NotExpeditedSnafu.fail(),
                };
                let data = [value[4], value[5], value[6], value[7]];
                Ok(SdoRequest::InitiateDownload {
                    index,
                    sub,
                    value: SdoValue::from_parts(width, data),
                })
            }
            ClientCommand::InitiateUpload => Ok(SdoRequest::InitiateUpload { index, sub }),
        }
    }
}

/// An SDO response from server to client
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdoResponse {
    /// Response to an upload, carrying the value when expedited
    ConfirmUpload {
        /// Number of unused bytes in data
        n: u8,
        /// Expedited flag
        e: bool,
        /// size flag
        s: bool,
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Value if e=1
        data: [u8; 4],
    },
    /// Acknowledges a download
    ConfirmDownload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// The server refused the access
    Abort {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// CANopen abort code
        abort_code: u32,
    },
}

impl TryFrom<&[u8]> for SdoResponse {
    type Error = SdoError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < 8 {
            return FrameTooShortSnafu.fail();
        }
        let command: ServerCommand = (value[0] >> 5).try_into()?;
        let index = u16::from_le_bytes([value[1], value[2]]);
        let sub = value[3];
        let data = [value[4], value[5], value[6], value[7]];
        match command {
            ServerCommand::Upload => {
                let n = (value[0] >> 2) & 0x3;
                let e = (value[0] & (1 << 1)) != 0;
                let s = (value[0] & (1 << 0)) != 0;
                Ok(SdoResponse::ConfirmUpload {
                    n,
                    e,
                    s,
                    index,
                    sub,
                    data,
                })
            }
            ServerCommand::Download => Ok(SdoResponse::ConfirmDownload { index, sub }),
            ServerCommand::Abort => Ok(SdoResponse::Abort {
                index,
                sub,
                abort_code: u32::from_le_bytes(data),
            }),
        }
    }
}

impl TryFrom<CanMessage> for SdoResponse {
    type Error = SdoError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        // Short frames are zero padded, as some drives truncate the DLC
        SdoResponse::try_from(&msg.data[..])
    }
}

impl SdoResponse {
    /// Create an expedited upload response
    pub fn expedited_upload(index: u16, sub: u8, value: SdoValue) -> SdoResponse {
        SdoResponse::ConfirmUpload {
            index,
            sub,
            e: true,
            s: true,
            n: (4 - value.width().len()) as u8,
            data: value.to_le_bytes(),
        }
    }

    /// Create a download acknowledgement
    pub fn download_acknowledge(index: u16, sub: u8) -> SdoResponse {
        SdoResponse::ConfirmDownload { index, sub }
    }

    /// Create an abort response
    pub fn abort(index: u16, sub: u8, abort_code: u32) -> SdoResponse {
        SdoResponse::Abort {
            index,
            sub,
            abort_code,
        }
    }

    /// The object index and sub-index this response refers to
    pub fn object(&self) -> (u16, u8) {
        match *self {
            SdoResponse::ConfirmUpload { index, sub, .. } => (index, sub),
            SdoResponse::ConfirmDownload { index, sub } => (index, sub),
            SdoResponse::Abort { index, sub, .. } => (index, sub),
        }
    }

    /// Returns true if this response can answer the request
    ///
    /// The object must be the one the request addressed, and the response must be an abort or
    /// the confirmation matching the request's direction.
    pub fn matches(&self, request: &SdoRequest) -> bool {
        let kind_fits = matches!(
            (self, request),
            (SdoResponse::Abort { .. }, _)
                | (SdoResponse::ConfirmUpload { .. }, SdoRequest::InitiateUpload { .. })
                | (SdoResponse::ConfirmDownload { .. }, SdoRequest::InitiateDownload { .. })
        );
        kind_fits && self.object() == (request.index(), request.sub())
    }

    /// Extract the value of an upload response with the declared width
    ///
    /// Returns None for any other kind of response.
    pub fn value(&self, width: SdoWidth) -> Option<u32> {
        match *self {
            SdoResponse::ConfirmUpload { data, .. } => Some(width.extract(data)),
            _ => None,
        }
    }

    /// Serialize the response into an 8 byte frame payload
    pub fn to_bytes(self) -> [u8; 8] {
        let mut payload = [0; 8];

        match self {
            SdoResponse::ConfirmUpload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                payload[0] = (ServerCommand::Upload as u8) << 5
                    | ((n & 0x3) << 2)
                    | ((e as u8) << 1)
                    | (s as u8);
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
                payload[4..8].copy_from_slice(&data);
            }
            SdoResponse::ConfirmDownload { index, sub } => {
                payload[0] = (ServerCommand::Download as u8) << 5;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
            }
            SdoResponse::Abort {
                index,
                sub,
                abort_code,
            } => {
                payload[0] = (ServerCommand::Abort as u8) << 5;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
                payload[4..8].copy_from_slice(&abort_code.to_le_bytes());
            }
        }
        payload
    }

    /// Build the response frame on the given COB-ID
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        CanMessage::new(id, &self.to_bytes())
    }
}
