//! Wallbox control-channel protocol - call framing, reply accumulation and chunking
//!
//! Outbound calls travel as a self-delimited frame:
//!
//! ```text
//! +-----------+---------+----------------------+------------+
//! | "EaE" (3) | len (1) | JSON payload (len)   | chksum (1) |
//! +-----------+---------+----------------------+------------+
//! ```
//!
//! The checksum is the sum of every preceding byte modulo 256. Replies come
//! back on the notify characteristic as bare JSON split over arbitrary
//! notification boundaries, so they are collected with an [`Accumulator`].

pub mod ble;

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker that opens every frame
pub const MAGIC: &[u8; 3] = b"EaE";

/// The length field is a single byte
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Magic, length byte and checksum byte
pub const FRAME_OVERHEAD: usize = MAGIC.len() + 2;

/// Request ids are drawn from this range for every call
pub const REQUEST_ID_RANGE: RangeInclusive<u16> = 1..=999;

/// Methods understood by the charger
pub mod methods {
    /// Switch the charger into access-point mode; replies with Wi-Fi credentials
    pub const SET_HOTSPOT: &str = "s_hup";

    /// Announce an inbound software package (`deb`, `md5`, `size`)
    pub const ANNOUNCE_PACKAGE: &str = "s_deb";

    /// Read the hotspot/update status; replies with `st`
    pub const READ_HOTSPOT: &str = "r_hup";
}

/// Values of the `st` field returned by [`methods::READ_HOTSPOT`]
pub mod status {
    pub const FIELD: &str = "st";

    /// Ready to receive the package over Wi-Fi
    pub const RECEIVED: &str = "recv";

    /// Package received, update running
    pub const PROCESSING: &str = "proc";

    pub const DONE: &str = "done";
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("payload too large to frame: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("frame does not start with the EaE marker")]
    BadMagic,

    #[error("frame truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Sum of all bytes modulo 256
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Split an encoded frame into consecutive pieces of at most `limit` bytes.
///
/// The receiver reassembles by plain concatenation, so the order of the
/// returned slices is the order they must be written in.
pub fn chunks(frame: &[u8], limit: usize) -> std::slice::Chunks<'_, u8> {
    frame.chunks(limit.max(1))
}

/// One method call: `{"met": ..., "par": ..., "id": ...}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Call {
    #[serde(rename = "met")]
    pub method: String,
    #[serde(rename = "par", default)]
    pub params: Value,
    pub id: u16,
}

impl Call {
    pub fn new(method: &str, id: u16) -> Self {
        Self { method: method.to_string(), params: Value::Null, id }
    }

    pub fn with_params(method: &str, params: Value, id: u16) -> Self {
        Self { method: method.to_string(), params, id }
    }

    /// Encode to a complete wire frame
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        Ok(Frame::call(self)?.to_bytes())
    }

    /// Decode a complete wire frame produced by [`Call::encode`]
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let frame = Frame::from_bytes(data)?;
        Ok(serde_json::from_slice(&frame.payload)?)
    }
}

/// Frame: wraps a JSON payload with marker, length and checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { payload })
    }

    /// Compact JSON of the call (no whitespace)
    pub fn call(call: &Call) -> Result<Self, FrameError> {
        Self::new(serde_json::to_vec(call)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        buf.extend_from_slice(MAGIC);
        // Frame::new keeps the payload within a byte
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.push(checksum(&buf));
        buf
    }

    /// Total frame size announced by a header, once at least 4 bytes are known
    fn announced_len(data: &[u8]) -> Option<usize> {
        data.get(MAGIC.len()).map(|len| FRAME_OVERHEAD + *len as usize)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if !data.starts_with(MAGIC) {
            return Err(FrameError::BadMagic);
        }

        let total = Self::announced_len(data).ok_or(FrameError::Truncated {
            expected: MAGIC.len() + 1,
            received: data.len(),
        })?;
        if data.len() < total {
            return Err(FrameError::Truncated {
                expected: total,
                received: data.len(),
            });
        }

        let expected = checksum(&data[..total - 1]);
        let actual = data[total - 1];
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            payload: data[MAGIC.len() + 1..total - 1].to_vec(),
        })
    }
}

/// Reply from the charger: `{"id": ..., "r": ...}`, other fields ignored
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(rename = "r", default)]
    pub result: Option<Value>,
}

impl Response {
    /// Whether this reply carries the given request id
    pub fn answers(&self, request_id: u16) -> bool {
        self.id.as_ref().and_then(Value::as_u64) == Some(u64::from(request_id))
    }
}

/// Outcome of feeding bytes into an [`Accumulator`]
#[derive(Debug, Clone, PartialEq)]
pub enum Feed {
    /// Keep accumulating
    Incomplete,
    Complete(Response),
}

/// Collects notification chunks until they form a complete reply.
///
/// Parse failures caused by missing bytes mean "not yet complete". Bytes that
/// can never become a reply (syntax errors, bad checksums, non-object JSON)
/// are dropped silently. A completed reply is removed from the front of the
/// buffer and any trailing bytes stay for the next reply.
#[derive(Debug, Default)]
pub struct Accumulator {
    buffer: Vec<u8>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append a chunk and try to complete a reply
    pub fn feed(&mut self, chunk: &[u8]) -> Feed {
        self.buffer.extend_from_slice(chunk);
        self.poll()
    }

    /// Try to complete another reply from bytes already buffered
    pub fn poll(&mut self) -> Feed {
        loop {
            let start = self
                .buffer
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buffer.len());
            self.buffer.drain(..start);

            if self.buffer.is_empty() {
                return Feed::Incomplete;
            }

            let value = if self.buffer[0] == MAGIC[0] {
                match self.take_frame() {
                    Some(value) => value,
                    None => return Feed::Incomplete,
                }
            } else {
                match self.take_json() {
                    Some(value) => value,
                    None => return Feed::Incomplete,
                }
            };

            if let Some(response) = value.and_then(|v| serde_json::from_value(v).ok()) {
                return Feed::Complete(response);
            }
        }
    }

    /// `None` while waiting for more bytes, `Some(None)` when bytes were dropped
    fn take_json(&mut self) -> Option<Option<Value>> {
        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buffer.drain(..consumed);
                Some(Some(value).filter(Value::is_object))
            }
            Some(Err(e)) if e.is_eof() => None,
            Some(Err(_)) | None => {
                self.buffer.clear();
                Some(None)
            }
        }
    }

    fn take_frame(&mut self) -> Option<Option<Value>> {
        let prefix = self.buffer.len().min(MAGIC.len());
        if self.buffer[..prefix] != MAGIC[..prefix] {
            self.buffer.clear();
            return Some(None);
        }

        let total = Frame::announced_len(&self.buffer)?;
        if self.buffer.len() < total {
            return None;
        }

        let frame: Vec<u8> = self.buffer.drain(..total).collect();
        Some(
            Frame::from_bytes(&frame)
                .ok()
                .and_then(|f| serde_json::from_slice::<Value>(&f.payload).ok()),
        )
    }
}
