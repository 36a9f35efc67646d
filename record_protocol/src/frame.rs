//! Byte-level framing for the half-duplex control link.
//!
//! Inbound traffic is brace-delimited JSON text: a frame ends when the count
//! of `{` bytes seen is non-zero and equal to the count of `}` bytes.
//! Outbound traffic is either a JSON response or a checksummed binary audio
//! frame; every send holds one writer lock so frames never interleave.

use std::io::Write;
use std::sync::Mutex;
use thiserror::Error;

/// Default capacity of the inbound accumulation buffer.
pub const FRAME_BUF_LEN: usize = 1024;

/// Literal tag opening every binary audio frame.
pub const DATA_TAG: &[u8; 4] = b"data";

/// Bytes in a binary frame header: tag + sequence + length + checksum.
pub const DATA_HEADER_LEN: usize = 11;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame exceeds {limit} byte accumulation buffer")]
    FrameOverflow { limit: usize },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value {value} for field {field}")]
    InvalidFieldValue { field: &'static str, value: i64 },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Payload too large for a data frame: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Truncated data frame: {0} bytes")]
    TruncatedDataFrame(usize),

    #[error("Bad data frame tag")]
    BadDataTag,

    #[error("Checksum mismatch: header {header:#04x}, payload {computed:#04x}")]
    ChecksumMismatch { header: u8, computed: u8 },
}

/// Assembles one control message at a time from a raw byte stream.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
    limit: usize,
    open: u32,
    close: u32,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::with_limit(FRAME_BUF_LEN)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit),
            limit,
            open: 0,
            close: 0,
        }
    }

    /// Feed one byte. Returns a complete frame once the brace balance closes.
    ///
    /// On overflow the in-flight bytes are dropped and the accumulator
    /// resets; the caller must not emit a response for the lost frame.
    pub fn push(&mut self, byte: u8) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buf.len() >= self.limit {
            self.reset();
            return Err(ProtocolError::FrameOverflow { limit: self.limit });
        }

        match byte {
            b'{' => self.open += 1,
            b'}' => self.close += 1,
            _ => {}
        }
        self.buf.push(byte);

        if self.open > 0 && self.open == self.close {
            let frame = std::mem::take(&mut self.buf);
            self.open = 0;
            self.close = 0;
            return Ok(Some(frame));
        }
        Ok(None)
    }

    /// True while a partially accumulated frame is pending.
    pub fn in_flight(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Drop any partial frame and return to the idle state. The RX loop
    /// calls this when a partial frame goes quiet for too long.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.open = 0;
        self.close = 0;
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-scan an assembled frame before parsing: walk until the brace counts
/// meet, then require them non-zero and equal. Cheap well-formedness gate,
/// not a JSON parse; a frame with leading noise fails here.
pub fn braces_balanced(frame: &[u8]) -> bool {
    let mut left = 0u32;
    let mut right = 0u32;

    for &byte in frame {
        match byte {
            b'{' => left += 1,
            b'}' => right += 1,
            _ => {}
        }
        if left == right {
            break;
        }
    }
    left == right && left != 0
}

/// XOR of every payload byte.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc ^ byte)
}

/// Encode one binary audio frame: `"data"` tag, little-endian sequence
/// number and payload length, XOR checksum, then the payload itself.
pub fn encode_data_frame(seq: u32, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > i16::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(DATA_HEADER_LEN + payload.len());
    frame.extend_from_slice(DATA_TAG);
    frame.extend_from_slice(&(seq as i32).to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.push(xor_checksum(payload));
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decoded view of one binary audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub seq: u32,
    pub payload: &'a [u8],
}

/// Decode and verify a frame produced by [`encode_data_frame`]. Returns the
/// frame and the total number of bytes it occupied.
pub fn decode_data_frame(bytes: &[u8]) -> Result<(DataFrame<'_>, usize), ProtocolError> {
    if bytes.len() < DATA_HEADER_LEN {
        return Err(ProtocolError::TruncatedDataFrame(bytes.len()));
    }
    if &bytes[..4] != DATA_TAG {
        return Err(ProtocolError::BadDataTag);
    }

    let seq = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as u32;
    let len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let header = bytes[10];

    if bytes.len() < DATA_HEADER_LEN + len {
        return Err(ProtocolError::TruncatedDataFrame(bytes.len()));
    }
    let payload = &bytes[DATA_HEADER_LEN..DATA_HEADER_LEN + len];
    let computed = xor_checksum(payload);
    if computed != header {
        return Err(ProtocolError::ChecksumMismatch { header, computed });
    }

    Ok((DataFrame { seq, payload }, DATA_HEADER_LEN + len))
}

/// Serializing writer for the outbound half of the link.
///
/// One lock covers every send, so a JSON response can never land inside a
/// binary frame no matter which worker is transmitting.
pub struct FrameWriter<W: Write> {
    inner: Mutex<W>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    pub fn send_json(&self, text: &str) -> Result<(), ProtocolError> {
        let mut writer = self.inner.lock().unwrap();
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn send_data_frame(&self, seq: u32, payload: &[u8]) -> Result<(), ProtocolError> {
        let frame = encode_data_frame(seq, payload)?;
        let mut writer = self.inner.lock().unwrap();
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }
}
