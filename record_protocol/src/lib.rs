//! # Record Protocol
//!
//! Wire protocol for the pcrecord control link.
//!
//! Inbound traffic is brace-delimited JSON: a control peer sends `config`,
//! `start`, `stop`, `query` and `volume` messages one byte at a time over a
//! half-duplex link. Outbound traffic is JSON responses (`ack`, `error`, the
//! `query` status report) plus checksummed binary audio frames carrying
//! capture pages.

pub mod frame;
pub mod message;

// Re-export commonly used types
pub use frame::{
    braces_balanced, decode_data_frame, encode_data_frame, xor_checksum, DataFrame,
    FrameAccumulator, FrameWriter, ProtocolError, DATA_HEADER_LEN, DATA_TAG, FRAME_BUF_LEN,
};
pub use message::{
    ConfigRequest, ConfigSettings, ControlMessage, PlayParams, RecordParams, RecordSettings,
    RecordStatus, Response, VolumeRequest,
};
