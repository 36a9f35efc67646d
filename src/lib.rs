//! PC-controlled audio record/playback bridge.
//!
//! A control peer drives the bridge over a half-duplex byte link with
//! brace-delimited JSON commands; capture pages stream back as checksummed
//! binary frames while an optional playback controller loops over stream
//! URLs. The wire layer lives in the `record_protocol` crate.

pub mod channels;
pub mod config;
pub mod error;
pub mod hal;
pub mod link;
pub mod playback;
pub mod player;
pub mod ring;
pub mod session;

pub use error::{BridgeError, Result};
