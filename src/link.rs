//! Control-link transport.
//!
//! The control channel is a half-duplex byte stream: either a serial
//! character device exposed by the OS, or a single-peer TCP listener for
//! bench setups without a UART. Both split into independently owned
//! read/write halves.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::Duration;

use crate::error::Result;

/// How long a TCP link read waits before surfacing a timeout to the RX loop
/// (which uses the quiet interval to expire stale partial frames).
const LINK_READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ControlLink {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

impl ControlLink {
    /// `listen://ADDR` serves exactly one TCP peer; anything else is opened
    /// as a character device path.
    pub fn open(endpoint: &str) -> Result<Self> {
        if let Some(addr) = endpoint.strip_prefix("listen://") {
            let listener = TcpListener::bind(addr)?;
            log::info!("waiting for control peer on {}", addr);
            let (stream, peer) = listener.accept()?;
            log::info!("control peer connected from {}", peer);
            stream.set_nodelay(true).ok();
            stream.set_read_timeout(Some(LINK_READ_TIMEOUT))?;
            let reader = stream.try_clone()?;
            Ok(Self {
                reader: Box::new(reader),
                writer: Box::new(stream),
            })
        } else {
            let device = OpenOptions::new().read(true).write(true).open(endpoint)?;
            log::info!("control link on {}", endpoint);
            let reader = device.try_clone()?;
            Ok(Self {
                reader: Box::new(reader),
                writer: Box::new(device),
            })
        }
    }
}
