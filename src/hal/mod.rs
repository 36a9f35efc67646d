//! Audio HAL boundary.
//!
//! The real capture drivers live in vendor firmware; the bridge needs only
//! create/start/read/stop semantics for a capture handle plus mic routing
//! and hardware volume. Backends: `imp_cpal` for host audio, `imp_sim` for
//! deterministic pages in tests and link bring-up.

pub mod imp_cpal;
pub mod imp_sim;

use crate::channels::MicSource;
use crate::error::Result;

/// Capture input device selector (wire values 1 and 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum InputDevice {
    Mic,
    I2s,
}

impl InputDevice {
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Mic),
            2 => Some(Self::I2s),
            _ => None,
        }
    }
}

/// Settings for one capture handle. `buffer_bytes == 0` keeps the backend's
/// default period size.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub format: u32,
    pub channel_count: u32,
    pub device: InputDevice,
    pub buffer_bytes: usize,
}

/// One opened capture handle.
pub trait CaptureDevice: Send {
    /// Begin capturing.
    fn start(&mut self) -> Result<()>;

    /// Fill `page` completely with captured bytes. Blocks, but must give up
    /// within a bounded interval so a stop request is honored promptly.
    fn read(&mut self, page: &mut [u8]) -> Result<()>;

    /// Apply a HAL parameter string (capability string, routing hints).
    fn set_parameters(&mut self, parameters: &str) -> Result<()>;

    /// Stop capturing. Dropping the handle releases it.
    fn stop(&mut self) -> Result<()>;
}

/// Creates capture handles; the session re-creates one per `config` message.
pub trait CaptureFactory: Send + Sync {
    fn create(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>>;
}

/// Global audio controls: mic routing and hardware volume.
pub trait AudioControl: Send + Sync {
    fn set_channel_mic_category(&self, channel: usize, source: MicSource) -> Result<()>;
    fn set_hardware_volume(&self, left: f32, right: f32) -> Result<()>;
}
