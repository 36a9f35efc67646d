//! Deterministic capture backend for tests and link bring-up.
//!
//! Pages come from a counter pattern or a WAV file, optionally paced to the
//! nominal byte rate so the bridge can be exercised without audio hardware.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::channels::MicSource;
use crate::error::{BridgeError, Result};
use crate::hal::{AudioControl, CaptureConfig, CaptureDevice, CaptureFactory};

#[derive(Debug, Clone)]
enum SimSource {
    /// Bytes follow `(offset + i) & 0xff`; every page is predictable.
    Pattern,
    /// 16-bit samples from a WAV file, looped forever.
    Wav(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    /// Produce a page as fast as the caller asks (with a small floor so an
    /// unthrottled loop cannot flood the link).
    Throttled,
    /// Track the nominal byte rate of the configured format.
    Realtime,
}

/// Factory for simulated capture handles. Counts every `create` call so
/// tests can assert that a config re-creates the handle exactly once.
pub struct SimCaptureFactory {
    source: SimSource,
    pacing: Pacing,
    created: AtomicUsize,
}

impl SimCaptureFactory {
    /// Counter-pattern pages, throttled to roughly a page per millisecond.
    pub fn pattern() -> Self {
        Self {
            source: SimSource::Pattern,
            pacing: Pacing::Throttled,
            created: AtomicUsize::new(0),
        }
    }

    /// Counter-pattern pages at the configured sample rate.
    pub fn paced_pattern() -> Self {
        Self {
            source: SimSource::Pattern,
            pacing: Pacing::Realtime,
            created: AtomicUsize::new(0),
        }
    }

    /// Pages cut from a WAV file, looped, at the configured sample rate.
    pub fn wav(path: PathBuf) -> Self {
        Self {
            source: SimSource::Wav(path),
            pacing: Pacing::Realtime,
            created: AtomicUsize::new(0),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl CaptureFactory for SimCaptureFactory {
    fn create(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
        self.created.fetch_add(1, Ordering::SeqCst);

        let samples = match &self.source {
            SimSource::Pattern => None,
            SimSource::Wav(path) => Some(load_wav_bytes(path)?),
        };

        let byte_rate = (config.sample_rate as u64) * (config.channel_count as u64) * 2;
        Ok(Box::new(SimCapture {
            samples,
            cursor: 0,
            offset: 0,
            pacing: self.pacing,
            byte_rate: byte_rate.max(1),
            epoch: None,
            produced: 0,
            started: false,
        }))
    }
}

fn load_wav_bytes(path: &PathBuf) -> Result<Vec<u8>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| BridgeError::Hal(format!("open {}: {}", path.display(), e)))?;
    let samples: std::result::Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples = samples.map_err(|e| BridgeError::Hal(format!("read {}: {}", path.display(), e)))?;
    if samples.is_empty() {
        return Err(BridgeError::Hal(format!("{} holds no samples", path.display())));
    }

    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(bytes)
}

pub struct SimCapture {
    samples: Option<Vec<u8>>,
    cursor: usize,
    offset: u64,
    pacing: Pacing,
    byte_rate: u64,
    epoch: Option<Instant>,
    produced: u64,
    started: bool,
}

impl CaptureDevice for SimCapture {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        self.epoch = Some(Instant::now());
        self.produced = 0;
        Ok(())
    }

    fn read(&mut self, page: &mut [u8]) -> Result<()> {
        if !self.started {
            return Err(BridgeError::Hal("capture not started".into()));
        }

        match &self.samples {
            Some(samples) => {
                for byte in page.iter_mut() {
                    *byte = samples[self.cursor];
                    self.cursor = (self.cursor + 1) % samples.len();
                }
            }
            None => {
                for (i, byte) in page.iter_mut().enumerate() {
                    *byte = (self.offset.wrapping_add(i as u64) & 0xff) as u8;
                }
                self.offset = self.offset.wrapping_add(page.len() as u64);
            }
        }

        self.produced += page.len() as u64;
        match self.pacing {
            Pacing::Throttled => thread::sleep(Duration::from_millis(1)),
            Pacing::Realtime => {
                if let Some(epoch) = self.epoch {
                    let due = Duration::from_micros(self.produced * 1_000_000 / self.byte_rate);
                    let elapsed = epoch.elapsed();
                    if due > elapsed {
                        thread::sleep(due - elapsed);
                    }
                }
            }
        }
        Ok(())
    }

    fn set_parameters(&mut self, parameters: &str) -> Result<()> {
        log::debug!("capture parameters: {}", parameters);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }
}

/// Audio control call, recorded for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCall {
    MicCategory { channel: usize, source: MicSource },
    HardwareVolume { left: f32, right: f32 },
}

/// Records every control call, the way the mock audio server stands in for
/// real devices during tests.
#[derive(Default)]
pub struct RecordingControl {
    calls: Mutex<Vec<ControlCall>>,
}

impl RecordingControl {
    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl AudioControl for RecordingControl {
    fn set_channel_mic_category(&self, channel: usize, source: MicSource) -> Result<()> {
        log::info!("route capture channel {} from {}", channel, source);
        self.calls
            .lock()
            .unwrap()
            .push(ControlCall::MicCategory { channel, source });
        Ok(())
    }

    fn set_hardware_volume(&self, left: f32, right: f32) -> Result<()> {
        log::info!("hardware volume set to ({:.2}, {:.2})", left, right);
        self.calls
            .lock()
            .unwrap()
            .push(ControlCall::HardwareVolume { left, right });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::InputDevice;

    fn config() -> CaptureConfig {
        CaptureConfig {
            sample_rate: 16000,
            format: 1,
            channel_count: 2,
            device: InputDevice::Mic,
            buffer_bytes: 0,
        }
    }

    #[test]
    fn pattern_pages_are_deterministic() {
        let factory = SimCaptureFactory::pattern();
        let mut capture = factory.create(&config()).unwrap();
        capture.start().unwrap();

        let mut first = vec![0u8; 16];
        let mut second = vec![0u8; 16];
        capture.read(&mut first).unwrap();
        capture.read(&mut second).unwrap();

        assert_eq!(first[0], 0);
        assert_eq!(first[15], 15);
        assert_eq!(second[0], 16);
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn read_before_start_fails() {
        let factory = SimCaptureFactory::pattern();
        let mut capture = factory.create(&config()).unwrap();
        let mut page = vec![0u8; 8];
        assert!(capture.read(&mut page).is_err());
    }

    #[test]
    fn wav_pages_loop_over_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..4i16 {
            writer.write_sample(i + 1).unwrap();
        }
        writer.finalize().unwrap();

        let factory = SimCaptureFactory::wav(path);
        let mut capture = factory.create(&config()).unwrap();
        capture.start().unwrap();

        // 4 samples = 8 bytes; a 16-byte page wraps the file exactly twice
        let mut page = vec![0u8; 16];
        capture.read(&mut page).unwrap();
        assert_eq!(&page[..8], &page[8..]);
        assert_eq!(&page[..2], &1i16.to_le_bytes());
    }
}
