//! cpal-backed capture for host builds.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated worker
//! thread; captured bytes cross a bounded channel and are reassembled into
//! pages on the caller's side.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::channels::MicSource;
use crate::error::{BridgeError, Result};
use crate::hal::{AudioControl, CaptureConfig, CaptureDevice, CaptureFactory};

const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared left/right gain, stored as f32 bit patterns so the audio callback
/// can read it without locking.
pub struct SharedGain {
    left: AtomicU32,
    right: AtomicU32,
}

impl SharedGain {
    pub fn new(left: f32, right: f32) -> Self {
        Self {
            left: AtomicU32::new(left.to_bits()),
            right: AtomicU32::new(right.to_bits()),
        }
    }

    pub fn set(&self, left: f32, right: f32) {
        self.left.store(left.to_bits(), Ordering::Relaxed);
        self.right.store(right.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> (f32, f32) {
        (
            f32::from_bits(self.left.load(Ordering::Relaxed)),
            f32::from_bits(self.right.load(Ordering::Relaxed)),
        )
    }
}

/// Host-side stand-in for the vendor audio control service. Mic routing is
/// logged (a host mixer has no per-channel mic mux); hardware volume lands in
/// the shared gain read by the local output path.
pub struct CpalControl {
    gain: Arc<SharedGain>,
}

impl CpalControl {
    pub fn new(gain: Arc<SharedGain>) -> Self {
        Self { gain }
    }
}

impl AudioControl for CpalControl {
    fn set_channel_mic_category(&self, channel: usize, source: MicSource) -> Result<()> {
        log::info!(
            "route capture channel {} from {} (category {})",
            channel,
            source,
            source.category()
        );
        Ok(())
    }

    fn set_hardware_volume(&self, left: f32, right: f32) -> Result<()> {
        self.gain.set(left, right);
        log::info!("hardware volume set to ({:.2}, {:.2})", left, right);
        Ok(())
    }
}

pub struct CpalCaptureFactory;

impl CaptureFactory for CpalCaptureFactory {
    fn create(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(CpalCapture::open(config)?))
    }
}

enum StreamCommand {
    Start,
    Stop,
}

pub struct CpalCapture {
    bytes_rx: Receiver<Vec<u8>>,
    command_tx: Sender<StreamCommand>,
    worker: Option<thread::JoinHandle<()>>,
    pending: Vec<u8>,
    started: bool,
}

impl CpalCapture {
    fn open(config: &CaptureConfig) -> Result<Self> {
        log::info!(
            "opening cpal capture: {} Hz, {} channels on {}",
            config.sample_rate,
            config.channel_count,
            config.device
        );

        let (bytes_tx, bytes_rx) = bounded::<Vec<u8>>(16);
        let (command_tx, command_rx) = bounded::<StreamCommand>(2);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);

        let sample_rate = config.sample_rate;
        let channel_count = config.channel_count;
        let worker = thread::spawn(move || {
            stream_worker(sample_rate, channel_count, bytes_tx, command_rx, ready_tx)
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                bytes_rx,
                command_tx,
                worker: Some(worker),
                pending: Vec::new(),
                started: false,
            }),
            Ok(Err(message)) => {
                let _ = worker.join();
                Err(BridgeError::Hal(message))
            }
            Err(_) => Err(BridgeError::Hal("capture stream worker died".into())),
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn start(&mut self) -> Result<()> {
        self.command_tx
            .send(StreamCommand::Start)
            .map_err(|_| BridgeError::Hal("capture stream worker gone".into()))?;
        self.started = true;
        Ok(())
    }

    fn read(&mut self, page: &mut [u8]) -> Result<()> {
        if !self.started {
            return Err(BridgeError::Hal("capture not started".into()));
        }

        while self.pending.len() < page.len() {
            match self.bytes_rx.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(BridgeError::Hal("capture read timed out".into()));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BridgeError::Hal("capture stream closed".into()));
                }
            }
        }
        page.copy_from_slice(&self.pending[..page.len()]);
        self.pending.drain(..page.len());
        Ok(())
    }

    fn set_parameters(&mut self, parameters: &str) -> Result<()> {
        // vendor capability strings have no host equivalent
        log::debug!("capture parameters: {}", parameters);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        let _ = self.command_tx.send(StreamCommand::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

fn stream_worker(
    sample_rate: u32,
    channel_count: u32,
    bytes_tx: Sender<Vec<u8>>,
    command_rx: Receiver<StreamCommand>,
    ready_tx: Sender<std::result::Result<(), String>>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err("no default input device".into()));
            return;
        }
    };

    let stream_config = cpal::StreamConfig {
        channels: channel_count as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match device.build_input_stream(
        &stream_config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            let mut bytes = Vec::with_capacity(data.len() * 2);
            for sample in data {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            // consumer behind: drop the chunk rather than stall the callback
            let _ = bytes_tx.try_send(bytes);
        },
        |err| log::error!("capture stream error: {}", err),
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("build input stream: {}", e)));
            return;
        }
    };

    let _ = ready_tx.send(Ok(()));

    // hold the stream until told to stop; play/stop commands arrive from the
    // session thread
    loop {
        match command_rx.recv() {
            Ok(StreamCommand::Start) => {
                if let Err(e) = stream.play() {
                    log::error!("start capture stream: {}", e);
                }
            }
            Ok(StreamCommand::Stop) | Err(_) => break,
        }
    }
    drop(stream);
    log::debug!("capture stream worker exit");
}
