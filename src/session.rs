//! Control session.
//!
//! One state machine owns the capture lifecycle, the worker threads and
//! every response sent back over the link. A single RX worker feeds it, so
//! exactly one control message is in flight at a time by construction.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use record_protocol::{
    ConfigRequest, ControlMessage, FrameWriter, ProtocolError, RecordStatus, Response,
    VolumeRequest,
};

use crate::channels::{ChannelMap, MicSource};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::hal::{AudioControl, CaptureConfig, CaptureDevice, CaptureFactory, InputDevice};
use crate::playback::{PlaybackController, PlaybackSettings};
use crate::player::PlayerFactory;
use crate::ring::PageRing;

/// Grace delay answered to a redundant start or play request.
const ALREADY_RUNNING_DELAY: Duration = Duration::from_millis(200);

/// Idle cadence of the indirect forwarding worker.
const TX_POLL_INTERVAL: Duration = Duration::from_millis(2);

pub type SharedWriter = Arc<FrameWriter<Box<dyn Write + Send>>>;
type SharedCapture = Arc<Mutex<Box<dyn CaptureDevice>>>;

/// Mic routing derived from the last accepted config.
struct RoutingPlan {
    sources: Vec<MicSource>,
    parameters: String,
}

pub struct RecorderSession {
    config: BridgeConfig,
    writer: SharedWriter,
    capture_factory: Arc<dyn CaptureFactory>,
    control: Arc<dyn AudioControl>,
    player_factory: Arc<dyn PlayerFactory>,
    playback_settings: PlaybackSettings,

    stop: Arc<AtomicBool>,
    status: RecordStatus,
    recorder_running: Arc<AtomicBool>,
    player_running: Arc<AtomicBool>,
    ring: Arc<PageRing>,

    capture: Option<SharedCapture>,
    routing: Option<RoutingPlan>,
    recorder: Option<thread::JoinHandle<()>>,
    forwarder: Option<thread::JoinHandle<()>>,
    playback: Option<thread::JoinHandle<()>>,
}

impl RecorderSession {
    pub fn new(
        config: BridgeConfig,
        writer: SharedWriter,
        capture_factory: Arc<dyn CaptureFactory>,
        control: Arc<dyn AudioControl>,
        player_factory: Arc<dyn PlayerFactory>,
    ) -> Self {
        let ring = Arc::new(PageRing::new(config.page_count));
        let playback_settings = PlaybackSettings {
            poll_interval: config.playback_poll,
            retry_delay: config.playlist_retry,
        };
        Self {
            config,
            writer,
            capture_factory,
            control,
            player_factory,
            playback_settings,
            stop: Arc::new(AtomicBool::new(false)),
            status: RecordStatus::Idle,
            recorder_running: Arc::new(AtomicBool::new(false)),
            player_running: Arc::new(AtomicBool::new(false)),
            ring,
            capture: None,
            routing: None,
            recorder: None,
            forwarder: None,
            playback: None,
        }
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn recorder_running(&self) -> bool {
        self.recorder_running.load(Ordering::SeqCst)
    }

    pub fn player_running(&self) -> bool {
        self.player_running.load(Ordering::SeqCst)
    }

    pub fn ring(&self) -> Arc<PageRing> {
        self.ring.clone()
    }

    /// Handle one assembled frame end to end: parse, dispatch, respond.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        log::debug!(
            "control frame ({} bytes): {}",
            frame.len(),
            String::from_utf8_lossy(frame)
        );
        match ControlMessage::parse(frame) {
            Ok(message) => self.dispatch(message),
            Err(e) => {
                log::error!("rejecting control frame: {}", e);
                self.respond(&Response::Error);
            }
        }
    }

    pub fn dispatch(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Config(request) => {
                let outcome = self.handle_config(&request);
                self.ack_outcome("config", outcome);
            }
            ControlMessage::Start => {
                let outcome = self.handle_start();
                let ok = outcome.is_ok();
                self.ack_outcome("start", outcome);
                if ok {
                    self.spawn_recorder();
                }
            }
            ControlMessage::Stop => {
                let outcome = self.handle_stop();
                self.ack_outcome("stop", outcome);
            }
            ControlMessage::Query => self.handle_query(),
            ControlMessage::Volume(request) => {
                let outcome = self.handle_volume(&request);
                self.ack_outcome("volume", outcome);
            }
        }
    }

    /// Cooperative shutdown for the process exit path.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.handle_stop() {
            log::error!("shutdown stop failed: {}", e);
        }
    }

    fn ack_outcome(&self, op: &str, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.respond(&Response::Ack),
            Err(e) => {
                log::error!("{} failed: {}", op, e);
                self.respond(&Response::Error);
            }
        }
    }

    fn respond(&self, response: &Response) {
        if let Err(e) = self.writer.send_response(response) {
            log::error!("response send failed: {}", e);
        }
    }

    fn handle_config(&mut self, request: &ConfigRequest) -> Result<()> {
        let settings = request.validated()?;
        let channel_map = ChannelMap::from_descriptors(&settings.record.channels)?;
        let device =
            InputDevice::from_wire(settings.record.device).ok_or(ProtocolError::InvalidFieldValue {
                field: "record.device",
                value: settings.record.device,
            })?;

        if let Some(url) = settings.play {
            self.spawn_playback(url);
        }

        self.ring.reset();

        let capture_config = CaptureConfig {
            sample_rate: settings.record.sample_rate,
            format: settings.record.format,
            channel_count: settings.record.channel_count,
            device,
            buffer_bytes: 0, // backend default period
        };
        log::info!(
            "capture config: {} Hz, format {}, {} channels on {}",
            capture_config.sample_rate,
            capture_config.format,
            capture_config.channel_count,
            capture_config.device
        );
        log::info!(
            "channel map {:?}, parameters \"{}\"",
            channel_map.sources,
            channel_map.capability_string()
        );

        let handle = self.capture_factory.create(&capture_config)?;
        self.capture = Some(Arc::new(Mutex::new(handle)));
        self.routing = Some(RoutingPlan {
            parameters: channel_map.capability_string(),
            sources: channel_map.sources,
        });
        Ok(())
    }

    fn spawn_playback(&mut self, url: String) {
        if self.player_running.load(Ordering::SeqCst) {
            thread::sleep(ALREADY_RUNNING_DELAY);
            log::info!("player already running, keeping current stream");
            return;
        }

        // play may be requested ahead of record start; clear a stale stop flag
        self.stop.store(false, Ordering::SeqCst);
        self.playback = Some(PlaybackController::spawn(
            url,
            self.player_factory.clone(),
            self.stop.clone(),
            self.player_running.clone(),
            self.playback_settings.clone(),
        ));
    }

    fn handle_start(&mut self) -> Result<()> {
        let capture = self
            .capture
            .as_ref()
            .ok_or_else(|| BridgeError::Hal("start without a capture handle, config first".into()))?;
        let routing = self
            .routing
            .as_ref()
            .ok_or_else(|| BridgeError::Hal("start without a routing plan".into()))?;

        capture.lock().unwrap().start()?;

        for (channel, source) in routing.sources.iter().enumerate() {
            self.control.set_channel_mic_category(channel, *source)?;
        }
        capture.lock().unwrap().set_parameters(&routing.parameters)?;
        Ok(())
    }

    fn spawn_recorder(&mut self) {
        if self.recorder_running.load(Ordering::SeqCst) {
            thread::sleep(ALREADY_RUNNING_DELAY);
            log::info!("recorder already running");
            return;
        }
        let Some(capture) = self.capture.clone() else {
            return;
        };

        self.stop.store(false, Ordering::SeqCst);
        self.status = RecordStatus::Busy;
        self.recorder_running.store(true, Ordering::SeqCst);

        let ring = self.ring.clone();
        let writer = self.writer.clone();
        let stop = self.stop.clone();
        let running = self.recorder_running.clone();
        let page_size = self.config.page_size;
        let direct = self.config.direct_tx;

        self.recorder = Some(thread::spawn(move || {
            recorder_loop(capture, ring, writer, stop, direct, page_size);
            running.store(false, Ordering::SeqCst);
            log::debug!("recorder task exit");
        }));

        if !direct {
            let ring = self.ring.clone();
            let writer = self.writer.clone();
            let stop = self.stop.clone();
            self.forwarder = Some(thread::spawn(move || {
                forward_loop(ring, writer, stop);
                log::debug!("tx task exit");
            }));
        }
    }

    fn handle_stop(&mut self) -> Result<()> {
        if self.stop.load(Ordering::SeqCst) {
            log::debug!("audio record already stopped");
            return Ok(());
        }

        self.stop.store(true, Ordering::SeqCst);
        self.status = RecordStatus::Idle;

        if let Some(recorder) = self.recorder.take() {
            let _ = recorder.join();
        }
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.join();
        }

        if let Some(capture) = self.capture.take() {
            if let Err(e) = capture.lock().unwrap().stop() {
                log::error!("capture stop failed: {}", e);
            }
        }
        log::debug!("audio record stopped");

        if let Some(playback) = self.playback.take() {
            let _ = playback.join();
            log::debug!("audio player stopped");
        }
        Ok(())
    }

    fn handle_query(&self) {
        let response = Response::Query {
            version: self.config.version.clone(),
            status: self.status,
        };
        if let Err(e) = self.writer.send_response(&response) {
            log::error!("query response failed: {}", e);
            self.respond(&Response::Error);
        }
    }

    fn handle_volume(&self, request: &VolumeRequest) -> Result<()> {
        let value = request.value.ok_or(ProtocolError::MissingField("value"))?;
        let clamped = value.clamp(0, 100);
        if clamped != value {
            log::warn!("volume {} out of range, clamped to {}", value, clamped);
        }
        let volume = clamped as f32 / 100.0;
        log::info!("volume: {:.2}", volume);

        // the volume request always acks; a backend refusal is only logged
        if let Err(e) = self.control.set_hardware_volume(volume, volume) {
            log::error!("hardware volume failed: {}", e);
        }
        Ok(())
    }
}

fn recorder_loop(
    capture: SharedCapture,
    ring: Arc<PageRing>,
    writer: SharedWriter,
    stop: Arc<AtomicBool>,
    direct: bool,
    page_size: usize,
) {
    let mut page = vec![0u8; page_size];
    loop {
        let outcome = capture.lock().unwrap().read(&mut page);
        match outcome {
            Ok(()) => {
                if direct {
                    let seq = ring.claim();
                    if let Err(e) = writer.send_data_frame(seq as u32, &page) {
                        log::error!("data frame {} send failed: {}", seq, e);
                    }
                    ring.mark_forwarded();
                } else if ring.produce(page.clone()).is_none() {
                    log::warn!(
                        "capture ring full, page dropped ({} overruns)",
                        ring.overruns()
                    );
                }
            }
            Err(e) => log::debug!("capture read stalled: {}", e),
        }

        // the stop flag is honored only after the forward step, so one extra
        // page can go out after a stop request
        if stop.load(Ordering::SeqCst) {
            break;
        }
    }
}

fn forward_loop(ring: Arc<PageRing>, writer: SharedWriter, stop: Arc<AtomicBool>) {
    loop {
        if let Some((seq, page)) = ring.consume() {
            if let Err(e) = writer.send_data_frame(seq as u32, &page) {
                log::error!("data frame {} send failed: {}", seq, e);
            }
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(TX_POLL_INTERVAL);
    }
}
