//! Playback boundary.
//!
//! The vendor media framework is an external collaborator; the bridge drives
//! it through a small trait with an observable state mirroring the
//! framework's callback-driven lifecycle. The shipped [`TonePlayer`] feeds a
//! tone to the local output device, standing in where no stream decoder
//! exists; [`ScriptedPlayer`] gives tests a deterministic counterpart.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Sender};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::{BridgeError, Result};
use crate::hal::imp_cpal::SharedGain;

/// Player lifecycle states as reported by the framework callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PlayerState {
    Idle,
    Prepared,
    Playing,
    Paused,
    PlaybackComplete,
    RewindComplete,
    Stopped,
}

pub trait MediaPlayer: Send {
    fn set_source(&mut self, url: &str) -> Result<()>;
    fn prepare(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
    fn state(&self) -> PlayerState;
}

/// Creates one player per played URL; the playback controller tears each
/// one down again after the stop/reset handshake.
pub trait PlayerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn MediaPlayer>>;
}

const TONE_HZ: f32 = 500.0;

/// Plays a fixed tone through the default output device, honoring the shared
/// hardware gain. Runs until stopped, like a live stream.
pub struct TonePlayer {
    gain: Arc<SharedGain>,
    state: Arc<Mutex<PlayerState>>,
    stop_tx: Option<Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
    source: Option<String>,
}

pub struct TonePlayerFactory {
    gain: Arc<SharedGain>,
}

impl TonePlayerFactory {
    pub fn new(gain: Arc<SharedGain>) -> Self {
        Self { gain }
    }
}

impl PlayerFactory for TonePlayerFactory {
    fn create(&self) -> Result<Box<dyn MediaPlayer>> {
        Ok(Box::new(TonePlayer {
            gain: self.gain.clone(),
            state: Arc::new(Mutex::new(PlayerState::Idle)),
            stop_tx: None,
            worker: None,
            source: None,
        }))
    }
}

impl TonePlayer {
    fn set_state(&self, state: PlayerState) {
        *self.state.lock().unwrap() = state;
    }
}

impl MediaPlayer for TonePlayer {
    fn set_source(&mut self, url: &str) -> Result<()> {
        self.source = Some(url.to_string());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        if self.source.is_none() {
            return Err(BridgeError::Playback("prepare without a source".into()));
        }
        self.set_state(PlayerState::Prepared);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let gain = self.gain.clone();

        let worker = thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err("no default output device".into()));
                    return;
                }
            };
            let supported_config = match device.default_output_config() {
                Ok(config) => config,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("output config: {}", e)));
                    return;
                }
            };
            let stream_config = supported_config.config();
            let sample_rate = stream_config.sample_rate.0 as f32;
            let channels = stream_config.channels as usize;
            let mut phase = 0.0f32;

            let stream = match device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let (left, right) = gain.get();
                    for frame in data.chunks_mut(channels) {
                        let value = (phase * std::f32::consts::TAU).sin();
                        phase = (phase + TONE_HZ / sample_rate).fract();
                        for (i, sample) in frame.iter_mut().enumerate() {
                            *sample = value * if i == 1 { right } else { left };
                        }
                    }
                },
                |err| log::error!("output stream error: {}", err),
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("build output stream: {}", e)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("start output stream: {}", e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // the stream keeps running until stop() drops the channel or
            // sends the stop token
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                self.set_state(PlayerState::Playing);
                Ok(())
            }
            Ok(Err(message)) => {
                let _ = worker.join();
                Err(BridgeError::Playback(message))
            }
            Err(_) => Err(BridgeError::Playback("output worker died".into())),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.set_state(PlayerState::Stopped);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.source = None;
        self.set_state(PlayerState::Idle);
        Ok(())
    }

    fn state(&self) -> PlayerState {
        *self.state.lock().unwrap()
    }
}

impl Drop for TonePlayer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

/// Deterministic player for tests and the sim backend: records every URL it
/// is asked to play and, when configured to, reports completion after a
/// fixed number of state polls.
pub struct ScriptedPlayer {
    log: Arc<Mutex<Vec<String>>>,
    polls_to_complete: Option<u32>,
    remaining: AtomicU32,
    state: Mutex<PlayerState>,
    source: Option<String>,
}

pub struct ScriptedPlayerFactory {
    log: Arc<Mutex<Vec<String>>>,
    polls_to_complete: Option<u32>,
}

impl ScriptedPlayerFactory {
    /// Every play completes after `polls` state polls.
    pub fn completing_after(polls: u32) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            polls_to_complete: Some(polls),
        }
    }

    /// Plays run until stopped, like a live stream.
    pub fn endless() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            polls_to_complete: None,
        }
    }

    /// URLs played so far, in order.
    pub fn played(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl PlayerFactory for ScriptedPlayerFactory {
    fn create(&self) -> Result<Box<dyn MediaPlayer>> {
        Ok(Box::new(ScriptedPlayer {
            log: self.log.clone(),
            polls_to_complete: self.polls_to_complete,
            remaining: AtomicU32::new(0),
            state: Mutex::new(PlayerState::Idle),
            source: None,
        }))
    }
}

impl MediaPlayer for ScriptedPlayer {
    fn set_source(&mut self, url: &str) -> Result<()> {
        self.source = Some(url.to_string());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        if self.source.is_none() {
            return Err(BridgeError::Playback("prepare without a source".into()));
        }
        *self.state.lock().unwrap() = PlayerState::Prepared;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| BridgeError::Playback("start without a source".into()))?;
        self.log.lock().unwrap().push(source);
        self.remaining
            .store(self.polls_to_complete.unwrap_or(0), Ordering::SeqCst);
        *self.state.lock().unwrap() = PlayerState::Playing;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        *self.state.lock().unwrap() = PlayerState::Stopped;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.source = None;
        *self.state.lock().unwrap() = PlayerState::Idle;
        Ok(())
    }

    fn state(&self) -> PlayerState {
        let mut state = self.state.lock().unwrap();
        if *state == PlayerState::Playing && self.polls_to_complete.is_some() {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                *state = PlayerState::PlaybackComplete;
            } else {
                self.remaining.fetch_sub(1, Ordering::SeqCst);
            }
        }
        *state
    }
}
