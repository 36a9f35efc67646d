use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use log::info;

use record_protocol::{FrameAccumulator, FrameWriter};

use pcrecord::config::BridgeConfig;
use pcrecord::error::BridgeError;
use pcrecord::hal::imp_cpal::{CpalCaptureFactory, CpalControl, SharedGain};
use pcrecord::hal::imp_sim::{RecordingControl, SimCaptureFactory};
use pcrecord::hal::{AudioControl, CaptureFactory};
use pcrecord::link::ControlLink;
use pcrecord::player::{PlayerFactory, ScriptedPlayerFactory, TonePlayerFactory};
use pcrecord::session::{RecorderSession, SharedWriter};

#[derive(Parser, Debug)]
#[command(name = "pcrecord")]
#[command(about = "PC-controlled audio record/playback bridge")]
struct Args {
    /// Control link: serial device path or listen://host:port
    #[arg(short, long, default_value = "listen://0.0.0.0:7800")]
    link: String,

    /// Capture backend
    #[arg(long, value_enum, default_value_t = Backend::Cpal)]
    backend: Backend,

    /// Buffer pages through the ring and forward them from a separate worker
    /// instead of the capture loop
    #[arg(long)]
    buffered_tx: bool,

    /// Hardware volume applied at startup (both channels)
    #[arg(long, default_value = "0.6")]
    volume: f32,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    /// Host audio devices via cpal
    Cpal,
    /// Deterministic simulated capture, no hardware needed
    Sim,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    info!("🎙️ starting pcrecord bridge: {:?}", args);

    if !(0.0..=1.0).contains(&args.volume) {
        return Err(BridgeError::Config(format!(
            "startup volume {} must be between 0.0 and 1.0",
            args.volume
        ))
        .into());
    }

    let mut config = BridgeConfig::default();
    config.direct_tx = !args.buffered_tx;

    let gain = Arc::new(SharedGain::new(args.volume, args.volume));
    let (capture_factory, control, player_factory): (
        Arc<dyn CaptureFactory>,
        Arc<dyn AudioControl>,
        Arc<dyn PlayerFactory>,
    ) = match args.backend {
        Backend::Cpal => (
            Arc::new(CpalCaptureFactory),
            Arc::new(CpalControl::new(gain.clone())),
            Arc::new(TonePlayerFactory::new(gain)),
        ),
        Backend::Sim => (
            Arc::new(SimCaptureFactory::paced_pattern()),
            Arc::new(RecordingControl::default()),
            Arc::new(ScriptedPlayerFactory::endless()),
        ),
    };

    if let Err(e) = control.set_hardware_volume(args.volume, args.volume) {
        log::warn!("startup volume failed: {}", e);
    }

    let link = ControlLink::open(&args.link)?;
    let writer: SharedWriter = Arc::new(FrameWriter::new(link.writer));

    let mut session = RecorderSession::new(
        config.clone(),
        writer,
        capture_factory,
        control,
        player_factory,
    );

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("🛑 received Ctrl+C, shutting down");
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    run_rx_loop(link.reader, &mut session, &config, &stop);

    session.shutdown();
    info!("pcrecord bridge stopped");
    Ok(())
}

/// The RX loop: raw bytes in, complete frames to the session. Exits when the
/// peer goes away or shutdown is requested.
fn run_rx_loop(
    mut reader: Box<dyn Read + Send>,
    session: &mut RecorderSession,
    config: &BridgeConfig,
    stop: &AtomicBool,
) {
    let mut accumulator = FrameAccumulator::with_limit(config.frame_buf_limit);
    let mut buf = [0u8; 256];
    let mut last_byte = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => {
                info!("control peer closed the link");
                break;
            }
            Ok(n) => {
                last_byte = Instant::now();
                for &byte in &buf[..n] {
                    match accumulator.push(byte) {
                        Ok(Some(frame)) => session.handle_frame(&frame),
                        Ok(None) => {}
                        // overflow: the in-flight frame is gone, no response
                        Err(e) => log::error!("dropping inbound frame: {}", e),
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                // a partial frame that stalls through a quiet interval is
                // garbage from a dead or confused peer
                if accumulator.in_flight() && last_byte.elapsed() >= config.frame_timeout {
                    log::warn!(
                        "dropping stale partial frame after {:?}",
                        config.frame_timeout
                    );
                    accumulator.reset();
                }
            }
            Err(e) => {
                log::error!("control link read failed: {}", e);
                break;
            }
        }
    }
}
