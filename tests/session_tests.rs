//! End-to-end session tests: control frames in, responses and data frames
//! out, with the simulated capture backend standing in for the HAL.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use record_protocol::{decode_data_frame, FrameWriter, RecordStatus};

use pcrecord::config::BridgeConfig;
use pcrecord::hal::imp_sim::{ControlCall, RecordingControl, SimCaptureFactory};
use pcrecord::player::ScriptedPlayerFactory;
use pcrecord::session::{RecorderSession, SharedWriter};

/// Writer half that keeps everything in memory for assertions.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn snapshot(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One decoded outbound frame.
#[derive(Debug)]
enum WireFrame {
    Json(serde_json::Value),
    Data { seq: u32, payload: Vec<u8> },
}

/// Split the raw outbound byte stream back into frames. Data frames are
/// checksum-verified by the decoder.
fn drain_frames(bytes: &[u8]) -> Vec<WireFrame> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos..].starts_with(b"data") {
            let (frame, used) = decode_data_frame(&bytes[pos..]).expect("valid data frame");
            frames.push(WireFrame::Data {
                seq: frame.seq,
                payload: frame.payload.to_vec(),
            });
            pos += used;
        } else {
            let mut depth = 0i32;
            let mut end = None;
            for (i, &byte) in bytes[pos..].iter().enumerate() {
                match byte {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(pos + i + 1);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.expect("complete json frame");
            frames.push(WireFrame::Json(
                serde_json::from_slice(&bytes[pos..end]).expect("valid json"),
            ));
            pos = end;
        }
    }
    frames
}

fn json_frames(frames: &[WireFrame]) -> Vec<serde_json::Value> {
    frames
        .iter()
        .filter_map(|f| match f {
            WireFrame::Json(value) => Some(value.clone()),
            _ => None,
        })
        .collect()
}

fn data_seqs(frames: &[WireFrame]) -> Vec<u32> {
    frames
        .iter()
        .filter_map(|f| match f {
            WireFrame::Data { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect()
}

struct Harness {
    session: RecorderSession,
    out: SharedBuf,
    control: Arc<RecordingControl>,
    factory: Arc<SimCaptureFactory>,
    players: Arc<ScriptedPlayerFactory>,
}

fn harness(direct_tx: bool) -> Harness {
    let mut config = BridgeConfig::default();
    config.direct_tx = direct_tx;
    config.playback_poll = Duration::from_millis(2);
    config.playlist_retry = Duration::from_millis(10);

    let out = SharedBuf::default();
    let writer: SharedWriter = Arc::new(FrameWriter::new(
        Box::new(out.clone()) as Box<dyn Write + Send>
    ));
    let control = Arc::new(RecordingControl::default());
    let factory = Arc::new(SimCaptureFactory::pattern());
    let players = Arc::new(ScriptedPlayerFactory::endless());

    let session = RecorderSession::new(
        config,
        writer,
        factory.clone(),
        control.clone(),
        players.clone(),
    );
    Harness {
        session,
        out,
        control,
        factory,
        players,
    }
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    predicate()
}

const CONFIG_MSG: &[u8] = br#"{"type":"config","record":{"sample_rate":16000,"device":1,"format":1,"chl_num":2,"chl1":65537,"chl2":2}}"#;

#[test]
fn query_reports_idle_status_and_version() {
    let mut h = harness(true);
    h.session.handle_frame(br#"{"type":"query"}"#);

    let frames = drain_frames(&h.out.snapshot());
    let jsons = json_frames(&frames);
    assert_eq!(jsons.len(), 1);
    assert_eq!(
        jsons[0],
        serde_json::json!({
            "type": "query",
            "version": env!("CARGO_PKG_VERSION"),
            "status": "idle",
        })
    );
}

#[test]
fn volume_scales_to_hardware_gain() {
    let mut h = harness(true);
    h.session.handle_frame(br#"{"type":"volume","value":50}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons, vec![serde_json::json!({"type": "ack"})]);
    assert_eq!(
        h.control.calls(),
        vec![ControlCall::HardwareVolume {
            left: 0.5,
            right: 0.5
        }]
    );
}

#[test]
fn volume_without_value_is_an_error() {
    let mut h = harness(true);
    h.session.handle_frame(br#"{"type":"volume"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons, vec![serde_json::json!({"type": "error"})]);
    assert!(h.control.calls().is_empty());
}

#[test]
fn unknown_type_answers_error() {
    let mut h = harness(true);
    h.session.handle_frame(br#"{"type":"reboot"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons, vec![serde_json::json!({"type": "error"})]);
}

#[test]
fn config_missing_field_is_an_error_without_state_change() {
    let mut h = harness(true);
    h.session
        .handle_frame(br#"{"type":"config","record":{"device":1,"format":1,"chl_num":1}}"#);
    h.session.handle_frame(br#"{"type":"query"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons[0], serde_json::json!({"type": "error"}));
    assert_eq!(jsons[1]["status"], "idle");
    assert_eq!(h.factory.created(), 0);
}

#[test]
fn config_with_two_reference_channels_is_rejected() {
    let mut h = harness(true);
    h.session.handle_frame(
        br#"{"type":"config","record":{"sample_rate":16000,"device":1,"format":1,"chl_num":2,"chl1":65537,"chl2":65538}}"#,
    );

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons, vec![serde_json::json!({"type": "error"})]);
    assert_eq!(h.factory.created(), 0);
}

#[test]
fn config_then_start_streams_sequenced_pages() {
    let mut h = harness(true);
    h.session.handle_frame(CONFIG_MSG);
    h.session.handle_frame(br#"{"type":"start"}"#);
    assert!(h.session.recorder_running());

    let ring = h.session.ring();
    assert!(wait_until(Duration::from_secs(1), || ring.rx_count() >= 3));

    h.session.handle_frame(br#"{"type":"stop"}"#);
    assert!(!h.session.recorder_running());

    let frames = drain_frames(&h.out.snapshot());
    let jsons = json_frames(&frames);
    // config ack, start ack, stop ack
    assert_eq!(jsons.len(), 3);
    assert!(jsons.iter().all(|j| j == &serde_json::json!({"type": "ack"})));

    let seqs = data_seqs(&frames);
    assert!(seqs.len() >= 3);
    for (i, seq) in seqs.iter().enumerate() {
        assert_eq!(*seq as usize, i + 1, "sequence numbers must be gapless");
    }
    for frame in &frames {
        if let WireFrame::Data { payload, .. } = frame {
            assert_eq!(payload.len(), 2048);
        }
    }

    // routing applied in channel order before the capability string
    let calls = h.control.calls();
    assert!(calls.iter().any(
        |c| matches!(c, ControlCall::MicCategory { channel: 0, source } if source.to_string() == "AMIC1")
    ));
    assert!(calls.iter().any(
        |c| matches!(c, ControlCall::MicCategory { channel: 1, source } if source.to_string() == "AMIC2")
    ));
}

#[test]
fn start_while_recording_keeps_a_single_recorder() {
    let mut h = harness(true);
    h.session.handle_frame(CONFIG_MSG);
    h.session.handle_frame(br#"{"type":"start"}"#);
    h.session.handle_frame(br#"{"type":"start"}"#);

    assert!(h.session.recorder_running());
    assert_eq!(h.factory.created(), 1);

    h.session.handle_frame(br#"{"type":"stop"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    // config, start, start again, stop: all acks
    assert_eq!(jsons.len(), 4);
    assert!(jsons.iter().all(|j| j == &serde_json::json!({"type": "ack"})));
}

#[test]
fn stop_is_idempotent_and_leaves_idle() {
    let mut h = harness(true);
    h.session.handle_frame(CONFIG_MSG);
    h.session.handle_frame(br#"{"type":"start"}"#);
    h.session.handle_frame(br#"{"type":"stop"}"#);
    h.session.handle_frame(br#"{"type":"stop"}"#);
    h.session.handle_frame(br#"{"type":"query"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons.len(), 5);
    assert_eq!(jsons[2], serde_json::json!({"type": "ack"}));
    assert_eq!(jsons[3], serde_json::json!({"type": "ack"}));
    assert_eq!(jsons[4]["status"], "idle");
    assert_eq!(h.session.status(), RecordStatus::Idle);
}

#[test]
fn stop_without_start_still_acks() {
    let mut h = harness(true);
    h.session.handle_frame(br#"{"type":"stop"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons, vec![serde_json::json!({"type": "ack"})]);
}

#[test]
fn start_before_config_is_a_hal_error() {
    let mut h = harness(true);
    h.session.handle_frame(br#"{"type":"start"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons, vec![serde_json::json!({"type": "error"})]);
    assert!(!h.session.recorder_running());
}

#[test]
fn no_pages_are_produced_after_stop_returns() {
    let mut h = harness(true);
    h.session.handle_frame(CONFIG_MSG);
    h.session.handle_frame(br#"{"type":"start"}"#);

    let ring = h.session.ring();
    assert!(wait_until(Duration::from_secs(1), || ring.rx_count() >= 2));
    h.session.handle_frame(br#"{"type":"stop"}"#);

    let frozen = ring.rx_count();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ring.rx_count(), frozen);
}

#[test]
fn buffered_mode_preserves_order_and_counter_invariant() {
    let mut h = harness(false);
    h.session.handle_frame(CONFIG_MSG);
    h.session.handle_frame(br#"{"type":"start"}"#);

    let ring = h.session.ring();
    for _ in 0..20 {
        assert!(ring.tx_count() <= ring.rx_count());
        assert!(ring.rx_count() - ring.tx_count() <= 2);
        thread::sleep(Duration::from_millis(2));
    }
    assert!(wait_until(Duration::from_secs(1), || ring.tx_count() >= 5));

    h.session.handle_frame(br#"{"type":"stop"}"#);

    let frames = drain_frames(&h.out.snapshot());
    let seqs = data_seqs(&frames);
    assert!(seqs.len() >= 5);
    for (i, seq) in seqs.iter().enumerate() {
        assert_eq!(*seq as usize, i + 1, "forwarded pages must stay in order");
    }
}

const CONFIG_WITH_PLAY: &[u8] = br#"{"type":"config","mode":1,"record":{"sample_rate":16000,"device":1,"format":1,"chl_num":1,"chl1":1},"play":{"url":"http://127.0.0.1:1/live.mp3"}}"#;

#[test]
fn config_play_request_starts_playback_exactly_once() {
    let mut h = harness(true);
    h.session.handle_frame(CONFIG_WITH_PLAY);
    assert!(h.session.player_running());
    assert!(wait_until(Duration::from_secs(1), || {
        h.players.played().len() == 1
    }));

    // a second config while the player runs keeps the current stream
    h.session.handle_frame(CONFIG_WITH_PLAY);
    assert!(h.session.player_running());
    assert_eq!(h.players.played().len(), 1);

    h.session.handle_frame(br#"{"type":"stop"}"#);
    assert!(!h.session.player_running());

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    // config ack, config ack, stop ack
    assert_eq!(jsons.len(), 3);
    assert!(jsons.iter().all(|j| j == &serde_json::json!({"type": "ack"})));
}

#[test]
fn malformed_json_answers_error_and_session_recovers() {
    let mut h = harness(true);
    h.session.handle_frame(b"{bad json}");
    h.session.handle_frame(br#"{"type":"query"}"#);

    let jsons = json_frames(&drain_frames(&h.out.snapshot()));
    assert_eq!(jsons.len(), 2);
    assert_eq!(jsons[0], serde_json::json!({"type": "error"}));
    assert_eq!(jsons[1]["status"], "idle");
}
