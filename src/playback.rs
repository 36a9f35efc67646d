//! Streaming playback controller.
//!
//! Resolves a stream URL, expands m3u playlists over plain HTTP, and replays
//! entries round-robin until told to stop -- internet-radio semantics, so the
//! loops here are deliberately endless while the stop flag stays clear.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use url::Url;

use crate::error::{BridgeError, Result};
use crate::player::{PlayerFactory, PlayerState};

/// Longest playlist entry the bridge accepts.
const MAX_URL_LEN: usize = 64;

const FETCH_READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEADER_BYTES: usize = 8192;

/// Host/resource/extension split of a stream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub host: String,
    pub port: u16,
    pub resource: String,
    pub extension: Option<String>,
}

pub fn parse_stream_url(raw: &str) -> Result<StreamTarget> {
    let url =
        Url::parse(raw).map_err(|e| BridgeError::Playback(format!("bad url {}: {}", raw, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| BridgeError::Playback(format!("no host in {}", raw)))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let resource = if url.path().is_empty() {
        "/".to_string()
    } else {
        url.path().to_string()
    };
    let extension = resource
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    Ok(StreamTarget {
        host,
        port,
        resource,
        extension,
    })
}

/// Round-robin playlist queue; played entries requeue at the tail.
#[derive(Debug, Default)]
pub struct UrlQueue {
    entries: VecDeque<String>,
}

impl UrlQueue {
    pub fn new(entries: Vec<String>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn take_next(&mut self) -> Option<String> {
        self.entries.pop_front()
    }

    pub fn requeue(&mut self, entry: String) {
        self.entries.push_back(entry);
    }
}

/// Pull the playlist body and collect its `http://` entries. Connection
/// failures retry with a fixed delay, bounded only by the stop flag.
pub fn fetch_playlist(
    target: &StreamTarget,
    stop: &AtomicBool,
    retry_delay: Duration,
) -> Result<Vec<String>> {
    loop {
        if stop.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("playlist fetch stopped".into()));
        }

        let stream = match TcpStream::connect((target.host.as_str(), target.port)) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!(
                    "playlist connect to {}:{} failed: {}",
                    target.host,
                    target.port,
                    e
                );
                thread::sleep(retry_delay);
                continue;
            }
        };
        log::info!("playlist connect to {}:{} ok", target.host, target.port);

        match read_playlist_body(stream, target) {
            Ok(body) => return Ok(extract_entries(&body)),
            Err(e) => {
                log::warn!("playlist fetch failed: {}", e);
                thread::sleep(retry_delay);
            }
        }
    }
}

fn read_playlist_body(mut stream: TcpStream, target: &StreamTarget) -> Result<String> {
    stream.set_read_timeout(Some(FETCH_READ_TIMEOUT))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\n\r\n",
        target.resource, target.host
    );
    stream.write_all(request.as_bytes())?;

    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    let mut header_end: Option<usize> = None;
    let mut content_len: Option<usize> = None;

    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);

        if header_end.is_none() {
            if let Some(pos) = find_subslice(&raw, b"\r\n\r\n") {
                header_end = Some(pos + 4);
                let head = String::from_utf8_lossy(&raw[..pos]);
                content_len = parse_content_length(&head);
                log::debug!(
                    "playlist response: {} header bytes, content-length {:?}",
                    pos,
                    content_len
                );
            } else if raw.len() > MAX_HEADER_BYTES {
                return Err(BridgeError::Network("oversized response header".into()));
            }
        }

        if let (Some(end), Some(len)) = (header_end, content_len) {
            if raw.len() >= end + len {
                break;
            }
        }
    }

    let end = header_end.ok_or_else(|| BridgeError::Network("response header never completed".into()))?;
    let body = raw.split_off(end);
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn parse_content_length(head: &str) -> Option<usize> {
    head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_entries(body: &str) -> Vec<String> {
    let mut entries = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if !line.starts_with("http://") {
            continue;
        }
        if line.len() > MAX_URL_LEN {
            log::warn!("skipping oversized playlist entry ({} bytes)", line.len());
            continue;
        }
        log::debug!("playlist entry: {}", line);
        entries.push(line.to_string());
    }
    entries
}

/// Settings for the playback loop.
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub poll_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            retry_delay: Duration::from_millis(2000),
        }
    }
}

pub struct PlaybackController;

impl PlaybackController {
    /// Run the playback loop on its own thread. `running` stays true for the
    /// thread's lifetime; `stop` ends the loop at the next iteration
    /// boundary.
    pub fn spawn(
        url: String,
        factory: Arc<dyn PlayerFactory>,
        stop: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
        settings: PlaybackSettings,
    ) -> thread::JoinHandle<()> {
        running.store(true, Ordering::SeqCst);
        thread::spawn(move || {
            if let Err(e) = run(&url, factory.as_ref(), &stop, &settings) {
                log::error!("playback ended with error: {}", e);
            }
            running.store(false, Ordering::SeqCst);
            log::debug!("playback task exit");
        })
    }
}

fn run(
    url: &str,
    factory: &dyn PlayerFactory,
    stop: &AtomicBool,
    settings: &PlaybackSettings,
) -> Result<()> {
    let target = parse_stream_url(url)?;
    log::info!(
        "stream target: host {}, resource {}, format {:?}",
        target.host,
        target.resource,
        target.extension
    );

    if target.extension.as_deref() == Some("m3u") {
        let entries = fetch_playlist(&target, stop, settings.retry_delay)?;
        if entries.is_empty() {
            log::warn!("playlist {} held no entries", url);
            return Ok(());
        }
        log::info!("playlist holds {} entries", entries.len());

        let mut queue = UrlQueue::new(entries);
        while !stop.load(Ordering::SeqCst) {
            let Some(next) = queue.take_next() else {
                break;
            };
            play_once(factory, &next, stop, settings)?;
            queue.requeue(next);
        }
    } else {
        loop {
            play_once(factory, url, stop, settings)?;
            if stop.load(Ordering::SeqCst) {
                break;
            }
        }
    }
    Ok(())
}

fn play_once(
    factory: &dyn PlayerFactory,
    url: &str,
    stop: &AtomicBool,
    settings: &PlaybackSettings,
) -> Result<()> {
    let mut player = factory.create()?;
    log::info!("start to play: {}", url);

    player.set_source(url)?;
    player.prepare()?;
    player.start()?;

    loop {
        match player.state() {
            PlayerState::Playing
            | PlayerState::Prepared
            | PlayerState::Paused
            | PlayerState::RewindComplete => {
                if stop.load(Ordering::SeqCst) {
                    player.stop()?;
                } else {
                    thread::sleep(settings.poll_interval);
                }
            }
            PlayerState::PlaybackComplete => {
                log::debug!("play complete, now stop");
                player.stop()?;
            }
            PlayerState::Stopped => {
                log::debug!("play stopped, now reset");
                player.reset()?;
                break;
            }
            PlayerState::Idle => break,
        }
    }

    log::info!("play {} done", url);
    Ok(())
}
