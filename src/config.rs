use std::time::Duration;

/// Bytes in one capture page.
pub const RECORD_PAGE_SIZE: usize = 2048;

/// Pages held by the capture ring.
pub const RECORD_PAGE_NUM: usize = 2;

/// Tunables for one bridge session.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub page_size: usize,
    pub page_count: usize,
    /// Forward pages straight from the capture loop. When false a separate
    /// forwarding worker drains the ring instead.
    pub direct_tx: bool,
    /// Capacity of the inbound frame accumulator.
    pub frame_buf_limit: usize,
    /// Drop a partial inbound frame after this long without a byte.
    pub frame_timeout: Duration,
    /// Version string reported by `query`.
    pub version: String,
    /// Cadence of playback state polls.
    pub playback_poll: Duration,
    /// Delay between playlist fetch reconnect attempts.
    pub playlist_retry: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            page_size: RECORD_PAGE_SIZE,
            page_count: RECORD_PAGE_NUM,
            direct_tx: true,
            frame_buf_limit: record_protocol::FRAME_BUF_LEN,
            frame_timeout: Duration::from_secs(1),
            version: env!("CARGO_PKG_VERSION").to_string(),
            playback_poll: Duration::from_millis(1000),
            playlist_retry: Duration::from_millis(2000),
        }
    }
}
