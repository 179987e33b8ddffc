//! HTTP/2 endpoint configuration
//!
//! One [`H2Config`] drives both roles. The protocol values become our
//! SETTINGS frame; the rest bound negotiation, buffering and the connection
//! loop's timers.

use super::codec::DEFAULT_MAX_HEADER_BLOCK_SIZE;
use super::error::{Error, Result};
use super::settings::{Settings, SettingsBuilder, MAX_MAX_FRAME_SIZE, MAX_WINDOW_SIZE, MIN_MAX_FRAME_SIZE};
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use std::time::Duration;

/// Default ceiling on concurrent peer-initiated streams
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 250;

/// Default bound on bytes read while classifying a connection
pub const DEFAULT_MAX_LOOKAHEAD: usize = 8192;

/// HTTP/2 endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Config {
    /// Largest frame payload we accept (SETTINGS_MAX_FRAME_SIZE)
    pub max_frame_size: u32,
    /// Streams the peer may have open at once (SETTINGS_MAX_CONCURRENT_STREAMS)
    pub max_concurrent_streams: u32,
    /// Per-stream receive window (SETTINGS_INITIAL_WINDOW_SIZE)
    pub initial_window_size: u32,
    /// HPACK dynamic table size we allow the peer (SETTINGS_HEADER_TABLE_SIZE)
    pub header_table_size: u32,
    /// Advertised SETTINGS_MAX_HEADER_LIST_SIZE
    pub max_header_list_size: u32,
    /// Bound on a reassembled HEADERS + CONTINUATION block
    pub max_header_block_size: usize,
    /// Request bodies above this are reset with ENHANCE_YOUR_CALM
    pub max_request_body_size: usize,
    /// Bound on look-ahead bytes during negotiation
    pub max_lookahead: usize,
    /// How long open streams may run after GOAWAY
    pub drain_grace_period: Duration,
    /// How long a PING may stay unacknowledged
    pub ping_timeout: Duration,
    /// Send a PING after this much idle time
    pub keep_alive_interval: Option<Duration>,
    /// Time allowed for negotiation and the SETTINGS exchange
    pub handshake_timeout: Duration,
    /// Longest single wait of the connection loop
    pub poll_interval: Duration,
    /// Accept `Upgrade: h2c` on cleartext connections
    pub allow_upgrade: bool,
    /// Accept the connection preface on cleartext connections
    pub allow_prior_knowledge: bool,
}

impl Default for H2Config {
    fn default() -> Self {
        H2Config {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            max_header_list_size: 16 * 1024,
            max_header_block_size: DEFAULT_MAX_HEADER_BLOCK_SIZE,
            max_request_body_size: 4 * 1024 * 1024,
            max_lookahead: DEFAULT_MAX_LOOKAHEAD,
            drain_grace_period: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(20),
            keep_alive_interval: None,
            handshake_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            allow_upgrade: true,
            allow_prior_knowledge: true,
        }
    }
}

impl H2Config {
    /// Start a builder from the defaults
    pub fn builder() -> H2ConfigBuilder {
        H2ConfigBuilder::new()
    }

    /// Check every value is in range
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(Error::InvalidSettings(format!(
                "max_frame_size {} outside {}..={}",
                self.max_frame_size, MIN_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE
            )));
        }
        if self.initial_window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidSettings(format!(
                "initial_window_size {} exceeds 2^31-1",
                self.initial_window_size
            )));
        }
        if self.max_header_block_size == 0 || self.max_lookahead < super::CONNECTION_PREFACE.len() {
            return Err(Error::InvalidSettings(
                "header block and look-ahead bounds are too small".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidSettings("poll_interval must be non-zero".to_string()));
        }
        if !self.allow_upgrade && !self.allow_prior_knowledge {
            tracing::debug!("cleartext HTTP/2 disabled; only TLS-ALPN connections will negotiate h2");
        }
        Ok(())
    }

    /// SETTINGS we send at connection start
    ///
    /// Server push is always disabled.
    pub fn local_settings(&self) -> Settings {
        let mut settings = Settings::new();
        settings.enable_push = Some(false);
        settings.max_concurrent_streams = Some(self.max_concurrent_streams);
        if self.initial_window_size != DEFAULT_INITIAL_WINDOW_SIZE {
            settings.initial_window_size = Some(self.initial_window_size);
        }
        if self.max_frame_size != DEFAULT_MAX_FRAME_SIZE {
            settings.max_frame_size = Some(self.max_frame_size);
        }
        if self.header_table_size != DEFAULT_HEADER_TABLE_SIZE {
            settings.header_table_size = Some(self.header_table_size);
        }
        settings.max_header_list_size = Some(self.max_header_list_size);
        settings
    }
}

/// Builder for [`H2Config`]
#[derive(Debug, Clone, Default)]
pub struct H2ConfigBuilder {
    config: H2Config,
}

impl H2ConfigBuilder {
    /// Create a builder holding the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set SETTINGS_MAX_FRAME_SIZE
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set SETTINGS_MAX_CONCURRENT_STREAMS
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = max;
        self
    }

    /// Set SETTINGS_INITIAL_WINDOW_SIZE
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    /// Set SETTINGS_HEADER_TABLE_SIZE
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.header_table_size = size;
        self
    }

    /// Set SETTINGS_MAX_HEADER_LIST_SIZE
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.config.max_header_list_size = size;
        self
    }

    /// Bound the reassembled header block
    pub fn max_header_block_size(mut self, size: usize) -> Self {
        self.config.max_header_block_size = size;
        self
    }

    /// Bound request bodies
    pub fn max_request_body_size(mut self, size: usize) -> Self {
        self.config.max_request_body_size = size;
        self
    }

    /// Bound the negotiation look-ahead
    pub fn max_lookahead(mut self, size: usize) -> Self {
        self.config.max_lookahead = size;
        self
    }

    /// Grace period for open streams after GOAWAY
    pub fn drain_grace_period(mut self, period: Duration) -> Self {
        self.config.drain_grace_period = period;
        self
    }

    /// Deadline for PING acknowledgements
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Send keep-alive PINGs after this much idle time
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Deadline for negotiation
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Longest single wait of the connection loop
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Accept `Upgrade: h2c`
    pub fn allow_upgrade(mut self, allow: bool) -> Self {
        self.config.allow_upgrade = allow;
        self
    }

    /// Accept prior-knowledge connections
    pub fn allow_prior_knowledge(mut self, allow: bool) -> Self {
        self.config.allow_prior_knowledge = allow;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<H2Config> {
        self.config.validate()?;
        SettingsBuilder::new()
            .enable_push(false)
            .max_concurrent_streams(self.config.max_concurrent_streams)
            .initial_window_size(self.config.initial_window_size)
            .max_frame_size(self.config.max_frame_size)
            .build()?;
        Ok(self.config)
    }
}
