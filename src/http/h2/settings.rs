//! HTTP/2 settings management
//!
//! This module implements HTTP/2 SETTINGS frames and parameters
//! as defined in RFC 9113 Section 6.5, including the `HTTP2-Settings`
//! header encoding used by the h2c upgrade (RFC 7540 Section 3.2.1).

use super::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Largest legal flow-control window (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Smallest legal SETTINGS_MAX_FRAME_SIZE
pub const MIN_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest legal SETTINGS_MAX_FRAME_SIZE (2^24 - 1)
pub const MAX_MAX_FRAME_SIZE: u32 = 0x00FF_FFFF;

/// Size of one identifier/value pair on the wire
const SETTING_ENTRY_SIZE: usize = 6;

/// HTTP/2 settings parameters (RFC 9113 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    HeaderTableSize = 0x1,

    /// SETTINGS_ENABLE_PUSH (0x2)
    EnablePush = 0x2,

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    MaxConcurrentStreams = 0x3,

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    InitialWindowSize = 0x4,

    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    MaxFrameSize = 0x5,

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    MaxHeaderListSize = 0x6,

    /// SETTINGS_ENABLE_CONNECT_PROTOCOL (0x8) - RFC 8441
    EnableConnectProtocol = 0x8,

    /// SETTINGS_NO_RFC7540_PRIORITIES (0x9) - RFC 9218
    NoRfc7540Priorities = 0x9,
}

impl SettingsParameter {
    /// Convert to u16
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Create from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            0x8 => Some(SettingsParameter::EnableConnectProtocol),
            0x9 => Some(SettingsParameter::NoRfc7540Priorities),
            _ => None,
        }
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
            SettingsParameter::EnableConnectProtocol => "ENABLE_CONNECT_PROTOCOL",
            SettingsParameter::NoRfc7540Priorities => "NO_RFC7540_PRIORITIES",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings
///
/// Every field is optional: `None` means "not sent", and the getters fall
/// back to the RFC defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Header table size (default: 4096)
    pub header_table_size: Option<u32>,

    /// Enable server push (default: true)
    pub enable_push: Option<bool>,

    /// Maximum concurrent streams (default: unlimited)
    pub max_concurrent_streams: Option<u32>,

    /// Initial window size (default: 65535)
    pub initial_window_size: Option<u32>,

    /// Maximum frame size (default: 16384, range: 16384-16777215)
    pub max_frame_size: Option<u32>,

    /// Maximum header list size (default: unlimited)
    pub max_header_list_size: Option<u32>,

    /// Enable CONNECT protocol (default: false)
    pub enable_connect_protocol: Option<bool>,

    /// Disable RFC 7540 priorities (default: false)
    pub no_rfc7540_priorities: Option<bool>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Settings::default()
    }

    /// Get header table size (with default)
    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(4096)
    }

    /// Get enable push (with default)
    pub fn get_enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    /// Get max concurrent streams (None = unlimited)
    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Get initial window size (with default)
    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(65535)
    }

    /// Get max frame size (with default)
    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(MIN_MAX_FRAME_SIZE)
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if let Some(initial_window_size) = self.initial_window_size {
            if initial_window_size > MAX_WINDOW_SIZE {
                return Err(Error::InvalidSettings(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    initial_window_size
                )));
            }
        }

        if let Some(max_frame_size) = self.max_frame_size {
            if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&max_frame_size) {
                return Err(Error::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    max_frame_size
                )));
            }
        }

        Ok(())
    }

    /// Merge settings from another Settings object
    /// (values in `other` override values in `self`)
    pub fn merge(&mut self, other: &Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
        if other.enable_connect_protocol.is_some() {
            self.enable_connect_protocol = other.enable_connect_protocol;
        }
        if other.no_rfc7540_priorities.is_some() {
            self.no_rfc7540_priorities = other.no_rfc7540_priorities;
        }
    }

    fn entries(&self) -> impl Iterator<Item = (SettingsParameter, u32)> {
        let flag = |v: Option<bool>| v.map(u32::from);
        [
            (SettingsParameter::HeaderTableSize, self.header_table_size),
            (SettingsParameter::EnablePush, flag(self.enable_push)),
            (SettingsParameter::MaxConcurrentStreams, self.max_concurrent_streams),
            (SettingsParameter::InitialWindowSize, self.initial_window_size),
            (SettingsParameter::MaxFrameSize, self.max_frame_size),
            (SettingsParameter::MaxHeaderListSize, self.max_header_list_size),
            (SettingsParameter::EnableConnectProtocol, flag(self.enable_connect_protocol)),
            (SettingsParameter::NoRfc7540Priorities, flag(self.no_rfc7540_priorities)),
        ]
        .into_iter()
        .filter_map(|(id, value)| value.map(|v| (id, v)))
    }

    /// Length of the encoded SETTINGS payload
    pub fn payload_len(&self) -> usize {
        self.entries().count() * SETTING_ENTRY_SIZE
    }

    /// Append the SETTINGS frame payload (identifier/value pairs)
    pub fn encode_payload(&self, dst: &mut BytesMut) {
        for (id, value) in self.entries() {
            dst.put_u16(id.as_u16());
            dst.put_u32(value);
        }
    }

    /// Parse and validate a SETTINGS frame payload
    ///
    /// Unknown identifiers are ignored. Values that are illegal on the wire
    /// map to the connection error the RFC mandates.
    pub fn decode_payload(payload: &[u8]) -> Result<Settings> {
        if payload.len() % SETTING_ENTRY_SIZE != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload length {} is not a multiple of 6",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        for entry in payload.chunks_exact(SETTING_ENTRY_SIZE) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);

            let Some(param) = SettingsParameter::from_u16(id) else {
                continue;
            };

            match param {
                SettingsParameter::HeaderTableSize => settings.header_table_size = Some(value),
                SettingsParameter::EnablePush => {
                    settings.enable_push = Some(decode_flag(param, value)?)
                }
                SettingsParameter::MaxConcurrentStreams => {
                    settings.max_concurrent_streams = Some(value)
                }
                SettingsParameter::InitialWindowSize => {
                    if value > MAX_WINDOW_SIZE {
                        return Err(Error::FlowControl(format!(
                            "SETTINGS_INITIAL_WINDOW_SIZE {} exceeds 2^31-1",
                            value
                        )));
                    }
                    settings.initial_window_size = Some(value);
                }
                SettingsParameter::MaxFrameSize => {
                    if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                        return Err(Error::Protocol(format!(
                            "SETTINGS_MAX_FRAME_SIZE {} out of range",
                            value
                        )));
                    }
                    settings.max_frame_size = Some(value);
                }
                SettingsParameter::MaxHeaderListSize => settings.max_header_list_size = Some(value),
                SettingsParameter::EnableConnectProtocol => {
                    settings.enable_connect_protocol = Some(decode_flag(param, value)?)
                }
                SettingsParameter::NoRfc7540Priorities => {
                    settings.no_rfc7540_priorities = Some(decode_flag(param, value)?)
                }
            }
        }

        Ok(settings)
    }

    /// Encode as an `HTTP2-Settings` header value (base64url, no padding)
    pub fn to_header_value(&self) -> String {
        let mut payload = BytesMut::with_capacity(self.payload_len());
        self.encode_payload(&mut payload);
        URL_SAFE_NO_PAD.encode(&payload)
    }

    /// Decode an `HTTP2-Settings` header value
    pub fn from_header_value(value: &str) -> Result<Settings> {
        let trimmed = value.trim().trim_end_matches('=');
        let payload = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| Error::InvalidSettings(format!("HTTP2-Settings is not base64url: {}", e)))?;
        Settings::decode_payload(&payload)
            .map_err(|e| Error::InvalidSettings(format!("HTTP2-Settings payload: {}", e)))
    }
}

fn decode_flag(param: SettingsParameter, value: u32) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::Protocol(format!("{} must be 0 or 1, got {}", param, value))),
    }
}

/// Builder for HTTP/2 settings
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
