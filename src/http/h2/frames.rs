//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 9113 Section 6.
//! A decoded frame is immutable; [`Frame`] is the tagged union the codec
//! hands to the connection, one variant per frame type plus
//! [`Frame::Unknown`] for extension types.

use super::error::ErrorCode;
use super::settings::Settings;
use super::stream::StreamId;
use bytes::Bytes;
use std::fmt;

/// HTTP/2 frame types (RFC 9113 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Set a flag when `cond` holds
    pub fn set_if(&mut self, cond: bool, flag: u8) {
        if cond {
            self.set(flag);
        }
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// The fixed 9-octet header in front of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length (24 bits)
    pub length: usize,
    /// Raw frame type, possibly unknown
    pub frame_type: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID with the reserved bit cleared
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// Known frame type, if any
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }
}

/// A decoded HTTP/2 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    GoAway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    /// Frame of an extension type, carried verbatim and otherwise ignored
    Unknown(RawFrame),
}

impl Frame {
    /// Stream the frame belongs to (0 for connection-level frames)
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::Priority(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::PushPromise(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Continuation(f) => f.stream_id,
            Frame::Unknown(f) => f.stream_id,
            Frame::Settings(_) | Frame::Ping(_) | Frame::GoAway(_) => 0,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data(_) => FrameType::Data.name(),
            Frame::Headers(_) => FrameType::Headers.name(),
            Frame::Priority(_) => FrameType::Priority.name(),
            Frame::RstStream(_) => FrameType::RstStream.name(),
            Frame::Settings(_) => FrameType::Settings.name(),
            Frame::PushPromise(_) => FrameType::PushPromise.name(),
            Frame::Ping(_) => FrameType::Ping.name(),
            Frame::GoAway(_) => FrameType::Goaway.name(),
            Frame::WindowUpdate(_) => FrameType::WindowUpdate.name(),
            Frame::Continuation(_) => FrameType::Continuation.name(),
            Frame::Unknown(_) => "UNKNOWN",
        }
    }
}

macro_rules! impl_from_frame {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Frame {
                fn from(frame: $ty) -> Self {
                    Frame::$variant(frame)
                }
            }
        )*
    };
}

impl_from_frame! {
    DataFrame => Data,
    HeadersFrame => Headers,
    PriorityFrame => Priority,
    RstStreamFrame => RstStream,
    SettingsFrame => Settings,
    PushPromiseFrame => PushPromise,
    PingFrame => Ping,
    GoawayFrame => GoAway,
    WindowUpdateFrame => WindowUpdate,
    ContinuationFrame => Continuation,
    RawFrame => Unknown,
}

/// Frame of a type this crate does not interpret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Raw type octet
    pub frame_type: u8,
    /// Flags, uninterpreted
    pub flags: FrameFlags,
    /// Stream ID
    pub stream_id: StreamId,
    /// Payload
    pub payload: Bytes,
}

/// DATA frame (RFC 9113 Section 6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Data payload
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Payload size including padding; this is what flow control charges
    pub fn frame_size(&self) -> usize {
        let mut size = self.data.len();
        if let Some(pad_len) = self.padding {
            size += 1 + pad_len as usize;
        }
        size
    }
}

/// HEADERS frame (RFC 9113 Section 6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Header block fragment (the whole block once decoded)
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Priority information (if PRIORITY flag is set)
    pub priority: Option<PrioritySpec>,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: StreamId, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }
}

/// Priority specification (RFC 9113 Section 5.3.1, deprecated but still on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Stream dependency
    pub stream_dependency: StreamId,
    /// Exclusive flag
    pub exclusive: bool,
    /// Weight minus one
    pub weight: u8,
}

impl PrioritySpec {
    /// Create a new priority specification
    pub fn new(stream_dependency: StreamId, exclusive: bool, weight: u8) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }
}

/// PRIORITY frame (RFC 9113 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Priority specification
    pub priority: PrioritySpec,
}

/// RST_STREAM frame (RFC 9113 Section 6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Error code
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    /// Create a new RST_STREAM frame
    pub fn new(stream_id: StreamId, error_code: ErrorCode) -> Self {
        RstStreamFrame {
            stream_id,
            error_code,
        }
    }
}

/// SETTINGS frame (RFC 9113 Section 6.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    /// ACK flag
    pub ack: bool,
    /// Settings parameters
    pub settings: Settings,
}

impl SettingsFrame {
    /// Create a new SETTINGS frame
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Create a SETTINGS ACK frame
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

/// PUSH_PROMISE frame (RFC 9113 Section 6.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Promised stream ID
    pub promised_stream_id: StreamId,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

/// PING frame (RFC 9113 Section 6.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    /// ACK flag
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }
}

/// GOAWAY frame (RFC 9113 Section 6.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    /// Last stream ID
    pub last_stream_id: StreamId,
    /// Error code
    pub error_code: ErrorCode,
    /// Debug data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: StreamId, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }
}

/// WINDOW_UPDATE frame (RFC 9113 Section 6.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: StreamId,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: StreamId, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}

/// CONTINUATION frame (RFC 9113 Section 6.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
}
