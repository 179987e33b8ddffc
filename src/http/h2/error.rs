//! HTTP/2 error types
//!
//! This module defines error types for HTTP/2 operations, mapping to
//! the error codes defined in RFC 9113 Section 7.
//!
//! Every error falls into one [`ErrorKind`], which decides its blast radius:
//! framing and flow-control errors tear the connection down with GOAWAY,
//! stream errors reset one stream with RST_STREAM, handler errors become a
//! 500 on their stream, transport errors end the connection without GOAWAY.

use super::stream::StreamId;
use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error from underlying HTTP layer
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Protocol error detected (connection level)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Flow control error (connection level)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Frame size error
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Error confined to a single stream, answered with RST_STREAM
    #[error("Stream {id} error {code}: {reason}")]
    Stream {
        id: StreamId,
        code: ErrorCode,
        reason: String,
    },

    /// Peer ended the connection with an error code
    #[error("Connection closed by peer: {code} {debug}")]
    GoAway { code: ErrorCode, debug: String },

    /// Local PING was not acknowledged in time
    #[error("PING not acknowledged within timeout")]
    PingTimeout,

    /// Streams were still open when the drain grace period ran out
    #[error("Drain grace period elapsed with {0} stream(s) open")]
    DrainTimeout(usize),

    /// Connection is draining and accepts no new streams
    #[error("Connection is going away")]
    GoingAway,

    /// Peer's concurrency limit reached
    #[error("Too many concurrent streams")]
    TooManyStreams,

    /// No stream identifiers left on this connection
    #[error("Stream identifiers exhausted")]
    StreamIdsExhausted,

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Request handler failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// ALPN negotiation failed
    #[error("ALPN negotiation failed: expected h2, got {0:?}")]
    AlpnFailed(Option<Vec<u8>>),

    /// Server answered the h2c upgrade request in HTTP/1.1
    #[error("HTTP/1.1 required: upgrade declined with status {0}")]
    Http11Required(u16),

    /// Connection not ready
    #[error("Connection not ready")]
    NotReady,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout waiting for operation
    #[error("Timeout")]
    Timeout,
}

/// Blast radius of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-order frames; connection-fatal, GOAWAY sent
    Framing,
    /// Flow-control window violated; connection-fatal, GOAWAY sent
    FlowControl,
    /// Confined to one stream; RST_STREAM sent, connection survives
    StreamProtocol,
    /// Handler failure; 5xx on that stream
    Handler,
    /// Transport failure; connection-fatal, nothing more is sent
    Transport,
}

impl Error {
    /// Build a stream-level error
    pub fn stream(id: StreamId, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Stream {
            id,
            code,
            reason: reason.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Timeout => ErrorKind::Transport,
            Error::Http(crate::http::Error::Io(_))
            | Error::Http(crate::http::Error::Timeout)
            | Error::Http(crate::http::Error::ConnectionClosed) => ErrorKind::Transport,
            Error::FlowControl(_) => ErrorKind::FlowControl,
            Error::Stream { .. } => ErrorKind::StreamProtocol,
            Error::Handler(_) => ErrorKind::Handler,
            _ => ErrorKind::Framing,
        }
    }

    /// Whether the error ends the whole connection
    pub fn is_connection_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::StreamProtocol | ErrorKind::Handler)
    }

    /// RFC error code to put on the wire for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_)
            | Error::Http(_)
            | Error::InvalidSettings(_)
            | Error::PingTimeout
            | Error::StreamIdsExhausted => ErrorCode::ProtocolError,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::Stream { code, .. } | Error::GoAway { code, .. } => *code,
            Error::TooManyStreams | Error::GoingAway => ErrorCode::RefusedStream,
            Error::DrainTimeout(_) => ErrorCode::NoError,
            Error::Http11Required(_) => ErrorCode::Http11Required,
            Error::AlpnFailed(_) => ErrorCode::InadequateSecurity,
            _ => ErrorCode::InternalError,
        }
    }

    /// Stream the error is confined to, if any
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Error::Stream { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// HTTP/2 error codes as defined in RFC 9113 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Decode a wire error code; unknown codes read as INTERNAL_ERROR
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
