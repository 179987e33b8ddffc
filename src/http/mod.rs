//! HTTP layer for h2cgate
//!
//! The HTTP/1.1 pieces in this module exist for one reason: an h2c
//! connection may start life as an HTTP/1.1 request carrying
//! `Upgrade: h2c`, and the server must read that request head, answer it
//! with `101 Switching Protocols` and hand the request over to HTTP/2
//! stream 1. The HTTP/2 protocol engine itself lives in [`h2`].
//!
//! # Architecture
//!
//! All I/O goes through the session operations abstraction, so plain TCP,
//! TLS and replayed look-ahead bytes are interchangeable:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close, ALPN)
//! - `FdSessionOps` implements them for a plain `TcpStream`
//! - `tls::TlsSessionOps` implements them for an already-negotiated TLS stream
//! - `Rewind` replays bytes that were consumed during protocol detection
//!
//! # Examples
//!
//! ```no_run
//! use h2cgate::http::h2::{H2Config, H2Server, ServeOutcome};
//! use h2cgate::http::{FdSessionOps, HttpResponse, Status};
//! use std::net::TcpListener;
//!
//! let server = H2Server::builder()
//!     .config(H2Config::default())
//!     .handler(|request: h2cgate::http::HttpRequest| {
//!         Ok(HttpResponse::builder()
//!             .status(Status::OK)
//!             .body(format!("Hello, {}", request.uri()))
//!             .build())
//!     })
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//! let (stream, _) = listener.accept().unwrap();
//! match server.serve_connection(FdSessionOps::new(stream)).unwrap() {
//!     ServeOutcome::Http2(handshake) => println!("served HTTP/2 via {:?}", handshake),
//!     ServeOutcome::Http1(_session) => println!("not an HTTP/2 client"),
//! }
//! ```

pub mod h2;
pub mod headers;
pub mod message;
pub mod parser;
pub mod rewind;
pub mod session;
pub mod tls;

pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Method, Status, Version};
pub use parser::ResponseParser;
pub use rewind::Rewind;
pub use session::{FdSessionOps, PollEvents, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Incomplete message")]
    Incomplete,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 100;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
