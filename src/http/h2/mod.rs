//! HTTP/2 protocol engine
//!
//! Frame codec, stream multiplexer, connection coordinator and the bridge
//! between HTTP/2 streams and request handlers, plus blocking client and
//! server drivers on top of [`SessionOps`](crate::http::SessionOps).
//!
//! # Architecture
//!
//! - [`negotiate`] decides how a connection is spoken: TLS-ALPN `h2`, h2c
//!   prior knowledge, h2c `Upgrade`, or plain HTTP/1.1.
//! - [`codec`] and [`frames`] turn bytes into [`Frame`]s and back.
//! - [`multiplexer`] owns the streams of one connection and both levels of
//!   flow control.
//! - [`connection`] is a sans-I/O state machine: bytes in, bytes and
//!   [`Event`]s out, timers driven by the caller.
//! - [`bridge`] converts header lists to [`HttpRequest`](crate::http::HttpRequest)
//!   / [`HttpResponse`](crate::http::HttpResponse) and runs handlers on
//!   worker threads.
//! - [`server`] and [`client`] run a connection over a blocking transport.
//!
//! Server push and stream priorities are not supported: push is disabled in
//! our SETTINGS and PRIORITY frames are ignored.
//!
//! # Examples
//!
//! ## Client with prior knowledge
//!
//! ```no_run
//! use h2cgate::http::h2::{ClientMode, H2ClientBuilder};
//! use h2cgate::http::FdSessionOps;
//! use std::net::TcpStream;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8080")?;
//! let mut client = H2ClientBuilder::new()
//!     .mode(ClientMode::PriorKnowledge)
//!     .authority("127.0.0.1:8080")
//!     .connect(FdSessionOps::new(stream))?;
//!
//! let response = client.get("/")?;
//! println!("{} over {}", response.status(), response.version());
//! client.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Server over TLS
//!
//! ```no_run
//! use h2cgate::http::h2::{H2Server, ServeOutcome};
//! use h2cgate::http::tls::session::TlsSessionOps;
//! use h2cgate::http::{HttpRequest, HttpResponse, Status};
//! use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
//! use std::net::TcpListener;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
//! acceptor.set_private_key_file("server.key", SslFiletype::PEM)?;
//! acceptor.set_certificate_chain_file("server.pem")?;
//! acceptor.set_alpn_select_callback(|_, client| {
//!     openssl::ssl::select_next_proto(b"\x02h2\x08http/1.1", client)
//!         .ok_or(openssl::ssl::AlpnError::NOACK)
//! });
//! let acceptor = acceptor.build();
//!
//! let server = H2Server::builder()
//!     .handler(|_request: HttpRequest| Ok(HttpResponse::new(Status::OK)))
//!     .build()?;
//!
//! let listener = TcpListener::bind("127.0.0.1:8443")?;
//! let (tcp, _) = listener.accept()?;
//! let session = TlsSessionOps::accept(&acceptor, tcp)?;
//! if let ServeOutcome::Http1(_) = server.serve_connection(session)? {
//!     println!("client did not negotiate h2");
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub(crate) mod driver;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod multiplexer;
pub mod negotiate;
pub mod server;
pub mod settings;
pub mod stream;

pub use bridge::{Bridge, Handler, HandlerError};
pub use client::{ClientMode, H2Client, H2ClientBuilder};
pub use codec::FrameCodec;
pub use config::{H2Config, H2ConfigBuilder};
pub use connection::{Connection, ConnectionState, Event};
pub use error::{Error, ErrorCode, ErrorKind, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use multiplexer::{FlowTarget, Multiplexer, Role};
pub use negotiate::{Handshake, Negotiation, Negotiator, UpgradeRequest};
pub use server::{H2Server, H2ServerBuilder, Http1Fallback, ServeOutcome, ShutdownHandle};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 9113 Section 3.4:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
