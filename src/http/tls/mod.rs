//! TLS transport for HTTP/2 over ALPN
//!
//! Certificates, contexts and verification policy belong to the caller: it
//! builds an `SslAcceptor`/`SslConnector` advertising `h2` through ALPN and
//! hands the connected stream over. This module only adapts that stream to
//! [`SessionOps`](crate::http::SessionOps) and reports the ALPN outcome, which
//! is what the connection negotiator keys off.
//!
//! # Examples
//!
//! ```no_run
//! use h2cgate::http::tls::TlsSessionOps;
//! use h2cgate::http::SessionOps;
//! use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
//! use std::net::TcpListener;
//!
//! let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
//! builder.set_private_key_file("server.key", SslFiletype::PEM).unwrap();
//! builder.set_certificate_chain_file("server.pem").unwrap();
//! builder.set_alpn_select_callback(|_, client| {
//!     openssl::ssl::select_next_proto(b"\x02h2\x08http/1.1", client)
//!         .ok_or(openssl::ssl::AlpnError::NOACK)
//! });
//! let acceptor = builder.build();
//!
//! let listener = TcpListener::bind("127.0.0.1:8443").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let session = TlsSessionOps::accept(&acceptor, tcp_stream).unwrap();
//! assert_eq!(session.alpn_protocol().as_deref(), Some(&b"h2"[..]));
//! ```

pub mod session;

pub use session::TlsSessionOps;

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// ALPN protocol identifier for HTTP/2 over TLS
pub const ALPN_H2: &[u8] = b"h2";
