//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::{Result, TlsError};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{SslAcceptor, SslConnector, SslStream};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS session operations
///
/// Wraps an already-handshaken OpenSSL `SslStream` and provides
/// poll/read/write/close operations plus the negotiated ALPN protocol.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Wrap a stream whose handshake already completed
    pub fn new(stream: SslStream<TcpStream>) -> Self {
        TlsSessionOps {
            stream,
            failed: false,
        }
    }

    /// Run the client handshake with a caller-provided connector
    pub fn connect(connector: &SslConnector, domain: &str, tcp_stream: TcpStream) -> Result<Self> {
        let stream = connector
            .connect(domain, tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Connection failed: {}", e)))?;
        Ok(Self::new(stream))
    }

    /// Run the server handshake with a caller-provided acceptor
    pub fn accept(acceptor: &SslAcceptor, tcp_stream: TcpStream) -> Result<Self> {
        let stream = acceptor
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;
        Ok(Self::new(stream))
    }

    /// Check if a TLS read or write failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Decrypted bytes may already sit in the SSL buffer
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        self.stream.read(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        use std::net::Shutdown;
        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }

    fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.stream.ssl().selected_alpn_protocol().map(|p| p.to_vec())
    }
}
