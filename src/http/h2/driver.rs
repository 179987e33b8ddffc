//! Blocking transport pump shared by the server and client loops
//!
//! Moves bytes between a [`SessionOps`] transport and a sans-I/O
//! [`Connection`]. Transport failures are handed to the connection, which
//! turns them into its terminal `Closed` event.

use super::connection::Connection;
use super::error::{Error, Result};
use crate::http::{PollEvents, SessionOps};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 16 * 1024;

pub(crate) struct Transport<S> {
    session: S,
    buf: Box<[u8]>,
    write_timeout: Duration,
}

impl<S: SessionOps> Transport<S> {
    pub(crate) fn new(session: S, write_timeout: Duration) -> Self {
        Transport {
            session,
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            write_timeout,
        }
    }

    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    pub(crate) fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Write all of `bytes`, waiting at most `write_timeout` per chunk
    pub(crate) fn write_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            if !self.session.poll(PollEvents::Write, Some(self.write_timeout))? {
                return Err(Error::Timeout);
            }
            let n = self.session.write(bytes)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Write everything the connection has queued
    pub(crate) fn flush(&mut self, conn: &mut Connection) {
        while let Some(bytes) = conn.poll_transmit() {
            if let Err(e) = self.write_all(&bytes) {
                conn.abort(e);
                break;
            }
        }
    }

    /// Wait up to `wait` for input and feed it to the connection
    pub(crate) fn pump(&mut self, conn: &mut Connection, wait: Duration) {
        match self.session.poll(PollEvents::Read, Some(wait)) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => return conn.abort(e.into()),
        }
        match self.session.read(&mut self.buf) {
            Ok(0) => {
                tracing::debug!("transport reached end of stream");
                conn.transport_closed();
            }
            Ok(n) => conn.recv(&self.buf[..n], Instant::now()),
            Err(e) => conn.abort(e.into()),
        }
    }

    /// Best-effort close of the transport
    pub(crate) fn close(&mut self) {
        if let Err(e) = self.session.close() {
            tracing::debug!(error = %e, "closing transport failed");
        }
    }
}

/// How long the loop may block before the connection needs attention
pub(crate) fn next_wait(conn: &Connection, interval: Duration) -> Duration {
    match conn.poll_timeout() {
        Some(at) => at.saturating_duration_since(Instant::now()).min(interval),
        None => interval,
    }
}
