//! Replay of look-ahead bytes
//!
//! Protocol detection has to read the first bytes of a connection before it
//! knows who should handle them. When the answer is "plain HTTP/1.1", those
//! bytes must reach the HTTP/1.1 handler as if nobody had touched them.
//! [`Rewind`] puts them back in front of the transport.

use super::session::{PollEvents, SessionOps};
use super::Result;
use bytes::{Buf, Bytes};
use std::cmp;
use std::time::Duration;

/// Session wrapper that serves a prefix of already-read bytes before
/// reading from the underlying transport. Writes go straight through.
#[derive(Debug)]
pub struct Rewind<S> {
    pre: Option<Bytes>,
    inner: S,
}

impl<S> Rewind<S> {
    /// Wrap `inner`, replaying `pre` first
    pub fn new(inner: S, pre: Bytes) -> Self {
        Rewind {
            pre: if pre.is_empty() { None } else { Some(pre) },
            inner,
        }
    }

    /// Bytes still waiting to be replayed
    pub fn pending(&self) -> &[u8] {
        self.pre.as_deref().unwrap_or(&[])
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Split into the underlying session and the unread prefix
    pub fn into_inner(self) -> (S, Bytes) {
        (self.inner, self.pre.unwrap_or_default())
    }
}

impl<S: SessionOps> SessionOps for Rewind<S> {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        if self.pre.is_some() && events != PollEvents::Write {
            return Ok(true);
        }
        self.inner.poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(mut prefix) = self.pre.take() {
            if !prefix.is_empty() {
                let n = cmp::min(prefix.len(), buf.len());
                buf[..n].copy_from_slice(&prefix[..n]);
                prefix.advance(n);
                if !prefix.is_empty() {
                    self.pre = Some(prefix);
                }
                return Ok(n);
            }
        }
        self.inner.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.inner.alpn_protocol()
    }
}
