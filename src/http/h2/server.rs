//! HTTP/2 server
//!
//! [`H2Server::serve_connection`] classifies one accepted connection, writes
//! the `101 Switching Protocols` reply when the client upgrades, and runs the
//! connection loop until the connection closes. Requests are handed to the
//! [`Handler`] through a [`Bridge`]; the loop itself never blocks on a
//! handler.
//!
//! A connection that turns out to be HTTP/1.1 is returned untouched as a
//! [`Rewind`] session that replays the bytes read during detection, ready
//! for an [`Http1Fallback`].

use super::bridge::{Bridge, Handler, HandlerError};
use super::config::H2Config;
use super::connection::{Connection, Event};
use super::driver::{self, Transport};
use super::error::{Error, Result};
use super::negotiate::{Handshake, Negotiated, Negotiation, Negotiator, SWITCHING_PROTOCOLS};
use crate::http::{HttpRequest, HttpResponse, Rewind, SessionOps};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// How a served connection ended up being spoken
#[derive(Debug)]
pub enum ServeOutcome<S> {
    /// Served as HTTP/2 until the connection closed
    Http2(Handshake),
    /// Not HTTP/2; the session replays the look-ahead bytes first
    Http1(Rewind<S>),
}

/// Serves connections classified as HTTP/1.1
pub trait Http1Fallback<S> {
    /// Take over the connection
    fn serve(&self, session: Rewind<S>) -> Result<()>;
}

impl<S, F> Http1Fallback<S> for F
where
    F: Fn(Rewind<S>) -> Result<()>,
{
    fn serve(&self, session: Rewind<S>) -> Result<()> {
        self(session)
    }
}

/// Triggers a graceful shutdown of every connection of one server
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Send GOAWAY on every connection and let open streams drain
    pub fn shutdown(&self) {
        tracing::debug!("graceful shutdown requested");
        self.flag.store(true, Ordering::Release);
    }

    /// Whether shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// HTTP/2 server
///
/// Cheap to share between connection threads behind an `Arc`; every call
/// to [`H2Server::serve_connection`] runs one connection to completion on
/// the calling thread.
pub struct H2Server {
    config: H2Config,
    handler: Arc<dyn Handler>,
    shutdown: ShutdownHandle,
}

impl H2Server {
    /// Start building a server
    pub fn builder() -> H2ServerBuilder {
        H2ServerBuilder::new()
    }

    /// Server configuration
    pub fn config(&self) -> &H2Config {
        &self.config
    }

    /// Handle for graceful shutdown from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Negotiate and serve one connection
    ///
    /// Returns once the HTTP/2 connection has closed, or as soon as the
    /// connection is classified as HTTP/1.1. A connection that ended with an
    /// error (including a drain timeout) returns that error.
    pub fn serve_connection<S: SessionOps>(&self, mut session: S) -> Result<ServeOutcome<S>> {
        let Negotiated {
            negotiation,
            buffered,
        } = Negotiator::new(&self.config).read_negotiation(&mut session)?;

        let Some(handshake) = Handshake::of(&negotiation) else {
            tracing::debug!(lookahead = buffered.len(), "handing connection to HTTP/1.1");
            return Ok(ServeOutcome::Http1(Rewind::new(session, buffered.freeze())));
        };

        let mut transport = Transport::new(session, self.config.handshake_timeout);
        if let Negotiation::Upgrade(_) = &negotiation {
            transport.write_all(SWITCHING_PROTOCOLS)?;
            tracing::debug!("switched protocols to h2c");
        }

        let now = Instant::now();
        let mut conn = Connection::server(self.config.clone());
        conn.start(&negotiation, now)?;
        if !buffered.is_empty() {
            conn.recv(&buffered, now);
        }

        let result = self.run(&mut conn, &mut transport);
        transport.close();
        result.map(|()| ServeOutcome::Http2(handshake))
    }

    /// Serve one connection, passing HTTP/1.1 connections to `fallback`
    pub fn serve_or_fallback<S, F>(&self, session: S, fallback: &F) -> Result<Option<Handshake>>
    where
        S: SessionOps,
        F: Http1Fallback<S>,
    {
        match self.serve_connection(session)? {
            ServeOutcome::Http2(handshake) => Ok(Some(handshake)),
            ServeOutcome::Http1(session) => {
                fallback.serve(session)?;
                Ok(None)
            }
        }
    }

    fn run<S: SessionOps>(&self, conn: &mut Connection, transport: &mut Transport<S>) -> Result<()> {
        let mut bridge = Bridge::new(Arc::clone(&self.handler));
        let started = Instant::now();

        loop {
            let now = Instant::now();
            if self.shutdown.is_shutdown() {
                conn.go_away(now);
            }
            if !conn.is_ready() && now.duration_since(started) >= self.config.handshake_timeout {
                conn.abort(Error::Timeout);
            }
            conn.handle_timeout(now);

            while let Some(event) = conn.poll_event() {
                match event {
                    Event::Request { stream_id, request } => bridge.dispatch(stream_id, request),
                    Event::StreamReset { stream_id, .. } => bridge.cancel(stream_id),
                    Event::Closed(result) => {
                        if bridge.in_flight() > 0 {
                            tracing::debug!(pending = bridge.in_flight(), "cancelling pending handlers");
                        }
                        bridge.cancel_all();
                        transport.flush(conn);
                        return result;
                    }
                    Event::GoAway { .. } | Event::PingAck { .. } | Event::Response { .. } => {}
                }
            }

            for (stream_id, response) in bridge.poll_completed() {
                if let Err(e) = conn.send_response(stream_id, &response) {
                    tracing::debug!(stream_id, error = %e, "dropping response");
                }
            }

            transport.flush(conn);
            if conn.is_closed() {
                continue;
            }
            let wait = driver::next_wait(conn, self.config.poll_interval);
            transport.pump(conn, wait);
        }
    }
}

/// Builder for [`H2Server`]
#[derive(Default)]
pub struct H2ServerBuilder {
    config: Option<H2Config>,
    handler: Option<Arc<dyn Handler>>,
}

impl H2ServerBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`
    pub fn config(mut self, config: H2Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Serve requests with a closure
    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn(HttpRequest) -> std::result::Result<HttpResponse, HandlerError> + Send + Sync + 'static,
    {
        self.service(Arc::new(handler))
    }

    /// Serve requests with a shared [`Handler`]
    pub fn service(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate the configuration and build the server
    pub fn build(self) -> Result<H2Server> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let handler = self
            .handler
            .ok_or_else(|| Error::InvalidSettings("a request handler is required".to_string()))?;
        Ok(H2Server {
            config,
            handler,
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::codec::FrameCodec;
    use crate::http::h2::frames::{Frame, HeadersFrame, SettingsFrame};
    use crate::http::h2::settings::{Settings, MAX_MAX_FRAME_SIZE};
    use crate::http::h2::CONNECTION_PREFACE;
    use crate::http::{PollEvents, Status};
    use bytes::{Bytes, BytesMut};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    /// In-memory transport: scripted input, captured output, never EOF
    struct Scripted {
        input: BytesMut,
        output: Rc<RefCell<Vec<u8>>>,
    }

    impl Scripted {
        fn new(input: &[u8]) -> Self {
            Scripted {
                input: BytesMut::from(input),
                output: Rc::default(),
            }
        }
    }

    impl SessionOps for Scripted {
        fn poll(&self, events: PollEvents, _timeout: Option<Duration>) -> crate::http::Result<bool> {
            Ok(events == PollEvents::Write || !self.input.is_empty())
        }

        fn read(&mut self, buf: &mut [u8]) -> crate::http::Result<usize> {
            let n = buf.len().min(self.input.len());
            buf[..n].copy_from_slice(&self.input.split_to(n));
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> crate::http::Result<usize> {
            self.output.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn close(&mut self) -> crate::http::Result<()> {
            Ok(())
        }
    }

    fn echo_server() -> H2Server {
        H2Server::builder()
            .handler(|request: HttpRequest| {
                Ok(HttpResponse::builder()
                    .status(Status::OK)
                    .body(request.uri().to_string())
                    .build())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_handler() {
        assert!(H2Server::builder().build().is_err());
        let server = echo_server();
        assert_eq!(server.config(), &H2Config::default());
        assert!(!server.shutdown_handle().is_shutdown());
    }

    #[test]
    fn test_http1_is_handed_back() {
        let server = echo_server();
        let session = Scripted::new(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        let ServeOutcome::Http1(rewind) = server.serve_connection(session).unwrap() else {
            panic!("expected HTTP/1.1");
        };
        assert_eq!(rewind.pending(), b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(rewind.get_ref().output.borrow().is_empty());
    }

    #[test]
    fn test_prior_knowledge_with_shutdown() {
        let server = echo_server();
        let mut input = BytesMut::from(CONNECTION_PREFACE);
        FrameCodec::encode_into(&SettingsFrame::new(Settings::new()).into(), &mut input);
        let mut block = Vec::new();
        hpack::Encoder::new()
            .encode_into(
                [
                    (&b":method"[..], &b"GET"[..]),
                    (b":scheme", b"http"),
                    (b":path", b"/echo"),
                ],
                &mut block,
            )
            .unwrap();
        FrameCodec::encode_into(
            &HeadersFrame::new(1, Bytes::from(block), true, true).into(),
            &mut input,
        );

        // Stream 1 is already accepted when the GOAWAY goes out, so it
        // completes and the connection then closes cleanly.
        server.shutdown_handle().shutdown();
        let session = Scripted::new(&input);
        let output = Rc::clone(&session.output);
        let outcome = server.serve_connection(session).unwrap();
        assert!(matches!(outcome, ServeOutcome::Http2(Handshake::PriorKnowledge)));

        let mut codec = FrameCodec::with_limits(MAX_MAX_FRAME_SIZE, 1 << 20);
        let mut written = BytesMut::from(&output.borrow()[..]);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut written).unwrap() {
            frames.push(frame);
        }
        assert!(frames.iter().any(|f| matches!(f, Frame::GoAway(g) if g.last_stream_id == 1)));
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::Data(d) if d.stream_id == 1 && d.end_stream && &d.data[..] == b"/echo")));
    }

    #[test]
    fn test_fallback_closure() {
        let server = echo_server();
        let session = Scripted::new(b"OPTIONS * HTTP/1.1\r\n\r\n");
        let served = std::cell::Cell::new(false);
        let fallback = |rewind: Rewind<Scripted>| -> Result<()> {
            served.set(rewind.pending().starts_with(b"OPTIONS"));
            Ok(())
        };
        assert_eq!(server.serve_or_fallback(session, &fallback).unwrap(), None);
        assert!(served.get());
    }
}
