//! HTTP/2 client
//!
//! One client type covers every way of reaching an HTTP/2 server:
//!
//! - a TLS transport that negotiated `h2` by ALPN speaks HTTP/2 at once;
//! - [`ClientMode::PriorKnowledge`] sends the connection preface straight
//!   away on a cleartext transport;
//! - [`ClientMode::Upgrade`] sends the first request as HTTP/1.1 with
//!   `Upgrade: h2c` and continues as HTTP/2 when the server answers `101`.
//!   A server that declines answers in HTTP/1.1; that response is returned
//!   and later requests fail with [`Error::Http11Required`].
//!
//! Several requests may be in flight at once through
//! [`H2Client::send_request`] and [`H2Client::wait_response`].

use super::config::H2Config;
use super::connection::{Connection, Event};
use super::driver::{self, Transport};
use super::error::{Error, ErrorCode, Result};
use super::negotiate::{
    self, parse_upgrade_response, Handshake, Negotiation, UpgradeReply, UpgradeRequest,
};
use super::settings::Settings;
use super::stream::StreamId;
use crate::http::tls::ALPN_H2;
use crate::http::{HttpRequest, HttpResponse, Method, PollEvents, ResponseParser, SessionOps};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How a cleartext connection reaches HTTP/2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientMode {
    /// Send the connection preface immediately
    #[default]
    PriorKnowledge,
    /// Upgrade from HTTP/1.1 on the first request
    Upgrade,
}

/// Builder for [`H2Client`]
#[derive(Debug, Clone)]
pub struct H2ClientBuilder {
    config: H2Config,
    mode: ClientMode,
    authority: String,
    request_timeout: Duration,
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        H2ClientBuilder {
            config: H2Config::default(),
            mode: ClientMode::default(),
            authority: "localhost".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl H2ClientBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` for our SETTINGS and timers
    pub fn config(mut self, config: H2Config) -> Self {
        self.config = config;
        self
    }

    /// Choose how a cleartext transport reaches HTTP/2
    pub fn mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }

    /// `:authority` for requests without a `Host` header
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// How long to wait for each response
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Establish the client over `session`
    ///
    /// With ALPN `h2` or prior knowledge this completes the SETTINGS
    /// exchange before returning. In upgrade mode nothing is sent until the
    /// first request.
    pub fn connect<S: SessionOps>(self, session: S) -> Result<H2Client<S>> {
        self.config.validate()?;
        let alpn = session.alpn_protocol();

        let mut client = H2Client {
            transport: Transport::new(session, self.config.handshake_timeout),
            conn: Connection::client(self.config.clone()),
            config: self.config,
            authority: self.authority,
            request_timeout: self.request_timeout,
            handshake: None,
            upgrade_pending: false,
            declined: None,
            responses: HashMap::new(),
            ping_rtt: None,
            finished: false,
            terminal: None,
        };

        match alpn.as_deref() {
            Some(ALPN_H2) => client.start(&Negotiation::Alpn, &[])?,
            Some(other) => {
                tracing::debug!(alpn = %String::from_utf8_lossy(other), "server did not select h2");
                return Err(Error::AlpnFailed(Some(other.to_vec())));
            }
            None => match self.mode {
                ClientMode::PriorKnowledge => client.start(&Negotiation::PriorKnowledge, &[])?,
                ClientMode::Upgrade => client.upgrade_pending = true,
            },
        }
        Ok(client)
    }
}

/// HTTP/2 client over one connection
pub struct H2Client<S: SessionOps> {
    transport: Transport<S>,
    conn: Connection,
    config: H2Config,
    authority: String,
    request_timeout: Duration,
    handshake: Option<Handshake>,
    upgrade_pending: bool,
    /// Status of the HTTP/1.1 reply that declined the upgrade
    declined: Option<u16>,
    responses: HashMap<StreamId, Result<HttpResponse>>,
    ping_rtt: Option<Duration>,
    finished: bool,
    /// Why the connection ended; reported once
    terminal: Option<Error>,
}

impl<S: SessionOps> H2Client<S> {
    /// Connect with default settings and prior knowledge
    pub fn connect(session: S) -> Result<Self> {
        H2ClientBuilder::new().connect(session)
    }

    /// Start building a client
    pub fn builder() -> H2ClientBuilder {
        H2ClientBuilder::new()
    }

    /// How HTTP/2 was reached; `None` before an upgrade or after a decline
    pub fn handshake(&self) -> Option<Handshake> {
        self.handshake
    }

    /// SETTINGS received from the server
    pub fn remote_settings(&self) -> &Settings {
        self.conn.remote_settings()
    }

    /// Underlying transport
    pub fn session(&self) -> &S {
        self.transport.session()
    }

    fn start(&mut self, negotiation: &Negotiation, leftover: &[u8]) -> Result<()> {
        let now = Instant::now();
        self.conn.start(negotiation, now)?;
        self.handshake = Handshake::of(negotiation);
        if !leftover.is_empty() {
            self.conn.recv(leftover, now);
        }
        let deadline = now + self.config.handshake_timeout;
        self.drive_until(deadline, |c| c.conn.is_ready().then_some(()))?;
        tracing::debug!(handshake = ?self.handshake, "HTTP/2 client ready");
        Ok(())
    }

    /// Send a request without waiting for its response
    pub fn send_request(&mut self, request: &HttpRequest) -> Result<StreamId> {
        if let Some(status) = self.declined {
            return Err(Error::Http11Required(status));
        }
        if self.upgrade_pending {
            return self.upgrade(request);
        }
        let id = self.conn.send_request(request, &self.authority)?;
        tracing::debug!(stream_id = id, method = %request.method(), uri = request.uri(), "sent request");
        self.transport.flush(&mut self.conn);
        Ok(id)
    }

    /// Wait for the response on stream `id`
    ///
    /// A reset stream yields a stream error carrying the reset code.
    pub fn wait_response(&mut self, id: StreamId) -> Result<HttpResponse> {
        let deadline = Instant::now() + self.request_timeout;
        let result = self.drive_until(deadline, |c| c.responses.remove(&id));
        if matches!(result, Err(Error::Timeout)) {
            tracing::debug!(stream_id = id, "response timed out; cancelling stream");
            self.conn.reset_stream(id, ErrorCode::Cancel);
            self.transport.flush(&mut self.conn);
            self.drain_events();
            self.responses.remove(&id);
        }
        result?
    }

    /// Send a request and wait for its response
    pub fn request(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let id = self.send_request(&request)?;
        self.wait_response(id)
    }

    /// GET `path`
    pub fn get(&mut self, path: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::new(Method::Get, path))
    }

    /// POST `body` to `path`
    pub fn post(&mut self, path: &str, body: impl Into<Bytes>) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method(Method::Post)
            .uri(path)
            .body(body)
            .build();
        self.request(request)
    }

    /// Measure the round trip with a PING
    pub fn ping(&mut self) -> Result<Duration> {
        if let Some(status) = self.declined {
            return Err(Error::Http11Required(status));
        }
        if self.upgrade_pending {
            return Err(Error::NotReady);
        }
        self.ping_rtt = None;
        let now = Instant::now();
        self.conn.ping(now)?;
        self.transport.flush(&mut self.conn);
        // The connection's own PING timeout fires first
        let deadline = now + self.config.ping_timeout + self.config.poll_interval;
        self.drive_until(deadline, |c| c.ping_rtt.take())
    }

    /// Send GOAWAY and close the transport
    ///
    /// Returns the error that ended the connection, if it failed earlier
    /// and the failure was not reported yet.
    pub fn close(mut self) -> Result<()> {
        if self.handshake.is_some() && !self.conn.is_closed() {
            self.conn.go_away(Instant::now());
            self.transport.flush(&mut self.conn);
        }
        self.transport.close();
        self.drain_events();
        match self.terminal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn upgrade(&mut self, request: &HttpRequest) -> Result<StreamId> {
        if !request.body().is_empty() {
            return Err(Error::Http(crate::http::Error::Protocol(
                "the h2c upgrade request cannot carry a body".to_string(),
            )));
        }
        let settings = self.config.local_settings();
        let wire = negotiate::upgrade_request(request, &self.authority, &settings);
        self.transport.write_all(&wire)?;
        tracing::debug!(uri = request.uri(), "sent h2c upgrade request");

        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut buf = BytesMut::new();
        let (reply, consumed) = loop {
            if let Some(parsed) = parse_upgrade_response(&buf)? {
                break parsed;
            }
            let chunk = self.read_some(deadline)?;
            buf.extend_from_slice(&chunk);
        };
        self.upgrade_pending = false;

        match reply {
            UpgradeReply::Switched => {
                let leftover = buf.split_off(consumed);
                let negotiation = Negotiation::Upgrade(UpgradeRequest {
                    request: request.clone(),
                    settings,
                });
                self.start(&negotiation, &leftover)?;
                Ok(1)
            }
            UpgradeReply::Declined(head) => {
                let status = head.status().code();
                tracing::debug!(status, "server declined the h2c upgrade");
                let mut parser = ResponseParser::new();
                let mut pending = buf.split().freeze();
                let response = loop {
                    if let Some(response) = parser.parse(&pending)? {
                        break response;
                    }
                    pending = self.read_some(deadline)?;
                };
                self.declined = Some(status);
                self.responses.insert(1, Ok(response));
                Ok(1)
            }
        }
    }

    fn read_some(&mut self, deadline: Instant) -> Result<Bytes> {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout);
        }
        let session = self.transport.session_mut();
        if !session.poll(PollEvents::Read, Some(deadline - now))? {
            return Ok(Bytes::new());
        }
        let mut chunk = [0u8; 4096];
        let n = session.read(&mut chunk)?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(Bytes::copy_from_slice(&chunk[..n]))
    }

    fn drain_events(&mut self) {
        while let Some(event) = self.conn.poll_event() {
            match event {
                Event::Response { stream_id, response } => {
                    self.responses.insert(stream_id, Ok(response));
                }
                Event::StreamReset { stream_id, code } => {
                    self.responses
                        .insert(stream_id, Err(Error::stream(stream_id, code, "stream reset")));
                }
                Event::PingAck { rtt } => self.ping_rtt = Some(rtt),
                Event::GoAway {
                    last_stream_id,
                    code,
                    ..
                } => {
                    tracing::debug!(last_stream_id, code = %code, "server is going away");
                }
                Event::Closed(result) => {
                    self.finished = true;
                    self.terminal = result.err();
                }
                Event::Request { stream_id, .. } => {
                    tracing::debug!(stream_id, "ignoring request event on a client connection");
                }
            }
        }
    }

    /// Run the connection until `done` yields a value, the connection ends
    /// or `deadline` passes
    fn drive_until<T>(
        &mut self,
        deadline: Instant,
        mut done: impl FnMut(&mut Self) -> Option<T>,
    ) -> Result<T> {
        loop {
            self.drain_events();
            if let Some(value) = done(self) {
                return Ok(value);
            }
            if self.finished {
                return Err(self.terminal.take().unwrap_or(Error::ConnectionClosed));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            self.conn.handle_timeout(now);
            self.transport.flush(&mut self.conn);
            if self.conn.is_closed() {
                continue;
            }
            let wait = driver::next_wait(&self.conn, self.config.poll_interval).min(deadline - now);
            self.transport.pump(&mut self.conn, wait);
        }
    }
}
