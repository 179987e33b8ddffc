//! HTTP/2 connection state machine
//!
//! [`Connection`] performs no I/O. Bytes read from the transport go in
//! through [`Connection::recv`]; bytes to write come out of
//! [`Connection::poll_transmit`]; everything the application needs to act on
//! comes out of [`Connection::poll_event`]. Timers are driven by the caller
//! through [`Connection::poll_timeout`] and [`Connection::handle_timeout`].
//!
//! The connection moves through `Created -> Negotiating -> Active ->
//! Draining -> Closed`. Exactly one [`Event::Closed`] is emitted, carrying
//! the final result.

use super::bridge;
use super::codec::FrameCodec;
use super::config::H2Config;
use super::error::{Error, ErrorCode, ErrorKind, Result};
use super::frames::{
    DataFrame, Frame, GoawayFrame, HeadersFrame, PingFrame, RstStreamFrame, SettingsFrame,
    WindowUpdateFrame,
};
use super::multiplexer::{FlowTarget, Multiplexer, Role};
use super::negotiate::Negotiation;
use super::settings::Settings;
use super::stream::{H2Stream, HeaderFields, StreamId};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID, DEFAULT_MAX_FRAME_SIZE};
use crate::http::{HttpRequest, HttpResponse};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Per-field overhead counted against SETTINGS_MAX_HEADER_LIST_SIZE
const HEADER_FIELD_OVERHEAD: usize = 32;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, nothing exchanged
    Created,
    /// Negotiation result being applied
    Negotiating,
    /// Streams may be opened
    Active,
    /// GOAWAY sent or received; open streams run to completion
    Draining,
    /// Finished
    Closed,
}

/// Something the application has to act on
#[derive(Debug)]
pub enum Event {
    /// A complete request arrived (server)
    Request {
        /// Stream carrying the request
        stream_id: StreamId,
        /// The request
        request: HttpRequest,
    },
    /// A complete response arrived (client)
    Response {
        /// Stream carrying the response
        stream_id: StreamId,
        /// The response
        response: HttpResponse,
    },
    /// A stream was reset by either side
    StreamReset {
        /// The stream
        stream_id: StreamId,
        /// Reset reason
        code: ErrorCode,
    },
    /// The peer sent GOAWAY
    GoAway {
        /// Highest stream the peer will process
        last_stream_id: StreamId,
        /// Reason
        code: ErrorCode,
        /// Opaque debug data
        debug_data: Bytes,
    },
    /// Our PING was acknowledged
    PingAck {
        /// Round-trip time
        rtt: Duration,
    },
    /// The connection is finished
    Closed(Result<()>),
}

#[derive(Debug, Clone, Copy)]
struct OutstandingPing {
    payload: [u8; 8],
    sent_at: Instant,
}

/// One HTTP/2 connection, client or server
pub struct Connection {
    config: H2Config,
    state: ConnectionState,
    codec: FrameCodec,
    mux: Multiplexer,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    /// Received bytes not yet decoded
    recv_buf: BytesMut,
    /// Encoded frames waiting for the transport
    send_buf: BytesMut,
    events: VecDeque<Event>,
    remote_settings: Settings,
    /// Server side: the client preface has not arrived yet
    awaiting_preface: bool,
    settings_received: bool,
    peer_max_frame_size: usize,
    goaway_sent: Option<StreamId>,
    goaway_received: Option<StreamId>,
    /// Error code and debug text of a failing GOAWAY from the peer
    peer_error: Option<(ErrorCode, String)>,
    drain_deadline: Option<Instant>,
    ping: Option<OutstandingPing>,
    ping_seq: u64,
    last_activity: Option<Instant>,
    closed: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.mux.role())
            .field("state", &self.state)
            .field("streams", &self.mux.active_count())
            .field("goaway_sent", &self.goaway_sent)
            .field("goaway_received", &self.goaway_received)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection for `role`
    pub fn new(role: Role, config: H2Config) -> Self {
        let codec = FrameCodec::with_limits(config.max_frame_size, config.max_header_block_size);
        let mux = Multiplexer::new(role, config.max_concurrent_streams, config.initial_window_size);
        Connection {
            state: ConnectionState::Created,
            codec,
            mux,
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            recv_buf: BytesMut::new(),
            send_buf: BytesMut::new(),
            events: VecDeque::new(),
            remote_settings: Settings::default(),
            awaiting_preface: role == Role::Server,
            settings_received: false,
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
            goaway_sent: None,
            goaway_received: None,
            peer_error: None,
            drain_deadline: None,
            ping: None,
            ping_seq: 0,
            last_activity: None,
            closed: false,
            config,
        }
    }

    /// Create a server connection
    pub fn server(config: H2Config) -> Self {
        Self::new(Role::Server, config)
    }

    /// Create a client connection
    pub fn client(config: H2Config) -> Self {
        Self::new(Role::Client, config)
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Our role
    pub fn role(&self) -> Role {
        self.mux.role()
    }

    /// Whether the peer's first SETTINGS has arrived
    pub fn is_ready(&self) -> bool {
        self.settings_received
    }

    /// Whether the connection has finished
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// SETTINGS the peer has sent so far
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Last stream id from the peer's GOAWAY, if any
    pub fn goaway_received(&self) -> Option<StreamId> {
        self.goaway_received
    }

    /// Stream bookkeeping
    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(role = ?self.mux.role(), from = ?self.state, to = ?state, "connection state");
            self.state = state;
        }
    }

    /// Apply the negotiation result and queue the opening frames
    ///
    /// After an upgrade the server holds the upgraded request as stream 1 and
    /// reports it as an [`Event::Request`]; the client has stream 1 open and
    /// half-closed, waiting for the response.
    pub fn start(&mut self, negotiation: &Negotiation, now: Instant) -> Result<()> {
        if self.state != ConnectionState::Created {
            return Err(Error::Internal("connection already started".to_string()));
        }
        self.set_state(ConnectionState::Negotiating);
        self.last_activity = Some(now);

        if let Err(e) = self.begin(negotiation) {
            tracing::debug!(error = %e, "connection start failed");
            self.closed = true;
            self.set_state(ConnectionState::Closed);
            return Err(e);
        }
        self.set_state(ConnectionState::Active);
        Ok(())
    }

    fn begin(&mut self, negotiation: &Negotiation) -> Result<()> {
        if !negotiation.is_http2() {
            return Err(Error::Internal(
                "cannot run HTTP/2 on an HTTP/1.1 connection".to_string(),
            ));
        }

        if self.mux.role() == Role::Client {
            self.send_buf.extend_from_slice(CONNECTION_PREFACE);
        }
        let settings = self.config.local_settings();
        self.queue_frame(SettingsFrame::new(settings).into());

        if let Negotiation::Upgrade(upgrade) = negotiation {
            match self.mux.role() {
                Role::Server => {
                    // The 101 acknowledges HTTP2-Settings implicitly
                    self.apply_settings(&upgrade.settings)?;
                    self.mux.accept_stream(1)?;
                    self.stream_mut(1)?.recv_headers(true)?;
                    self.events.push_back(Event::Request {
                        stream_id: 1,
                        request: bridge::upgraded_request(&upgrade.request),
                    });
                }
                Role::Client => {
                    let id = self.mux.open_stream()?;
                    self.stream_mut(id)?.send_headers(true)?;
                }
            }
        }
        Ok(())
    }

    fn stream_mut(&mut self, id: StreamId) -> Result<&mut H2Stream> {
        self.mux
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("stream {} missing", id)))
    }

    fn queue_frame(&mut self, frame: Frame) {
        tracing::trace!(frame = frame.name(), stream_id = frame.stream_id(), "queue frame");
        FrameCodec::encode_into(&frame, &mut self.send_buf);
    }

    /// Feed bytes read from the transport
    ///
    /// Protocol errors never escape: stream errors reset the stream, and
    /// connection errors send GOAWAY and close the connection.
    pub fn recv(&mut self, data: &[u8], now: Instant) {
        if self.closed {
            return;
        }
        self.recv_buf.extend_from_slice(data);
        self.last_activity = Some(now);
        if self.state == ConnectionState::Created {
            return;
        }

        if self.awaiting_preface {
            match self.check_preface() {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => return self.fail(e),
            }
        }

        while !self.closed {
            match self.codec.decode(&mut self.recv_buf) {
                Ok(Some(frame)) => {
                    if let Err(e) = self.process_frame(frame, now) {
                        self.handle_error(e);
                    }
                }
                Ok(None) => break,
                Err(e) => self.handle_error(e),
            }
        }
    }

    fn check_preface(&mut self) -> Result<bool> {
        let n = self.recv_buf.len().min(CONNECTION_PREFACE.len());
        if self.recv_buf[..n] != CONNECTION_PREFACE[..n] {
            return Err(Error::Protocol("invalid connection preface".to_string()));
        }
        if n < CONNECTION_PREFACE.len() {
            return Ok(false);
        }
        self.recv_buf.advance(n);
        self.awaiting_preface = false;
        Ok(true)
    }

    fn handle_error(&mut self, error: Error) {
        match error.stream_id() {
            Some(id) if !error.is_connection_error() => {
                tracing::debug!(stream_id = id, error = %error, "stream error");
                self.reset_with(id, error.code());
            }
            _ => self.fail(error),
        }
    }

    fn reset_with(&mut self, id: StreamId, code: ErrorCode) {
        self.queue_frame(RstStreamFrame::new(id, code).into());
        self.mux.close_stream(id, code);
        self.events.push_back(Event::StreamReset { stream_id: id, code });
        self.check_drained();
    }

    fn process_frame(&mut self, frame: Frame, now: Instant) -> Result<()> {
        tracing::trace!(frame = frame.name(), stream_id = frame.stream_id(), "recv frame");
        if !self.settings_received {
            match &frame {
                Frame::Settings(settings) if !settings.ack => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "expected SETTINGS as first frame, got {}",
                        other.name()
                    )))
                }
            }
        }

        match frame {
            Frame::Data(f) => self.on_data(f),
            Frame::Headers(f) => self.on_headers(f),
            Frame::Priority(_) | Frame::Unknown(_) => Ok(()),
            Frame::RstStream(f) => self.on_rst_stream(f),
            Frame::Settings(f) => self.on_settings(f),
            Frame::PushPromise(_) => Err(Error::Protocol(
                "PUSH_PROMISE received with push disabled".to_string(),
            )),
            Frame::Ping(f) => {
                self.on_ping(f, now);
                Ok(())
            }
            Frame::GoAway(f) => {
                self.on_goaway(f, now);
                Ok(())
            }
            Frame::WindowUpdate(f) => {
                let target = match f.stream_id {
                    CONNECTION_STREAM_ID => FlowTarget::Connection,
                    id => FlowTarget::Stream(id),
                };
                self.mux.apply_flow_control_update(target, f.size_increment)
            }
            Frame::Continuation(f) => Err(Error::Protocol(format!(
                "unexpected CONTINUATION on stream {}",
                f.stream_id
            ))),
        }
    }

    /// Decode a header block; the `hpack` decoder can panic on malformed
    /// input, so any failure becomes a connection COMPRESSION_ERROR
    fn decode_fields(&mut self, block: &[u8]) -> Result<HeaderFields> {
        let decoder = &mut self.decoder;
        match panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(block))) {
            Ok(Ok(fields)) => Ok(fields),
            Ok(Err(e)) => Err(Error::Compression(format!("{:?}", e))),
            Err(_) => Err(Error::Compression("malformed header block".to_string())),
        }
    }

    fn check_list_size(&self, id: StreamId, fields: &HeaderFields) -> Result<()> {
        let list_size: usize = fields
            .iter()
            .map(|(n, v)| n.len() + v.len() + HEADER_FIELD_OVERHEAD)
            .sum();
        if list_size > self.config.max_header_list_size as usize {
            return Err(Error::stream(
                id,
                ErrorCode::ProtocolError,
                format!("header list of {} bytes exceeds limit", list_size),
            ));
        }
        Ok(())
    }

    fn on_headers(&mut self, frame: HeadersFrame) -> Result<()> {
        let id = frame.stream_id;
        // Always decode so the HPACK state stays in sync with the peer
        let fields = self.decode_fields(&frame.header_block)?;
        match self.mux.role() {
            Role::Server => self.on_request_headers(id, fields, frame.end_stream),
            Role::Client => self.on_response_headers(id, fields, frame.end_stream),
        }
    }

    fn on_request_headers(&mut self, id: StreamId, fields: HeaderFields, end_stream: bool) -> Result<()> {
        if self.mux.get(id).is_some() {
            self.check_list_size(id, &fields)?;
            let stream = self.stream_mut(id)?;
            stream.recv_headers(end_stream)?;
            if !end_stream {
                return Err(Error::stream(id, ErrorCode::ProtocolError, "trailers without END_STREAM"));
            }
            return self.finish_message(id);
        }
        if self.mux.is_closed_id(id) {
            return Err(Error::stream(id, ErrorCode::StreamClosed, "HEADERS on closed stream"));
        }

        self.mux.accept_stream(id)?;
        if let Some(last) = self.goaway_sent {
            if id > last {
                return Err(Error::stream(id, ErrorCode::RefusedStream, "connection is going away"));
            }
        }
        // Checked once the id is recorded, so a reset here leaves it closed
        self.check_list_size(id, &fields)?;

        let stream = self.stream_mut(id)?;
        stream.recv_headers(end_stream)?;
        stream.set_fields(fields);
        if end_stream {
            self.finish_message(id)?;
        }
        Ok(())
    }

    fn on_response_headers(&mut self, id: StreamId, fields: HeaderFields, end_stream: bool) -> Result<()> {
        if self.mux.is_idle_id(id) {
            return Err(Error::Protocol(format!("HEADERS on idle stream {}", id)));
        }
        if self.mux.get(id).is_none() {
            return Err(Error::stream(id, ErrorCode::StreamClosed, "HEADERS on closed stream"));
        }
        self.check_list_size(id, &fields)?;
        let stream = self.stream_mut(id)?;

        if stream.fields().is_none() {
            if let Some(status) = bridge::status_of(&fields) {
                if (100..200).contains(&status) {
                    if end_stream {
                        return Err(Error::stream(
                            id,
                            ErrorCode::ProtocolError,
                            "informational response with END_STREAM",
                        ));
                    }
                    tracing::trace!(stream_id = id, status, "skipping informational response");
                    return Ok(());
                }
            }
            stream.recv_headers(end_stream)?;
            stream.set_fields(fields);
        } else {
            stream.recv_headers(end_stream)?;
            if !end_stream {
                return Err(Error::stream(id, ErrorCode::ProtocolError, "trailers without END_STREAM"));
            }
        }

        if end_stream {
            self.finish_message(id)?;
        }
        Ok(())
    }

    fn finish_message(&mut self, id: StreamId) -> Result<()> {
        let stream = self.stream_mut(id)?;
        let fields = stream
            .take_fields()
            .ok_or_else(|| Error::stream(id, ErrorCode::ProtocolError, "message without headers"))?;
        let body = stream.take_body();

        let event = match self.mux.role() {
            Role::Server => Event::Request {
                stream_id: id,
                request: bridge::request_from_fields(id, fields, body)?,
            },
            Role::Client => Event::Response {
                stream_id: id,
                response: bridge::response_from_fields(id, fields, body)?,
            },
        };
        self.events.push_back(event);
        self.mux.release_if_closed(id);
        self.check_drained();
        Ok(())
    }

    fn on_data(&mut self, frame: DataFrame) -> Result<()> {
        let id = frame.stream_id;
        let mut updates = Vec::new();
        let charged = self
            .mux
            .recv_data(id, frame.frame_size(), frame.end_stream, &mut updates);
        for update in updates {
            self.queue_frame(update.into());
        }
        charged?;

        let limit = match self.mux.role() {
            Role::Server => self.config.max_request_body_size,
            Role::Client => usize::MAX,
        };
        let stream = self.stream_mut(id)?;
        if stream.fields().is_none() {
            return Err(Error::stream(id, ErrorCode::ProtocolError, "DATA before HEADERS"));
        }
        if stream.body().len().saturating_add(frame.data.len()) > limit {
            return Err(Error::stream(id, ErrorCode::EnhanceYourCalm, "request body too large"));
        }
        stream.push_body(&frame.data);

        if frame.end_stream {
            self.finish_message(id)?;
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: RstStreamFrame) -> Result<()> {
        let id = frame.stream_id;
        if self.mux.is_idle_id(id) {
            return Err(Error::Protocol(format!("RST_STREAM on idle stream {}", id)));
        }
        if self.mux.close_stream(id, frame.error_code).is_some() {
            tracing::debug!(stream_id = id, code = %frame.error_code, "stream reset by peer");
            self.events.push_back(Event::StreamReset {
                stream_id: id,
                code: frame.error_code,
            });
            self.check_drained();
        }
        Ok(())
    }

    fn on_settings(&mut self, frame: SettingsFrame) -> Result<()> {
        if frame.ack {
            tracing::trace!("SETTINGS acknowledged");
            return Ok(());
        }
        self.apply_settings(&frame.settings)?;
        if !self.settings_received {
            self.settings_received = true;
            tracing::debug!(role = ?self.mux.role(), "peer SETTINGS received");
        }
        self.queue_frame(SettingsFrame::ack().into());
        Ok(())
    }

    fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        if self.mux.role() == Role::Client && settings.enable_push == Some(true) {
            return Err(Error::Protocol("server sent SETTINGS_ENABLE_PUSH=1".to_string()));
        }
        if let Some(size) = settings.max_frame_size {
            self.peer_max_frame_size = size as usize;
        }
        if settings.max_concurrent_streams.is_some() {
            self.mux.set_peer_max_concurrent(settings.max_concurrent_streams);
        }
        if let Some(window) = settings.initial_window_size {
            self.mux.apply_initial_window_size(window)?;
        }
        self.remote_settings.merge(settings);
        Ok(())
    }

    fn on_ping(&mut self, frame: PingFrame, now: Instant) {
        if !frame.ack {
            self.queue_frame(PingFrame::ack(frame.data).into());
            return;
        }
        match self.ping {
            Some(ping) if ping.payload == frame.data => {
                self.ping = None;
                let rtt = now.saturating_duration_since(ping.sent_at);
                tracing::trace!(?rtt, "PING acknowledged");
                self.events.push_back(Event::PingAck { rtt });
            }
            _ => tracing::trace!("unsolicited PING ACK"),
        }
    }

    fn on_goaway(&mut self, frame: GoawayFrame, now: Instant) {
        let last = frame.last_stream_id;
        tracing::debug!(last_stream_id = last, code = %frame.error_code, "GOAWAY received");
        self.goaway_received = Some(last);
        if frame.error_code != ErrorCode::NoError {
            self.peer_error = Some((
                frame.error_code,
                String::from_utf8_lossy(&frame.debug_data).into_owned(),
            ));
        }
        self.events.push_back(Event::GoAway {
            last_stream_id: last,
            code: frame.error_code,
            debug_data: frame.debug_data,
        });

        // Our streams above `last` were never processed
        let role = self.mux.role();
        for id in self.mux.stream_ids() {
            if role.owns(id) && id > last {
                self.mux.close_stream(id, ErrorCode::RefusedStream);
                self.events.push_back(Event::StreamReset {
                    stream_id: id,
                    code: ErrorCode::RefusedStream,
                });
            }
        }

        self.enter_draining(now);
        self.check_drained();
    }

    fn enter_draining(&mut self, now: Instant) {
        if self.state == ConnectionState::Active {
            self.drain_deadline = Some(now + self.config.drain_grace_period);
            self.set_state(ConnectionState::Draining);
        }
    }

    fn check_drained(&mut self) {
        if self.state == ConnectionState::Draining
            && self.mux.active_count() == 0
            && !self.mux.has_pending_data()
        {
            self.close(Ok(()));
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Created | ConnectionState::Negotiating => Err(Error::NotReady),
            ConnectionState::Active if self.goaway_received.is_none() => Ok(()),
            ConnectionState::Closed => Err(Error::ConnectionClosed),
            _ => Err(Error::GoingAway),
        }
    }

    /// Open a stream and queue `request` on it
    ///
    /// `default_authority` fills `:authority` when the request has no `Host`.
    pub fn send_request(&mut self, request: &HttpRequest, default_authority: &str) -> Result<StreamId> {
        self.ensure_open()?;
        let id = self.mux.open_stream()?;
        let fields = bridge::request_fields(request, default_authority);
        self.send_message(id, &fields, request.body_bytes())?;
        Ok(id)
    }

    /// Queue the response for a peer's request
    pub fn send_response(&mut self, id: StreamId, response: &HttpResponse) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if self.mux.get(id).is_none() {
            return Err(Error::stream(id, ErrorCode::StreamClosed, "stream is gone"));
        }
        let fields = bridge::response_fields(response);
        self.send_message(id, &fields, response.body_bytes())
    }

    fn send_message(&mut self, id: StreamId, fields: &HeaderFields, body: Bytes) -> Result<()> {
        let mut block = Vec::new();
        self.encoder
            .encode_into(fields.iter().map(|(n, v)| (n.as_slice(), v.as_slice())), &mut block)
            .map_err(|e| Error::Compression(e.to_string()))?;

        let end_stream = body.is_empty();
        self.stream_mut(id)?.send_headers(end_stream)?;
        FrameCodec::encode_header_block(
            id,
            Bytes::from(block),
            end_stream,
            self.peer_max_frame_size,
            &mut self.send_buf,
        );

        if end_stream {
            self.mux.release_if_closed(id);
            self.check_drained();
        } else {
            self.mux.queue_data(id, body, true)?;
        }
        Ok(())
    }

    /// Reset a stream from our side
    pub fn reset_stream(&mut self, id: StreamId, code: ErrorCode) {
        if self.closed || self.mux.get(id).is_none() {
            return;
        }
        self.reset_with(id, code);
    }

    /// Send a PING; at most one is outstanding
    pub fn ping(&mut self, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if self.ping.is_some() {
            return Ok(());
        }
        self.ping_seq += 1;
        let payload = self.ping_seq.to_be_bytes();
        self.queue_frame(PingFrame::new(payload).into());
        self.ping = Some(OutstandingPing { payload, sent_at: now });
        Ok(())
    }

    /// Start a graceful shutdown
    ///
    /// Sends GOAWAY(NO_ERROR) naming the highest peer stream seen. Streams
    /// at or below it run to completion; newer ones are refused.
    pub fn go_away(&mut self, now: Instant) {
        if self.closed || self.goaway_sent.is_some() {
            return;
        }
        let last = self.mux.last_peer_id();
        tracing::debug!(last_stream_id = last, "sending GOAWAY");
        self.queue_frame(GoawayFrame::new(last, ErrorCode::NoError, Bytes::new()).into());
        self.goaway_sent = Some(last);
        self.enter_draining(now);
        self.check_drained();
    }

    /// Fail the connection, telling the peer why unless the transport is gone
    pub fn abort(&mut self, error: Error) {
        self.fail(error);
    }

    fn fail(&mut self, error: Error) {
        if self.closed {
            return;
        }
        tracing::warn!(role = ?self.mux.role(), error = %error, "connection failed");
        if error.kind() != ErrorKind::Transport {
            let last = self.mux.last_peer_id();
            let debug = Bytes::from(error.to_string());
            self.queue_frame(GoawayFrame::new(last, error.code(), debug).into());
            self.goaway_sent = Some(last);
        }
        self.close(Err(error));
    }

    /// The transport reached end of file
    pub fn transport_closed(&mut self) {
        if self.closed {
            return;
        }
        let result = match self.peer_error.take() {
            Some((code, debug)) => Err(Error::GoAway { code, debug }),
            None if self.mux.active_count() == 0 => Ok(()),
            None => Err(Error::ConnectionClosed),
        };
        self.close(result);
    }

    fn close(&mut self, result: Result<()>) {
        if self.closed {
            return;
        }
        self.closed = true;
        let result = match (result, self.peer_error.take()) {
            (Ok(()), Some((code, debug))) => Err(Error::GoAway { code, debug }),
            (result, _) => result,
        };
        for id in self.mux.stream_ids() {
            self.mux.close_stream(id, ErrorCode::Cancel);
        }
        self.ping = None;
        self.drain_deadline = None;
        self.set_state(ConnectionState::Closed);
        match &result {
            Ok(()) => tracing::debug!(role = ?self.mux.role(), "connection closed"),
            Err(e) => tracing::debug!(role = ?self.mux.role(), error = %e, "connection closed with error"),
        }
        self.events.push_back(Event::Closed(result));
    }

    /// Bytes to write to the transport, if any
    ///
    /// Control frames and HEADERS go first, then as much DATA as the flow
    /// control windows allow.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        if !self.closed {
            while let Some(frame) = self.mux.poll_data(self.peer_max_frame_size) {
                FrameCodec::encode_data_frame(&frame, &mut self.send_buf);
            }
            self.check_drained();
        }
        if self.send_buf.is_empty() {
            None
        } else {
            Some(self.send_buf.split().freeze())
        }
    }

    /// Next event for the application
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Earliest instant [`Connection::handle_timeout`] has work to do
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        let ping = self.ping.map(|p| p.sent_at + self.config.ping_timeout);
        let keep_alive = match (self.ping, self.state, self.config.keep_alive_interval) {
            (None, ConnectionState::Active, Some(interval)) => {
                self.last_activity.map(|at| at + interval)
            }
            _ => None,
        };
        [ping, self.drain_deadline, keep_alive]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire expired timers
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.closed {
            return;
        }

        let ping_expired = self
            .ping
            .is_some_and(|p| now >= p.sent_at + self.config.ping_timeout);
        if ping_expired {
            self.fail(Error::PingTimeout);
            return;
        }

        if self.state == ConnectionState::Draining
            && self.drain_deadline.is_some_and(|deadline| now >= deadline)
        {
            let open = self.mux.active_count();
            if open > 0 {
                tracing::warn!(open, "drain grace period expired");
                self.close(Err(Error::DrainTimeout(open)));
            } else {
                self.close(Ok(()));
            }
            return;
        }

        if let (Some(interval), Some(last)) = (self.config.keep_alive_interval, self.last_activity) {
            if self.state == ConnectionState::Active && self.ping.is_none() && now >= last + interval {
                tracing::trace!("idle; sending keep-alive PING");
                // Not closed, so this cannot fail
                let _ = self.ping(now);
                self.last_activity = Some(now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::negotiate::UpgradeRequest;
    use crate::http::h2::settings::{SettingsBuilder, MAX_MAX_FRAME_SIZE};
    use crate::http::{Method, Status};

    /// Scripted peer speaking raw frames
    struct Peer {
        codec: FrameCodec,
        encoder: hpack::Encoder<'static>,
        decoder: hpack::Decoder<'static>,
        skip_preface: bool,
    }

    impl Peer {
        fn new() -> Self {
            Peer {
                codec: FrameCodec::with_limits(MAX_MAX_FRAME_SIZE, 1 << 20),
                encoder: hpack::Encoder::new(),
                decoder: hpack::Decoder::new(),
                skip_preface: false,
            }
        }

        fn of_client() -> Self {
            Peer {
                skip_preface: true,
                ..Self::new()
            }
        }

        fn frames(&mut self, conn: &mut Connection) -> Vec<Frame> {
            let mut buf = BytesMut::new();
            while let Some(bytes) = conn.poll_transmit() {
                buf.extend_from_slice(&bytes);
            }
            if self.skip_preface && buf.starts_with(CONNECTION_PREFACE) {
                buf.advance(CONNECTION_PREFACE.len());
                self.skip_preface = false;
            }
            let mut frames = Vec::new();
            while let Some(frame) = self.codec.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
            frames
        }

        fn headers(&mut self, id: StreamId, fields: &[(&str, &str)], end_stream: bool) -> Bytes {
            let mut block = Vec::new();
            self.encoder
                .encode_into(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())), &mut block)
                .unwrap();
            FrameCodec::encode(&HeadersFrame::new(id, Bytes::from(block), end_stream, true).into())
        }

        fn get(&mut self, id: StreamId, path: &str) -> Bytes {
            self.headers(
                id,
                &[(":method", "GET"), (":scheme", "http"), (":authority", "test"), (":path", path)],
                true,
            )
        }

        fn decode(&mut self, block: &[u8]) -> Vec<(String, String)> {
            self.decoder
                .decode(block)
                .unwrap()
                .into_iter()
                .map(|(n, v)| (String::from_utf8(n).unwrap(), String::from_utf8(v).unwrap()))
                .collect()
        }
    }

    fn frame(f: impl Into<Frame>) -> Bytes {
        FrameCodec::encode(&f.into())
    }

    fn settings(settings: Settings) -> Bytes {
        frame(SettingsFrame::new(settings))
    }

    fn events(conn: &mut Connection) -> Vec<Event> {
        std::iter::from_fn(|| conn.poll_event()).collect()
    }

    fn started_server(config: H2Config) -> (Connection, Peer, Instant) {
        let now = Instant::now();
        let mut conn = Connection::server(config);
        conn.start(&Negotiation::PriorKnowledge, now).unwrap();
        let mut input = BytesMut::from(CONNECTION_PREFACE);
        input.extend_from_slice(&settings(Settings::new()));
        conn.recv(&input, now);
        (conn, Peer::new(), now)
    }

    fn ok_response(body: &str) -> HttpResponse {
        HttpResponse::builder().status(Status::OK).body(body.to_string()).build()
    }

    #[test]
    fn test_server_request_response() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(conn.is_ready());

        let out = peer.frames(&mut conn);
        assert!(matches!(&out[0], Frame::Settings(f) if !f.ack));
        assert!(matches!(&out[1], Frame::Settings(f) if f.ack));

        let request = peer.get(1, "/hello");
        conn.recv(&request, now);
        let mut events = events(&mut conn);
        assert_eq!(events.len(), 1);
        let Event::Request { stream_id, request } = events.remove(0) else {
            panic!("expected a request");
        };
        assert_eq!(stream_id, 1);
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.uri(), "/hello");

        conn.send_response(1, &ok_response("world")).unwrap();
        let out = peer.frames(&mut conn);
        assert_eq!(out.len(), 2);
        let Frame::Headers(headers) = &out[0] else {
            panic!("expected HEADERS");
        };
        assert!(!headers.end_stream);
        let fields = peer.decode(&headers.header_block);
        assert_eq!(fields[0], (":status".to_string(), "200".to_string()));
        let Frame::Data(data) = &out[1] else {
            panic!("expected DATA");
        };
        assert_eq!(&data.data[..], b"world");
        assert!(data.end_stream);
        assert_eq!(conn.multiplexer().active_count(), 0);
    }

    #[test]
    fn test_invalid_preface() {
        let now = Instant::now();
        let mut conn = Connection::server(H2Config::default());
        conn.start(&Negotiation::PriorKnowledge, now).unwrap();
        conn.recv(b"GET / HTTP/1.1\r\n\r\n", now);

        let events = events(&mut conn);
        assert!(matches!(events.as_slice(), [Event::Closed(Err(Error::Protocol(_)))]));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_first_frame_must_be_settings() {
        let now = Instant::now();
        let mut conn = Connection::server(H2Config::default());
        conn.start(&Negotiation::PriorKnowledge, now).unwrap();
        let mut input = BytesMut::from(CONNECTION_PREFACE);
        input.extend_from_slice(&frame(PingFrame::new([0; 8])));
        conn.recv(&input, now);

        let mut peer = Peer::new();
        let out = peer.frames(&mut conn);
        let goaway = out.iter().find_map(|f| match f {
            Frame::GoAway(g) => Some(g),
            _ => None,
        });
        assert_eq!(goaway.unwrap().error_code, ErrorCode::ProtocolError);
        assert!(matches!(events(&mut conn).as_slice(), [Event::Closed(Err(_))]));
    }

    #[test]
    fn test_ping_is_echoed() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);

        conn.recv(&frame(PingFrame::new(*b"liveness")), now);
        let out = peer.frames(&mut conn);
        assert_eq!(out, vec![Frame::Ping(PingFrame::ack(*b"liveness"))]);
    }

    #[test]
    fn test_ping_round_trip_and_timeout() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);

        conn.ping(now).unwrap();
        let out = peer.frames(&mut conn);
        let Frame::Ping(ping) = out[0] else {
            panic!("expected PING");
        };
        assert_eq!(conn.poll_timeout(), Some(now + Duration::from_secs(20)));

        conn.recv(&frame(PingFrame::ack(ping.data)), now + Duration::from_millis(5));
        assert!(matches!(
            events(&mut conn).as_slice(),
            [Event::PingAck { rtt }] if *rtt == Duration::from_millis(5)
        ));

        conn.ping(now).unwrap();
        conn.handle_timeout(now + Duration::from_secs(19));
        assert!(events(&mut conn).is_empty());
        conn.handle_timeout(now + Duration::from_secs(20));
        assert!(matches!(
            events(&mut conn).as_slice(),
            [Event::Closed(Err(Error::PingTimeout))]
        ));

        // Closed is reported once
        conn.handle_timeout(now + Duration::from_secs(40));
        conn.transport_closed();
        assert!(events(&mut conn).is_empty());
    }

    #[test]
    fn test_refused_over_concurrency_limit() {
        let config = H2Config::builder().max_concurrent_streams(1).build().unwrap();
        let (mut conn, mut peer, now) = started_server(config);
        peer.frames(&mut conn);

        let fields = [(":method", "POST"), (":scheme", "http"), (":path", "/")];
        let first = peer.headers(1, &fields, false);
        let second = peer.headers(3, &fields, false);
        conn.recv(&first, now);
        conn.recv(&second, now);

        let out = peer.frames(&mut conn);
        assert_eq!(out, vec![Frame::RstStream(RstStreamFrame::new(3, ErrorCode::RefusedStream))]);
        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(conn.multiplexer().get(1).is_some());

        conn.recv(&frame(DataFrame::new(1, Bytes::from("abc"), true)), now);
        let events = events(&mut conn);
        assert!(matches!(
            events.last(),
            Some(Event::Request { stream_id: 1, request }) if request.body() == b"abc"
        ));
    }

    #[test]
    fn test_response_respects_peer_window() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        conn.recv(
            &settings(SettingsBuilder::new().initial_window_size(10).build().unwrap()),
            now,
        );
        peer.frames(&mut conn);

        conn.recv(&peer.get(1, "/big"), now);
        events(&mut conn);
        conn.send_response(1, &ok_response(&"x".repeat(25))).unwrap();

        let data_len = |frames: &[Frame]| -> usize {
            frames
                .iter()
                .map(|f| match f {
                    Frame::Data(d) => d.data.len(),
                    _ => 0,
                })
                .sum()
        };
        let out = peer.frames(&mut conn);
        assert_eq!(data_len(&out), 10);
        assert!(peer.frames(&mut conn).is_empty());

        conn.recv(&frame(WindowUpdateFrame::new(1, 5)), now);
        assert_eq!(data_len(&peer.frames(&mut conn)), 5);

        conn.recv(&frame(WindowUpdateFrame::new(1, 100)), now);
        let out = peer.frames(&mut conn);
        assert_eq!(data_len(&out), 10);
        assert!(matches!(out.last(), Some(Frame::Data(d)) if d.end_stream));
    }

    #[test]
    fn test_window_update_errors() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);
        conn.recv(
            &peer.headers(1, &[(":method", "POST"), (":scheme", "http"), (":path", "/")], false),
            now,
        );

        conn.recv(&frame(WindowUpdateFrame::new(1, 0)), now);
        let out = peer.frames(&mut conn);
        assert_eq!(out, vec![Frame::RstStream(RstStreamFrame::new(1, ErrorCode::ProtocolError))]);
        assert_eq!(conn.state(), ConnectionState::Active);

        conn.recv(&frame(WindowUpdateFrame::new(0, 0)), now);
        let out = peer.frames(&mut conn);
        assert!(matches!(&out[0], Frame::GoAway(g) if g.error_code == ErrorCode::ProtocolError));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_data_on_closed_stream() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);
        conn.recv(&peer.get(1, "/"), now);
        conn.send_response(1, &ok_response("")).unwrap();
        peer.frames(&mut conn);

        conn.recv(&frame(DataFrame::new(1, Bytes::from("late"), false)), now);
        let out = peer.frames(&mut conn);
        assert_eq!(out, vec![Frame::RstStream(RstStreamFrame::new(1, ErrorCode::StreamClosed))]);
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn test_malformed_header_block_is_compression_error() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);

        let block = Bytes::from_static(&[130, 63, 206, 157]);
        conn.recv(&frame(HeadersFrame::new(1, block, true, true)), now);

        let out = peer.frames(&mut conn);
        assert!(matches!(
            out.as_slice(),
            [Frame::GoAway(g)] if g.error_code == ErrorCode::CompressionError
        ));
        assert!(matches!(
            events(&mut conn).as_slice(),
            [Event::Closed(Err(Error::Compression(_)))]
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_oversized_header_list_resets_only_that_stream() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);

        let big = "x".repeat(17 * 1024);
        let fields = [(":method", "POST"), (":scheme", "http"), (":path", "/"), ("x-big", big.as_str())];
        let mut block = Vec::new();
        peer.encoder
            .encode_into(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())), &mut block)
            .unwrap();
        let mut wire = BytesMut::new();
        FrameCodec::encode_header_block(1, Bytes::from(block), false, DEFAULT_MAX_FRAME_SIZE as usize, &mut wire);
        conn.recv(&wire, now);
        let out = peer.frames(&mut conn);
        assert_eq!(out, vec![Frame::RstStream(RstStreamFrame::new(1, ErrorCode::ProtocolError))]);

        // The reset stream is closed, not idle
        conn.recv(&frame(DataFrame::new(1, Bytes::from("body"), true)), now);
        let out = peer.frames(&mut conn);
        assert_eq!(out, vec![Frame::RstStream(RstStreamFrame::new(1, ErrorCode::StreamClosed))]);
        assert_eq!(conn.state(), ConnectionState::Active);

        conn.recv(&peer.get(3, "/next"), now);
        assert!(events(&mut conn)
            .iter()
            .any(|e| matches!(e, Event::Request { stream_id: 3, .. })));
    }

    #[test]
    fn test_data_beyond_stream_window_fails_connection() {
        let config = H2Config::builder().initial_window_size(100).build().unwrap();
        let (mut conn, mut peer, now) = started_server(config);
        peer.frames(&mut conn);
        conn.recv(
            &peer.headers(1, &[(":method", "POST"), (":scheme", "http"), (":path", "/")], false),
            now,
        );
        conn.recv(&frame(DataFrame::new(1, Bytes::from(vec![0u8; 200]), false)), now);

        let out = peer.frames(&mut conn);
        assert!(matches!(
            out.last(),
            Some(Frame::GoAway(g)) if g.error_code == ErrorCode::FlowControlError
        ));
        assert!(events(&mut conn)
            .iter()
            .any(|e| matches!(e, Event::Closed(Err(Error::FlowControl(_))))));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_request_body_limit() {
        let config = H2Config::builder().max_request_body_size(4).build().unwrap();
        let (mut conn, mut peer, now) = started_server(config);
        peer.frames(&mut conn);
        conn.recv(
            &peer.headers(1, &[(":method", "POST"), (":scheme", "http"), (":path", "/")], false),
            now,
        );
        conn.recv(&frame(DataFrame::new(1, Bytes::from("too long"), true)), now);

        let out = peer.frames(&mut conn);
        assert!(out.contains(&Frame::RstStream(RstStreamFrame::new(1, ErrorCode::EnhanceYourCalm))));
        assert!(matches!(
            events(&mut conn).as_slice(),
            [Event::StreamReset { stream_id: 1, code: ErrorCode::EnhanceYourCalm }]
        ));
    }

    #[test]
    fn test_server_goaway_drains_then_closes() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);
        conn.recv(&peer.get(1, "/"), now);
        events(&mut conn);

        conn.go_away(now);
        assert_eq!(conn.state(), ConnectionState::Draining);
        let out = peer.frames(&mut conn);
        assert!(matches!(&out[0], Frame::GoAway(g) if g.last_stream_id == 1 && g.error_code == ErrorCode::NoError));

        // Streams opened after GOAWAY are refused
        conn.recv(&peer.get(3, "/late"), now);
        let out = peer.frames(&mut conn);
        assert_eq!(out, vec![Frame::RstStream(RstStreamFrame::new(3, ErrorCode::RefusedStream))]);

        conn.send_response(1, &ok_response("bye")).unwrap();
        peer.frames(&mut conn);
        let events = events(&mut conn);
        assert!(matches!(events.last(), Some(Event::Closed(Ok(())))));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_drain_timeout() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);
        conn.recv(&peer.get(1, "/slow"), now);
        events(&mut conn);

        conn.go_away(now);
        assert_eq!(conn.poll_timeout(), Some(now + Duration::from_secs(5)));
        conn.handle_timeout(now + Duration::from_secs(5));
        assert!(matches!(
            events(&mut conn).as_slice(),
            [Event::Closed(Err(Error::DrainTimeout(1)))]
        ));
    }

    #[test]
    fn test_client_goaway_refuses_later_streams() {
        let now = Instant::now();
        let mut conn = Connection::client(H2Config::default());
        conn.start(&Negotiation::PriorKnowledge, now).unwrap();
        let mut peer = Peer::of_client();
        conn.recv(&settings(Settings::new()), now);
        peer.frames(&mut conn);

        let request = HttpRequest::new(Method::Get, "/");
        for expected in [1, 3, 5] {
            assert_eq!(conn.send_request(&request, "test").unwrap(), expected);
        }
        peer.frames(&mut conn);

        conn.recv(&frame(GoawayFrame::new(3, ErrorCode::NoError, Bytes::new())), now);
        let got = events(&mut conn);
        assert!(matches!(got[0], Event::GoAway { last_stream_id: 3, .. }));
        assert!(matches!(
            got[1],
            Event::StreamReset { stream_id: 5, code: ErrorCode::RefusedStream }
        ));
        assert!(matches!(conn.send_request(&request, "test"), Err(Error::GoingAway)));

        let mut server = Peer::new();
        for id in [1, 3] {
            conn.recv(&server.headers(id, &[(":status", "204")], true), now);
        }
        let got = events(&mut conn);
        assert!(matches!(got[0], Event::Response { stream_id: 1, .. }));
        assert!(matches!(got[1], Event::Response { stream_id: 3, .. }));
        assert!(matches!(got[2], Event::Closed(Ok(()))));
    }

    #[test]
    fn test_client_skips_informational() {
        let now = Instant::now();
        let mut conn = Connection::client(H2Config::default());
        conn.start(&Negotiation::PriorKnowledge, now).unwrap();
        conn.recv(&settings(Settings::new()), now);
        let id = conn
            .send_request(&HttpRequest::new(Method::Get, "/"), "test")
            .unwrap();

        let mut server = Peer::new();
        conn.recv(&server.headers(id, &[(":status", "103")], false), now);
        conn.recv(&server.headers(id, &[(":status", "200")], false), now);
        conn.recv(&frame(DataFrame::new(id, Bytes::from("ok"), true)), now);

        let got = events(&mut conn);
        assert_eq!(got.len(), 1);
        let Event::Response { response, .. } = &got[0] else {
            panic!("expected a response");
        };
        assert_eq!(response.status().code(), 200);
        assert_eq!(response.body(), b"ok");
    }

    #[test]
    fn test_server_upgrade_start() {
        let now = Instant::now();
        let mut conn = Connection::server(H2Config::default());
        let upgrade = UpgradeRequest {
            request: HttpRequest::builder()
                .method(Method::Get)
                .uri("/up")
                .header("Host", "example.com")
                .header("Upgrade", "h2c")
                .build(),
            settings: SettingsBuilder::new().initial_window_size(100).build().unwrap(),
        };
        conn.start(&Negotiation::Upgrade(upgrade), now).unwrap();

        let got = events(&mut conn);
        let [Event::Request { stream_id: 1, request }] = got.as_slice() else {
            panic!("expected the upgraded request on stream 1");
        };
        assert_eq!(request.uri(), "/up");
        assert_eq!(conn.remote_settings().initial_window_size, Some(100));

        // The client preface still has to arrive
        let mut input = BytesMut::from(CONNECTION_PREFACE);
        input.extend_from_slice(&settings(Settings::new()));
        conn.recv(&input, now);
        conn.send_response(1, &ok_response("upgraded")).unwrap();

        let mut peer = Peer::new();
        let out = peer.frames(&mut conn);
        assert!(out.iter().any(|f| matches!(f, Frame::Headers(h) if h.stream_id == 1)));
        assert!(out.iter().any(|f| matches!(f, Frame::Data(d) if d.stream_id == 1 && d.end_stream)));
    }

    #[test]
    fn test_start_rejects_http1() {
        let mut conn = Connection::server(H2Config::default());
        assert!(conn.start(&Negotiation::Http1, Instant::now()).is_err());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.poll_event().is_none());
    }

    #[test]
    fn test_peer_goaway_error_is_reported() {
        let (mut conn, mut peer, now) = started_server(H2Config::default());
        peer.frames(&mut conn);
        conn.recv(
            &frame(GoawayFrame::new(0, ErrorCode::EnhanceYourCalm, Bytes::from("calm down"))),
            now,
        );
        let got = events(&mut conn);
        assert!(matches!(
            got.last(),
            Some(Event::Closed(Err(Error::GoAway { code: ErrorCode::EnhanceYourCalm, debug }))) if debug == "calm down"
        ));
    }

    #[test]
    fn test_keep_alive_ping() {
        let config = H2Config::builder()
            .keep_alive_interval(Some(Duration::from_secs(1)))
            .build()
            .unwrap();
        let (mut conn, mut peer, now) = started_server(config);
        peer.frames(&mut conn);

        assert_eq!(conn.poll_timeout(), Some(now + Duration::from_secs(1)));
        conn.handle_timeout(now + Duration::from_secs(1));
        let out = peer.frames(&mut conn);
        assert!(matches!(out.as_slice(), [Frame::Ping(p)] if !p.ack));
    }
}
