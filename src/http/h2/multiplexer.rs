//! Stream multiplexer
//!
//! Owns every stream of one connection plus the connection-level flow
//! control windows. Streams live in a map keyed by id and are removed as soon
//! as they close; a closed stream is recognized afterwards because its id is
//! below the next id expected for its initiator.
//!
//! Outbound DATA is queued per stream and released by [`Multiplexer::poll_data`]
//! only as far as both the connection and the stream send windows allow.
//! Streams with queued data are served round-robin.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::frames::{DataFrame, WindowUpdateFrame};
use super::stream::{H2Stream, StreamId, StreamState};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_STREAM_ID};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

/// Which end of the connection we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens odd-numbered streams
    Client,
    /// Opens even-numbered streams
    Server,
}

impl Role {
    /// Whether streams with this id are opened by this role
    pub fn owns(self, id: StreamId) -> bool {
        match self {
            Role::Client => id % 2 == 1,
            Role::Server => id % 2 == 0,
        }
    }
}

/// Target of a WINDOW_UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTarget {
    /// Stream 0
    Connection,
    /// One stream
    Stream(StreamId),
}

/// Stream arena and flow-control bookkeeping for one connection
#[derive(Debug)]
pub struct Multiplexer {
    role: Role,
    streams: HashMap<StreamId, H2Stream>,
    /// Next id we will open
    next_local_id: StreamId,
    /// Highest id the peer opened
    last_peer_id: StreamId,
    /// Ceiling we enforce on peer-initiated streams
    local_max_concurrent: u32,
    /// Ceiling the peer enforces on our streams
    peer_max_concurrent: Option<u32>,
    /// Receive window for new streams (ours)
    local_initial_window: u32,
    /// Send window for new streams (the peer's SETTINGS_INITIAL_WINDOW_SIZE)
    peer_initial_window: u32,
    /// Connection-level windows
    conn: FlowControl,
    /// Streams with queued outbound data, in service order
    ready: VecDeque<StreamId>,
}

impl Multiplexer {
    /// Create an empty multiplexer
    ///
    /// `max_concurrent` limits peer-initiated streams; `initial_window` is
    /// the receive window we advertise for each stream.
    pub fn new(role: Role, max_concurrent: u32, initial_window: u32) -> Self {
        Multiplexer {
            role,
            streams: HashMap::new(),
            next_local_id: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            last_peer_id: 0,
            local_max_concurrent: max_concurrent,
            peer_max_concurrent: None,
            local_initial_window: initial_window,
            peer_initial_window: DEFAULT_INITIAL_WINDOW_SIZE,
            conn: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE),
            ready: VecDeque::new(),
        }
    }

    /// Our role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Highest stream id the peer has opened
    pub fn last_peer_id(&self) -> StreamId {
        self.last_peer_id
    }

    /// Id the next `open_stream` will return
    pub fn next_local_id(&self) -> StreamId {
        self.next_local_id
    }

    /// Connection-level windows
    pub fn connection_flow(&self) -> &FlowControl {
        &self.conn
    }

    /// Apply the peer's SETTINGS_MAX_CONCURRENT_STREAMS
    pub fn set_peer_max_concurrent(&mut self, max: Option<u32>) {
        self.peer_max_concurrent = max;
    }

    /// Get a stream by ID
    pub fn get(&self, id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&id)
    }

    /// Get a mutable stream by ID
    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&id)
    }

    /// Number of live streams
    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    /// Live stream ids, ascending
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn count_initiated_by(&self, local: bool) -> usize {
        self.streams
            .keys()
            .filter(|&&id| self.role.owns(id) == local)
            .count()
    }

    /// Whether `id` was never used on this connection
    pub fn is_idle_id(&self, id: StreamId) -> bool {
        if id == 0 || self.streams.contains_key(&id) {
            return false;
        }
        if self.role.owns(id) {
            id >= self.next_local_id
        } else {
            id > self.last_peer_id
        }
    }

    /// Whether `id` belonged to a stream that has since closed
    pub fn is_closed_id(&self, id: StreamId) -> bool {
        id != 0 && !self.streams.contains_key(&id) && !self.is_idle_id(id)
    }

    /// Open a locally initiated stream and return its id
    pub fn open_stream(&mut self) -> Result<StreamId> {
        let id = self.next_local_id;
        if id > MAX_STREAM_ID {
            return Err(Error::StreamIdsExhausted);
        }
        if let Some(max) = self.peer_max_concurrent {
            if self.count_initiated_by(true) >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }

        self.next_local_id += 2;
        self.streams.insert(
            id,
            H2Stream::new(id, self.peer_initial_window, self.local_initial_window),
        );
        tracing::debug!(stream_id = id, "opened stream");
        Ok(id)
    }

    /// Admit a stream the peer is opening
    ///
    /// The id must have the peer's parity and exceed every id the peer used
    /// before; violations are connection errors. When the concurrency ceiling
    /// is reached the stream is refused with a stream error and never created,
    /// but its id still counts as used.
    pub fn accept_stream(&mut self, id: StreamId) -> Result<()> {
        if id == 0 || self.role.owns(id) {
            return Err(Error::Protocol(format!(
                "peer opened stream {} with the wrong parity",
                id
            )));
        }
        if id <= self.last_peer_id {
            return Err(Error::Protocol(format!(
                "stream id {} not greater than previous {}",
                id, self.last_peer_id
            )));
        }
        self.last_peer_id = id;

        if self.count_initiated_by(false) >= self.local_max_concurrent as usize {
            tracing::debug!(stream_id = id, limit = self.local_max_concurrent, "refusing stream");
            return Err(Error::stream(
                id,
                ErrorCode::RefusedStream,
                "concurrent stream limit reached",
            ));
        }

        self.streams.insert(
            id,
            H2Stream::new(id, self.peer_initial_window, self.local_initial_window),
        );
        tracing::debug!(stream_id = id, "accepted stream");
        Ok(())
    }

    /// Remove a stream; idempotent
    pub fn close_stream(&mut self, id: StreamId, reason: ErrorCode) -> Option<H2Stream> {
        let mut stream = self.streams.remove(&id)?;
        self.ready.retain(|&queued| queued != id);
        if !stream.state().is_closed() {
            stream.reset();
        }
        tracing::debug!(stream_id = id, reason = reason.name(), "closed stream");
        Some(stream)
    }

    /// Remove the stream if it reached the closed state
    pub fn release_if_closed(&mut self, id: StreamId) -> bool {
        let closed = self
            .streams
            .get(&id)
            .is_some_and(|s| s.state() == StreamState::Closed);
        if closed {
            self.close_stream(id, ErrorCode::NoError);
        }
        closed
    }

    /// Credit a send window from WINDOW_UPDATE
    ///
    /// Connection-scoped failures are connection errors; stream-scoped ones
    /// are stream errors. Updates for closed streams are ignored.
    pub fn apply_flow_control_update(&mut self, target: FlowTarget, delta: u32) -> Result<()> {
        match target {
            FlowTarget::Connection => {
                let size = self.conn.send_window_mut().increase(delta)?;
                tracing::trace!(window = size, "connection send window credited");
                Ok(())
            }
            FlowTarget::Stream(id) => {
                if self.is_idle_id(id) {
                    return Err(Error::Protocol(format!("WINDOW_UPDATE on idle stream {}", id)));
                }
                let Some(stream) = self.streams.get_mut(&id) else {
                    return Ok(());
                };
                match stream.flow_control_mut().send_window_mut().increase(delta) {
                    Ok(size) => {
                        tracing::trace!(stream_id = id, window = size, "stream send window credited");
                        Ok(())
                    }
                    Err(Error::Protocol(reason)) => {
                        Err(Error::stream(id, ErrorCode::ProtocolError, reason))
                    }
                    Err(e) => Err(Error::stream(id, ErrorCode::FlowControlError, e.to_string())),
                }
            }
        }
    }

    /// Apply a new peer SETTINGS_INITIAL_WINDOW_SIZE to every stream
    pub fn apply_initial_window_size(&mut self, new: u32) -> Result<()> {
        for stream in self.streams.values_mut() {
            stream
                .flow_control_mut()
                .send_window_mut()
                .update_initial_size(new)?;
        }
        self.peer_initial_window = new;
        Ok(())
    }

    /// Charge received DATA against the receive windows
    ///
    /// `len` counts padding. The connection window is charged even when the
    /// stream turns out to be closed. WINDOW_UPDATEs due as a result are
    /// pushed to `updates`.
    pub fn recv_data(
        &mut self,
        id: StreamId,
        len: usize,
        end_stream: bool,
        updates: &mut Vec<WindowUpdateFrame>,
    ) -> Result<()> {
        let conn_recv = self.conn.recv_window_mut();
        conn_recv.decrease_recv(len)?;
        if let Some(increment) = conn_recv.take_update() {
            updates.push(WindowUpdateFrame::new(0, increment));
        }

        if self.is_idle_id(id) {
            return Err(Error::Protocol(format!("DATA on idle stream {}", id)));
        }
        let Some(stream) = self.streams.get_mut(&id) else {
            return Err(Error::stream(id, ErrorCode::StreamClosed, "DATA on closed stream"));
        };

        stream.recv_data(end_stream)?;
        let recv = stream.flow_control_mut().recv_window_mut();
        // Overrunning a receive window is fatal to the connection
        recv.decrease_recv(len)?;
        if !end_stream {
            if let Some(increment) = recv.take_update() {
                updates.push(WindowUpdateFrame::new(id, increment));
            }
        }
        Ok(())
    }

    /// Queue outbound DATA on a stream
    pub fn queue_data(&mut self, id: StreamId, data: Bytes, end_stream: bool) -> Result<()> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("no stream {} to queue data on", id)))?;
        stream.queue_data(data, end_stream)?;
        if !self.ready.contains(&id) {
            self.ready.push_back(id);
        }
        Ok(())
    }

    /// Whether any stream has DATA queued
    pub fn has_pending_data(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Next DATA frame permitted by the send windows, at most `max_frame` bytes
    ///
    /// Returns `None` when nothing is queued or every queued stream is blocked
    /// on window credit.
    pub fn poll_data(&mut self, max_frame: usize) -> Option<DataFrame> {
        for _ in 0..self.ready.len() {
            let id = self.ready.pop_front()?;
            let conn_available = self.conn.send_window().available();
            let Some(stream) = self.streams.get_mut(&id) else {
                continue;
            };

            let limit = conn_available
                .min(stream.flow_control().send_window().available())
                .min(max_frame);
            let Some((data, end_stream)) = stream.next_chunk(limit) else {
                if stream.has_outbound() {
                    self.ready.push_back(id);
                }
                continue;
            };

            let len = data.len();
            stream.flow_control_mut().send_window_mut().consume(len);
            self.conn.send_window_mut().consume(len);

            if stream.has_outbound() {
                self.ready.push_back(id);
            }
            if end_stream {
                self.release_if_closed(id);
            }

            tracing::trace!(stream_id = id, len, end_stream, "releasing DATA");
            return Some(DataFrame::new(id, data, end_stream));
        }
        None
    }
}
