//! HTTP/2 stream management
//!
//! This module implements the stream state machine of RFC 9113 Section 5.1.
//! Server push is never enabled, so the reserved states cannot occur.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Stream ID type
pub type StreamId = u32;

/// Decoded header field list, in wire order
pub type HeaderFields = Vec<(Vec<u8>, Vec<u8>)>;

/// Stream state as defined in RFC 9113 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    /// Stream ID
    id: StreamId,
    /// Stream state
    state: StreamState,
    /// Flow control
    flow_control: FlowControl,
    /// Header fields of the message being received
    fields: Option<HeaderFields>,
    /// Accumulated body data
    body: BytesMut,
    /// Outbound DATA waiting for window credit
    outbound: VecDeque<Bytes>,
    /// Bytes in `outbound`
    outbound_len: usize,
    /// END_STREAM goes on the last queued chunk
    end_stream_queued: bool,
}

impl H2Stream {
    /// Create a new idle stream with the given window sizes
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow_control: FlowControl::new(send_window, recv_window),
            fields: None,
            body: BytesMut::new(),
            outbound: VecDeque::new(),
            outbound_len: 0,
            end_stream_queued: false,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Get flow control
    pub fn flow_control(&self) -> &FlowControl {
        &self.flow_control
    }

    /// Get mutable flow control
    pub fn flow_control_mut(&mut self) -> &mut FlowControl {
        &mut self.flow_control
    }

    /// Header fields received so far, if any
    pub fn fields(&self) -> Option<&HeaderFields> {
        self.fields.as_ref()
    }

    /// Store the first header block of the message
    pub fn set_fields(&mut self, fields: HeaderFields) {
        self.fields = Some(fields);
    }

    /// Take the stored header fields
    pub fn take_fields(&mut self) -> Option<HeaderFields> {
        self.fields.take()
    }

    /// Get accumulated body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Append received body data
    pub fn push_body(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Take body (consumes the body data)
    pub fn take_body(&mut self) -> Bytes {
        self.body.split().freeze()
    }

    /// Bytes queued for sending
    pub fn queued_len(&self) -> usize {
        self.outbound_len
    }

    /// Whether DATA (or a bare END_STREAM) is waiting to go out
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty() || self.end_stream_queued
    }

    fn stream_closed(&self, what: &str) -> Error {
        Error::stream(
            self.id,
            ErrorCode::StreamClosed,
            format!("{} in state {:?}", what, self.state),
        )
    }

    /// Process an incoming HEADERS frame (initial headers or trailers)
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<()> {
        self.state = match self.state {
            StreamState::Idle if end_stream => StreamState::HalfClosedRemote,
            StreamState::Idle => StreamState::Open,
            StreamState::Open if end_stream => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal if end_stream => StreamState::Closed,
            StreamState::Open | StreamState::HalfClosedLocal => self.state,
            _ => return Err(self.stream_closed("HEADERS received")),
        };
        Ok(())
    }

    /// Process an incoming DATA frame
    pub fn recv_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(self.stream_closed("DATA received"));
        }
        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Record sending HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        self.state = match self.state {
            StreamState::Idle if end_stream => StreamState::HalfClosedLocal,
            StreamState::Idle => StreamState::Open,
            StreamState::Open if end_stream => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote if end_stream => StreamState::Closed,
            StreamState::Open | StreamState::HalfClosedRemote => self.state,
            _ => {
                return Err(Error::Internal(format!(
                    "cannot send HEADERS on stream {} in state {:?}",
                    self.id, self.state
                )))
            }
        };
        Ok(())
    }

    /// Queue DATA for sending; END_STREAM follows the last byte when `end_stream`
    pub fn queue_data(&mut self, data: Bytes, end_stream: bool) -> Result<()> {
        if !self.state.can_send() || self.end_stream_queued {
            return Err(Error::Internal(format!(
                "cannot queue DATA on stream {} in state {:?}",
                self.id, self.state
            )));
        }
        if !data.is_empty() {
            self.outbound_len += data.len();
            self.outbound.push_back(data);
        }
        self.end_stream_queued = end_stream;
        Ok(())
    }

    /// Cut the next outbound DATA chunk of at most `limit` bytes
    ///
    /// Returns the payload and whether it carries END_STREAM. A bare
    /// END_STREAM (empty payload) needs no credit. Window accounting is the
    /// caller's job.
    pub(crate) fn next_chunk(&mut self, limit: usize) -> Option<(Bytes, bool)> {
        let chunk = match self.outbound.front().map(Bytes::len) {
            Some(_) if limit == 0 => return None,
            Some(len) if len <= limit => self.outbound.pop_front().unwrap_or_default(),
            Some(_) => self.outbound.front_mut()?.split_to(limit),
            None if self.end_stream_queued => Bytes::new(),
            None => return None,
        };
        self.outbound_len -= chunk.len();

        let end_stream = self.outbound.is_empty() && self.end_stream_queued;
        if end_stream {
            self.end_stream_queued = false;
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedLocal,
                StreamState::HalfClosedRemote => StreamState::Closed,
                other => other,
            };
        }
        Some((chunk, end_stream))
    }

    /// Reset the stream: closed immediately, queued data dropped
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.outbound.clear();
        self.outbound_len = 0;
        self.end_stream_queued = false;
        self.fields = None;
        self.body.clear();
    }
}
