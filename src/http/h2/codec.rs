//! HTTP/2 frame encoding and decoding
//!
//! [`FrameCodec`] turns a byte buffer into [`Frame`]s and back. Decoding is
//! incremental: it never consumes a partial frame, validates every frame
//! against RFC 9113 Section 6 before handing it out, and reassembles
//! HEADERS/PUSH_PROMISE blocks split across CONTINUATION frames into one
//! logical frame.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::settings::{Settings, MAX_MAX_FRAME_SIZE, MIN_MAX_FRAME_SIZE};
use super::stream::StreamId;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = MAX_MAX_FRAME_SIZE as usize;

/// Default bound on a reassembled header block
pub const DEFAULT_MAX_HEADER_BLOCK_SIZE: usize = 64 * 1024;

/// Header block waiting for its CONTINUATION frames
#[derive(Debug)]
struct PendingHeaders {
    first: Frame,
    block: BytesMut,
}

impl PendingHeaders {
    fn stream_id(&self) -> StreamId {
        self.first.stream_id()
    }

    fn finish(self) -> Frame {
        let block = self.block.freeze();
        match self.first {
            Frame::Headers(mut f) => {
                f.header_block = block;
                f.end_headers = true;
                Frame::Headers(f)
            }
            Frame::PushPromise(mut f) => {
                f.header_block = block;
                f.end_headers = true;
                Frame::PushPromise(f)
            }
            other => other,
        }
    }
}

/// Frame codec for encoding/decoding HTTP/2 frames
#[derive(Debug)]
pub struct FrameCodec {
    /// Largest payload we accept (our SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: usize,
    /// Largest reassembled header block we accept
    max_header_block_size: usize,
    /// Header block under reassembly
    pending: Option<PendingHeaders>,
}

impl FrameCodec {
    /// Create a new frame codec with RFC default limits
    pub fn new() -> Self {
        FrameCodec {
            max_frame_size: MIN_MAX_FRAME_SIZE as usize,
            max_header_block_size: DEFAULT_MAX_HEADER_BLOCK_SIZE,
            pending: None,
        }
    }

    /// Create a codec with explicit limits
    pub fn with_limits(max_frame_size: u32, max_header_block_size: usize) -> Self {
        let mut codec = Self::new();
        codec.set_max_frame_size(max_frame_size);
        codec.max_header_block_size = max_header_block_size;
        codec
    }

    /// Set the largest frame payload accepted on decode
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size.clamp(MIN_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE) as usize;
    }

    /// Largest frame payload accepted on decode
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Whether a header block is waiting for CONTINUATION frames
    pub fn is_mid_header_block(&self) -> bool {
        self.pending.is_some()
    }

    /// Encode a frame header
    pub fn encode_header(frame_type: u8, flags: FrameFlags, stream_id: StreamId, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type;
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit is 0)
        header[5..9].copy_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());

        header
    }

    /// Decode a frame header
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);

        // Reserved bit is ignored
        let stream_id = u32::from_be_bytes([bytes[5] & 0x7F, bytes[6], bytes[7], bytes[8]]);

        FrameHeader {
            length,
            frame_type: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Decode the next complete frame from `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed. Consumed bytes are
    /// removed from `src`; a partial frame is left in place. Errors are
    /// connection-fatal.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            if src.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            let mut raw = [0u8; FRAME_HEADER_SIZE];
            raw.copy_from_slice(&src[..FRAME_HEADER_SIZE]);
            let header = Self::decode_header(&raw);

            if header.length > self.max_frame_size {
                return Err(Error::FrameSize(format!(
                    "frame length {} exceeds maximum {}",
                    header.length, self.max_frame_size
                )));
            }

            let total = FRAME_HEADER_SIZE + header.length;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            src.advance(FRAME_HEADER_SIZE);
            let payload = src.split_to(header.length).freeze();
            let frame = Self::parse_frame(header, payload)?;

            tracing::trace!(
                frame = frame.name(),
                stream_id = frame.stream_id(),
                length = header.length,
                "decoded frame"
            );

            if let Some(frame) = self.reassemble(frame)? {
                return Ok(Some(frame));
            }
        }
    }

    /// Feed a frame through CONTINUATION reassembly
    fn reassemble(&mut self, frame: Frame) -> Result<Option<Frame>> {
        if let Some(mut pending) = self.pending.take() {
            return match frame {
                Frame::Continuation(cont) if cont.stream_id == pending.stream_id() => {
                    self.check_block_size(pending.block.len() + cont.header_block.len())?;
                    pending.block.extend_from_slice(&cont.header_block);
                    if cont.end_headers {
                        Ok(Some(pending.finish()))
                    } else {
                        self.pending = Some(pending);
                        Ok(None)
                    }
                }
                other => Err(Error::Protocol(format!(
                    "{} on stream {} interrupts header block on stream {}",
                    other.name(),
                    other.stream_id(),
                    pending.stream_id()
                ))),
            };
        }

        let fragment = match &frame {
            Frame::Headers(f) if !f.end_headers => Some(f.header_block.clone()),
            Frame::PushPromise(f) if !f.end_headers => Some(f.header_block.clone()),
            _ => None,
        };
        if let Some(fragment) = fragment {
            return self.start_block(fragment, frame);
        }

        match frame {
            Frame::Continuation(cont) => Err(Error::Protocol(format!(
                "CONTINUATION on stream {} without a preceding HEADERS",
                cont.stream_id
            ))),
            Frame::Headers(f) => {
                self.check_block_size(f.header_block.len())?;
                Ok(Some(Frame::Headers(f)))
            }
            other => Ok(Some(other)),
        }
    }

    fn start_block(&mut self, fragment: Bytes, first: Frame) -> Result<Option<Frame>> {
        self.check_block_size(fragment.len())?;
        let mut block = BytesMut::with_capacity(fragment.len() * 2);
        block.extend_from_slice(&fragment);
        self.pending = Some(PendingHeaders { first, block });
        Ok(None)
    }

    fn check_block_size(&self, size: usize) -> Result<()> {
        if size > self.max_header_block_size {
            return Err(Error::Protocol(format!(
                "header block of {} bytes exceeds limit {}",
                size, self.max_header_block_size
            )));
        }
        Ok(())
    }

    /// Validate and parse one frame payload
    fn parse_frame(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
        let Some(kind) = header.kind() else {
            return Ok(Frame::Unknown(RawFrame {
                frame_type: header.frame_type,
                flags: header.flags,
                stream_id: header.stream_id,
                payload,
            }));
        };

        let flags = header.flags;
        let stream_id = header.stream_id;
        let on_stream = !matches!(
            kind,
            FrameType::Settings | FrameType::Ping | FrameType::Goaway | FrameType::WindowUpdate
        );
        if on_stream && stream_id == 0 {
            return Err(Error::Protocol(format!("{} frame with stream ID 0", kind.name())));
        }
        if matches!(kind, FrameType::Settings | FrameType::Ping | FrameType::Goaway) && stream_id != 0 {
            return Err(Error::Protocol(format!(
                "{} frame on stream {}",
                kind.name(),
                stream_id
            )));
        }

        let frame = match kind {
            FrameType::Data => {
                let padding = strip_padding(kind, flags, &mut payload)?;
                Frame::Data(DataFrame {
                    stream_id,
                    data: payload,
                    end_stream: flags.is_end_stream(),
                    padding,
                })
            }
            FrameType::Headers => {
                let padding = strip_padding(kind, flags, &mut payload)?;
                let priority = if flags.is_priority() {
                    if payload.len() < 5 {
                        return Err(Error::FrameSize("HEADERS too short for priority".into()));
                    }
                    Some(read_priority(&mut payload))
                } else {
                    None
                };
                Frame::Headers(HeadersFrame {
                    stream_id,
                    header_block: payload,
                    end_stream: flags.is_end_stream(),
                    end_headers: flags.is_end_headers(),
                    priority,
                    padding,
                })
            }
            FrameType::Priority => {
                expect_len(kind, &payload, 5)?;
                Frame::Priority(PriorityFrame {
                    stream_id,
                    priority: read_priority(&mut payload),
                })
            }
            FrameType::RstStream => {
                expect_len(kind, &payload, 4)?;
                Frame::RstStream(RstStreamFrame {
                    stream_id,
                    error_code: ErrorCode::from_wire(payload.get_u32()),
                })
            }
            FrameType::Settings => {
                let ack = flags.is_ack();
                if ack && !payload.is_empty() {
                    return Err(Error::FrameSize("SETTINGS ACK with payload".into()));
                }
                Frame::Settings(SettingsFrame {
                    ack,
                    settings: Settings::decode_payload(&payload)?,
                })
            }
            FrameType::PushPromise => {
                let padding = strip_padding(kind, flags, &mut payload)?;
                if payload.len() < 4 {
                    return Err(Error::FrameSize("PUSH_PROMISE too short".into()));
                }
                let promised_stream_id = payload.get_u32() & 0x7FFF_FFFF;
                Frame::PushPromise(PushPromiseFrame {
                    stream_id,
                    promised_stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                    padding,
                })
            }
            FrameType::Ping => {
                expect_len(kind, &payload, 8)?;
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Frame::Ping(PingFrame {
                    ack: flags.is_ack(),
                    data,
                })
            }
            FrameType::Goaway => {
                if payload.len() < 8 {
                    return Err(Error::FrameSize(format!(
                        "GOAWAY payload of {} bytes",
                        payload.len()
                    )));
                }
                let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
                let error_code = ErrorCode::from_wire(payload.get_u32());
                Frame::GoAway(GoawayFrame {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                })
            }
            FrameType::WindowUpdate => {
                expect_len(kind, &payload, 4)?;
                Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id,
                    size_increment: payload.get_u32() & 0x7FFF_FFFF,
                })
            }
            FrameType::Continuation => Frame::Continuation(ContinuationFrame {
                stream_id,
                header_block: payload,
                end_headers: flags.is_end_headers(),
            }),
        };

        Ok(frame)
    }

    /// Encode a frame
    pub fn encode(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(frame, &mut buf);
        buf.freeze()
    }

    /// Append an encoded frame to `dst`
    pub fn encode_into(frame: &Frame, dst: &mut BytesMut) {
        match frame {
            Frame::Data(f) => Self::encode_data_frame(f, dst),
            Frame::Headers(f) => Self::encode_headers_frame(f, dst),
            Frame::Priority(f) => {
                put_header(dst, FrameType::Priority, FrameFlags::empty(), f.stream_id, 5);
                put_priority(dst, &f.priority);
            }
            Frame::RstStream(f) => {
                put_header(dst, FrameType::RstStream, FrameFlags::empty(), f.stream_id, 4);
                dst.put_u32(f.error_code.as_u32());
            }
            Frame::Settings(f) => Self::encode_settings_frame(f, dst),
            Frame::PushPromise(f) => {
                let mut flags = FrameFlags::empty();
                flags.set_if(f.end_headers, FrameFlags::END_HEADERS);
                flags.set_if(f.padding.is_some(), FrameFlags::PADDED);
                let len = 4 + f.header_block.len() + padded_len(f.padding);
                put_header(dst, FrameType::PushPromise, flags, f.stream_id, len);
                if let Some(pad) = f.padding {
                    dst.put_u8(pad);
                }
                dst.put_u32(f.promised_stream_id & 0x7FFF_FFFF);
                dst.put_slice(&f.header_block);
                put_pad(dst, f.padding);
            }
            Frame::Ping(f) => {
                let mut flags = FrameFlags::empty();
                flags.set_if(f.ack, FrameFlags::ACK);
                put_header(dst, FrameType::Ping, flags, 0, 8);
                dst.put_slice(&f.data);
            }
            Frame::GoAway(f) => {
                put_header(dst, FrameType::Goaway, FrameFlags::empty(), 0, 8 + f.debug_data.len());
                dst.put_u32(f.last_stream_id & 0x7FFF_FFFF);
                dst.put_u32(f.error_code.as_u32());
                dst.put_slice(&f.debug_data);
            }
            Frame::WindowUpdate(f) => {
                put_header(dst, FrameType::WindowUpdate, FrameFlags::empty(), f.stream_id, 4);
                dst.put_u32(f.size_increment & 0x7FFF_FFFF);
            }
            Frame::Continuation(f) => {
                let mut flags = FrameFlags::empty();
                flags.set_if(f.end_headers, FrameFlags::END_HEADERS);
                put_header(dst, FrameType::Continuation, flags, f.stream_id, f.header_block.len());
                dst.put_slice(&f.header_block);
            }
            Frame::Unknown(f) => {
                dst.put_slice(&Self::encode_header(f.frame_type, f.flags, f.stream_id, f.payload.len()));
                dst.put_slice(&f.payload);
            }
        }
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(frame.end_stream, FrameFlags::END_STREAM);
        flags.set_if(frame.padding.is_some(), FrameFlags::PADDED);

        put_header(dst, FrameType::Data, flags, frame.stream_id, frame.frame_size());
        if let Some(pad) = frame.padding {
            dst.put_u8(pad);
        }
        dst.put_slice(&frame.data);
        put_pad(dst, frame.padding);
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(frame.end_stream, FrameFlags::END_STREAM);
        flags.set_if(frame.end_headers, FrameFlags::END_HEADERS);
        flags.set_if(frame.priority.is_some(), FrameFlags::PRIORITY);
        flags.set_if(frame.padding.is_some(), FrameFlags::PADDED);

        let mut len = frame.header_block.len() + padded_len(frame.padding);
        if frame.priority.is_some() {
            len += 5;
        }

        put_header(dst, FrameType::Headers, flags, frame.stream_id, len);
        if let Some(pad) = frame.padding {
            dst.put_u8(pad);
        }
        if let Some(priority) = &frame.priority {
            put_priority(dst, priority);
        }
        dst.put_slice(&frame.header_block);
        put_pad(dst, frame.padding);
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(frame.ack, FrameFlags::ACK);

        if frame.ack {
            put_header(dst, FrameType::Settings, flags, 0, 0);
        } else {
            put_header(dst, FrameType::Settings, flags, 0, frame.settings.payload_len());
            frame.settings.encode_payload(dst);
        }
    }

    /// Encode a complete header block as HEADERS followed by as many
    /// CONTINUATION frames as `max_frame_size` requires
    pub fn encode_header_block(
        stream_id: StreamId,
        block: Bytes,
        end_stream: bool,
        max_frame_size: usize,
        dst: &mut BytesMut,
    ) {
        let max_frame_size = max_frame_size.max(1);
        let mut rest = block;
        let first = rest.split_to(rest.len().min(max_frame_size));

        let headers = HeadersFrame::new(stream_id, first, end_stream, rest.is_empty());
        Self::encode_headers_frame(&headers, dst);

        while !rest.is_empty() {
            let fragment = rest.split_to(rest.len().min(max_frame_size));
            let cont = ContinuationFrame {
                stream_id,
                header_block: fragment,
                end_headers: rest.is_empty(),
            };
            Self::encode_into(&Frame::Continuation(cont), dst);
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn put_header(dst: &mut BytesMut, kind: FrameType, flags: FrameFlags, stream_id: StreamId, len: usize) {
    dst.reserve(FRAME_HEADER_SIZE + len);
    dst.put_slice(&FrameCodec::encode_header(kind.as_u8(), flags, stream_id, len));
}

fn padded_len(padding: Option<u8>) -> usize {
    padding.map_or(0, |pad| 1 + pad as usize)
}

fn put_pad(dst: &mut BytesMut, padding: Option<u8>) {
    if let Some(pad) = padding {
        dst.put_bytes(0, pad as usize);
    }
}

fn put_priority(dst: &mut BytesMut, priority: &PrioritySpec) {
    let mut dep = priority.stream_dependency & 0x7FFF_FFFF;
    if priority.exclusive {
        dep |= 0x8000_0000;
    }
    dst.put_u32(dep);
    dst.put_u8(priority.weight);
}

fn read_priority(payload: &mut Bytes) -> PrioritySpec {
    let dep = payload.get_u32();
    let weight = payload.get_u8();
    PrioritySpec {
        stream_dependency: dep & 0x7FFF_FFFF,
        exclusive: dep & 0x8000_0000 != 0,
        weight,
    }
}

fn expect_len(kind: FrameType, payload: &Bytes, len: usize) -> Result<()> {
    if payload.len() != len {
        return Err(Error::FrameSize(format!(
            "{} payload must be {} bytes, got {}",
            kind.name(),
            len,
            payload.len()
        )));
    }
    Ok(())
}

/// Remove the pad-length octet and trailing padding, returning the pad length
fn strip_padding(kind: FrameType, flags: FrameFlags, payload: &mut Bytes) -> Result<Option<u8>> {
    if !flags.is_padded() {
        return Ok(None);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize(format!("padded {} without pad length", kind.name())));
    }
    let pad = payload.get_u8();
    if pad as usize > payload.len() {
        return Err(Error::Protocol(format!(
            "{} padding {} exceeds payload {}",
            kind.name(),
            pad,
            payload.len()
        )));
    }
    payload.truncate(payload.len() - pad as usize);
    Ok(Some(pad))
}
