//! Shared helpers for the integration tests

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use h2cgate::http::h2::codec::FrameCodec;
use h2cgate::http::h2::settings::MAX_MAX_FRAME_SIZE;
use h2cgate::http::h2::{
    Frame, HeadersFrame, Settings, SettingsFrame, StreamId, CONNECTION_PREFACE,
};
use h2cgate::http::{FdSessionOps, HttpRequest, HttpResponse, Status};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Route test output through the harness; safe to call from every test
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Accept one connection on a loopback port and run `serve` on it
pub fn serve_one<T, F>(serve: F) -> (SocketAddr, JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(TcpStream) -> T + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve(stream)
    });
    (addr, handle)
}

/// Connect a plain TCP session to `addr`
pub fn connect(addr: SocketAddr) -> FdSessionOps {
    FdSessionOps::new(TcpStream::connect(addr).unwrap())
}

/// Handler answering with the method, path and body it received
pub fn echo(request: HttpRequest) -> Result<HttpResponse, h2cgate::http::h2::HandlerError> {
    let mut body = format!("{} {}", request.method(), request.uri()).into_bytes();
    if !request.body().is_empty() {
        body.push(b' ');
        body.extend_from_slice(request.body());
    }
    Ok(HttpResponse::builder()
        .status(Status::OK)
        .header("content-type", "text/plain")
        .body(body)
        .build())
}

/// Hand-driven HTTP/2 peer over TCP, for asserting on the wire
pub struct RawPeer {
    pub stream: TcpStream,
    codec: FrameCodec,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    buf: BytesMut,
}

impl RawPeer {
    /// Connect without sending anything
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        RawPeer {
            stream,
            codec: FrameCodec::with_limits(MAX_MAX_FRAME_SIZE, 1 << 20),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            buf: BytesMut::new(),
        }
    }

    /// Connect and send the preface followed by `settings`
    pub fn prior_knowledge(addr: SocketAddr, settings: Settings) -> Self {
        let mut peer = Self::connect(addr);
        peer.write_raw(CONNECTION_PREFACE);
        peer.send(SettingsFrame::new(settings));
        peer
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    pub fn send(&mut self, frame: impl Into<Frame>) {
        let bytes = FrameCodec::encode(&frame.into());
        self.write_raw(&bytes);
    }

    /// Send a complete header block on `id`
    pub fn send_headers(&mut self, id: StreamId, fields: &[(&str, &str)], end_stream: bool) {
        let mut block = Vec::new();
        self.encoder
            .encode_into(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())), &mut block)
            .unwrap();
        self.send(HeadersFrame::new(id, Bytes::from(block), end_stream, true));
    }

    pub fn send_get(&mut self, id: StreamId, path: &str) {
        self.send_headers(
            id,
            &[(":method", "GET"), (":scheme", "http"), (":authority", "test"), (":path", path)],
            true,
        );
    }

    /// Read bytes until `len` are buffered; returns them without decoding
    pub fn read_exact_raw(&mut self, len: usize) -> Vec<u8> {
        while self.buf.len() < len {
            self.fill();
        }
        self.buf.split_to(len).to_vec()
    }

    /// Next frame from the server; `None` once the server hung up
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf).unwrap() {
                return Some(frame);
            }
            if self.fill() == 0 {
                return None;
            }
        }
    }

    /// Skip frames until one matches
    pub fn expect<T>(&mut self, mut pick: impl FnMut(Frame) -> Option<T>) -> T {
        loop {
            let frame = self.next_frame().expect("connection closed before the expected frame");
            if let Some(found) = pick(frame) {
                return found;
            }
        }
    }

    pub fn decode(&mut self, block: &[u8]) -> Vec<(String, String)> {
        self.decoder
            .decode(block)
            .unwrap()
            .into_iter()
            .map(|(n, v)| (String::from_utf8(n).unwrap(), String::from_utf8(v).unwrap()))
            .collect()
    }

    fn fill(&mut self) -> usize {
        let mut chunk = [0u8; 8192];
        let n = match self.stream.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => 0,
            Err(e) => panic!("reading from server failed: {e}"),
        };
        self.buf.extend_from_slice(&chunk[..n]);
        n
    }
}
