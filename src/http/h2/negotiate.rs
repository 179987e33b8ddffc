//! Connection negotiation
//!
//! Decides, at the start of a connection, how (and whether) it speaks
//! HTTP/2:
//!
//! - **TLS-ALPN**: the transport already agreed on `h2`
//! - **Prior knowledge**: the first bytes are the 24-octet connection preface
//! - **h2c Upgrade**: an HTTP/1.1 request asks for `Upgrade: h2c` and carries
//!   a valid `HTTP2-Settings` header
//!
//! Anything else is HTTP/1.1 and goes, bytes untouched, to the fallback.
//! Detection reads at most `max_lookahead` bytes and never waits for bytes
//! it could not use.

use super::config::H2Config;
use super::error::{Error, Result};
use super::settings::Settings;
use super::CONNECTION_PREFACE;
use crate::http::parser::{content_length, find_head_end, parse_request_head, parse_response_head};
use crate::http::session::{PollEvents, SessionOps};
use crate::http::tls::ALPN_H2;
use crate::http::{HttpRequest, HttpResponse, Version};
use bytes::BytesMut;
use std::time::{Duration, Instant};

/// Reply that switches an upgraded connection to HTTP/2
pub const SWITCHING_PROTOCOLS: &[u8] =
    b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n";

/// Name of the header carrying the client's SETTINGS during upgrade
pub const HTTP2_SETTINGS_HEADER: &str = "HTTP2-Settings";

/// An HTTP/1.1 request that asked to continue as HTTP/2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// The request, body included; it becomes stream 1
    pub request: HttpRequest,
    /// Decoded `HTTP2-Settings`, the client's initial SETTINGS
    pub settings: Settings,
}

/// How the connection will be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// TLS agreed on `h2`
    Alpn,
    /// Client sent the connection preface straight away
    PriorKnowledge,
    /// Client asked for `Upgrade: h2c`
    Upgrade(UpgradeRequest),
    /// Plain HTTP/1.1
    Http1,
}

impl Negotiation {
    /// Whether the connection continues as HTTP/2
    pub fn is_http2(&self) -> bool {
        !matches!(self, Negotiation::Http1)
    }
}

/// Which path an HTTP/2 connection took, without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// TLS-ALPN
    Alpn,
    /// h2c prior knowledge
    PriorKnowledge,
    /// h2c Upgrade
    Upgrade,
}

impl Handshake {
    /// Summarize a negotiation; `None` for HTTP/1.1
    pub fn of(negotiation: &Negotiation) -> Option<Self> {
        match negotiation {
            Negotiation::Alpn => Some(Handshake::Alpn),
            Negotiation::PriorKnowledge => Some(Handshake::PriorKnowledge),
            Negotiation::Upgrade(_) => Some(Handshake::Upgrade),
            Negotiation::Http1 => None,
        }
    }
}

/// Outcome of looking at the first bytes of a cleartext connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Classified; `consumed` bytes belong to the HTTP/1.1 upgrade request
    /// and must not be fed to the HTTP/2 codec
    Ready {
        negotiation: Negotiation,
        consumed: usize,
    },
    /// More bytes are needed
    NeedMore,
}

impl Detection {
    fn http1() -> Self {
        Detection::Ready {
            negotiation: Negotiation::Http1,
            consumed: 0,
        }
    }
}

/// Result of reading a connection's negotiation off the transport
#[derive(Debug)]
pub struct Negotiated {
    /// How to serve the connection
    pub negotiation: Negotiation,
    /// Bytes read and not consumed by the negotiation itself: the preface
    /// and first frames for HTTP/2, everything for HTTP/1.1
    pub buffered: BytesMut,
}

/// Server-side connection classifier
#[derive(Debug, Clone)]
pub struct Negotiator {
    allow_upgrade: bool,
    allow_prior_knowledge: bool,
    max_lookahead: usize,
    handshake_timeout: Duration,
}

impl Negotiator {
    /// Create a negotiator from the endpoint configuration
    pub fn new(config: &H2Config) -> Self {
        Negotiator {
            allow_upgrade: config.allow_upgrade,
            allow_prior_knowledge: config.allow_prior_knowledge,
            max_lookahead: config.max_lookahead,
            handshake_timeout: config.handshake_timeout,
        }
    }

    /// Classify by the transport's ALPN result, if it has one
    pub fn from_alpn(alpn: Option<&[u8]>) -> Option<Negotiation> {
        match alpn {
            Some(ALPN_H2) => Some(Negotiation::Alpn),
            Some(other) => {
                tracing::debug!(alpn = %String::from_utf8_lossy(other), "ALPN selected another protocol");
                Some(Negotiation::Http1)
            }
            None => None,
        }
    }

    /// Classify a cleartext connection from its first bytes
    pub fn detect(&self, buf: &[u8]) -> Detection {
        if self.allow_prior_knowledge {
            let n = buf.len().min(CONNECTION_PREFACE.len());
            if buf[..n] == CONNECTION_PREFACE[..n] {
                if n == CONNECTION_PREFACE.len() {
                    return Detection::Ready {
                        negotiation: Negotiation::PriorKnowledge,
                        consumed: 0,
                    };
                }
                return Detection::NeedMore;
            }
        }

        if !self.allow_upgrade {
            return if buf.is_empty() {
                Detection::NeedMore
            } else {
                Detection::http1()
            };
        }

        match request_line_prefix(buf) {
            Prefix::Diverged => return Detection::http1(),
            Prefix::Incomplete if buf.len() < self.max_lookahead => return Detection::NeedMore,
            Prefix::Incomplete => return Detection::http1(),
            Prefix::Token => {}
        }

        let Some(head_end) = find_head_end(buf) else {
            return if buf.len() < self.max_lookahead {
                Detection::NeedMore
            } else {
                Detection::http1()
            };
        };
        if head_end > self.max_lookahead {
            return Detection::http1();
        }

        let Ok(mut request) = parse_request_head(&buf[..head_end]) else {
            return Detection::http1();
        };
        let Some(settings) = upgrade_settings(&request) else {
            return Detection::http1();
        };

        let body_len = match content_length(request.headers()) {
            Ok(len) => len.unwrap_or(0),
            Err(_) => return Detection::http1(),
        };
        let total = head_end + body_len;
        if total > self.max_lookahead {
            tracing::debug!(body_len, "upgrade request body exceeds look-ahead");
            return Detection::http1();
        }
        if buf.len() < total {
            return Detection::NeedMore;
        }

        request.set_body(buf[head_end..total].to_vec());
        Detection::Ready {
            negotiation: Negotiation::Upgrade(UpgradeRequest { request, settings }),
            consumed: total,
        }
    }

    /// Read from `session` until the connection is classified
    ///
    /// A transport reporting ALPN skips byte inspection. End of stream with
    /// bytes buffered classifies as HTTP/1.1; with none it is an error.
    pub fn read_negotiation<S: SessionOps>(&self, session: &mut S) -> Result<Negotiated> {
        if let Some(negotiation) = Self::from_alpn(session.alpn_protocol().as_deref()) {
            tracing::debug!(?negotiation, "negotiated by ALPN");
            return Ok(Negotiated {
                negotiation,
                buffered: BytesMut::new(),
            });
        }

        let deadline = Instant::now() + self.handshake_timeout;
        let mut buffered = BytesMut::with_capacity(1024);
        let mut chunk = [0u8; 4096];

        loop {
            match self.detect(&buffered) {
                Detection::Ready {
                    negotiation,
                    consumed,
                } => {
                    let _ = buffered.split_to(consumed);
                    tracing::debug!(
                        kind = ?Handshake::of(&negotiation),
                        lookahead = buffered.len() + consumed,
                        "connection classified"
                    );
                    return Ok(Negotiated {
                        negotiation,
                        buffered,
                    });
                }
                Detection::NeedMore => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            if !session.poll(PollEvents::Read, Some(deadline - now))? {
                continue;
            }

            let want = (self.max_lookahead - buffered.len().min(self.max_lookahead)).clamp(1, chunk.len());
            let n = session.read(&mut chunk[..want])?;
            if n == 0 {
                if buffered.is_empty() {
                    return Err(Error::ConnectionClosed);
                }
                return Ok(Negotiated {
                    negotiation: Negotiation::Http1,
                    buffered,
                });
            }
            buffered.extend_from_slice(&chunk[..n]);
        }
    }
}

enum Prefix {
    /// Starts with `TOKEN SP`
    Token,
    /// Could still become `TOKEN SP`
    Incomplete,
    /// Cannot be an HTTP/1.1 request line
    Diverged,
}

fn request_line_prefix(buf: &[u8]) -> Prefix {
    for (i, &b) in buf.iter().enumerate() {
        if b == b' ' {
            return if i == 0 { Prefix::Diverged } else { Prefix::Token };
        }
        if !is_tchar(b) {
            return Prefix::Diverged;
        }
    }
    Prefix::Incomplete
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Decoded client SETTINGS when `request` is a well-formed h2c upgrade
fn upgrade_settings(request: &HttpRequest) -> Option<Settings> {
    let headers = request.headers();
    if request.version() != Version::Http11
        || !headers.contains_token("Upgrade", "h2c")
        || !headers.contains_token("Connection", "Upgrade")
        || !headers.contains_token("Connection", HTTP2_SETTINGS_HEADER)
        || headers.contains("Transfer-Encoding")
    {
        return None;
    }

    let values = headers.get_all(HTTP2_SETTINGS_HEADER);
    let [value] = values.as_slice() else {
        tracing::debug!(count = values.len(), "upgrade needs exactly one HTTP2-Settings header");
        return None;
    };
    match Settings::from_header_value(value).and_then(|s| s.validate().map(|_| s)) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed HTTP2-Settings");
            None
        }
    }
}

/// Serialize `request` as an HTTP/1.1 request asking to upgrade to h2c
///
/// The body is never sent; upgrades ride on bodyless requests only.
pub fn upgrade_request(request: &HttpRequest, authority: &str, settings: &Settings) -> Vec<u8> {
    let mut headers = request.headers().clone();
    headers.strip_connection_specific();
    headers.remove(HTTP2_SETTINGS_HEADER);
    headers.remove("Content-Length");
    if !headers.contains("Host") {
        headers.insert("Host", authority);
    }
    headers.insert("Connection", "Upgrade, HTTP2-Settings");
    headers.insert("Upgrade", "h2c");
    headers.insert(HTTP2_SETTINGS_HEADER, settings.to_header_value());

    HttpRequest::builder()
        .method(request.method())
        .uri(request.uri())
        .version(Version::Http11)
        .headers(headers)
        .build()
        .to_wire()
}

/// Server's reply to an upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeReply {
    /// 101: HTTP/2 frames follow
    Switched,
    /// Any other status: the server answered in HTTP/1.1 (head only)
    Declined(HttpResponse),
}

/// Parse the reply head to an upgrade request
///
/// Returns `None` until the head is complete, then the reply and the head
/// length.
pub fn parse_upgrade_response(buf: &[u8]) -> Result<Option<(UpgradeReply, usize)>> {
    let Some(end) = find_head_end(buf) else {
        return Ok(None);
    };
    let response = parse_response_head(&buf[..end])?;
    if response.status().code() == 101 {
        if !response.headers().contains_token("Upgrade", "h2c") {
            return Err(Error::Protocol(
                "101 response did not switch to h2c".to_string(),
            ));
        }
        return Ok(Some((UpgradeReply::Switched, end)));
    }
    Ok(Some((UpgradeReply::Declined(response), end)))
}
