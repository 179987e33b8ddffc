//! Request/response bridge
//!
//! Turns decoded HTTP/2 header lists into [`HttpRequest`]/[`HttpResponse`]
//! values and back, and runs the application [`Handler`] for each request.
//!
//! Handlers run on their own threads. The connection loop never blocks on
//! them: it hands a request to [`Bridge::dispatch`] and collects finished
//! responses with [`Bridge::poll_completed`], so responses complete in
//! whatever order the handlers finish.

use super::error::{Error, ErrorCode, Result};
use super::negotiate::HTTP2_SETTINGS_HEADER;
use super::stream::{HeaderFields, StreamId};
use crate::http::headers::is_connection_specific;
use crate::http::{Headers, HttpRequest, HttpResponse, Method, Status, Version};
use bytes::Bytes;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Error returned by a request handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler gave up on the request
    #[error("{0}")]
    Failed(String),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

/// Application request handler
///
/// Called once per request, on a worker thread. An `Err` (or a panic)
/// becomes a `500` on that stream only.
pub trait Handler: Send + Sync + 'static {
    /// Produce the response for `request`
    fn handle(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(HttpRequest) -> std::result::Result<HttpResponse, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HandlerError> {
        self(request)
    }
}

fn malformed(id: StreamId, reason: impl Into<String>) -> Error {
    Error::stream(id, ErrorCode::ProtocolError, reason)
}

fn utf8(id: StreamId, bytes: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| malformed(id, format!("{} is not valid UTF-8", what)))
}

/// Header fields split into pseudo headers and regular headers
#[derive(Debug, Default)]
struct SplitFields {
    pseudo: Vec<(String, String)>,
    headers: Headers,
}

impl SplitFields {
    fn take(&mut self, name: &str) -> Option<String> {
        let pos = self.pseudo.iter().position(|(n, _)| n == name)?;
        Some(self.pseudo.remove(pos).1)
    }
}

/// Validate field order and names, separating pseudo headers
fn split_fields(id: StreamId, fields: HeaderFields, allowed: &[&str]) -> Result<SplitFields> {
    let mut split = SplitFields::default();
    let mut seen_regular = false;

    for (name, value) in fields {
        let name = utf8(id, name, "header name")?;
        let value = utf8(id, value, "header value")?;

        if name.is_empty() || name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(malformed(id, format!("header name {:?} must be lowercase", name)));
        }

        if let Some(pseudo) = name.strip_prefix(':') {
            if seen_regular {
                return Err(malformed(id, format!("pseudo header :{} after regular header", pseudo)));
            }
            if !allowed.contains(&name.as_str()) {
                return Err(malformed(id, format!("unknown pseudo header {}", name)));
            }
            if split.pseudo.iter().any(|(n, _)| *n == name) {
                return Err(malformed(id, format!("duplicate pseudo header {}", name)));
            }
            split.pseudo.push((name, value));
            continue;
        }

        seen_regular = true;
        if is_connection_specific(&name) {
            return Err(malformed(id, format!("connection-specific header {}", name)));
        }
        if name == "te" && value != "trailers" {
            return Err(malformed(id, "TE header other than \"trailers\""));
        }
        if !split.headers.insert(name, value) {
            return Err(malformed(id, "too many header fields"));
        }
    }

    Ok(split)
}

fn check_content_length(id: StreamId, headers: &Headers, body_len: usize) -> Result<()> {
    match crate::http::parser::content_length(headers) {
        Ok(Some(declared)) if declared != body_len => Err(malformed(
            id,
            format!("content-length {} but body has {} bytes", declared, body_len),
        )),
        Ok(_) => Ok(()),
        Err(e) => Err(malformed(id, e.to_string())),
    }
}

/// Build the request a peer sent on stream `id`
///
/// Violations of the HTTP/2 message rules are stream-level
/// PROTOCOL_ERRORs. `:authority` becomes `Host` unless one is present.
pub fn request_from_fields(id: StreamId, fields: HeaderFields, body: Bytes) -> Result<HttpRequest> {
    let mut split = split_fields(id, fields, &[":method", ":scheme", ":path", ":authority"])?;

    let method_name = split
        .take(":method")
        .ok_or_else(|| malformed(id, "missing :method"))?;
    let method = Method::from_str(&method_name)
        .map_err(|_| malformed(id, format!("unsupported method {}", method_name)))?;
    let scheme = split.take(":scheme");
    let path = split.take(":path");
    let authority = split.take(":authority");

    let uri = if method == Method::Connect {
        if scheme.is_some() || path.is_some() {
            return Err(malformed(id, "CONNECT with :scheme or :path"));
        }
        authority
            .clone()
            .ok_or_else(|| malformed(id, "CONNECT without :authority"))?
    } else {
        if scheme.is_none() {
            return Err(malformed(id, "missing :scheme"));
        }
        match path {
            Some(path) if !path.is_empty() => path,
            _ => return Err(malformed(id, "missing or empty :path")),
        }
    };

    let mut headers = split.headers;
    if let Some(authority) = authority {
        if !headers.contains("host") && !headers.insert("host", authority) {
            return Err(malformed(id, "too many header fields"));
        }
    }
    check_content_length(id, &headers, body.len())?;

    let mut builder = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .version(Version::Http2)
        .headers(headers)
        .body(body);
    if let Some(scheme) = scheme {
        builder = builder.scheme(scheme);
    }
    Ok(builder.build())
}

/// Restate an upgraded HTTP/1.1 request as the request on stream 1
///
/// Hop-by-hop headers and `HTTP2-Settings` are dropped; the body stays.
pub fn upgraded_request(request: &HttpRequest) -> HttpRequest {
    let mut headers = request.headers().clone();
    headers.strip_connection_specific();
    headers.remove(HTTP2_SETTINGS_HEADER);
    HttpRequest::builder()
        .method(request.method())
        .uri(request.uri())
        .version(Version::Http2)
        .scheme("http")
        .headers(headers)
        .body(request.body_bytes())
        .build()
}

/// Header fields for a request we send
///
/// The `Host` header becomes `:authority`; `default_authority` is used when
/// there is none.
pub fn request_fields(request: &HttpRequest, default_authority: &str) -> HeaderFields {
    let authority = request
        .headers()
        .get("host")
        .unwrap_or(default_authority)
        .to_string();

    let mut fields: HeaderFields = vec![(b":method".to_vec(), request.method().as_str().into())];
    if request.method() == Method::Connect {
        fields.push((b":authority".to_vec(), authority.into_bytes()));
    } else {
        let scheme = request.scheme().unwrap_or("http");
        fields.push((b":scheme".to_vec(), scheme.as_bytes().to_vec()));
        fields.push((b":authority".to_vec(), authority.into_bytes()));
        fields.push((b":path".to_vec(), request.uri().as_bytes().to_vec()));
    }
    push_regular(&mut fields, request.headers(), &["host"]);
    fields
}

/// Header fields for a response we send; `:status` comes first
pub fn response_fields(response: &HttpResponse) -> HeaderFields {
    let mut fields: HeaderFields = vec![(
        b":status".to_vec(),
        response.status().code().to_string().into_bytes(),
    )];
    push_regular(&mut fields, response.headers(), &[]);
    fields
}

fn push_regular(fields: &mut HeaderFields, headers: &Headers, skip: &[&str]) {
    let mut headers = headers.clone();
    headers.strip_connection_specific();
    for (name, value) in headers.iter() {
        let name = name.to_ascii_lowercase();
        if name == "te" || skip.contains(&name.as_str()) {
            continue;
        }
        fields.push((name.into_bytes(), value.as_bytes().to_vec()));
    }
}

/// The `:status` of a response header list, if well-formed
pub fn status_of(fields: &HeaderFields) -> Option<u16> {
    fields
        .iter()
        .find(|(name, _)| name == b":status")
        .and_then(|(_, value)| std::str::from_utf8(value).ok())
        .and_then(|value| value.parse().ok())
}

/// Build the response a peer sent on stream `id`
pub fn response_from_fields(id: StreamId, fields: HeaderFields, body: Bytes) -> Result<HttpResponse> {
    let mut split = split_fields(id, fields, &[":status"])?;
    let status = split
        .take(":status")
        .ok_or_else(|| malformed(id, "missing :status"))?;
    let status = status
        .parse::<u16>()
        .ok()
        .and_then(|code| Status::new(code).ok())
        .ok_or_else(|| malformed(id, format!("invalid :status {}", status)))?;
    check_content_length(id, &split.headers, body.len())?;

    Ok(HttpResponse::builder()
        .version(Version::Http2)
        .status(status)
        .headers(split.headers)
        .body(body)
        .build())
}

/// Response sent when a handler fails
pub fn internal_error_response() -> HttpResponse {
    HttpResponse::builder()
        .version(Version::Http2)
        .status(Status::INTERNAL_SERVER_ERROR)
        .header("content-type", "text/plain")
        .body("Internal Server Error")
        .build()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Completion {
    stream_id: StreamId,
    response: HttpResponse,
}

/// Runs a handler per request and collects the responses
pub struct Bridge {
    handler: Arc<dyn Handler>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    in_flight: HashSet<StreamId>,
}

impl Bridge {
    /// Create a bridge around `handler`
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        let (tx, rx) = mpsc::channel();
        Bridge {
            handler,
            tx,
            rx,
            in_flight: HashSet::new(),
        }
    }

    /// Number of requests whose handler has not reported back
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run the handler for `request` on a worker thread
    pub fn dispatch(&mut self, stream_id: StreamId, request: HttpRequest) {
        tracing::debug!(stream_id, method = %request.method(), uri = request.uri(), "dispatching request");
        self.in_flight.insert(stream_id);

        let handler = Arc::clone(&self.handler);
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("h2-stream-{}", stream_id))
            .spawn(move || {
                let response = run_handler(handler.as_ref(), stream_id, request);
                // The connection may be gone already
                let _ = tx.send(Completion { stream_id, response });
            });

        if let Err(e) = spawned {
            tracing::warn!(stream_id, error = %e, "failed to spawn handler thread");
            let _ = self.tx.send(Completion {
                stream_id,
                response: internal_error_response(),
            });
        }
    }

    /// Forget a request; its response is dropped when it arrives
    pub fn cancel(&mut self, stream_id: StreamId) {
        if self.in_flight.remove(&stream_id) {
            tracing::debug!(stream_id, "cancelled pending handler");
        }
    }

    /// Forget every pending request
    pub fn cancel_all(&mut self) {
        self.in_flight.clear();
    }

    /// Responses that are ready, in completion order
    pub fn poll_completed(&mut self) -> Vec<(StreamId, HttpResponse)> {
        let mut ready = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            self.accept(completion, &mut ready);
        }
        ready
    }

    /// Wait up to `timeout` for one response, then collect any others ready
    pub fn wait_completed(&mut self, timeout: Duration) -> Vec<(StreamId, HttpResponse)> {
        let mut ready = Vec::new();
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => self.accept(completion, &mut ready),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return ready,
        }
        ready.extend(self.poll_completed());
        ready
    }

    fn accept(&mut self, completion: Completion, ready: &mut Vec<(StreamId, HttpResponse)>) {
        if self.in_flight.remove(&completion.stream_id) {
            ready.push((completion.stream_id, completion.response));
        }
    }
}

fn run_handler(handler: &dyn Handler, stream_id: StreamId, request: HttpRequest) -> HttpResponse {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request)))
        .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(mut response) => {
            response.set_version(Version::Http2);
            response
        }
        Err(e) => {
            tracing::warn!(stream_id, error = %e, "handler failed");
            internal_error_response()
        }
    }
}
