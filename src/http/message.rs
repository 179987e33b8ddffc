//! HTTP message types
//!
//! This module defines the core types for HTTP requests and responses. The
//! same types travel over HTTP/1.1 (the upgrade handshake) and HTTP/2 (the
//! request/response bridge); [`Version`] records which one carried them.

use super::{Error, Result, Headers, CRLF};
use bytes::Bytes;
use std::fmt;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse method from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
    Http2,
}

impl Version {
    /// Parse version from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            "HTTP/2.0" | "HTTP/2" => Ok(Version::Http2),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Http2 => "HTTP/2.0",
        }
    }

    /// Major protocol number (1 or 2)
    pub fn major(&self) -> u8 {
        match self {
            Version::Http10 | Version::Http11 => 1,
            Version::Http2 => 2,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            421 => "Misdirected Request",
            426 => "Upgrade Required",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    // Common status codes as constants
    pub const SWITCHING_PROTOCOLS: Status = Status { code: 101 };
    pub const OK: Status = Status { code: 200 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// HTTP request
///
/// For HTTP/2 requests `uri` holds the `:path` pseudo-header and `scheme`
/// the `:scheme` one; `:authority` is surfaced as the `Host` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: Method,
    uri: String,
    version: Version,
    scheme: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl HttpRequest {
    /// Create a new HTTP request
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        HttpRequest {
            method,
            uri: uri.into(),
            version: Version::default(),
            scheme: None,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the request URI (the path for HTTP/2 requests)
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Set the HTTP version
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Get the request scheme, if known
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get a cheap handle on the body
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Set the body
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Convert the request to HTTP/1.x wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        // Request line
        buf.extend_from_slice(self.method.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.uri.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        write_fields(&mut buf, &self.headers);
        buf.extend_from_slice(&self.body);

        buf
    }
}

fn write_fields(buf: &mut Vec<u8>, headers: &Headers) {
    for (name, value) in headers.iter() {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
    }
    buf.extend_from_slice(CRLF.as_bytes());
}

/// Builder for HTTP requests
#[derive(Debug, Default)]
pub struct HttpRequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Option<Version>,
    scheme: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl HttpRequestBuilder {
    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the URI
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the HTTP version
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the scheme
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the whole header list
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the request
    pub fn build(self) -> HttpRequest {
        HttpRequest {
            method: self.method.unwrap_or(Method::Get),
            uri: self.uri.unwrap_or_else(|| "/".to_string()),
            version: self.version.unwrap_or_default(),
            scheme: self.scheme,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl HttpResponse {
    /// Create a new HTTP response
    pub fn new(status: Status) -> Self {
        let reason = status.reason_phrase().to_string();
        HttpResponse {
            version: Version::default(),
            status,
            reason,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Create a builder for constructing responses
    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder::default()
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Set the HTTP version
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Get the status code
    pub fn status(&self) -> Status {
        self.status
    }

    /// Get the reason phrase
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get a cheap handle on the body
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Set the body
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Convert the response to HTTP/1.x wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        // Status line
        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.code().to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.reason.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        write_fields(&mut buf, &self.headers);
        buf.extend_from_slice(&self.body);

        buf
    }
}

/// Builder for HTTP responses
#[derive(Debug, Default)]
pub struct HttpResponseBuilder {
    version: Option<Version>,
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl HttpResponseBuilder {
    /// Set the HTTP version
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the status code
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the reason phrase
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the whole header list
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the response
    pub fn build(self) -> HttpResponse {
        let status = self.status.unwrap_or(Status::OK);
        let reason = self.reason.unwrap_or_else(|| status.reason_phrase().to_string());
        HttpResponse {
            version: self.version.unwrap_or_default(),
            status,
            reason,
            headers: self.headers,
            body: self.body,
        }
    }
}
