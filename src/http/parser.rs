//! HTTP/1.1 message parsing
//!
//! Only as much HTTP/1.1 as the h2c upgrade handshake needs: request heads
//! (server side, to spot `Upgrade: h2c`) and response heads (client side,
//! to spot `101 Switching Protocols`). Head parsing works on a complete,
//! already-delimited byte slice so callers can bound how much they buffer.

use super::{Error, Headers, HttpRequest, HttpResponse, Method, Result, Status, Version};

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Find the end of a message head
///
/// Returns the offset just past the blank line (`\r\n\r\n`) that terminates
/// the head, or `None` if the head is not complete yet.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Parse HTTP request line
///
/// Format: METHOD URI VERSION\r\n
/// Example: GET /index.html HTTP/1.1\r\n
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split(' ').collect();

    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Parse(format!("Invalid request line: {:?}", line)));
    }

    let method = Method::from_str(parts[0])?;
    let uri = parts[1].to_string();
    let version = match Version::from_str(parts[2])? {
        Version::Http2 => return Err(Error::InvalidVersion(parts[2].to_string())),
        v => v,
    };

    Ok((method, uri, version))
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON\r\n
/// Example: HTTP/1.1 200 OK\r\n
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::from_str(parts[0])?;
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(status_code)?;
    let reason = if parts.len() == 3 {
        parts[2].to_string()
    } else {
        status.reason_phrase().to_string()
    };

    Ok((version, status, reason))
}

/// Split a head into its start line and header block
fn split_head(head: &[u8]) -> Result<(String, Headers)> {
    let crlf_pos = find_crlf(head).ok_or(Error::Incomplete)?;
    let start_line = std::str::from_utf8(&head[..crlf_pos])
        .map_err(|_| Error::Parse("Start line is not valid UTF-8".to_string()))?
        .to_string();

    let mut headers = Headers::new();
    let mut rest = &head[crlf_pos + 2..];
    loop {
        let pos = find_crlf(rest).ok_or(Error::Incomplete)?;
        if pos == 0 {
            break;
        }
        let line = std::str::from_utf8(&rest[..pos])
            .map_err(|_| Error::InvalidHeader("Header line is not valid UTF-8".to_string()))?;
        let (name, value) = Headers::parse_header_line(line)?;
        if !headers.insert(name, value) {
            return Err(Error::InvalidHeader("Too many headers".to_string()));
        }
        rest = &rest[pos + 2..];
    }

    Ok((start_line, headers))
}

/// Parse a complete request head (request line plus headers, up to and
/// including the blank line). The body is left empty.
pub fn parse_request_head(head: &[u8]) -> Result<HttpRequest> {
    let (line, headers) = split_head(head)?;
    let (method, uri, version) = parse_request_line(&line)?;

    Ok(HttpRequest::builder()
        .method(method)
        .uri(uri)
        .version(version)
        .headers(headers)
        .build())
}

/// Parse a complete response head. The body is left empty.
pub fn parse_response_head(head: &[u8]) -> Result<HttpResponse> {
    let (line, headers) = split_head(head)?;
    let (version, status, reason) = parse_status_line(&line)?;

    Ok(HttpResponse::builder()
        .version(version)
        .status(status)
        .reason(reason)
        .headers(headers)
        .build())
}

/// Read the declared Content-Length, if any
pub fn content_length(headers: &Headers) -> Result<Option<usize>> {
    let values = headers.get_all("Content-Length");
    let Some(first) = values.first() else {
        return Ok(None);
    };
    if values.iter().any(|v| v != first) {
        return Err(Error::InvalidHeader("Conflicting Content-Length values".to_string()));
    }
    first
        .parse::<usize>()
        .map(Some)
        .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", first)))
}

/// Incremental HTTP/1.1 response parser
///
/// Used by the client when a server declines the h2c upgrade and answers in
/// plain HTTP/1.1.
pub struct ResponseParser {
    buffer: Vec<u8>,
    head: Option<HttpResponse>,
    body_len: usize,
    done: bool,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        ResponseParser {
            buffer: Vec::new(),
            head: None,
            body_len: 0,
            done: false,
        }
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(response)) when a complete response is parsed,
    /// Ok(None) if more data is needed, or Err on parse error.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpResponse>> {
        if self.done {
            return Ok(None);
        }
        self.buffer.extend_from_slice(data);

        if self.head.is_none() {
            let Some(end) = find_head_end(&self.buffer) else {
                return Ok(None);
            };
            let head = parse_response_head(&self.buffer[..end])?;
            self.body_len = content_length(head.headers())?.unwrap_or(0);
            self.buffer.drain(..end);
            self.head = Some(head);
        }

        if self.buffer.len() < self.body_len {
            return Ok(None);
        }

        let Some(mut response) = self.head.take() else {
            return Ok(None);
        };
        let body: Vec<u8> = self.buffer.drain(..self.body_len).collect();
        response.set_body(body);
        self.done = true;
        Ok(Some(response))
    }

    /// Reset the parser for reuse
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.head = None;
        self.body_len = 0;
        self.done = false;
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let (method, uri, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(uri, "/index.html");
        assert_eq!(version, Version::Http11);

        assert!(parse_request_line("PRI * HTTP/2.0").is_err());
        assert!(parse_request_line("GET  / HTTP/1.1").is_err());
        assert!(parse_request_line("GET / HTTP/2.0").is_err());
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 101 Switching Protocols").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 101);
        assert_eq!(reason, "Switching Protocols");

        let (_, status, reason) = parse_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nrest"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: a\r\n"), None);
    }

    #[test]
    fn test_parse_request_head() {
        let head = b"GET /x HTTP/1.1\r\nHost: a\r\nUpgrade: h2c\r\n\r\n";
        let req = parse_request_head(head).unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.uri(), "/x");
        assert_eq!(req.headers().get("upgrade"), Some("h2c"));
        assert!(req.body().is_empty());

        assert!(parse_request_head(b"GET /x HTTP/1.1\r\nHost a\r\n\r\n").is_err());
    }

    #[test]
    fn test_content_length() {
        let mut headers = Headers::new();
        assert_eq!(content_length(&headers).unwrap(), None);
        headers.insert("Content-Length", "12");
        assert_eq!(content_length(&headers).unwrap(), Some(12));
        headers.insert("Content-Length", "13");
        assert!(content_length(&headers).is_err());
    }

    #[test]
    fn test_response_parser_incremental() {
        let mut parser = ResponseParser::new();

        assert!(parser.parse(b"HTTP/1.1 ").unwrap().is_none());
        assert!(parser.parse(b"200 OK\r\n").unwrap().is_none());
        assert!(parser.parse(b"Content-Type: text/plain\r\n").unwrap().is_none());
        assert!(parser.parse(b"Content-Length: 4\r\n\r\n").unwrap().is_none());
        let resp = parser.parse(b"Test").unwrap().unwrap();

        assert_eq!(resp.status().code(), 200);
        assert_eq!(resp.body(), b"Test");
        assert_eq!(resp.headers().get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"Hello\r\nWorld"), Some(5));
        assert_eq!(find_crlf(b"NoEOL"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
    }
}
