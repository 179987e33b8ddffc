//! HTTP headers handling
//!
//! This module provides a type for managing HTTP headers with case-insensitive
//! lookups and support for multiple values per header name. The same type is
//! used for HTTP/1.1 upgrade requests and for header lists decoded from
//! HTTP/2 HEADERS frames.

use super::{Error, Result, MAX_HEADERS};
use std::fmt;

/// Header names that only make sense on a single HTTP/1.1 hop.
///
/// HTTP/2 forbids them (RFC 9113 Section 8.2.2); the bridge strips them from
/// responses and rejects requests carrying them.
pub const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// HTTP headers collection
///
/// Headers are stored in insertion order and support:
/// - Case-insensitive header name lookups
/// - Multiple values for the same header name
/// - Comma-separated token lists (`Connection: Upgrade, HTTP2-Settings`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header
    ///
    /// If a header with the same name (case-insensitive) already exists,
    /// this adds another value rather than replacing it. Returns `false`
    /// when the collection is full and the header was not stored.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        if self.headers.len() >= MAX_HEADERS {
            return false;
        }

        self.headers.push((name.into(), value.into()));
        true
    }

    /// Replace every value of a header with a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.insert(name, value);
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Count how many times a header appears
    pub fn count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Check whether any value of `name`, read as a comma-separated token
    /// list, contains `token` (case-insensitive)
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).iter().any(|value| {
            value
                .split(',')
                .any(|item| item.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Drop every hop-by-hop header, including the ones a `Connection`
    /// header nominates
    pub fn strip_connection_specific(&mut self) {
        let nominated: Vec<String> = self
            .get_all("connection")
            .iter()
            .flat_map(|value| value.split(','))
            .map(|item| item.trim().to_ascii_lowercase())
            .filter(|item| !item.is_empty())
            .collect();

        self.headers.retain(|(n, _)| {
            !is_connection_specific(n) && !nominated.iter().any(|c| n.eq_ignore_ascii_case(c))
        });
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Clear all headers
    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            if name.is_empty() {
                return Err(Error::InvalidHeader("Empty header name".to_string()));
            }
            if name.contains(char::is_whitespace) {
                return Err(Error::InvalidHeader(format!("Whitespace in header name: {}", name)));
            }

            Ok((name, value))
        } else {
            Err(Error::InvalidHeader(format!("No colon in header: {}", line)))
        }
    }
}

/// Check whether a header name is hop-by-hop
pub fn is_connection_specific(name: &str) -> bool {
    CONNECTION_SPECIFIC.iter().any(|h| name.eq_ignore_ascii_case(h))
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("Content-Length", "42");

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn test_multiple_values() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("set-cookie", "b=2");

        assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.count("SET-COOKIE"), 2);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = Headers::new();
        headers.insert("Host", "a");
        headers.insert("host", "b");
        headers.set("HOST", "c");

        assert_eq!(headers.get_all("host"), vec!["c"]);
    }

    #[test]
    fn test_contains_token() {
        let mut headers = Headers::new();
        headers.insert("Connection", "Upgrade, HTTP2-Settings");
        headers.insert("Upgrade", "websocket");
        headers.insert("Upgrade", "h2c");

        assert!(headers.contains_token("connection", "upgrade"));
        assert!(headers.contains_token("connection", "http2-settings"));
        assert!(headers.contains_token("upgrade", "H2C"));
        assert!(!headers.contains_token("connection", "close"));
        assert!(!headers.contains_token("missing", "x"));
    }

    #[test]
    fn test_strip_connection_specific() {
        let mut headers = Headers::new();
        headers.insert("Connection", "Upgrade, X-Hop");
        headers.insert("Upgrade", "h2c");
        headers.insert("X-Hop", "1");
        headers.insert("Keep-Alive", "timeout=5");
        headers.insert("Content-Type", "text/plain");

        headers.strip_connection_specific();

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Content-Type"]);
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("X-Remove", "value1");
        headers.insert("X-Keep", "value2");
        headers.insert("X-Remove", "value3");

        assert_eq!(headers.remove("X-Remove"), 2);
        assert_eq!(headers.get("X-Remove"), None);
        assert_eq!(headers.get("X-Keep"), Some("value2"));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("HTTP2-Settings: AAMAAABk").unwrap();
        assert_eq!(name, "HTTP2-Settings");
        assert_eq!(value, "AAMAAABk");

        let (name, value) = Headers::parse_header_line("X-Custom:  value  ").unwrap();
        assert_eq!(name, "X-Custom");
        assert_eq!(value, "value");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
        assert!(Headers::parse_header_line("Bad Name: value").is_err());
    }

    #[test]
    fn test_max_headers() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS {
            assert!(headers.insert(format!("Header-{}", i), "value"));
        }
        assert!(!headers.insert("One-Too-Many", "value"));
        assert_eq!(headers.len(), MAX_HEADERS);
    }
}
