//! h2cgate - HTTP/2 cleartext negotiation and multiplexing core
//!
//! This crate detects how a freshly accepted (or dialed) connection wants to
//! speak HTTP/2 (TLS-ALPN, h2c prior knowledge or the HTTP/1.1 `Upgrade: h2c`
//! handshake), then multiplexes HTTP/2 streams over it and bridges each
//! stream to a single request handler.
//!
//! Everything lives under [`http`]: the HTTP/1.1 text pieces needed for the
//! upgrade handshake at the top level, the HTTP/2 machinery in [`http::h2`].

pub mod http;
