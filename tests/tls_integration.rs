//! HTTP/2 over TLS: ALPN drives the protocol choice

mod common;

use common::{echo, init_test_logging, serve_one};
use h2cgate::http::h2::{Error, H2ClientBuilder, H2Server, Handshake, ServeOutcome};
use h2cgate::http::tls::TlsSessionOps;
use h2cgate::http::{SessionOps, Status};
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{select_next_proto, AlpnError, SslAcceptor, SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::{X509NameBuilder, X509};
use std::net::TcpStream;

const H2_AND_HTTP11: &[u8] = b"\x02h2\x08http/1.1";
const HTTP11_ONLY: &[u8] = b"\x08http/1.1";

fn self_signed() -> (X509, PKey<Private>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut cert = X509::builder().unwrap();
    cert.set_version(2).unwrap();
    cert.set_subject_name(&name).unwrap();
    cert.set_issuer_name(&name).unwrap();
    cert.set_pubkey(&key).unwrap();
    cert.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    cert.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    cert.sign(&key, MessageDigest::sha256()).unwrap();
    (cert.build(), key)
}

/// Acceptor selecting from `protocols`, or doing no ALPN at all
fn acceptor(protocols: Option<&'static [u8]>) -> SslAcceptor {
    let (cert, key) = self_signed();
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_private_key(&key).unwrap();
    builder.set_certificate(&cert).unwrap();
    if let Some(protocols) = protocols {
        builder.set_alpn_select_callback(move |_, client| {
            select_next_proto(protocols, client).ok_or(AlpnError::NOACK)
        });
    }
    builder.build()
}

fn connector(protocols: Option<&[u8]>) -> SslConnector {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    if let Some(protocols) = protocols {
        builder.set_alpn_protos(protocols).unwrap();
    }
    builder.build()
}

/// Serve one TLS connection; reports the handshake, `None` for HTTP/1.1
fn spawn_tls(
    alpn: Option<&'static [u8]>,
) -> (std::net::SocketAddr, std::thread::JoinHandle<h2cgate::http::h2::Result<Option<Handshake>>>) {
    let acceptor = acceptor(alpn);
    serve_one(move |tcp| {
        let session = TlsSessionOps::accept(&acceptor, tcp).unwrap();
        let server = H2Server::builder().handler(echo).build()?;
        Ok(match server.serve_connection(session)? {
            ServeOutcome::Http2(handshake) => Some(handshake),
            ServeOutcome::Http1(_) => None,
        })
    })
}

#[test]
fn test_alpn_h2() {
    init_test_logging();
    let (addr, handle) = spawn_tls(Some(H2_AND_HTTP11));

    let tcp = TcpStream::connect(addr).unwrap();
    let session = TlsSessionOps::connect(&connector(Some(H2_AND_HTTP11)), "localhost", tcp).unwrap();
    assert_eq!(session.alpn_protocol().as_deref(), Some(&b"h2"[..]));

    let mut client = H2ClientBuilder::new().authority("localhost").connect(session).unwrap();
    assert_eq!(client.handshake(), Some(Handshake::Alpn));

    let response = client.get("/secure").unwrap();
    assert_eq!(response.status(), Status::OK);
    assert_eq!(response.body(), b"GET /secure");

    let response = client.post("/upload", vec![7u8; 40_000]).unwrap();
    assert_eq!(response.body().len(), "POST /upload ".len() + 40_000);
    client.close().unwrap();

    assert_eq!(handle.join().unwrap().unwrap(), Some(Handshake::Alpn));
}

#[test]
fn test_alpn_http11_is_not_upgraded() {
    init_test_logging();
    let (addr, handle) = spawn_tls(Some(HTTP11_ONLY));

    let tcp = TcpStream::connect(addr).unwrap();
    let session = TlsSessionOps::connect(&connector(Some(H2_AND_HTTP11)), "localhost", tcp).unwrap();

    let Err(err) = H2ClientBuilder::new().connect(session) else {
        panic!("client accepted a connection without h2");
    };
    assert!(matches!(err, Error::AlpnFailed(Some(ref p)) if p == b"http/1.1"));

    // The server classifies by ALPN alone and hands the session back
    assert_eq!(handle.join().unwrap().unwrap(), None);
}

#[test]
fn test_tls_without_alpn_detects_preface() {
    init_test_logging();
    let (addr, handle) = spawn_tls(None);

    let tcp = TcpStream::connect(addr).unwrap();
    let session = TlsSessionOps::connect(&connector(None), "localhost", tcp).unwrap();
    assert_eq!(session.alpn_protocol(), None);

    let mut client = H2ClientBuilder::new().connect(session).unwrap();
    assert_eq!(client.handshake(), Some(Handshake::PriorKnowledge));
    assert_eq!(client.get("/plain").unwrap().body(), b"GET /plain");
    client.close().unwrap();

    assert_eq!(handle.join().unwrap().unwrap(), Some(Handshake::PriorKnowledge));
}
