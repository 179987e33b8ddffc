//! End-to-end tests: the HTTP/2 client against the HTTP/2 server over
//! loopback TCP, cleartext only.

mod common;

use common::{connect, echo, init_test_logging, serve_one};
use h2cgate::http::h2::{
    ClientMode, Error, H2ClientBuilder, H2Config, H2Server, Handshake, ServeOutcome,
};
use h2cgate::http::{
    FdSessionOps, HttpRequest, HttpResponse, Method, SessionOps, Status, Version,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

fn echo_server(config: H2Config) -> Arc<H2Server> {
    Arc::new(H2Server::builder().config(config).handler(echo).build().unwrap())
}

/// Serve one connection and report which handshake it used
fn spawn_h2(server: Arc<H2Server>) -> (std::net::SocketAddr, thread::JoinHandle<h2cgate::http::h2::Result<Option<Handshake>>>) {
    serve_one(move |tcp| {
        server
            .serve_connection(FdSessionOps::new(tcp))
            .map(|outcome| match outcome {
                ServeOutcome::Http2(handshake) => Some(handshake),
                ServeOutcome::Http1(_) => None,
            })
    })
}

#[test]
fn test_prior_knowledge_round_trip() {
    init_test_logging();
    let (addr, server) = spawn_h2(echo_server(H2Config::default()));

    let mut client = H2ClientBuilder::new()
        .mode(ClientMode::PriorKnowledge)
        .authority(addr.to_string())
        .connect(connect(addr))
        .unwrap();
    assert_eq!(client.handshake(), Some(Handshake::PriorKnowledge));

    let response = client.get("/hello").unwrap();
    assert_eq!(response.status(), Status::OK);
    assert_eq!(response.version(), Version::Http2);
    assert_eq!(response.headers().get("content-type"), Some("text/plain"));
    assert_eq!(response.body(), b"GET /hello");

    let response = client.post("/submit", "payload").unwrap();
    assert_eq!(response.body(), b"POST /submit payload");

    client.ping().unwrap();
    client.close().unwrap();

    let handshake = server.join().unwrap().unwrap();
    assert_eq!(handshake, Some(Handshake::PriorKnowledge));
}

#[test]
fn test_upgrade_round_trip() {
    init_test_logging();
    let (addr, server) = spawn_h2(echo_server(H2Config::default()));

    let mut client = H2ClientBuilder::new()
        .mode(ClientMode::Upgrade)
        .authority(addr.to_string())
        .connect(connect(addr))
        .unwrap();
    assert_eq!(client.handshake(), None);

    // The first request rides on the upgrade and is answered on stream 1
    let response = client.get("/first").unwrap();
    assert_eq!(response.status(), Status::OK);
    assert_eq!(response.version(), Version::Http2);
    assert_eq!(response.body(), b"GET /first");
    assert_eq!(client.handshake(), Some(Handshake::Upgrade));

    let response = client.get("/second").unwrap();
    assert_eq!(response.body(), b"GET /second");
    client.close().unwrap();

    assert_eq!(server.join().unwrap().unwrap(), Some(Handshake::Upgrade));
}

/// Minimal HTTP/1.1 responder used as the fallback
fn http1_responder(mut session: h2cgate::http::Rewind<FdSessionOps>) -> h2cgate::http::h2::Result<()> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if session.read(&mut byte)? == 0 {
            break;
        }
        head.push(byte[0]);
    }
    let line = String::from_utf8_lossy(&head);
    let path = line.split(' ').nth(1).unwrap_or("/").to_string();
    let body = format!("http1 {path}");
    let wire = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let mut bytes = wire.as_bytes();
    while !bytes.is_empty() {
        let n = session.write(bytes)?;
        bytes = &bytes[n..];
    }
    session.close()?;
    Ok(())
}

#[test]
fn test_http1_fallback() {
    init_test_logging();
    let server = echo_server(H2Config::default());
    let (addr, handle) = serve_one(move |tcp| {
        server.serve_or_fallback(FdSessionOps::new(tcp), &http1_responder)
    });

    let mut tcp = TcpStream::connect(addr).unwrap();
    tcp.write_all(b"GET /legacy HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();
    let mut reply = String::new();
    tcp.read_to_string(&mut reply).unwrap();

    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.ends_with("http1 /legacy"));
    assert_eq!(handle.join().unwrap().unwrap(), None);
}

#[test]
fn test_upgrade_declined_by_http1_server() {
    init_test_logging();
    let config = H2Config::builder().allow_upgrade(false).build().unwrap();
    let server = echo_server(config);
    let (addr, handle) = serve_one(move |tcp| {
        server.serve_or_fallback(FdSessionOps::new(tcp), &http1_responder)
    });

    let mut client = H2ClientBuilder::new()
        .mode(ClientMode::Upgrade)
        .authority(addr.to_string())
        .connect(connect(addr))
        .unwrap();

    let response = client.get("/old").unwrap();
    assert_eq!(response.status(), Status::OK);
    assert_eq!(response.version(), Version::Http11);
    assert_eq!(response.body(), b"http1 /old");
    assert_eq!(client.handshake(), None);

    assert!(matches!(client.get("/again"), Err(Error::Http11Required(200))));
    assert_eq!(handle.join().unwrap().unwrap(), None);
}

#[test]
fn test_streams_in_flight_complete_out_of_order() {
    init_test_logging();
    let server = Arc::new(
        H2Server::builder()
            .handler(|request: HttpRequest| {
                let delay: u64 = request.uri().trim_start_matches('/').parse().unwrap_or(0);
                thread::sleep(Duration::from_millis(delay));
                Ok(HttpResponse::builder()
                    .status(Status::OK)
                    .body(request.uri().to_string())
                    .build())
            })
            .build()
            .unwrap(),
    );
    let (addr, handle) = spawn_h2(server);

    let mut client = H2ClientBuilder::new().connect(connect(addr)).unwrap();
    let ids: Vec<_> = ["/300", "/150", "/0"]
        .iter()
        .map(|path| client.send_request(&HttpRequest::new(Method::Get, *path)).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 3, 5]);

    for (id, path) in ids.iter().zip(["/300", "/150", "/0"]).rev() {
        let response = client.wait_response(*id).unwrap();
        assert_eq!(response.body(), path.as_bytes());
    }
    client.close().unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn test_bodies_larger_than_the_window() {
    init_test_logging();
    let server = Arc::new(
        H2Server::builder()
            .handler(|request: HttpRequest| {
                let mut body = request.body().to_vec();
                body.reverse();
                Ok(HttpResponse::builder().status(Status::OK).body(body).build())
            })
            .build()
            .unwrap(),
    );
    let (addr, handle) = spawn_h2(server);

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let mut expected = payload.clone();
    expected.reverse();

    let mut client = H2ClientBuilder::new().connect(connect(addr)).unwrap();
    let response = client.post("/reverse", payload).unwrap();
    assert_eq!(response.body().len(), expected.len());
    assert!(response.body() == expected.as_slice());
    client.close().unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn test_handler_panic_becomes_internal_error() {
    init_test_logging();
    let server = Arc::new(
        H2Server::builder()
            .handler(|request: HttpRequest| {
                if request.uri() == "/panic" {
                    panic!("handler blew up");
                }
                Ok(HttpResponse::new(Status::OK))
            })
            .build()
            .unwrap(),
    );
    let (addr, handle) = spawn_h2(server);

    let mut client = H2ClientBuilder::new().connect(connect(addr)).unwrap();
    let response = client.get("/panic").unwrap();
    assert_eq!(response.status().code(), 500);

    // The connection survives the failed handler
    let response = client.get("/fine").unwrap();
    assert_eq!(response.status(), Status::OK);
    client.close().unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn test_graceful_shutdown_drains_in_flight_request() {
    init_test_logging();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let server = Arc::new(
        H2Server::builder()
            .handler(move |_request: HttpRequest| {
                let _ = started_tx.lock().unwrap().send(());
                thread::sleep(Duration::from_millis(200));
                Ok(HttpResponse::builder().status(Status::OK).body("done").build())
            })
            .build()
            .unwrap(),
    );
    let shutdown = server.shutdown_handle();
    let (addr, handle) = spawn_h2(server);

    let mut client = H2ClientBuilder::new().connect(connect(addr)).unwrap();
    let id = client.send_request(&HttpRequest::new(Method::Get, "/slow")).unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    shutdown.shutdown();

    let response = client.wait_response(id).unwrap();
    assert_eq!(response.body(), b"done");
    assert!(client.get("/late").is_err());

    assert_eq!(handle.join().unwrap().unwrap(), Some(Handshake::PriorKnowledge));
}
