//! End-to-end scenarios over real TLS on loopback.
//!
//! Each test binds a freshly picked loopback port, except the scenario pinned
//! to localhost:8443.

use std::time::Duration;

use tls_lifecycle::{
    ClientConfig, Error, EventKind, LifecycleState, NotificationEvent, ServerConfig, ServerEvent,
    TlsClient, TlsServer, TransportErrorKind,
};

mod common;
use common::{free_port, next, TestPki};

fn server_config(pki: &TestPki, port: u32) -> ServerConfig {
    let mut config = ServerConfig::new(port, &pki.cert, &pki.key);
    config.host = "127.0.0.1".to_string();
    config.close_timeout_ms = 500;
    config
}

fn relaxed_client(port: u32) -> ClientConfig {
    let mut config = ClientConfig::new("127.0.0.1", port);
    config.servername = Some("localhost".to_string());
    config.reject_unauthorized = false;
    config.close_timeout_ms = 500;
    config
}

fn strict_client(pki: &TestPki, port: u32) -> ClientConfig {
    let mut config = relaxed_client(port);
    config.reject_unauthorized = true;
    config.ca = Some(pki.ca.clone());
    config
}

/// Skip listener events until the server reports a peer event.
async fn next_peer_event(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
) -> (tls_lifecycle::ConnectionId, NotificationEvent) {
    loop {
        if let ServerEvent::Peer { connection, event } = next(events).await {
            return (connection, event);
        }
    }
}

#[tokio::test]
async fn relaxed_client_on_localhost_8443() {
    let pki = TestPki::generate();
    let server = TlsServer::new(server_config(&pki, 8443));
    let mut server_events = server.subscribe(&[EventKind::Connect, EventKind::Data]);
    server.start().await.unwrap();

    let mut config = ClientConfig::new("localhost", 8443);
    config.reject_unauthorized = false;
    let client = TlsClient::new(config);
    let mut client_events = client.subscribe(&[]);

    let identity = client.connect().await.unwrap();
    assert!(!identity.authorized);
    assert!(identity.protocol.starts_with("TLSv1."));
    assert_ne!(identity.cipher, "unknown");
    let cert = identity.cert.clone().unwrap();
    assert_eq!(cert.subject, "localhost");
    assert_eq!(cert.issuer, "tls-lifecycle test CA");
    assert_eq!(cert.fingerprint.len(), 32 * 3 - 1);

    // Connected precedes any data.
    assert_eq!(
        next(&mut client_events).await,
        NotificationEvent::Connected(identity)
    );

    let (accepted, event) = next_peer_event(&mut server_events).await;
    assert!(matches!(event, NotificationEvent::Connected(_)));

    client.write("ping").await.unwrap();
    let (connection, event) = next_peer_event(&mut server_events).await;
    assert_eq!(connection, accepted);
    match event {
        NotificationEvent::DataReceived { data, connection: handle } => {
            assert_eq!(&data[..], b"ping");
            assert_eq!(handle, accepted);
            assert!(server.connection(handle).is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Exactly once.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server_events.try_recv().is_err());

    client.disconnect().await;
    assert_eq!(client.state(), LifecycleState::Closed);
    server.stop().await;
}

#[tokio::test]
async fn stop_leaves_active_peers_running() {
    let pki = TestPki::generate();
    let port = free_port();
    let server = TlsServer::new(server_config(&pki, port));
    let mut server_events = server.subscribe(&[]);
    server.start().await.unwrap();
    assert!(server.is_listening());

    let client = TlsClient::new(relaxed_client(port));
    client.connect().await.unwrap();
    let (accepted, _) = next_peer_event(&mut server_events).await;

    server.stop().await;
    assert!(!server.is_listening());
    assert_eq!(server.listener_state(), LifecycleState::Closed);
    loop {
        if next(&mut server_events).await == ServerEvent::Closed {
            break;
        }
    }

    let peer = server.connection(accepted).unwrap();
    assert!(peer.is_active());
    assert!(client.is_active());

    // Traffic still flows both ways.
    let mut client_data = client.subscribe(&[EventKind::Data]);
    client.write("still here").await.unwrap();
    let (_, event) = next_peer_event(&mut server_events).await;
    assert!(matches!(
        event,
        NotificationEvent::DataReceived { ref data, .. } if &data[..] == b"still here"
    ));
    peer.send(b"me too").await.unwrap();
    assert!(matches!(
        next(&mut client_data).await,
        NotificationEvent::DataReceived { ref data, .. } if &data[..] == b"me too"
    ));

    // Draining is the caller's job.
    for peer in server.connections() {
        peer.close().await;
    }
    assert_eq!(peer.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn inactivity_timeout_closes_gracefully() {
    let pki = TestPki::generate();
    let port = free_port();
    let server = TlsServer::new(server_config(&pki, port));
    let mut server_events = server.subscribe(&[EventKind::End]);
    server.start().await.unwrap();

    let mut config = relaxed_client(port);
    config.timeout_ms = Some(250);
    let client = TlsClient::new(config);
    let mut events = client.subscribe(&[EventKind::Timeout, EventKind::Close, EventKind::Error]);
    client.connect().await.unwrap();

    assert_eq!(next(&mut events).await, NotificationEvent::TimedOut);
    assert_eq!(next(&mut events).await, NotificationEvent::Closed);
    assert_eq!(client.state(), LifecycleState::Closed);

    // The server saw an orderly end, not an error.
    let (_, event) = next_peer_event(&mut server_events).await;
    assert_eq!(event, NotificationEvent::PeerClosed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    server.stop().await;
}

#[tokio::test]
async fn strict_client_trusting_the_ca_is_authorized() {
    let pki = TestPki::generate();
    let port = free_port();
    let server = TlsServer::new(server_config(&pki, port));
    server.start().await.unwrap();

    let client = TlsClient::new(strict_client(&pki, port));
    let identity = client.connect().await.unwrap();
    assert!(identity.authorized);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn relaxed_client_trusting_the_ca_is_authorized() {
    let pki = TestPki::generate();
    let port = free_port();
    let server = TlsServer::new(server_config(&pki, port));
    server.start().await.unwrap();

    let mut config = relaxed_client(port);
    config.ca = Some(pki.ca.clone());
    let client = TlsClient::new(config);
    assert!(client.connect().await.unwrap().authorized);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn strict_client_rejects_unknown_issuer() {
    let pki = TestPki::generate();
    let port = free_port();
    let server = TlsServer::new(server_config(&pki, port));
    let mut server_events = server.subscribe(&[EventKind::ClientError]);
    server.start().await.unwrap();

    // No ca: the public root set cannot verify the test CA.
    let mut config = relaxed_client(port);
    config.reject_unauthorized = true;
    let client = TlsClient::new(config);
    let mut events = client.subscribe(&[]);

    match client.connect().await {
        Err(Error::Transport(error)) => assert_eq!(error.kind, TransportErrorKind::Handshake),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(client.state(), LifecycleState::Failed);
    assert!(matches!(
        next(&mut events).await,
        NotificationEvent::TransportError(_)
    ));

    // The server sees the aborted handshake as a client error.
    assert!(matches!(
        next(&mut server_events).await,
        ServerEvent::ClientError { .. }
    ));
    assert!(server.is_listening());
    server.stop().await;
}

#[tokio::test]
async fn second_start_is_rejected_until_stopped() {
    let pki = TestPki::generate();
    let port = free_port();
    let server = TlsServer::new(server_config(&pki, port));
    let addr = server.start().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));

    let err = server.start().await.unwrap_err();
    assert!(err.is_configuration());
    assert!(server.is_listening());

    server.stop().await;
    server.stop().await;
    assert!(server.local_addr().is_none());

    server.start().await.unwrap();
    assert!(server.is_listening());
    server.stop().await;
}

#[tokio::test]
async fn bind_conflict_is_reported() {
    let pki = TestPki::generate();
    let port = free_port();
    let first = TlsServer::new(server_config(&pki, port));
    first.start().await.unwrap();

    let second = TlsServer::new(server_config(&pki, port));
    let mut events = second.subscribe(&[EventKind::Error]);
    match second.start().await {
        Err(Error::Transport(error)) => assert_eq!(error.kind, TransportErrorKind::Connect),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(next(&mut events).await, ServerEvent::Error(_)));
    assert_eq!(second.listener_state(), LifecycleState::Failed);

    first.stop().await;
}

#[tokio::test]
async fn server_close_ends_the_client() {
    let pki = TestPki::generate();
    let port = free_port();
    let server = TlsServer::new(server_config(&pki, port));
    let mut server_events = server.subscribe(&[EventKind::Connect]);
    server.start().await.unwrap();

    let client = TlsClient::new(relaxed_client(port));
    let mut events = client.subscribe(&[EventKind::End, EventKind::Close]);
    client.connect().await.unwrap();

    let (accepted, _) = next_peer_event(&mut server_events).await;
    server.connection(accepted).unwrap().close().await;

    assert_eq!(next(&mut events).await, NotificationEvent::PeerClosed);
    assert!(matches!(client.write("too late").await, Err(Error::NotActive)));
    assert_eq!(next(&mut events).await, NotificationEvent::Closed);

    // The server forgets a peer once it is terminal.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.connection(accepted).is_none());
    server.stop().await;
}

#[tokio::test]
async fn mutual_tls_reports_client_identity() {
    let pki = TestPki::generate();
    let port = free_port();
    let mut config = server_config(&pki, port);
    config.request_cert = true;
    config.ca = Some(pki.ca.clone());
    let server = TlsServer::new(config);
    let mut server_events = server.subscribe(&[EventKind::Connect]);
    server.start().await.unwrap();

    let mut config = strict_client(&pki, port);
    config.cert = Some(pki.cert.clone());
    config.key = Some(pki.key.clone());
    let client = TlsClient::new(config);
    client.connect().await.unwrap();

    let (_, event) = next_peer_event(&mut server_events).await;
    match event {
        NotificationEvent::Connected(identity) => {
            assert!(identity.authorized);
            assert_eq!(identity.cert.unwrap().subject, "localhost");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    client.disconnect().await;
    server.stop().await;
}
