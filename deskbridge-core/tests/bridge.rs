//! Integration tests: whole sessions through the bridge against fake RFB
//! servers on localhost and the in-memory backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use deskbridge_core::rfb::wire::PixelFormat;
use deskbridge_core::{
    ActionRequest, Bridge, BridgeConfig, BridgeError, ClientFactory, ClientFrame, ClientOptions, ClientVariant,
    CircuitBreakerConfig, Endpoint, EndpointCache, ErrorKind, InputTiming, MockBackend,
    OutboundMessage, Policy, RelayMode, RetryConfig, ServerFrame, SessionRegistry,
    StaticSessionStore,
};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

/// Accept one connection on an OS-assigned port and run `script` on it.
async fn fake_server<F, Fut>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        script(sock).await;
    });
    (port, handle)
}

async fn read_n(sock: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    sock.read_exact(&mut buf).await.unwrap();
    buf
}

/// Version, security None, and a `width`×`height` ServerInit.
async fn accept_rfb_38(sock: &mut TcpStream, width: u16, height: u16) {
    sock.write_all(b"RFB 003.008\n").await.unwrap();
    assert_eq!(read_n(sock, 12).await, b"RFB 003.008\n");
    sock.write_all(&[1, 1]).await.unwrap();
    assert_eq!(read_n(sock, 1).await, [1]);
    sock.write_all(&0u32.to_be_bytes()).await.unwrap();
    assert_eq!(read_n(sock, 1).await, [1], "ClientInit must request a shared session");

    let name = b"fake desktop";
    let mut init = BytesMut::new();
    init.put_u16(width);
    init.put_u16(height);
    PixelFormat::rgb888().encode(&mut init);
    init.put_u32(name.len() as u32);
    init.put_slice(name);
    sock.write_all(&init).await.unwrap();
}

fn policy(name: &'static str) -> Policy {
    Policy::new(
        name,
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..RetryConfig::default()
        },
        CircuitBreakerConfig::default(),
    )
}

fn registry_with(port: u16) -> Arc<SessionRegistry> {
    let store = StaticSessionStore::with_sessions([(
        "abc".to_string(),
        Endpoint::new("127.0.0.1", port),
    )]);
    Arc::new(SessionRegistry::new(
        Arc::new(store),
        EndpointCache::new(Duration::from_secs(60)),
        policy("registry"),
    ))
}

fn config() -> BridgeConfig {
    BridgeConfig {
        setup_timeout: Duration::from_secs(5),
        screenshot_interval: Duration::ZERO,
        placeholder_size: (16, 12),
        ..BridgeConfig::default()
    }
}

fn tcp_factory(variant: ClientVariant) -> ClientFactory {
    ClientFactory::new(ClientOptions {
        variant,
        connect_timeout: Duration::from_secs(2),
        capture_timeout: Duration::from_secs(2),
        timing: InputTiming::immediate(),
    })
}

fn tcp_bridge(port: u16, variant: ClientVariant) -> Bridge {
    Bridge::new(registry_with(port), tcp_factory(variant), policy("connect"), config())
}

fn mock_bridge(backend: MockBackend) -> Bridge {
    let factory = ClientFactory::mock(backend, InputTiming::immediate());
    Bridge::new(registry_with(5900), factory, policy("connect"), config())
}

fn outbound(frame: &ServerFrame) -> OutboundMessage {
    match frame {
        ServerFrame::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

// ── Raw client ───────────────────────────────────────────────────

#[tokio::test]
async fn raw_client_click_reaches_the_backend() {
    let (port, server) = fake_server(|mut sock| async move {
        sock.write_all(b"RFB 003.008\n").await.unwrap();
        assert_eq!(read_n(&mut sock, 12).await, b"RFB 003.008\n");
        assert_eq!(
            read_n(&mut sock, 12).await,
            [5, 1, 0x01, 0xF4, 0x01, 0xA9, 5, 0, 0x01, 0xF4, 0x01, 0xA9]
        );
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    })
    .await;

    let bridge = tcp_bridge(port, ClientVariant::Raw);
    let cancel = CancellationToken::new();
    let mut session = bridge.open(Some("abc"), &cancel).await.unwrap();
    assert_eq!(
        session.phases().names(),
        vec!["Init", "Resolving", "Connecting", "Streaming"]
    );
    assert_eq!(session.endpoint(), Some(&Endpoint::new("127.0.0.1", port)));

    let click = ActionRequest::click(500, 425, "left").unwrap();
    let shot = session.execute(&click, false).await.unwrap();
    assert!(shot.is_none());

    session.close().await;
    assert_eq!(session.phase().to_string(), "Closed");
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server timed out")
        .unwrap();
}

#[tokio::test]
async fn raw_client_serves_a_degraded_placeholder() {
    let (port, _server) = fake_server(|mut sock| async move {
        sock.write_all(b"RFB 003.008\n").await.unwrap();
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest).await;
    })
    .await;

    let bridge = tcp_bridge(port, ClientVariant::Raw);
    let outcome = bridge
        .execute_once("abc", ActionRequest::Screenshot, false, &CancellationToken::new())
        .await
        .unwrap();
    let shot = outcome.screenshot.unwrap();
    assert_eq!(outcome.action, "screenshot");
    assert!(shot.degraded);
    assert_eq!((shot.width, shot.height), (16, 12));
}

// ── Framed client ────────────────────────────────────────────────

#[tokio::test]
async fn framed_client_captures_the_framebuffer() {
    let (port, server) = fake_server(|mut sock| async move {
        accept_rfb_38(&mut sock, 4, 2).await;

        // SetPixelFormat (20) + SetEncodings with two entries (12).
        let setup = read_n(&mut sock, 32).await;
        assert_eq!(setup[0], 0);
        assert_eq!(&setup[20..24], &[2, 0, 0, 2]);
        assert_eq!(&setup[24..28], &0i32.to_be_bytes());
        assert_eq!(&setup[28..32], &(-223i32).to_be_bytes());

        // Non-incremental request for the whole screen.
        assert_eq!(read_n(&mut sock, 10).await, [3, 0, 0, 0, 0, 0, 0, 4, 0, 2]);

        let mut update = BytesMut::new();
        update.put_slice(&[0, 0]);
        update.put_u16(1);
        update.put_u16(0);
        update.put_u16(0);
        update.put_u16(4);
        update.put_u16(2);
        update.put_i32(0);
        for i in 0..8 {
            // Little-endian BGRX: first pixel red, the rest blue.
            if i == 0 {
                update.put_slice(&[0, 0, 255, 0]);
            } else {
                update.put_slice(&[255, 0, 0, 0]);
            }
        }
        sock.write_all(&update).await.unwrap();

        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest).await;
    })
    .await;

    let bridge = tcp_bridge(port, ClientVariant::Framed);
    let outcome = bridge
        .execute_once("abc", ActionRequest::Screenshot, false, &CancellationToken::new())
        .await
        .unwrap();
    let shot = outcome.screenshot.unwrap();
    assert!(!shot.degraded);
    assert_eq!((shot.width, shot.height), (4, 2));

    let img = image::load_from_memory(&shot.png).unwrap().to_rgb8();
    assert_eq!(img.dimensions(), (4, 2));
    assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(img.get_pixel(3, 1).0, [0, 0, 255]);

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server timed out")
        .unwrap();
}

#[tokio::test]
async fn framed_client_refuses_vnc_auth() {
    let (port, _server) = fake_server(|mut sock| async move {
        sock.write_all(b"RFB 003.008\n").await.unwrap();
        read_n(&mut sock, 12).await;
        sock.write_all(&[1, 2]).await.unwrap();
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest).await;
    })
    .await;

    let bridge = tcp_bridge(port, ClientVariant::Framed);
    let err = bridge
        .open(Some("abc"), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[tokio::test]
async fn framed_garbage_mid_stream_fails_the_session() {
    let (port, _server) = fake_server(|mut sock| async move {
        accept_rfb_38(&mut sock, 4, 2).await;
        read_n(&mut sock, 32).await;
        read_n(&mut sock, 10).await;
        sock.write_all(&[0xfe, 0xfe, 0xfe]).await.unwrap();
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest).await;
    })
    .await;

    let bridge = tcp_bridge(port, ClientVariant::Framed);
    let (_in_tx, in_rx) = mpsc::channel::<ClientFrame>(1);
    let (out_tx, out_rx) = futures::channel::mpsc::unbounded();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        bridge.serve(
            RelayMode::Structured,
            Some("abc"),
            ReceiverStream::new(in_rx),
            out_tx,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("a malformed update must end the session");

    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(ErrorKind::ProtocolError)
    );
    assert_eq!(report.phases.current().to_string(), "Failed(ProtocolError)");

    let frames: Vec<ServerFrame> = out_rx.collect().await;
    assert_eq!(frames.last(), Some(&ServerFrame::Close));
    let degraded = frames[..frames.len() - 1].iter().any(|f| {
        matches!(outbound(f), OutboundMessage::Screenshot { degraded: true, .. })
    });
    assert!(!degraded, "no placeholder for a corrupt stream");
    match outbound(&frames[frames.len() - 2]) {
        OutboundMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::ProtocolError),
        other => panic!("unexpected {other:?}"),
    }
}

// ── Setup failures reported to the client ────────────────────────

#[tokio::test]
async fn missing_session_gets_a_terminal_error_frame() {
    let backend = MockBackend::new();
    let bridge = mock_bridge(backend.clone());
    let (tx, rx) = futures::channel::mpsc::unbounded();

    let report = bridge
        .serve(
            RelayMode::Structured,
            None,
            futures::stream::empty(),
            tx,
            &CancellationToken::new(),
        )
        .await;

    let frames: Vec<ServerFrame> = rx.collect().await;
    assert_eq!(frames.len(), 2);
    match outbound(&frames[0]) {
        OutboundMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::MissingSession),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(frames[1], ServerFrame::Close);
    assert_eq!(report.phases.names(), vec!["Init", "Failed(MissingSession)"]);
    assert_eq!(backend.connects(), 0);
}

#[tokio::test]
async fn unknown_session_never_connects() {
    let backend = MockBackend::new();
    let bridge = mock_bridge(backend.clone());
    let (tx, rx) = futures::channel::mpsc::unbounded();

    let report = bridge
        .serve(
            RelayMode::Raw,
            Some("zzz"),
            futures::stream::pending(),
            tx,
            &CancellationToken::new(),
        )
        .await;

    let frames: Vec<ServerFrame> = rx.collect().await;
    match outbound(&frames[0]) {
        OutboundMessage::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::SessionNotFound);
            assert!(message.contains("zzz"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(frames.last(), Some(&ServerFrame::Close));
    assert!(!report.phases.visited(|p| p.to_string() == "Connecting"));
    assert_eq!(backend.connects(), 0);
}

#[tokio::test]
async fn client_leaving_during_connect_stops_the_retries() {
    // Nothing listens on a port we just released.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let slow_retries = Policy::new(
        "connect",
        RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            jitter: false,
            ..RetryConfig::default()
        },
        CircuitBreakerConfig::default(),
    );
    let bridge = Bridge::new(
        registry_with(port),
        tcp_factory(ClientVariant::Raw),
        slow_retries,
        config(),
    );

    let (in_tx, in_rx) = mpsc::channel::<ClientFrame>(1);
    let (out_tx, out_rx) = futures::channel::mpsc::unbounded();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(in_tx);
    });

    let report = tokio::time::timeout(
        Duration::from_secs(1),
        bridge.serve(
            RelayMode::Raw,
            Some("abc"),
            ReceiverStream::new(in_rx),
            out_tx,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("setup must stop once the client is gone");

    assert!(matches!(report.error, Some(BridgeError::Cancelled)));
    assert!(report.phases.visited(|p| p.to_string() == "Connecting"));
    let frames: Vec<ServerFrame> = out_rx.collect().await;
    assert_eq!(frames, vec![ServerFrame::Close]);
}

// ── Structured relay ─────────────────────────────────────────────

#[tokio::test]
async fn structured_relay_answers_every_action_in_order() {
    let backend = MockBackend::new();
    let bridge = mock_bridge(backend.clone());
    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, mut out_rx) = futures::channel::mpsc::unbounded();

    let serving = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .serve(
                    RelayMode::Structured,
                    Some("abc"),
                    ReceiverStream::new(in_rx),
                    out_tx,
                    &CancellationToken::new(),
                )
                .await
        })
    };

    // The initial screenshot marks the session as streaming.
    let first = out_rx.next().await.unwrap();
    for frame in [
        ClientFrame::Text(r#"{"type":"click","x":10,"y":20}"#.into()),
        ClientFrame::Text(r#"{"type":"key_press","key":"hyper"}"#.into()),
        ClientFrame::Text(r#"{"type":"screenshot"}"#.into()),
        ClientFrame::Binary(Bytes::from_static(b"\x05\x00")),
        ClientFrame::Close,
    ] {
        in_tx.send(frame).await.unwrap();
    }

    let report = serving.await.unwrap();
    assert!(report.error.is_none());
    assert_eq!(
        report.phases.names(),
        vec!["Init", "Resolving", "Connecting", "Streaming", "Closed"]
    );

    let mut frames = vec![first];
    frames.extend(out_rx.collect::<Vec<ServerFrame>>().await);
    let (last, texts) = frames.split_last().unwrap();
    assert_eq!(*last, ServerFrame::Close);
    let messages: Vec<OutboundMessage> = texts.iter().map(outbound).collect();

    assert!(matches!(messages[0], OutboundMessage::Screenshot { degraded: false, .. }));
    assert_eq!(messages[1], OutboundMessage::action_ok("click"));
    assert!(matches!(
        &messages[2],
        OutboundMessage::ActionResult { action, success: false, .. } if action == "key_press"
    ));
    assert!(matches!(messages[3], OutboundMessage::Screenshot { .. }));
    assert_eq!(messages[4], OutboundMessage::action_ok("screenshot"));
    assert!(matches!(
        &messages[5],
        OutboundMessage::ActionResult { action, success: false, .. } if action == "unknown"
    ));
    assert_eq!(messages.len(), 6);

    assert_eq!(backend.pointer_events(), vec![(1, 10, 20), (0, 10, 20)]);
    assert_eq!(backend.disconnects(), 1);
}

#[tokio::test]
async fn cancelling_the_session_closes_it_cleanly() {
    let backend = MockBackend::new();
    let bridge = mock_bridge(backend.clone());
    let (_in_tx, in_rx) = mpsc::channel::<ClientFrame>(1);
    let (out_tx, out_rx) = futures::channel::mpsc::unbounded();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        bridge.serve(
            RelayMode::Structured,
            Some("abc"),
            ReceiverStream::new(in_rx),
            out_tx,
            &cancel,
        ),
    )
    .await
    .expect("cancellation must end the relay");

    assert!(report.error.is_none());
    assert_eq!(report.phases.current().to_string(), "Closed");
    let frames: Vec<ServerFrame> = out_rx.collect().await;
    assert_eq!(frames.last(), Some(&ServerFrame::Close));
    assert_eq!(backend.disconnects(), 1);
}

// ── Raw relay ────────────────────────────────────────────────────

#[tokio::test]
async fn raw_relay_passes_bytes_through_in_order() {
    let (port, server) = fake_server(|mut sock| async move {
        sock.write_all(b"RFB 003.008\n").await.unwrap();
        assert_eq!(read_n(&mut sock, 12).await, b"RFB 003.007\n");
        assert_eq!(read_n(&mut sock, 6).await, [5, 0, 0, 1, 0, 2]);
        sock.write_all(b"bye").await.unwrap();
        sock.shutdown().await.unwrap();
    })
    .await;

    let bridge = tcp_bridge(port, ClientVariant::Raw);
    let (in_tx, in_rx) = mpsc::channel(4);
    let (out_tx, out_rx) = futures::channel::mpsc::unbounded();

    in_tx
        .send(ClientFrame::Binary(Bytes::from_static(b"RFB 003.007\n")))
        .await
        .unwrap();
    in_tx
        .send(ClientFrame::Binary(Bytes::from_static(&[5, 0, 0, 1, 0, 2])))
        .await
        .unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        bridge.serve(
            RelayMode::Raw,
            Some("abc"),
            ReceiverStream::new(in_rx),
            out_tx,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("relay must end when the backend closes");
    drop(in_tx);

    assert!(report.error.is_none());
    assert_eq!(report.phases.current().to_string(), "Closed");

    let frames: Vec<ServerFrame> = out_rx.collect().await;
    let mut received = Vec::new();
    for frame in &frames[..frames.len() - 1] {
        match frame {
            ServerFrame::Binary(bytes) => received.extend_from_slice(bytes),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(received, b"RFB 003.008\nbye");
    assert_eq!(frames.last(), Some(&ServerFrame::Close));
    server.await.unwrap();
}
