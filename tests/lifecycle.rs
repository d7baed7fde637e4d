//! End-to-end connection tests over in-memory duplex streams.
//!
//! Each test upgrades a client/server pair with `upgrade::connect` and
//! `upgrade::accept`, drives both with `serve`, and observes the traffic
//! through recording listeners.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wsengine::protocol::{ClientHandshake, HandshakeValidator};
use wsengine::{
    CloseCode, CloseFrame, Config, ConnectionState, Error, ExtensionRegistry, Listener, Result,
    WebSocket, upgrade,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Open,
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
    Error(String),
}

struct Recorder {
    tag: &'static str,
    tx: UnboundedSender<(&'static str, Event)>,
}

impl Recorder {
    fn pair(tag: &'static str) -> (Arc<dyn Listener>, UnboundedReceiver<(&'static str, Event)>) {
        let (tx, rx) = unbounded_channel();
        (Arc::new(Self { tag, tx }), rx)
    }

    fn record(&self, event: Event) {
        let _ = self.tx.send((self.tag, event));
    }
}

impl Listener for Recorder {
    fn on_open(&self, _ws: &WebSocket) {
        self.record(Event::Open);
    }

    fn on_text(&self, _ws: &WebSocket, text: &str) {
        self.record(Event::Text(text.to_owned()));
    }

    fn on_binary(&self, _ws: &WebSocket, data: &Bytes) {
        self.record(Event::Binary(data.to_vec()));
    }

    fn on_ping(&self, _ws: &WebSocket, data: &Bytes) {
        self.record(Event::Ping(data.to_vec()));
    }

    fn on_pong(&self, _ws: &WebSocket, data: &Bytes) {
        self.record(Event::Pong(data.to_vec()));
    }

    fn on_close(&self, _ws: &WebSocket, close: Option<&CloseFrame>) {
        self.record(Event::Close(close.cloned()));
    }

    fn on_error(&self, _ws: &WebSocket, error: &Error) {
        self.record(Event::Error(error.to_string()));
    }
}

/// Echoes text and binary messages back to the sender.
struct Echo;

impl Listener for Echo {
    fn on_text(&self, ws: &WebSocket, text: &str) {
        let ws = ws.clone();
        let text = text.to_owned();
        tokio::spawn(async move { ws.send_text(text).await });
    }

    fn on_binary(&self, ws: &WebSocket, data: &Bytes) {
        let ws = ws.clone();
        let data = data.clone();
        tokio::spawn(async move { ws.send_binary(data).await });
    }
}

struct Panicker;

impl Listener for Panicker {
    fn on_text(&self, _ws: &WebSocket, _text: &str) {
        panic!("listener bug");
    }
}

struct Peer {
    ws: WebSocket,
    task: JoinHandle<Result<()>>,
}

impl Peer {
    async fn finished(self) -> Result<()> {
        timeout(WAIT, self.task)
            .await
            .expect("serve did not finish")
            .expect("serve panicked")
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connect_pair(
    server_listeners: Vec<Arc<dyn Listener>>,
    client_listeners: Vec<Arc<dyn Listener>>,
    server_config: Config,
    client_config: Config,
) -> (Peer, Peer) {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let validator = HandshakeValidator::from_config(&server_config);
        upgrade::accept(server_io, &validator, server_config, server_listeners).await
    });
    let handshake = ClientHandshake::new("localhost", "/").expect("handshake");
    let (client, client_reader) = upgrade::connect(
        client_io,
        handshake,
        &ExtensionRegistry::new(),
        client_config,
        client_listeners,
    )
    .await
    .expect("client upgrade");
    let (server, server_reader) = server.await.expect("accept task").expect("server upgrade");

    let server_task = {
        let ws = server.clone();
        tokio::spawn(async move { ws.serve(server_reader).await })
    };
    let client_task = {
        let ws = client.clone();
        tokio::spawn(async move { ws.serve(client_reader).await })
    };

    (
        Peer {
            ws: server,
            task: server_task,
        },
        Peer {
            ws: client,
            task: client_task,
        },
    )
}

async fn next(rx: &mut UnboundedReceiver<(&'static str, Event)>) -> (&'static str, Event) {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("listener dropped")
}

/// Receive events until `pred` matches, returning everything seen.
async fn until(
    rx: &mut UnboundedReceiver<(&'static str, Event)>,
    pred: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let (_, event) = next(rx).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn is_close(event: &Event) -> bool {
    matches!(event, Event::Close(_))
}

#[tokio::test]
async fn test_open_is_reported_once_on_both_sides() {
    let (server_rec, mut server_rx) = Recorder::pair("server");
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let (server, client) = connect_pair(
        vec![server_rec],
        vec![client_rec],
        Config::server(),
        Config::client(),
    )
    .await;

    assert_eq!(next(&mut server_rx).await.1, Event::Open);
    assert_eq!(next(&mut client_rx).await.1, Event::Open);
    assert_eq!(server.ws.state(), ConnectionState::Connected);
    assert!(!server.ws.on_connect());
}

#[tokio::test]
async fn test_echo_text_and_binary() {
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let (_server, client) = connect_pair(
        vec![Arc::new(Echo) as Arc<dyn Listener>],
        vec![client_rec],
        Config::server(),
        Config::client(),
    )
    .await;
    assert_eq!(next(&mut client_rx).await.1, Event::Open);

    client.ws.send_text("hello").await.unwrap();
    assert_eq!(next(&mut client_rx).await.1, Event::Text("hello".into()));

    client.ws.send_binary(vec![1u8, 2, 3]).await.unwrap();
    assert_eq!(next(&mut client_rx).await.1, Event::Binary(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_large_message_is_fragmented_and_reassembled() {
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let (_server, client) = connect_pair(
        vec![Arc::new(Echo) as Arc<dyn Listener>],
        vec![client_rec],
        Config::server().with_fragment_size(100),
        Config::client().with_fragment_size(64),
    )
    .await;
    assert_eq!(next(&mut client_rx).await.1, Event::Open);

    let text = "ü".repeat(1_000);
    client.ws.send_text(text.clone()).await.unwrap();
    assert_eq!(next(&mut client_rx).await.1, Event::Text(text));
}

#[tokio::test]
async fn test_concurrent_sends_never_interleave() {
    let (server_rec, mut server_rx) = Recorder::pair("server");
    let (_server, client) = connect_pair(
        vec![server_rec],
        Vec::new(),
        Config::server(),
        Config::client().with_fragment_size(16),
    )
    .await;
    assert_eq!(next(&mut server_rx).await.1, Event::Open);

    let messages: Vec<String> = (0..20)
        .map(|i| format!("{i:02}:{}", "x".repeat(100)))
        .collect();
    let sends = messages.iter().map(|text| {
        let ws = client.ws.clone();
        let text = text.clone();
        async move { ws.send_text(text).await }
    });
    for result in futures::future::join_all(sends).await {
        result.unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..messages.len() {
        match next(&mut server_rx).await.1 {
            Event::Text(text) => received.push(text),
            other => panic!("unexpected {other:?}"),
        }
    }
    received.sort();
    assert_eq!(received, messages);
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let (server_rec, mut server_rx) = Recorder::pair("server");
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let (_server, client) = connect_pair(
        vec![server_rec],
        vec![client_rec],
        Config::server(),
        Config::client(),
    )
    .await;
    next(&mut server_rx).await;
    next(&mut client_rx).await;

    client.ws.send_ping(&b"heartbeat"[..]).await.unwrap();
    assert_eq!(next(&mut server_rx).await.1, Event::Ping(b"heartbeat".to_vec()));
    assert_eq!(next(&mut client_rx).await.1, Event::Pong(b"heartbeat".to_vec()));
}

#[tokio::test]
async fn test_client_initiated_close_handshake() {
    let (server_rec, mut server_rx) = Recorder::pair("server");
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let (server, client) = connect_pair(
        vec![server_rec],
        vec![client_rec],
        Config::server(),
        Config::client(),
    )
    .await;

    client.ws.close(CloseCode::GoingAway, "bye").await.unwrap();
    assert_eq!(client.ws.state(), ConnectionState::Closing);

    let expected = Some(CloseFrame::new(CloseCode::GoingAway, "bye"));
    let server_events = until(&mut server_rx, is_close).await;
    assert_eq!(server_events.last(), Some(&Event::Close(expected.clone())));
    let client_events = until(&mut client_rx, is_close).await;
    assert_eq!(client_events.last(), Some(&Event::Close(expected)));

    let (server_ws, client_ws) = (server.ws.clone(), client.ws.clone());
    server.finished().await.unwrap();
    client.finished().await.unwrap();
    assert_eq!(server_ws.state(), ConnectionState::Closed);
    assert_eq!(client_ws.state(), ConnectionState::Closed);
    timeout(WAIT, client_ws.closed()).await.unwrap();
}

#[tokio::test]
async fn test_on_close_fires_exactly_once() {
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let (_server, client) = connect_pair(
        Vec::new(),
        vec![client_rec],
        Config::server(),
        Config::client(),
    )
    .await;

    client.ws.close_normal().await.unwrap();
    assert_eq!(client.ws.close_normal().await, Err(Error::NotConnected));
    let ws = client.ws.clone();
    client.finished().await.unwrap();

    let closes = {
        let mut events = Vec::new();
        while let Ok((_, event)) = client_rx.try_recv() {
            events.push(event);
        }
        events.into_iter().filter(is_close).count()
    };
    assert_eq!(closes, 1);
    assert_eq!(ws.send_text("late").await, Err(Error::NotConnected));
}

#[tokio::test]
async fn test_concurrent_close_sends_one_frame() {
    let (server_rec, mut server_rx) = Recorder::pair("server");
    let (_server, client) = connect_pair(
        vec![server_rec],
        Vec::new(),
        Config::server(),
        Config::client(),
    )
    .await;

    let a = client.ws.clone();
    let b = client.ws.clone();
    let (ra, rb) = tokio::join!(
        a.close(CloseCode::Normal, "a"),
        b.close(CloseCode::Normal, "b")
    );
    assert_eq!(u8::from(ra.is_ok()) + u8::from(rb.is_ok()), 1);

    let events = until(&mut server_rx, is_close).await;
    let reason = match events.last() {
        Some(Event::Close(Some(frame))) => frame.reason.clone(),
        other => panic!("unexpected {other:?}"),
    };
    assert!(reason == "a" || reason == "b");
    client.finished().await.unwrap();
}

#[tokio::test]
async fn test_listeners_see_events_in_registration_order() {
    let (tx, mut rx) = unbounded_channel();
    let first: Arc<dyn Listener> = Arc::new(Recorder {
        tag: "first",
        tx: tx.clone(),
    });
    let second: Arc<dyn Listener> = Arc::new(Recorder { tag: "second", tx });
    let (_server, client) = connect_pair(
        vec![first, second],
        Vec::new(),
        Config::server(),
        Config::client(),
    )
    .await;

    assert_eq!(next(&mut rx).await, ("first", Event::Open));
    assert_eq!(next(&mut rx).await, ("second", Event::Open));

    for n in 0..5 {
        client.ws.send_text(format!("m{n}")).await.unwrap();
    }
    for n in 0..5 {
        assert_eq!(next(&mut rx).await, ("first", Event::Text(format!("m{n}"))));
        assert_eq!(next(&mut rx).await, ("second", Event::Text(format!("m{n}"))));
    }
}

#[tokio::test]
async fn test_panicking_listener_does_not_break_fan_out() {
    let (server_rec, mut server_rx) = Recorder::pair("server");
    let (server, client) = connect_pair(
        vec![Arc::new(Panicker) as Arc<dyn Listener>, server_rec],
        Vec::new(),
        Config::server(),
        Config::client(),
    )
    .await;
    assert_eq!(next(&mut server_rx).await.1, Event::Open);

    client.ws.send_text("one").await.unwrap();
    client.ws.send_text("two").await.unwrap();
    assert_eq!(next(&mut server_rx).await.1, Event::Text("one".into()));
    assert_eq!(next(&mut server_rx).await.1, Event::Text("two".into()));
    assert!(server.ws.is_connected());
}

#[tokio::test]
async fn test_oversized_message_fails_with_1009() {
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let server_config = Config::server().with_limits(wsengine::Limits::new(1024, 1024, 16, 8192));
    let (server, client) = connect_pair(
        Vec::new(),
        vec![client_rec],
        server_config,
        Config::client(),
    )
    .await;

    client.ws.send_binary(vec![0u8; 4096]).await.unwrap();
    let events = until(&mut client_rx, is_close).await;
    match events.last() {
        Some(Event::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::MessageTooBig),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        server.finished().await,
        Err(Error::MessageTooLarge { .. } | Error::FrameTooLarge { .. })
    ));
}

#[tokio::test]
async fn test_dropped_transport_reports_error_and_close() {
    let (client_rec, mut client_rx) = Recorder::pair("client");
    let (server, client) = connect_pair(
        Vec::new(),
        vec![client_rec],
        Config::server(),
        Config::client(),
    )
    .await;
    assert_eq!(next(&mut client_rx).await.1, Event::Open);

    server.task.abort();
    drop(server.ws);

    let events = until(&mut client_rx, is_close).await;
    assert!(matches!(events.first(), Some(Event::Error(_))));
    assert_eq!(events.last(), Some(&Event::Close(None)));
    assert!(matches!(client.finished().await, Err(Error::Transport(_))));
}

#[cfg(feature = "compression")]
#[tokio::test]
async fn test_permessage_deflate_round_trip() {
    use wsengine::extensions::deflate::{DeflateConfig, DeflateExtension};

    let mut server_registry = ExtensionRegistry::new();
    server_registry
        .register(DeflateExtension::factory(DeflateConfig::new()))
        .unwrap();
    let mut client_registry = ExtensionRegistry::new();
    client_registry
        .register(DeflateExtension::factory(DeflateConfig::new()))
        .unwrap();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let validator = HandshakeValidator::new().with_registry(server_registry);
        let listeners: Vec<Arc<dyn Listener>> = vec![Arc::new(Echo)];
        upgrade::accept(server_io, &validator, Config::server(), listeners).await
    });

    let (client_rec, mut client_rx) = Recorder::pair("client");
    let handshake = ClientHandshake::new("localhost", "/").unwrap();
    let (client, reader) = upgrade::connect(
        client_io,
        handshake,
        &client_registry,
        Config::client(),
        vec![client_rec],
    )
    .await
    .unwrap();
    let (server, server_reader) = server.await.unwrap().unwrap();
    assert_eq!(client.extensions(), vec!["permessage-deflate".to_string()]);
    assert_eq!(server.extensions(), vec!["permessage-deflate".to_string()]);

    tokio::spawn(async move { server.serve(server_reader).await });
    let driver = client.clone();
    tokio::spawn(async move { driver.serve(reader).await });

    let text = "compress me ".repeat(200);
    client.send_text(text.clone()).await.unwrap();
    assert_eq!(next(&mut client_rx).await.1, Event::Open);
    assert_eq!(next(&mut client_rx).await.1, Event::Text(text));
}
