//! In-memory transport for driving the client from tests.
//!
//! Each `connect` hands the test a [`MockPeer`] that plays the service:
//! it sees every outbound frame and injects signals.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use cogs_core::{
    ClientEvent, CogsError, CommandKeys, ConnectRequest, ConnectionOptions, EventStream, Outbound,
    PubSubClient, RequestLimits, Transport, TransportLink, TransportSignal,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

// ── MockTransport ────────────────────────────────────────────────

pub struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse: AtomicUsize,
    dials: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        Self::refusing_first(0)
    }

    /// A transport whose every dial fails.
    pub fn refusing() -> Self {
        Self::refusing_first(usize::MAX).0
    }

    /// A transport that refuses the first `count` dials, then connects.
    pub fn refusing_first(count: usize) -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            peers,
            refuse: AtomicUsize::new(count),
            dials: Default::default(),
        };
        (transport, rx)
    }

    /// Shared count of dial attempts, refused or not.
    pub fn dial_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.dials)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, CogsError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(CogsError::Transport("connection refused".into()));
        }
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::channel(100);
        self.peers
            .send(MockPeer {
                request,
                outbound: outbound_rx,
                signals: signal_tx,
            })
            .map_err(|_| CogsError::ChannelClosed)?;
        Ok(TransportLink {
            outbound: outbound_tx,
            signals: signal_rx,
        })
    }
}

// ── MockPeer ─────────────────────────────────────────────────────

pub struct MockPeer {
    pub request: ConnectRequest,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    signals: mpsc::Sender<TransportSignal>,
}

impl MockPeer {
    pub async fn open(&self) {
        self.signals.send(TransportSignal::Opened).await.unwrap();
    }

    pub async fn send_json(&self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn send_raw(&self, frame: &str) {
        self.signals
            .send(TransportSignal::Frame(frame.to_owned()))
            .await
            .unwrap();
    }

    /// Report a transport-level error without closing.
    pub async fn fail(&self, reason: &str) {
        self.signals
            .send(TransportSignal::Error(reason.to_owned()))
            .await
            .unwrap();
    }

    pub async fn close(&self, code: Option<u16>) {
        self.signals
            .send(TransportSignal::Closed(code))
            .await
            .unwrap();
    }

    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("timed out waiting for outbound frame")
    }

    /// The next command the client wrote, parsed.
    pub async fn next_command(&mut self) -> Value {
        match self.next_outbound().await {
            Some(Outbound::Frame(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a command frame, got {other:?}"),
        }
    }

    /// Answer the automatic `session-uuid` command with `uuid`.
    pub async fn complete_handshake(&mut self, uuid: &str) -> u64 {
        self.open().await;
        let cmd = self.next_command().await;
        assert_eq!(cmd["action"], "session-uuid");
        let seq = cmd["seq"].as_u64().unwrap();
        self.send_json(json!({
            "seq": seq,
            "action": "session-uuid",
            "code": 200,
            "uuid": uuid,
        }))
        .await;
        seq
    }

    /// The session id the client asked to restore in its credentials.
    pub fn requested_session(&self) -> Option<String> {
        let (_, payload) = self
            .request
            .headers
            .iter()
            .find(|(name, _)| name == "Payload")
            .expect("Payload header");
        let raw = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        let json: Value = serde_json::from_slice(&raw).unwrap();
        json["session_uuid"].as_str().map(str::to_owned)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

pub fn keys() -> CommandKeys {
    CommandKeys::new("R-proj01-rsecret", "W-proj01-wsecret", "A-proj01-asecret")
}

pub fn options() -> ConnectionOptions {
    ConnectionOptions {
        url: "ws://mock/pubsub".into(),
        reconnect_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn client_with(
    options: ConnectionOptions,
    limits: RequestLimits,
) -> (PubSubClient, EventStream, mpsc::UnboundedReceiver<MockPeer>) {
    let (transport, peers) = MockTransport::new();
    let (client, events) = PubSubClient::with_limits(keys(), options, limits, transport);
    (client, events, peers)
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
    tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for a connection attempt")
        .expect("transport dropped")
}

pub async fn next_event(events: &mut EventStream) -> ClientEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Connect and complete the handshake with `uuid`.
pub async fn ready_client(
    uuid: &str,
) -> (
    PubSubClient,
    EventStream,
    MockPeer,
    mpsc::UnboundedReceiver<MockPeer>,
) {
    let (client, mut events, mut peers) = client_with(options(), RequestLimits::default());
    client.connect(None).unwrap();
    let mut peer = next_peer(&mut peers).await;
    peer.complete_handshake(uuid).await;
    match next_event(&mut events).await {
        ClientEvent::NewSession(id) => assert_eq!(id, uuid),
        other => panic!("expected NewSession, got {other:?}"),
    }
    assert!(client.phase().is_ready());
    (client, events, peer, peers)
}
