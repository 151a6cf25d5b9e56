use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;

use tollgate_core::{SdkConfig, SessionState};

use super::socket::{Connector, Socket, SocketError};
use super::{ConnectionState, Notification, NotificationChannel, NotificationSink, Notifications};

const FRAME_WAIT: Duration = Duration::from_secs(2);

enum Inbound {
    Text(String),
    Close,
}

struct ScriptedSocket {
    outbound: Sender<String>,
    inbound: Receiver<Inbound>,
    closed: bool,
}

impl Socket for ScriptedSocket {
    fn send_text(&mut self, text: &str) -> Result<(), SocketError> {
        if self.closed {
            return Err(SocketError::Closed);
        }
        self.outbound
            .send(text.to_string())
            .map_err(|_| SocketError::Closed)
    }

    fn poll_text(&mut self, wait: Duration) -> Result<Option<String>, SocketError> {
        match self.inbound.recv_timeout(wait) {
            Ok(Inbound::Text(text)) => Ok(Some(text)),
            Ok(Inbound::Close) | Err(RecvTimeoutError::Disconnected) => Err(SocketError::Closed),
            Err(RecvTimeoutError::Timeout) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Server side of one scripted connection.
struct Peer {
    outbound: Receiver<String>,
    inbound: Sender<Inbound>,
}

impl Peer {
    fn push(&self, text: &str) {
        self.inbound
            .send(Inbound::Text(text.to_string()))
            .expect("channel reader alive");
    }

    fn hang_up(&self) {
        self.inbound.send(Inbound::Close).expect("channel reader alive");
    }

    fn next_frame(&self) -> String {
        self.outbound.recv_timeout(FRAME_WAIT).expect("frame")
    }

    /// Next frame that is not a heartbeat.
    fn next_message(&self) -> String {
        loop {
            let frame = self.next_frame();
            if frame != "H1" {
                return frame;
            }
        }
    }

    fn next_envelope(&self) -> Value {
        serde_json::from_str(&self.next_message()).expect("envelope json")
    }

    /// Completes registration and subscription; returns the subscribe seq.
    fn subscribe(&self, channel: &NotificationChannel) -> u64 {
        assert!(self.next_frame().starts_with("RG#"));
        self.push("RO#credential#60000");
        let envelope = self.next_envelope();
        let seq = envelope_seq(&envelope);
        self.push(&format!(r#"{{"status":200,"header":{{"x-ca-seq":"{seq}"}}}}"#));
        wait_until(|| channel.is_subscribed());
        seq
    }

    /// Like [`Peer::subscribe`] when the registration frame was already read.
    fn subscribe_after_registration(&self, channel: &NotificationChannel) {
        self.push("RO#credential#60000");
        let seq = envelope_seq(&self.next_envelope());
        self.push(&format!(r#"{{"status":200,"header":{{"x-ca-seq":"{seq}"}}}}"#));
        wait_until(|| channel.is_subscribed());
    }
}

struct ScriptedConnector {
    peers: Mutex<Sender<Peer>>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    fn new(failures: usize) -> (Arc<Self>, Receiver<Peer>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                peers: Mutex::new(tx),
                failures: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
            }),
            rx,
        )
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _url: &str) -> Result<Box<dyn Socket>, SocketError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SocketError::Connect("refused".to_string()));
        }
        let (out_tx, out_rx) = mpsc::channel();
        let (in_tx, in_rx) = mpsc::channel();
        self.peers
            .lock()
            .expect("peers")
            .send(Peer {
                outbound: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| SocketError::Connect("test finished".to_string()))?;
        Ok(Box::new(ScriptedSocket {
            outbound: out_tx,
            inbound: in_rx,
            closed: false,
        }))
    }
}

fn config(unsubscribe_timeout: Duration) -> Arc<SdkConfig> {
    let mut config = SdkConfig::new("app-key", "secret");
    config.unsubscribe_timeout = unsubscribe_timeout;
    config.reconnect_delay = Duration::from_millis(50);
    Arc::new(config)
}

fn open(
    config: Arc<SdkConfig>,
    connector: &Arc<ScriptedConnector>,
) -> (NotificationChannel, Notifications) {
    let (sender, notifications) = Notifications::channel();
    let channel = NotificationChannel::open(
        config,
        Arc::new(SessionState::new()),
        Arc::clone(connector) as Arc<dyn Connector>,
        Arc::new(sender),
    )
    .expect("channel");
    (channel, notifications)
}

fn envelope_seq(envelope: &Value) -> u64 {
    envelope["headers"]["x-ca-seq"][0]
        .as_str()
        .expect("seq header")
        .parse()
        .expect("numeric seq")
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + FRAME_WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn next_peer(peers: &Receiver<Peer>) -> Peer {
    peers.recv_timeout(FRAME_WAIT).expect("connection")
}

#[test]
fn first_frame_is_registration() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (_channel, _notifications) = open(config(Duration::from_millis(200)), &connector);
    let peer = next_peer(&peers);
    let pattern = Regex::new("^RG#[0-9a-f]{32}@app-key$").expect("regex");
    let frame = peer.next_frame();
    assert!(pattern.is_match(&frame), "unexpected frame {frame}");
}

#[test]
fn registered_sends_signed_subscribe() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (channel, _notifications) = open(config(Duration::from_millis(200)), &connector);
    let peer = next_peer(&peers);
    peer.next_frame();
    peer.push("RO#credential#60000");

    let envelope = peer.next_envelope();
    assert_eq!(envelope["method"], "POST");
    assert_eq!(envelope["path"], "/notification");
    assert_eq!(envelope["host"], "api.tollgate.dev");
    assert_eq!(envelope["headers"]["x-ca-websocket_api_type"][0], "REGISTER");
    assert_eq!(envelope_seq(&envelope), 0);
    assert_eq!(envelope["querys"]["k"], "app-key");
    assert!(envelope["querys"]["s"].as_str().is_some_and(|s| s.len() == 64));
    assert_eq!(envelope["body"], "");
    assert!(!channel.is_subscribed());

    peer.push(r#"{"status":200,"header":{"x-ca-seq":0}}"#);
    wait_until(|| channel.is_subscribed());
    assert_eq!(channel.connection_state(), ConnectionState::Open);
}

#[test]
fn rejected_subscribe_stays_unsubscribed() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (channel, _notifications) = open(config(Duration::from_millis(200)), &connector);
    let peer = next_peer(&peers);
    peer.next_frame();
    peer.push("RO#credential#60000");
    let seq = envelope_seq(&peer.next_envelope());
    peer.push(&format!(r#"{{"status":500,"header":{{"x-ca-seq":"{seq}"}}}}"#));
    peer.push("HO");
    thread::sleep(Duration::from_millis(100));
    assert!(!channel.is_subscribed());
}

#[test]
fn notify_is_acknowledged_and_delivered_once() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (channel, mut notifications) = open(config(Duration::from_millis(200)), &connector);
    let peer = next_peer(&peers);
    peer.subscribe(&channel);

    peer.push(r#"NF#{"action":"sign-out"}"#);
    assert_eq!(peer.next_message(), "NO");

    let mut delivered = Vec::new();
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        if let Some(notification) = notifications.try_recv() {
            delivered.push(notification);
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].action, "sign-out");
}

#[test]
fn malformed_frames_are_dropped() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (channel, mut notifications) = open(config(Duration::from_millis(200)), &connector);
    let peer = next_peer(&peers);
    peer.next_frame();

    peer.push("garbage");
    peer.push("RO#credential#soon");
    peer.push("NF#not json");
    assert_eq!(peer.next_message(), "NO");
    assert!(notifications.try_recv().is_none());

    peer.push("RO#credential#60000");
    assert_eq!(envelope_seq(&peer.next_envelope()), 0);
    assert_eq!(channel.connection_state(), ConnectionState::Open);
}

#[test]
fn heartbeat_runs_at_keepalive_interval() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (_channel, _notifications) = open(config(Duration::from_millis(200)), &connector);
    let peer = next_peer(&peers);
    peer.next_frame();
    peer.push("RO#credential#30");

    let mut heartbeats = 0;
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        if let Ok(frame) = peer.outbound.recv_timeout(Duration::from_millis(20)) {
            if frame == "H1" {
                heartbeats += 1;
            }
        }
    }
    assert!(heartbeats >= 3, "only {heartbeats} heartbeats");
}

#[test]
fn sequence_numbers_increase_across_reconnects() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (channel, _notifications) = open(config(Duration::from_millis(200)), &connector);

    let mut seen = Vec::new();
    let first = next_peer(&peers);
    seen.push(first.subscribe(&channel));

    first.push("OS");
    let second = next_peer(&peers);
    seen.push(second.subscribe(&channel));

    second.push("CR");
    let third = next_peer(&peers);
    seen.push(third.subscribe(&channel));

    assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn lost_connection_is_retried_after_delay() {
    let (connector, peers) = ScriptedConnector::new(2);
    let (channel, _notifications) = open(config(Duration::from_millis(200)), &connector);
    let first = next_peer(&peers);
    assert!(first.next_frame().starts_with("RG#"));
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);

    first.subscribe_after_registration(&channel);
    first.hang_up();
    let second = next_peer(&peers);
    assert!(second.next_frame().starts_with("RG#"));
    wait_until(|| !channel.is_subscribed());
}

#[test]
fn confirmed_unsubscribe_closes_promptly() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (mut channel, _notifications) = open(config(Duration::from_secs(5)), &connector);
    let peer = next_peer(&peers);
    let subscribe_seq = peer.subscribe(&channel);

    let server = thread::spawn(move || {
        let envelope = peer.next_envelope();
        assert_eq!(envelope["method"], "DELETE");
        assert_eq!(envelope["headers"]["x-ca-websocket_api_type"][0], "UNREGISTER");
        let seq = envelope_seq(&envelope);
        peer.push(&format!(r#"{{"status":200,"header":{{"x-ca-seq":"{seq}"}}}}"#));
        seq
    });

    let started = Instant::now();
    channel.close();
    assert!(started.elapsed() < Duration::from_secs(1));
    let unsubscribe_seq = server.join().expect("server thread");
    assert!(unsubscribe_seq > subscribe_seq);
    assert!(!channel.is_subscribed());
    assert_eq!(channel.connection_state(), ConnectionState::Closed);
}

#[test]
fn unconfirmed_unsubscribe_gives_up_after_timeout() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (mut channel, _notifications) = open(config(Duration::from_secs(5)), &connector);
    let peer = next_peer(&peers);
    peer.subscribe(&channel);

    let started = Instant::now();
    channel.close();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(4900), "closed after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(5500), "closed after {elapsed:?}");

    let envelope = peer.next_envelope();
    assert_eq!(envelope["method"], "DELETE");
    assert_eq!(channel.connection_state(), ConnectionState::Closed);
}

#[test]
fn close_without_subscription_is_immediate() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (mut channel, _notifications) = open(config(Duration::from_secs(5)), &connector);
    let peer = next_peer(&peers);
    peer.next_frame();

    let started = Instant::now();
    channel.close();
    channel.close();
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn host_thread_can_close_after_sign_out_notification() {
    let (connector, peers) = ScriptedConnector::new(0);
    let (mut channel, mut notifications) = open(config(Duration::from_secs(5)), &connector);
    let peer = next_peer(&peers);
    peer.subscribe(&channel);

    let host = thread::spawn(move || {
        let notification = notifications.recv_blocking().expect("notification");
        let started = Instant::now();
        channel.close();
        (notification.action, started.elapsed(), channel.connection_state())
    });

    peer.push(r#"NF#{"action":"sign-out"}"#);
    assert_eq!(peer.next_message(), "NO");
    let envelope = peer.next_envelope();
    assert_eq!(envelope["method"], "DELETE");
    let seq = envelope_seq(&envelope);
    peer.push(&format!(r#"{{"status":200,"header":{{"x-ca-seq":"{seq}"}}}}"#));

    let (action, elapsed, state) = host.join().expect("host thread");
    assert_eq!(action, "sign-out");
    assert!(elapsed < Duration::from_secs(1), "closed after {elapsed:?}");
    assert_eq!(state, ConnectionState::Closed);
}

#[tokio::test]
async fn async_receiver_gets_delivered_notifications() {
    let (sender, mut notifications) = Notifications::channel();
    let sink: Arc<dyn NotificationSink> = Arc::new(sender);
    let producer = thread::spawn(move || {
        sink.deliver(Notification {
            action: "kick".to_string(),
            payload: serde_json::json!({ "action": "kick" }),
        });
    });
    let received = tokio::time::timeout(FRAME_WAIT, notifications.recv())
        .await
        .expect("delivered in time");
    producer.join().expect("producer");
    assert_eq!(received.map(|notification| notification.action).as_deref(), Some("kick"));
    assert_eq!(notifications.recv().await, None);
}
