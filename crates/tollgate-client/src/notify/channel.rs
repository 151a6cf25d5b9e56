use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

use tollgate_core::{PeriodicTimer, SdkConfig, SdkError, SessionState};
use tollgate_crypto::Params;

use super::frame::{
    self, EnvelopeRequest, API_TYPE_REGISTER, API_TYPE_UNREGISTER, FLOW_CONTROL, HEARTBEAT,
    HEARTBEAT_ACK, LIFECYCLE_EXPIRED, NOTIFICATION_PATH, NOTIFY, NOTIFY_ACK, REGISTERED,
    REGISTER_FAILED,
};
use super::socket::{Connector, Socket};
use super::NotificationSink;
use crate::pipeline::{bearer, signed_query};

/// Upper bound on how long the reader holds the lock waiting for a frame.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

const RUNNING: u8 = 0;
const CLOSING: u8 = 1;
const STOPPED: u8 = 2;

enum Flow {
    Continue,
    /// Server asked for a fresh connection.
    Reconnect,
    /// The connection failed underneath us.
    Lost,
}

type CommandHandler = fn(&Shared, &mut ChannelState, &str) -> Flow;

struct ChannelState {
    socket: Option<Box<dyn Socket>>,
    connection: ConnectionState,
    next_seq: u64,
    pending_subscribe: Option<u64>,
    pending_unsubscribe: Option<u64>,
    subscribed: bool,
    heartbeat: Option<PeriodicTimer>,
}

struct Shared {
    state: Mutex<ChannelState>,
    changed: Condvar,
    phase: AtomicU8,
    handlers: HashMap<&'static str, CommandHandler>,
    config: Arc<SdkConfig>,
    session: Arc<SessionState>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn NotificationSink>,
    url: String,
    host: String,
    this: Weak<Shared>,
}

fn command_handlers() -> HashMap<&'static str, CommandHandler> {
    let mut handlers: HashMap<&'static str, CommandHandler> = HashMap::new();
    handlers.insert(REGISTERED, on_registered);
    handlers.insert(REGISTER_FAILED, on_register_failed);
    handlers.insert(HEARTBEAT_ACK, on_heartbeat_ack);
    handlers.insert(NOTIFY, on_notify);
    handlers.insert(FLOW_CONTROL, on_flow_control);
    handlers.insert(LIFECYCLE_EXPIRED, on_lifecycle_expired);
    handlers
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock()
    }

    fn phase(&self) -> u8 {
        self.phase.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: u8) {
        let guard = self.lock();
        self.phase.store(phase, Ordering::SeqCst);
        drop(guard);
        self.changed.notify_all();
    }

    /// Sleeps up to `limit`, waking early once the phase leaves `phase`.
    fn wait_in_phase(&self, phase: u8, limit: Duration) {
        let mut guard = self.lock();
        self.changed
            .wait_while_for(&mut guard, |_| self.phase() == phase, limit);
    }

    fn send(&self, state: &mut ChannelState, text: &str) -> bool {
        let Some(socket) = state.socket.as_mut() else {
            debug!(event = "notification_send_skipped");
            return false;
        };
        match socket.send_text(text) {
            Ok(()) => true,
            Err(err) => {
                warn!(event = "notification_send_failed", error = %err);
                false
            }
        }
    }

    /// Sends a signed request envelope. The sequence number is consumed
    /// whether or not the send succeeds.
    fn send_sequenced(&self, state: &mut ChannelState, method: &str, api_type: &str) -> Option<u64> {
        let seq = state.next_seq;
        state.next_seq += 1;
        let body = Params::new();
        let query = signed_query(
            &self.config,
            &self.session,
            method,
            NOTIFICATION_PATH,
            &Params::new(),
            &body,
        );
        let envelope = frame::request_envelope(&EnvelopeRequest {
            method,
            host: &self.host,
            path: NOTIFICATION_PATH,
            query: &query,
            api_type,
            seq,
            authorization: bearer(&self.session),
            body: &body,
        });
        debug!(event = "notification_request_sent", method, seq);
        self.send(state, &envelope).then_some(seq)
    }

    fn dispatch(&self, state: &mut ChannelState, raw: &str) -> Flow {
        let text = raw.trim_end_matches(['\r', '\n']);
        if let Some(handler) = text.get(..2).and_then(|code| self.handlers.get(code)) {
            return handler(self, state, &text[2..]);
        }
        self.on_response(state, text);
        Flow::Continue
    }

    fn on_response(&self, state: &mut ChannelState, text: &str) {
        let response = match frame::parse_response(text) {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "notification_frame_invalid", error = %err);
                return;
            }
        };
        let Some(seq) = response.seq else {
            debug!(event = "notification_response_unsequenced", status = response.status);
            return;
        };
        if state.pending_subscribe == Some(seq) {
            state.pending_subscribe = None;
            if (200..300).contains(&response.status) {
                state.subscribed = true;
                info!(event = "notification_subscribed", seq);
            } else {
                warn!(event = "notification_subscribe_rejected", seq, status = response.status);
            }
            self.changed.notify_all();
        } else if state.pending_unsubscribe == Some(seq) {
            state.pending_unsubscribe = None;
            state.subscribed = false;
            info!(event = "notification_unsubscribed", seq, status = response.status);
            self.changed.notify_all();
        } else {
            debug!(event = "notification_response_unmatched", seq, status = response.status);
        }
    }

    fn connect(&self) {
        self.lock().connection = ConnectionState::Connecting;
        let mut socket = match self.connector.connect(&self.url) {
            Ok(socket) => socket,
            Err(err) => {
                warn!(event = "notification_connect_failed", url = %self.url, error = %err);
                self.lock().connection = ConnectionState::Closed;
                self.wait_in_phase(RUNNING, self.config.reconnect_delay);
                return;
            }
        };

        let mut state = self.lock();
        if self.phase() != RUNNING {
            socket.close();
            state.connection = ConnectionState::Closed;
            return;
        }
        match socket.send_text(&frame::registration_frame(&self.config.app_key)) {
            Ok(()) => {
                info!(event = "notification_connected", url = %self.url);
                state.socket = Some(socket);
                state.connection = ConnectionState::Open;
            }
            Err(err) => {
                warn!(event = "notification_register_send_failed", error = %err);
                socket.close();
                state.connection = ConnectionState::Closed;
                drop(state);
                self.wait_in_phase(RUNNING, self.config.reconnect_delay);
            }
        }
    }

    /// Reads one frame if connected. Returns `false` when there is no socket.
    fn poll_once(&self) -> bool {
        let flow = {
            let mut state = self.lock();
            let polled = match state.socket.as_mut() {
                Some(socket) => socket.poll_text(POLL_INTERVAL),
                None => return false,
            };
            let flow = match polled {
                Ok(Some(text)) => self.dispatch(&mut state, &text),
                Ok(None) => Flow::Continue,
                Err(err) => {
                    info!(event = "notification_connection_lost", error = %err);
                    Flow::Lost
                }
            };
            // Hand the lock to waiting senders before polling again.
            MutexGuard::unlock_fair(state);
            flow
        };
        match flow {
            Flow::Continue => {}
            Flow::Reconnect => self.drop_connection(),
            Flow::Lost => {
                self.drop_connection();
                self.wait_in_phase(RUNNING, self.config.reconnect_delay);
            }
        }
        true
    }

    fn drop_connection(&self) {
        let heartbeat = {
            let mut state = self.lock();
            if let Some(mut socket) = state.socket.take() {
                socket.close();
            }
            state.connection = ConnectionState::Closed;
            state.subscribed = false;
            state.pending_subscribe = None;
            state.pending_unsubscribe = None;
            state.heartbeat.take()
        };
        self.changed.notify_all();
        if let Some(mut heartbeat) = heartbeat {
            heartbeat.stop();
        }
    }
}

fn on_registered(shared: &Shared, state: &mut ChannelState, payload: &str) -> Flow {
    let interval = match frame::parse_keepalive(payload) {
        Ok(interval) => interval,
        Err(err) => {
            warn!(event = "notification_frame_invalid", code = REGISTERED, error = %err);
            return Flow::Continue;
        }
    };
    if shared.phase() != RUNNING {
        return Flow::Continue;
    }
    if state.heartbeat.is_none() {
        let weak = shared.this.clone();
        let mut heartbeat = PeriodicTimer::new("tollgate-heartbeat", move || {
            if let Some(shared) = weak.upgrade() {
                let mut state = shared.lock();
                shared.send(&mut state, HEARTBEAT);
            }
        });
        heartbeat.start(interval);
        state.heartbeat = Some(heartbeat);
        debug!(event = "notification_heartbeat_started", interval_ms = interval.as_millis() as u64);
    }
    if let Some(seq) = shared.send_sequenced(state, "POST", API_TYPE_REGISTER) {
        state.pending_subscribe = Some(seq);
    }
    Flow::Continue
}

fn on_register_failed(_shared: &Shared, _state: &mut ChannelState, payload: &str) -> Flow {
    error!(event = "notification_register_failed", detail = %payload);
    Flow::Continue
}

fn on_heartbeat_ack(_shared: &Shared, _state: &mut ChannelState, _payload: &str) -> Flow {
    trace!(event = "notification_heartbeat_ack");
    Flow::Continue
}

fn on_notify(shared: &Shared, state: &mut ChannelState, payload: &str) -> Flow {
    shared.send(state, NOTIFY_ACK);
    match frame::parse_notification(payload) {
        Ok(notification) => {
            debug!(event = "notification_received", action = %notification.action);
            // Runs under the state lock; the sink must not re-enter the client.
            shared.sink.deliver(notification);
        }
        Err(err) => warn!(event = "notification_frame_invalid", code = NOTIFY, error = %err),
    }
    Flow::Continue
}

fn on_flow_control(_shared: &Shared, _state: &mut ChannelState, _payload: &str) -> Flow {
    info!(event = "notification_flow_control");
    Flow::Reconnect
}

fn on_lifecycle_expired(_shared: &Shared, _state: &mut ChannelState, _payload: &str) -> Flow {
    info!(event = "notification_connection_expired");
    Flow::Reconnect
}

fn run(shared: Arc<Shared>) {
    loop {
        match shared.phase() {
            STOPPED => break,
            CLOSING => {
                // Keep reading so the unsubscribe confirmation can arrive.
                if !shared.poll_once() {
                    shared.wait_in_phase(CLOSING, POLL_INTERVAL);
                }
            }
            _ => {
                if !shared.poll_once() {
                    shared.connect();
                }
            }
        }
    }
    debug!(event = "notification_reader_stopped");
}

/// Handle to a running notification connection.
///
/// Dropping it (or calling [`close`](Self::close)) unsubscribes with a
/// bounded wait, then stops the reader and closes the socket.
pub struct NotificationChannel {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl NotificationChannel {
    pub fn open(
        config: Arc<SdkConfig>,
        session: Arc<SessionState>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, SdkError> {
        let url = config.notification_url()?;
        let host = config.host()?;
        let shared = Arc::new_cyclic(|this| Shared {
            state: Mutex::new(ChannelState {
                socket: None,
                connection: ConnectionState::Closed,
                next_seq: 0,
                pending_subscribe: None,
                pending_unsubscribe: None,
                subscribed: false,
                heartbeat: None,
            }),
            changed: Condvar::new(),
            phase: AtomicU8::new(RUNNING),
            handlers: command_handlers(),
            config,
            session,
            connector,
            sink,
            url,
            host,
            this: this.clone(),
        });
        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("tollgate-notify".to_string())
            .spawn(move || run(reader_shared))
            .map_err(|err| {
                SdkError::Transport(format!("failed to start notification reader: {err}"))
            })?;
        Ok(Self {
            shared,
            reader: Some(reader),
        })
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.lock().subscribed
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    pub fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.shared.set_phase(CLOSING);
        let heartbeat = self.shared.lock().heartbeat.take();
        if let Some(mut heartbeat) = heartbeat {
            heartbeat.stop();
        }

        let mut state = self.shared.lock();
        if state.subscribed {
            match self.shared.send_sequenced(&mut state, "DELETE", API_TYPE_UNREGISTER) {
                Some(seq) => {
                    state.pending_unsubscribe = Some(seq);
                    let wait = self.shared.changed.wait_while_for(
                        &mut state,
                        |state| state.subscribed,
                        self.shared.config.unsubscribe_timeout,
                    );
                    if wait.timed_out() {
                        warn!(event = "notification_unsubscribe_timeout", seq);
                    }
                }
                None => warn!(event = "notification_unsubscribe_unsent"),
            }
        }
        drop(state);

        self.shared.set_phase(STOPPED);
        if reader.join().is_err() {
            warn!(event = "notification_reader_panicked");
        }
        self.shared.drop_connection();
        info!(event = "notification_channel_closed");
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        self.close();
    }
}
