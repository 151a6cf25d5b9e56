//! Push notifications over a persistent WebSocket.

mod channel;
pub mod frame;
mod socket;
#[cfg(test)]
mod tests;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

pub use channel::{ConnectionState, NotificationChannel};
pub use socket::{Connector, Socket, SocketError, TungsteniteConnector};

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub action: String,
    /// The full decoded payload, `action` included.
    pub payload: Value,
}

/// Receives notifications on the channel's reader thread. Must not block.
///
/// `deliver` runs while the channel state is locked, so a sink must not call
/// back into the `Client` (`sign_out`, `unsubscribe_notifications`,
/// `set_notification_sink`); doing so deadlocks. Hosts that react to a
/// notification should take a [`Notifications`] receiver from
/// `Client::subscribe_notifications` and act from their own thread.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification);
}

impl<F> NotificationSink for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn deliver(&self, notification: Notification) {
        self(notification);
    }
}

/// Sending half of [`Notifications`].
#[derive(Debug, Clone)]
pub struct NotificationSender(UnboundedSender<Notification>);

impl NotificationSink for NotificationSender {
    fn deliver(&self, notification: Notification) {
        if self.0.send(notification).is_err() {
            debug!(event = "notification_receiver_dropped");
        }
    }
}

/// Receiving half handed out by `Client::subscribe_notifications`.
#[derive(Debug)]
pub struct Notifications {
    rx: UnboundedReceiver<Notification>,
}

impl Notifications {
    pub fn channel() -> (NotificationSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NotificationSender(tx), Self { rx })
    }

    /// Blocks the current thread. Must not be called from async code.
    pub fn recv_blocking(&mut self) -> Option<Notification> {
        self.rx.blocking_recv()
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}
