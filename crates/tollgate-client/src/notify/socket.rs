use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;
use tungstenite::{Message, WebSocket};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("connection closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Io(String),
}

/// One open text-frame connection.
pub trait Socket: Send {
    fn send_text(&mut self, text: &str) -> Result<(), SocketError>;
    /// Waits at most `wait` for the next text frame; `Ok(None)` on timeout.
    fn poll_text(&mut self, wait: Duration) -> Result<Option<String>, SocketError>;
    fn close(&mut self);
}

pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Box<dyn Socket>, SocketError>;
}

/// Plain `ws://` client over a blocking TCP stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn Socket>, SocketError> {
        let parsed = Url::parse(url).map_err(|err| SocketError::Connect(err.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SocketError::Connect("url has no host".to_string()))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| SocketError::Connect("url has no port".to_string()))?;
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|err| SocketError::Connect(err.to_string()))?
            .next()
            .ok_or_else(|| SocketError::Connect(format!("{host} did not resolve")))?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|err| SocketError::Connect(err.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|err| SocketError::Connect(err.to_string()))?;
        let (socket, _response) =
            tungstenite::client(url, stream).map_err(|err| SocketError::Connect(err.to_string()))?;
        debug!(event = "websocket_connected", host, port);
        Ok(Box::new(TungsteniteSocket {
            socket,
            read_timeout: None,
        }))
    }
}

struct TungsteniteSocket {
    socket: WebSocket<TcpStream>,
    read_timeout: Option<Duration>,
}

impl TungsteniteSocket {
    fn set_read_timeout(&mut self, wait: Duration) -> Result<(), SocketError> {
        let wait = wait.max(Duration::from_millis(1));
        if self.read_timeout != Some(wait) {
            self.socket
                .get_ref()
                .set_read_timeout(Some(wait))
                .map_err(|err| SocketError::Io(err.to_string()))?;
            self.read_timeout = Some(wait);
        }
        Ok(())
    }
}

fn map_error(err: tungstenite::Error) -> SocketError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            SocketError::Closed
        }
        other => SocketError::Io(other.to_string()),
    }
}

impl Socket for TungsteniteSocket {
    fn send_text(&mut self, text: &str) -> Result<(), SocketError> {
        self.socket
            .send(Message::Text(text.to_string()))
            .map_err(map_error)
    }

    fn poll_text(&mut self, wait: Duration) -> Result<Option<String>, SocketError> {
        self.set_read_timeout(wait)?;
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            Ok(Message::Close(_)) => Err(SocketError::Closed),
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(err) => Err(map_error(err)),
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.socket.close(None) {
            debug!(event = "websocket_close_failed", error = %err);
        }
        if let Err(err) = self.socket.flush() {
            debug!(event = "websocket_flush_failed", error = %err);
        }
    }
}
