#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]

mod catalog;
mod client;
mod lifecycle;
pub mod logging;
pub mod notify;
mod pipeline;
mod sdk;
pub mod transport;

pub use crate::client::{Client, Collaborators};
pub use crate::lifecycle::{refresh_period, AGENT_CODE_KEY, REFRESH_TOKEN_KEY, SESSION_PATH};
pub use crate::logging::{init_logging, LogSeverity, LogSink, SinkLayer};
pub use crate::notify::{
    Connector, Notification, NotificationSender, NotificationSink, Notifications, Socket,
    SocketError,
};
pub use crate::pipeline::RequestPipeline;
pub use crate::sdk::Sdk;
pub use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

pub use tollgate_core::{
    AuthRecord, LifecycleState, Profile, SdkConfig, SdkError, TokenSet, UserStatus, Version,
};
pub use tollgate_crypto::Params;
pub use tollgate_keystore::{
    DeviceFingerprint, MachineIdFingerprint, MemorySecretStore, SecretStore, StaticFingerprint,
};
