use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use tollgate_core::{
    LifecycleState, PeriodicTimer, Profile, SdkConfig, SdkError, SessionState,
};
use tollgate_crypto::{IdentityTokenValidator, Params};
use tollgate_keystore::{
    default_secret_store, DeviceFingerprint, MachineIdFingerprint, SecretStore,
};

use crate::notify::{
    Connector, NotificationChannel, NotificationSink, Notifications, TungsteniteConnector,
};
use crate::pipeline::RequestPipeline;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Platform services a client talks to. Transport and connector default to
/// `reqwest` and `tungstenite` when left unset.
pub struct Collaborators {
    pub secrets: Arc<dyn SecretStore>,
    pub fingerprint: Arc<dyn DeviceFingerprint>,
    pub transport: Option<Arc<dyn HttpTransport>>,
    pub connector: Option<Arc<dyn Connector>>,
}

impl Collaborators {
    pub fn new(secrets: Arc<dyn SecretStore>, fingerprint: Arc<dyn DeviceFingerprint>) -> Self {
        Self {
            secrets,
            fingerprint,
            transport: None,
            connector: None,
        }
    }

    /// OS keyring and machine-id fingerprint.
    pub fn platform() -> Self {
        Self::new(
            Arc::from(default_secret_store()),
            Arc::new(MachineIdFingerprint::new()),
        )
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: Arc<SdkConfig>,
    pub(crate) session: Arc<SessionState>,
    pub(crate) pipeline: RequestPipeline,
    pub(crate) validator: IdentityTokenValidator,
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub(crate) fingerprint: Arc<dyn DeviceFingerprint>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) refresh_timer: Mutex<Option<PeriodicTimer>>,
    pub(crate) channel: Mutex<Option<NotificationChannel>>,
}

impl ClientInner {
    pub(crate) fn close_notifications(&self) {
        let channel = self.channel.lock().take();
        if let Some(mut channel) = channel {
            channel.close();
        }
    }

    pub(crate) fn stop_refresh_scheduler(&self) {
        let timer = self.refresh_timer.lock().take();
        if let Some(mut timer) = timer {
            timer.stop();
        }
    }
}

/// An initialized SDK session. Not `Clone`: dropping it stops the refresh
/// scheduler and tears down the notification channel.
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Validates `config`, wires collaborators and resumes a persisted
    /// session if one exists.
    pub fn initialize(config: SdkConfig, collaborators: Collaborators) -> Result<Self, SdkError> {
        config.validate()?;
        let validator = match &config.identity_public_key_pem {
            Some(pem) => IdentityTokenValidator::new(pem),
            None => IdentityTokenValidator::with_default_key(),
        }
        .map_err(|err| {
            warn!(event = "identity_key_invalid", error = %err);
            SdkError::InvalidParameters("identity public key is not a valid RSA PEM")
        })?;
        let transport: Arc<dyn HttpTransport> = match collaborators.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.request_timeout)?),
        };
        let connector: Arc<dyn Connector> = match collaborators.connector {
            Some(connector) => connector,
            None => Arc::new(TungsteniteConnector::new()),
        };

        let config = Arc::new(config);
        let session = Arc::new(SessionState::new());
        let inner = Arc::new(ClientInner {
            pipeline: RequestPipeline::new(Arc::clone(&config), Arc::clone(&session), transport),
            config,
            session,
            validator,
            secrets: collaborators.secrets,
            fingerprint: collaborators.fingerprint,
            connector,
            refresh_timer: Mutex::new(None),
            channel: Mutex::new(None),
        });
        info!(event = "sdk_initialized", app_key = %inner.config.app_key);
        inner.load_cached_session();
        Ok(Self { inner })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &SessionState {
        &self.inner.session
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.session.lifecycle()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.session.profile()
    }

    /// Period of the running refresh scheduler, if any.
    pub fn refresh_period(&self) -> Option<Duration> {
        self.inner
            .refresh_timer
            .lock()
            .as_ref()
            .and_then(PeriodicTimer::period)
    }

    pub fn sign_in(&self, username: &str, password: &str) -> Result<Profile, SdkError> {
        self.inner.sign_in(username, password)
    }

    pub fn refresh(&self) -> Result<Profile, SdkError> {
        self.inner.refresh()
    }

    pub fn sign_out(&self) -> Result<(), SdkError> {
        self.inner.sign_out()
    }

    /// Signed request against any endpoint; returns the envelope's `data`.
    pub fn send_request(
        &self,
        verb: &str,
        path: &str,
        queries: &Params,
        form: &Params,
    ) -> Result<Value, SdkError> {
        self.inner.pipeline.send_request(verb, path, queries, form)
    }

    /// Opens the notification channel, replacing any previous one.
    pub fn set_notification_sink(&self, sink: Arc<dyn NotificationSink>) -> Result<(), SdkError> {
        self.inner.close_notifications();
        let channel = NotificationChannel::open(
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.session),
            Arc::clone(&self.inner.connector),
            sink,
        )?;
        let previous = self.inner.channel.lock().replace(channel);
        if let Some(mut previous) = previous {
            previous.close();
        }
        Ok(())
    }

    pub fn subscribe_notifications(&self) -> Result<Notifications, SdkError> {
        let (sender, notifications) = Notifications::channel();
        self.set_notification_sink(Arc::new(sender))?;
        Ok(notifications)
    }

    pub fn unsubscribe_notifications(&self) {
        self.inner.close_notifications();
    }

    pub fn notifications_subscribed(&self) -> bool {
        self.inner
            .channel
            .lock()
            .as_ref()
            .is_some_and(NotificationChannel::is_subscribed)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.stop_refresh_scheduler();
        self.inner.close_notifications();
    }
}
