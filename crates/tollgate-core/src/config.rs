use std::env;
use std::fmt;
use std::time::Duration;

use tracing::warn;
use url::Url;
use zeroize::Zeroizing;

use crate::error::SdkError;

pub const DEFAULT_BASE_URL: &str = "https://api.tollgate.dev";
pub const DEFAULT_NOTIFICATION_PORT: u16 = 8080;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub const APP_KEY_ENV: &str = "TOLLGATE_APP_KEY";
pub const APP_SECRET_ENV: &str = "TOLLGATE_APP_SECRET";
pub const BASE_URL_ENV: &str = "TOLLGATE_BASE_URL";
pub const ALLOW_INSECURE_ENV: &str = "TOLLGATE_ALLOW_INSECURE";
pub const NOTIFICATION_PORT_ENV: &str = "TOLLGATE_NOTIFICATION_PORT";

#[derive(Clone)]
pub struct SdkConfig {
    pub app_key: String,
    pub app_secret: Zeroizing<String>,
    pub base_url: String,
    /// Permits `http://` base URLs.
    pub allow_insecure: bool,
    pub notification_port: u16,
    /// Overrides the built-in identity token public key.
    pub identity_public_key_pem: Option<String>,
    pub request_timeout: Duration,
    pub unsubscribe_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl SdkConfig {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: Zeroizing::new(app_secret.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
            allow_insecure: false,
            notification_port: DEFAULT_NOTIFICATION_PORT,
            identity_public_key_pem: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            unsubscribe_timeout: DEFAULT_UNSUBSCRIBE_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_allow_insecure(mut self, allow_insecure: bool) -> Self {
        self.allow_insecure = allow_insecure;
        self
    }

    /// Reads the application credentials and overrides from `TOLLGATE_*`
    /// variables. Invalid optional values are logged and left at their
    /// defaults; missing credentials are an error.
    pub fn from_env() -> Result<Self, SdkError> {
        let app_key = env::var(APP_KEY_ENV)
            .map_err(|_| SdkError::InvalidParameters("TOLLGATE_APP_KEY is not set"))?;
        let app_secret = env::var(APP_SECRET_ENV)
            .map_err(|_| SdkError::InvalidParameters("TOLLGATE_APP_SECRET is not set"))?;
        let mut config = Self::new(app_key, app_secret);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var(BASE_URL_ENV) {
            if value.trim().is_empty() {
                warn!(event = "config_invalid", field = BASE_URL_ENV, value = %value);
            } else {
                self.base_url = value.trim().to_string();
            }
        }
        if let Ok(value) = env::var(ALLOW_INSECURE_ENV) {
            if let Some(enabled) = parse_bool(&value) {
                self.allow_insecure = enabled;
            } else {
                warn!(event = "config_invalid", field = ALLOW_INSECURE_ENV, value = %value);
            }
        }
        if let Ok(value) = env::var(NOTIFICATION_PORT_ENV) {
            match value.trim().parse::<u16>() {
                Ok(port) if port != 0 => self.notification_port = port,
                _ => {
                    warn!(event = "config_invalid", field = NOTIFICATION_PORT_ENV, value = %value);
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), SdkError> {
        if self.app_key.trim().is_empty() {
            return Err(SdkError::InvalidParameters("app key is empty"));
        }
        if self.app_secret.is_empty() {
            return Err(SdkError::InvalidParameters("app secret is empty"));
        }
        let url = self.parsed_base_url()?;
        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure => {}
            "http" => {
                return Err(SdkError::InvalidParameters(
                    "base url must use https (set allow_insecure for local servers)",
                ))
            }
            _ => return Err(SdkError::InvalidParameters("base url scheme must be http(s)")),
        }
        if url.host_str().is_none() {
            return Err(SdkError::InvalidParameters("base url has no host"));
        }
        Ok(())
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn host(&self) -> Result<String, SdkError> {
        self.parsed_base_url()?
            .host_str()
            .map(str::to_string)
            .ok_or(SdkError::InvalidParameters("base url has no host"))
    }

    pub fn notification_url(&self) -> Result<String, SdkError> {
        Ok(format!("ws://{}:{}/", self.host()?, self.notification_port))
    }

    fn parsed_base_url(&self) -> Result<Url, SdkError> {
        Url::parse(self.base_url.trim())
            .map_err(|_| SdkError::InvalidParameters("base url is not a valid url"))
    }
}

impl fmt::Debug for SdkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkConfig")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("allow_insecure", &self.allow_insecure)
            .field("notification_port", &self.notification_port)
            .field(
                "identity_public_key_pem",
                &self.identity_public_key_pem.as_ref().map(|_| "<custom>"),
            )
            .field("request_timeout", &self.request_timeout)
            .field("unsubscribe_timeout", &self.unsubscribe_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
