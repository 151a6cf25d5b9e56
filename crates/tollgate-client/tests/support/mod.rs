#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use mockito::ServerGuard;
use serde_json::{json, Value};

use tollgate_client::notify::{Connector, Socket, SocketError};
use tollgate_client::{Collaborators, MemorySecretStore, SdkConfig, StaticFingerprint};

pub const APP_KEY: &str = "app-key";
pub const APP_SECRET: &str = "app-secret";
pub const FINGERPRINT: &str = "fp-1";

const PRIVATE_KEY: &str =
    include_str!("../../../tollgate-crypto/tests/fixtures/identity_private.pem");
const PUBLIC_KEY: &str = include_str!("../../../tollgate-crypto/tests/fixtures/identity_public.pem");

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}

pub fn config(server: &ServerGuard) -> SdkConfig {
    let mut config = SdkConfig::new(APP_KEY, APP_SECRET)
        .with_base_url(server.url())
        .with_allow_insecure(true);
    config.identity_public_key_pem = Some(PUBLIC_KEY.to_string());
    config.reconnect_delay = Duration::from_millis(50);
    config
}

/// Refuses every connection so the notification channel never opens.
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(&self, _url: &str) -> Result<Box<dyn Socket>, SocketError> {
        Err(SocketError::Connect("refused".to_string()))
    }
}

pub fn collaborators(store: &Arc<MemorySecretStore>) -> Collaborators {
    Collaborators::new(
        Arc::clone(store) as _,
        Arc::new(StaticFingerprint::new(FINGERPRINT)),
    )
    .with_connector(Arc::new(RefusingConnector))
}

pub fn identity_token(audience: &str, agent_code: &str, status: i64) -> String {
    let claims = json!({
        "aud": audience,
        "exp": now() + 3600,
        "name": "alice",
        "email": "alice@example.com",
        "agent_code": agent_code,
        "secret": "profile-secret",
        "status": status,
    });
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).expect("encoding key");
    encode(&Header::new(Algorithm::RS256), &claims, &key).expect("encode")
}

pub fn envelope(data: Value) -> String {
    json!({ "code": 0, "msg": "ok", "data": data }).to_string()
}

pub fn session_body(id_token: &str, access_token: &str, refresh_token: &str) -> String {
    envelope(json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "id_token": id_token,
        "expires_in": 3600,
        "refresh_token_expires_in": 86400,
    }))
}
