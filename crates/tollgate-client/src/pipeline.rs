use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::form_urlencoded;

use tollgate_core::{SdkConfig, SdkError, SessionState};
use tollgate_crypto::{random_hex, sign, Params, SIGNATURE_PARAM};

use crate::transport::{HttpRequest, HttpTransport};

pub const APP_KEY_PARAM: &str = "k";
pub const TIMESTAMP_PARAM: &str = "t";
pub const NONCE_PARAM: &str = "z";
pub const ACCESS_TOKEN_PARAM: &str = "a";
const NONCE_BYTES: usize = 16;

/// Caller parameters plus `k`, `t`, `z`, `a` (while the access token is
/// live) and finally the signature `s` over all of them and the form.
pub(crate) fn signed_query(
    config: &SdkConfig,
    session: &SessionState,
    verb: &str,
    path: &str,
    queries: &Params,
    form: &Params,
) -> Params {
    let mut query = queries.clone();
    query.insert(APP_KEY_PARAM.to_string(), config.app_key.clone());
    query.insert(
        TIMESTAMP_PARAM.to_string(),
        session.clock().now_millis().to_string(),
    );
    query.insert(NONCE_PARAM.to_string(), random_hex(NONCE_BYTES));
    match session.access_token() {
        Some(token) => {
            query.insert(ACCESS_TOKEN_PARAM.to_string(), token);
        }
        None => {
            query.remove(ACCESS_TOKEN_PARAM);
        }
    }
    query.remove(SIGNATURE_PARAM);
    let signature = sign(config.app_secret.as_bytes(), verb, path, &query, form);
    query.insert(SIGNATURE_PARAM.to_string(), signature);
    query
}

pub(crate) fn bearer(session: &SessionState) -> Option<String> {
    session.identity_token().map(|token| format!("Bearer {token}"))
}

/// `application/x-www-form-urlencoded` rendering in key order.
pub(crate) fn encode_pairs(params: &Params) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

/// Signs, sends and unwraps `{code, msg, data}` envelopes.
pub struct RequestPipeline {
    config: Arc<SdkConfig>,
    session: Arc<SessionState>,
    transport: Arc<dyn HttpTransport>,
}

impl RequestPipeline {
    pub fn new(
        config: Arc<SdkConfig>,
        session: Arc<SessionState>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            session,
            transport,
        }
    }

    /// Returns the envelope's `data` member.
    pub fn send_request(
        &self,
        verb: &str,
        path: &str,
        queries: &Params,
        form: &Params,
    ) -> Result<Value, SdkError> {
        self.send_request_with(verb, path, queries, form, |data| Ok(data.clone()))
    }

    /// Runs `handler` on `data` once the envelope reports success.
    #[instrument(level = "debug", skip_all, fields(verb = %verb, path = %path))]
    pub fn send_request_with<T>(
        &self,
        verb: &str,
        path: &str,
        queries: &Params,
        form: &Params,
        handler: impl FnOnce(&Value) -> Result<T, SdkError>,
    ) -> Result<T, SdkError> {
        let query = signed_query(&self.config, &self.session, verb, path, queries, form);
        let url = format!("{}{}?{}", self.config.api_base(), path, encode_pairs(&query));
        let mut headers = Vec::new();
        if let Some(value) = bearer(&self.session) {
            headers.push(("Authorization".to_string(), value));
        }
        let body = (!form.is_empty()).then(|| encode_pairs(form));

        let response = self.transport.execute(HttpRequest {
            method: verb.to_string(),
            url,
            headers,
            body,
        })?;
        self.session
            .clock()
            .observe_date_header(response.date.as_deref());

        if response.body.trim().is_empty() {
            warn!(event = "response_empty", path, status = response.status);
            return Err(SdkError::Transport(format!(
                "empty response body (status {})",
                response.status
            )));
        }
        let envelope: Value = serde_json::from_str(&response.body).map_err(|err| {
            warn!(event = "response_not_json", path, status = response.status, error = %err);
            SdkError::Transport(format!("response is not json: {err}"))
        })?;

        // An absent `code` reads as success.
        let code = envelope.get("code").and_then(Value::as_i64).unwrap_or(0);
        let data = envelope.get("data");
        match (code, data) {
            (0, Some(data)) if (200..300).contains(&response.status) => {
                debug!(event = "request_succeeded", path, status = response.status);
                handler(data)
            }
            _ => {
                let message = envelope
                    .get("msg")
                    .or_else(|| envelope.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                warn!(
                    event = "request_failed",
                    path,
                    status = response.status,
                    code,
                    msg = %message
                );
                Err(SdkError::Server {
                    status: response.status,
                    code,
                    message,
                })
            }
        }
    }
}
