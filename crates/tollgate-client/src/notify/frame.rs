use std::time::Duration;

use serde_json::{json, Map, Value};

use tollgate_crypto::{random_hex, Params};

use super::Notification;
use crate::pipeline::encode_pairs;

pub const REGISTER: &str = "RG";
pub const REGISTERED: &str = "RO";
pub const REGISTER_FAILED: &str = "RF";
pub const HEARTBEAT: &str = "H1";
pub const HEARTBEAT_ACK: &str = "HO";
pub const NOTIFY: &str = "NF";
pub const NOTIFY_ACK: &str = "NO";
pub const FLOW_CONTROL: &str = "OS";
pub const LIFECYCLE_EXPIRED: &str = "CR";

pub const NOTIFICATION_PATH: &str = "/notification";
pub const API_TYPE_HEADER: &str = "x-ca-websocket_api_type";
pub const SEQ_HEADER: &str = "x-ca-seq";
pub const API_TYPE_REGISTER: &str = "REGISTER";
pub const API_TYPE_UNREGISTER: &str = "UNREGISTER";

const REGISTRATION_NONCE_BYTES: usize = 16;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("keep-alive interval missing or invalid: {0:?}")]
    KeepAlive(String),
    #[error("notification payload invalid: {0}")]
    Notification(String),
    #[error("response envelope invalid: {0}")]
    Response(String),
}

/// First frame on every connection: `RG#<32 hex>@<app key>`.
pub fn registration_frame(app_key: &str) -> String {
    format!(
        "{REGISTER}#{}@{app_key}",
        random_hex(REGISTRATION_NONCE_BYTES)
    )
}

/// Keep-alive interval from an `RO` payload `#<credential>#<interval ms>`,
/// taken from the field after the last `#`.
pub fn parse_keepalive(payload: &str) -> Result<Duration, ProtocolError> {
    let field = payload.rsplit('#').next().unwrap_or_default().trim();
    match field.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ProtocolError::KeepAlive(field.to_string())),
    }
}

/// Decodes an `NF` payload `#{json}`.
pub fn parse_notification(payload: &str) -> Result<Notification, ProtocolError> {
    let body = payload.strip_prefix('#').unwrap_or(payload);
    let value: Value =
        serde_json::from_str(body).map_err(|err| ProtocolError::Notification(err.to_string()))?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Notification("missing action".to_string()))?
        .to_string();
    Ok(Notification {
        action,
        payload: value,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencedResponse {
    pub status: i64,
    pub seq: Option<u64>,
}

/// Decodes `{status, header: {x-ca-seq}}`. The sequence may be an integer,
/// a numeric string or a one-element array of either.
pub fn parse_response(frame: &str) -> Result<SequencedResponse, ProtocolError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|err| ProtocolError::Response(err.to_string()))?;
    let status = value
        .get("status")
        .and_then(|status| {
            status
                .as_i64()
                .or_else(|| status.as_str().and_then(|s| s.trim().parse().ok()))
        })
        .ok_or_else(|| ProtocolError::Response("missing status".to_string()))?;
    let seq = value
        .get("header")
        .and_then(|header| header.get(SEQ_HEADER))
        .and_then(seq_value);
    Ok(SequencedResponse { status, seq })
}

fn seq_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Array(items) => items.first().and_then(seq_value),
        _ => None,
    }
}

/// A sequenced request carried over the socket.
pub struct EnvelopeRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a Params,
    pub api_type: &'a str,
    pub seq: u64,
    pub authorization: Option<String>,
    pub body: &'a Params,
}

pub fn request_envelope(request: &EnvelopeRequest<'_>) -> String {
    let mut headers = Map::new();
    headers.insert(API_TYPE_HEADER.to_string(), json!([request.api_type]));
    headers.insert(SEQ_HEADER.to_string(), json!([request.seq.to_string()]));
    if let Some(authorization) = &request.authorization {
        headers.insert("authorization".to_string(), json!(authorization));
    }
    json!({
        "method": request.method,
        "host": request.host,
        "path": request.path,
        "querys": request.query,
        "headers": headers,
        "isBase64": 0,
        "body": encode_pairs(request.body),
    })
    .to_string()
}
