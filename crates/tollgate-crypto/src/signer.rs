use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::instrument;

/// Request parameters, ordered by key.
pub type Params = BTreeMap<String, String>;

/// Name of the signature parameter. Never part of its own input.
pub const SIGNATURE_PARAM: &str = "s";

type HmacSha256 = Hmac<Sha256>;

/// Builds the string that gets signed: verb, path, then every `key value`
/// pair of the merged parameter set in ascending key order.
///
/// Form entries win over query entries with the same key.
#[must_use]
pub fn canonical_string(verb: &str, path: &str, queries: &Params, form: &Params) -> String {
    let mut merged: BTreeMap<&str, &str> = queries
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    for (key, value) in form {
        merged.insert(key.as_str(), value.as_str());
    }
    merged.remove(SIGNATURE_PARAM);

    let mut out = String::with_capacity(verb.len() + path.len() + merged.len() * 16);
    out.push_str(verb);
    out.push_str(path);
    for (key, value) in merged {
        out.push_str(key);
        out.push_str(value);
    }
    out
}

/// HMAC-SHA256 over [`canonical_string`], keyed with the application secret,
/// as lower-case hex.
#[instrument(level = "trace", skip_all, fields(verb = %verb, path = %path))]
#[must_use]
pub fn sign(secret: &[u8], verb: &str, path: &str, queries: &Params, form: &Params) -> String {
    let input = canonical_string(verb, path, queries, form);
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(err) => {
            tracing::error!(event = "sign_key_rejected", error = %err);
            return String::new();
        }
    };
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
