use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// Production key the account service signs identity tokens with.
pub const DEFAULT_IDENTITY_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAhCv3iNGsEa7pJ6yprVEN
cMwgRJNjHmlNM5v/gzat5zqkt3Vt29/9Afy89cyQd3emKskKQoNoEHfl48NWjFsO
45Bgwx5ysqNONGcn2+eBTQ2UbuEyu6lPX1cWSkFNMcHkWIYCHXXWcqJ24mAuwDLM
WY4uSu/THYdB3zlCIvADdW8c8BPJP9O9qz92CThoOnd00e56KMnho6kY3IT+V7Uq
GXEaNi58LhCbuxqezi64A50afEv8Qyw5HZNADZt/Z+wOv9cth+OdsT8cwA/BlWbM
fjUjCDD70qsaPbT/uZrzcLDKdywzb/a+D75DDlLAmEby/CsUHch2PDZScylJavj0
xQIDAQAB
-----END PUBLIC KEY-----";

const EXPECTED_TYP: &str = "JWT";

/// Claims carried by a validated identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub aud: String,
    pub exp: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub agent_code: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub status: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKeyError {
    InvalidPem(String),
}

impl std::fmt::Display for IdentityKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPem(reason) => write!(f, "invalid identity public key: {reason}"),
        }
    }
}

impl std::error::Error for IdentityKeyError {}

/// Verifies RS256 identity tokens against one RSA public key.
#[derive(Clone)]
pub struct IdentityTokenValidator {
    key: DecodingKey,
}

impl IdentityTokenValidator {
    pub fn new(public_key_pem: &str) -> Result<Self, IdentityKeyError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|err| IdentityKeyError::InvalidPem(err.to_string()))?;
        Ok(Self { key })
    }

    pub fn with_default_key() -> Result<Self, IdentityKeyError> {
        Self::new(DEFAULT_IDENTITY_PUBLIC_KEY)
    }

    /// Returns the token's claims when the header is `RS256`/`JWT`, the
    /// signature verifies over the original `header.payload` bytes, `aud`
    /// equals `audience` and `exp` is strictly after `now` (unix seconds).
    #[instrument(level = "debug", skip_all)]
    pub fn validate(&self, token: &str, audience: &str, now: i64) -> Option<IdentityClaims> {
        let header = match decode_header(token) {
            Ok(header) => header,
            Err(err) => {
                debug!(event = "identity_header_invalid", error = %err);
                return None;
            }
        };
        if header.alg != Algorithm::RS256 || header.typ.as_deref() != Some(EXPECTED_TYP) {
            debug!(event = "identity_header_unsupported", alg = ?header.alg, typ = ?header.typ);
            return None;
        }

        // Audience and expiry are checked below against the caller's clock.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = match decode::<IdentityClaims>(token, &self.key, &validation) {
            Ok(data) => data.claims,
            Err(err) => {
                debug!(event = "identity_token_rejected", error = %err);
                return None;
            }
        };
        if claims.aud != audience {
            debug!(event = "identity_audience_mismatch");
            return None;
        }
        if claims.exp <= now {
            debug!(event = "identity_token_expired", exp = claims.exp, now);
            return None;
        }
        Some(claims)
    }
}

impl std::fmt::Debug for IdentityTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTokenValidator").finish_non_exhaustive()
    }
}
