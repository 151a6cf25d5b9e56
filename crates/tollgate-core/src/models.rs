use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three credentials of a session with their absolute expiries
/// (unix seconds). Always replaced as a whole.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub access_expires_at: i64,
    pub refresh_token: String,
    pub refresh_expires_at: i64,
    pub id_token: String,
    pub id_expires_at: i64,
}

impl TokenSet {
    pub fn access_token_at(&self, now: i64) -> Option<&str> {
        (!self.access_token.is_empty() && self.access_expires_at > now)
            .then_some(self.access_token.as_str())
    }

    pub fn id_token_at(&self, now: i64) -> Option<&str> {
        (!self.id_token.is_empty() && self.id_expires_at > now).then_some(self.id_token.as_str())
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("id_expires_at", &self.id_expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum UserStatus {
    Inactive,
    Active,
    Authorized,
    Suspended,
    Other(i64),
}

impl UserStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Inactive,
            1 => Self::Active,
            2 => Self::Authorized,
            3 => Self::Suspended,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Inactive => 0,
            Self::Active => 1,
            Self::Authorized => 2,
            Self::Suspended => 3,
            Self::Other(code) => code,
        }
    }
}

impl From<i64> for UserStatus {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

impl From<UserStatus> for i64 {
    fn from(status: UserStatus) -> Self {
        status.code()
    }
}

/// Read-only snapshot of the signed-in account.
#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    pub email: String,
    pub agent_code: String,
    pub secret: String,
    pub status: UserStatus,
    pub access_token_expires_at: i64,
    pub refresh_token_expires_at: i64,
    pub id_token_expires_at: i64,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("agent_code", &self.agent_code)
            .field("status", &self.status)
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .field("id_token_expires_at", &self.id_token_expires_at)
            .finish_non_exhaustive()
    }
}

/// An authorization the account holds for one product module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    #[serde(alias = "module")]
    pub module_name: String,
    #[serde(default)]
    pub edition: i64,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
}

impl Version {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().trim_start_matches('v').split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(part) => part.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(part) => part.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// Accepts `{"major":..,"minor":..,"patch":..}` or `"major.minor.patch"`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Self::parse(text),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Refresh token as kept in the secret store between runs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRefreshToken {
    pub token: String,
    pub expires_at: i64,
}

impl PersistedRefreshToken {
    pub fn is_usable_at(&self, now: i64) -> bool {
        !self.token.is_empty() && self.expires_at > now
    }
}

impl fmt::Debug for PersistedRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedRefreshToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
