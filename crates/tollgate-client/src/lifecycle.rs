//! Sign-in, scheduled refresh and sign-out.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tollgate_core::{
    PeriodicTimer, PersistedRefreshToken, Profile, SdkError, SessionUpdate, TokenSet, UserStatus,
};
use tollgate_crypto::Params;

use crate::client::ClientInner;

pub const SESSION_PATH: &str = "/session";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const AGENT_CODE_KEY: &str = "agent_code";
const REFRESH_TIMER_NAME: &str = "tollgate-refresh";

#[derive(Deserialize)]
struct SessionTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    id_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token_expires_in: i64,
}

/// Three quarters of the access token lifetime, in whole seconds.
pub fn refresh_period(expires_in: i64) -> Option<Duration> {
    let seconds = expires_in.checked_mul(3)? / 4;
    (seconds > 0).then(|| Duration::from_secs(seconds as u64))
}

fn form(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

impl ClientInner {
    pub(crate) fn sign_in(self: &Arc<Self>, username: &str, password: &str) -> Result<Profile, SdkError> {
        if username.is_empty() || password.is_empty() {
            return Err(SdkError::InvalidParameters("username and password are required"));
        }
        let epoch = self.session.epoch();
        let body = form(&[("username", username), ("password", password)]);
        let result = self.pipeline.send_request_with(
            "POST",
            SESSION_PATH,
            &Params::new(),
            &body,
            |data| self.apply_session(data, epoch),
        );
        if let Ok(profile) = &result {
            info!(event = "signed_in", status = profile.status.code());
        }
        result
    }

    pub(crate) fn refresh(self: &Arc<Self>) -> Result<Profile, SdkError> {
        let epoch = self.session.epoch();
        let Some(refresh_token) = self.session.begin_refresh() else {
            return Err(SdkError::NotSignedIn);
        };
        let body = form(&[("refresh_token", refresh_token.as_str())]);
        let result = self.pipeline.send_request_with(
            "PATCH",
            SESSION_PATH,
            &Params::new(),
            &body,
            |data| self.apply_session(data, epoch),
        );
        match &result {
            Ok(_) => debug!(event = "session_refreshed"),
            Err(err) => {
                self.session.refresh_failed();
                warn!(event = "session_refresh_failed", code = err.code(), error = %err);
            }
        }
        result
    }

    pub(crate) fn sign_out(&self) -> Result<(), SdkError> {
        self.session.bump_epoch();
        self.close_notifications();
        self.stop_refresh_scheduler();
        if let Err(err) = self.secrets.delete(REFRESH_TOKEN_KEY) {
            warn!(event = "refresh_token_delete_failed", error = %err);
        }
        let result = self
            .pipeline
            .send_request("DELETE", SESSION_PATH, &Params::new(), &Params::new())
            .map(|_| ());
        self.session.clear();
        info!(event = "signed_out", remote_ok = result.is_ok());
        result
    }

    /// Starts from the refresh token persisted by a previous run. Storage
    /// problems only mean there is no session to resume.
    pub(crate) fn load_cached_session(self: &Arc<Self>) {
        match self.secrets.get(AGENT_CODE_KEY) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(agent_code) => self.session.set_agent_code(&agent_code),
                Err(_) => warn!(event = "agent_code_corrupted"),
            },
            Ok(None) => {}
            Err(err) => warn!(event = "agent_code_load_failed", error = %err),
        }

        let persisted = match self.secrets.get(REFRESH_TOKEN_KEY) {
            Ok(Some(bytes)) => match serde_json::from_slice::<PersistedRefreshToken>(&bytes) {
                Ok(persisted) => persisted,
                Err(err) => {
                    warn!(event = "refresh_token_corrupted", error = %err);
                    return;
                }
            },
            Ok(None) => {
                debug!(event = "no_cached_session");
                return;
            }
            Err(err) => {
                warn!(event = "refresh_token_load_failed", error = %err);
                return;
            }
        };

        if !persisted.is_usable_at(self.session.clock().now()) {
            debug!(event = "cached_session_expired", expires_at = persisted.expires_at);
            return;
        }
        self.session
            .restore_refresh_token(&persisted.token, persisted.expires_at);
        match self.refresh() {
            Ok(_) => info!(event = "cached_session_resumed"),
            Err(err) => warn!(event = "cached_session_resume_failed", code = err.code(), error = %err),
        }
    }

    /// Response handler shared by sign-in and refresh.
    fn apply_session(self: &Arc<Self>, data: &Value, epoch: u64) -> Result<Profile, SdkError> {
        let tokens = SessionTokens::deserialize(data)
            .map_err(|err| SdkError::Handler(format!("session payload: {err}")))?;
        let now = self.session.clock().now();
        let claims = self
            .validator
            .validate(&tokens.id_token, &self.config.app_key, now)
            .ok_or(SdkError::IdentityTokenInvalid)?;

        let refresh_expires_at = if tokens.refresh_token_expires_in > 0 {
            now + tokens.refresh_token_expires_in
        } else {
            0
        };
        let update = SessionUpdate {
            tokens: TokenSet {
                access_token: tokens.access_token,
                access_expires_at: now + tokens.expires_in,
                refresh_token: tokens.refresh_token,
                refresh_expires_at,
                id_token: tokens.id_token,
                id_expires_at: claims.exp,
            },
            username: claims.name,
            email: claims.email,
            agent_code: claims.agent_code,
            secret: claims.secret,
            status: UserStatus::from_code(claims.status),
        };
        let persisted = PersistedRefreshToken {
            token: update.tokens.refresh_token.clone(),
            expires_at: refresh_expires_at,
        };

        let Some(applied) = self.session.apply(update, epoch) else {
            info!(event = "session_response_discarded");
            return Err(SdkError::NotSignedIn);
        };

        if applied.agent_code_changed {
            if let Err(err) = self
                .secrets
                .set(AGENT_CODE_KEY, applied.profile.agent_code.as_bytes())
            {
                warn!(event = "agent_code_store_failed", error = %err);
            }
        }
        if persisted.is_usable_at(now) {
            self.persist_refresh_token(&persisted);
        }
        self.ensure_refresh_scheduler(tokens.expires_in, epoch);
        Ok(applied.profile)
    }

    fn persist_refresh_token(&self, persisted: &PersistedRefreshToken) {
        let bytes = match serde_json::to_vec(persisted) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(event = "refresh_token_encode_failed", error = %err);
                return;
            }
        };
        if let Err(err) = self.secrets.set(REFRESH_TOKEN_KEY, &bytes) {
            warn!(event = "refresh_token_store_failed", error = %err);
        }
    }

    fn ensure_refresh_scheduler(self: &Arc<Self>, expires_in: i64, epoch: u64) {
        let mut slot = self.refresh_timer.lock();
        // Sign-out bumps the epoch before it takes the timer out.
        if slot.is_some() || self.session.epoch() != epoch {
            return;
        }
        let Some(period) = refresh_period(expires_in) else {
            warn!(event = "refresh_not_scheduled", expires_in);
            return;
        };
        let weak = Arc::downgrade(self);
        let mut timer = PeriodicTimer::new(REFRESH_TIMER_NAME, move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.refresh() {
                    debug!(event = "scheduled_refresh_failed", code = err.code());
                }
            }
        });
        timer.start(period);
        info!(event = "refresh_scheduled", period_secs = period.as_secs());
        *slot = Some(timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_period_is_three_quarters() {
        assert_eq!(refresh_period(1200), Some(Duration::from_secs(900)));
        assert_eq!(refresh_period(3600), Some(Duration::from_secs(2700)));
        assert_eq!(refresh_period(7), Some(Duration::from_secs(5)));
    }

    #[test]
    fn degenerate_lifetimes_are_not_scheduled() {
        assert_eq!(refresh_period(1), None);
        assert_eq!(refresh_period(0), None);
        assert_eq!(refresh_period(-60), None);
        assert_eq!(refresh_period(i64::MAX), None);
    }
}
