use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use zeroize::Zeroizing;

use crate::clock::ServerClock;
use crate::models::{Profile, TokenSet, UserStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Initialized,
    Authenticated,
    Refreshing,
}

/// Everything a successful sign-in or refresh response writes.
#[derive(Clone)]
pub struct SessionUpdate {
    pub tokens: TokenSet,
    pub username: String,
    pub email: String,
    pub agent_code: String,
    pub secret: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone)]
pub struct AppliedSession {
    pub profile: Profile,
    /// The agent code differs from the previously known one; materials were
    /// dropped and the new code should be persisted.
    pub agent_code_changed: bool,
}

#[derive(Default)]
struct SessionData {
    tokens: TokenSet,
    username: String,
    email: String,
    agent_code: String,
    secret: Zeroizing<String>,
    device_id: Option<String>,
    materials: HashMap<String, String>,
    shopee_hosts: Option<Value>,
    profile: Option<Profile>,
    lifecycle: LifecycleState,
}

/// Shared, lock-protected state of one client session.
#[derive(Default)]
pub struct SessionState {
    data: RwLock<SessionData>,
    epoch: AtomicU64,
    clock: ServerClock,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidates every request started before this call.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.read().lifecycle
    }

    pub fn tokens(&self) -> TokenSet {
        self.read().tokens.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.read().profile.clone()
    }

    /// Access token if present and unexpired on the server clock.
    pub fn access_token(&self) -> Option<String> {
        let now = self.clock.now();
        self.read().tokens.access_token_at(now).map(str::to_string)
    }

    /// Identity token if present and unexpired on the server clock.
    pub fn identity_token(&self) -> Option<String> {
        let now = self.clock.now();
        self.read().tokens.id_token_at(now).map(str::to_string)
    }

    pub fn refresh_token(&self) -> Option<String> {
        let data = self.read();
        (!data.tokens.refresh_token.is_empty()).then(|| data.tokens.refresh_token.clone())
    }

    /// Seeds the refresh token from storage before the first refresh.
    pub fn restore_refresh_token(&self, token: &str, expires_at: i64) {
        let mut data = self.write();
        data.tokens.refresh_token = token.to_string();
        data.tokens.refresh_expires_at = expires_at;
    }

    /// Zeroes the access and identity expiries and hands out the refresh
    /// token. `None` when there is nothing to refresh with.
    pub fn begin_refresh(&self) -> Option<String> {
        let mut data = self.write();
        if data.tokens.refresh_token.is_empty() {
            return None;
        }
        data.tokens.access_expires_at = 0;
        data.tokens.id_expires_at = 0;
        data.lifecycle = LifecycleState::Refreshing;
        Some(data.tokens.refresh_token.clone())
    }

    pub fn refresh_failed(&self) {
        let mut data = self.write();
        if data.lifecycle == LifecycleState::Refreshing {
            data.lifecycle = if data.profile.is_some() {
                LifecycleState::Authenticated
            } else {
                LifecycleState::Initialized
            };
        }
    }

    /// Writes a validated session response. Returns `None` without touching
    /// anything when the session was signed out after `epoch` was read.
    pub fn apply(&self, update: SessionUpdate, epoch: u64) -> Option<AppliedSession> {
        let mut data = self.write();
        if self.epoch() != epoch {
            return None;
        }

        let agent_code_changed = data.agent_code != update.agent_code;
        if agent_code_changed {
            data.materials.clear();
            data.shopee_hosts = None;
        }

        let profile = Profile {
            username: update.username.clone(),
            email: update.email.clone(),
            agent_code: update.agent_code.clone(),
            secret: update.secret.clone(),
            status: update.status,
            access_token_expires_at: update.tokens.access_expires_at,
            refresh_token_expires_at: update.tokens.refresh_expires_at,
            id_token_expires_at: update.tokens.id_expires_at,
        };

        data.tokens = update.tokens;
        data.username = update.username;
        data.email = update.email;
        data.agent_code = update.agent_code;
        data.secret = Zeroizing::new(update.secret);
        data.profile = Some(profile.clone());
        data.lifecycle = LifecycleState::Authenticated;

        Some(AppliedSession {
            profile,
            agent_code_changed,
        })
    }

    /// Drops tokens and account fields. Agent code, device id and
    /// materials stay.
    pub fn clear(&self) {
        let mut data = self.write();
        data.tokens = TokenSet::default();
        data.username.clear();
        data.email.clear();
        data.secret = Zeroizing::new(String::new());
        data.profile = None;
        data.lifecycle = LifecycleState::Initialized;
    }

    pub fn agent_code(&self) -> String {
        self.read().agent_code.clone()
    }

    pub fn set_agent_code(&self, agent_code: &str) {
        self.write().agent_code = agent_code.to_string();
    }

    pub fn device_id(&self) -> Option<String> {
        self.read().device_id.clone()
    }

    pub fn set_device_id(&self, device_id: &str) {
        self.write().device_id = Some(device_id.to_string());
    }

    pub fn material(&self, name: &str) -> Option<String> {
        self.read().materials.get(name).cloned()
    }

    pub fn has_materials(&self) -> bool {
        !self.read().materials.is_empty()
    }

    pub fn replace_materials(&self, materials: HashMap<String, String>) {
        self.write().materials = materials;
    }

    pub fn shopee_hosts(&self) -> Option<Value> {
        self.read().shopee_hosts.clone()
    }

    pub fn set_shopee_hosts(&self, hosts: Value) {
        self.write().shopee_hosts = Some(hosts);
    }
}
