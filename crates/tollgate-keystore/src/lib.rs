#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]

mod fingerprint;
mod keyring_store;
mod memory;

pub use fingerprint::{FingerprintError, MachineIdFingerprint, StaticFingerprint};
pub use keyring_store::KeyringSecretStore;
pub use memory::MemorySecretStore;

pub const DEFAULT_SERVICE: &str = "tollgate";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("stored value is corrupted")]
    Corrupted,
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Opaque named blobs that survive process restarts.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;
    fn set(&self, name: &str, value: &[u8]) -> Result<(), SecretStoreError>;
    /// Deleting a missing entry succeeds.
    fn delete(&self, name: &str) -> Result<(), SecretStoreError>;
}

/// Stable, opaque identifier of the current machine.
pub trait DeviceFingerprint: Send + Sync {
    fn fingerprint(&self) -> Result<String, FingerprintError>;
}

pub fn default_secret_store() -> Box<dyn SecretStore> {
    Box::new(KeyringSecretStore::new(DEFAULT_SERVICE))
}
