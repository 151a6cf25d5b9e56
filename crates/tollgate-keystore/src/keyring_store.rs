use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyring::Entry;
use tracing::{debug, warn};

use crate::{SecretStore, SecretStoreError};

/// Secret store backed by the OS credential manager. Values are kept
/// base64-encoded, one entry per name under a shared service.
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry, SecretStoreError> {
        Entry::new(&self.service, name).map_err(|err| {
            warn!(event = "keyring_entry_invalid", name, error = %err);
            internal(err)
        })
    }
}

fn internal(err: keyring::Error) -> SecretStoreError {
    SecretStoreError::Internal {
        message: err.to_string(),
    }
}

fn decode_entry(name: &str, encoded: &str) -> Result<Vec<u8>, SecretStoreError> {
    STANDARD.decode(encoded.trim()).map_err(|err| {
        warn!(event = "keyring_entry_corrupted", name, error = %err);
        SecretStoreError::Corrupted
    })
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let entry = self.entry(name)?;
        match entry.get_password() {
            Ok(encoded) => decode_entry(name, &encoded).map(Some),
            Err(keyring::Error::NoEntry) => {
                debug!(event = "keyring_entry_missing", name);
                Ok(None)
            }
            Err(err) => {
                warn!(event = "keyring_read_failed", name, error = %err);
                Err(internal(err))
            }
        }
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        let entry = self.entry(name)?;
        entry.set_password(&STANDARD.encode(value)).map_err(|err| {
            warn!(event = "keyring_write_failed", name, error = %err);
            internal(err)
        })
    }

    fn delete(&self, name: &str) -> Result<(), SecretStoreError> {
        let entry = self.entry(name)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => {
                warn!(event = "keyring_delete_failed", name, error = %err);
                Err(internal(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_stored_base64() {
        let encoded = STANDARD.encode(br#"{"token":"r-1","expires_at":10}"#);
        assert_eq!(
            decode_entry("refresh_token", &format!("{encoded}\n")).expect("decode"),
            br#"{"token":"r-1","expires_at":10}"#.to_vec()
        );
    }

    #[test]
    fn garbage_entry_is_corrupted() {
        assert_eq!(
            decode_entry("refresh_token", "not*base64"),
            Err(SecretStoreError::Corrupted)
        );
    }

    #[test]
    fn store_errors_render_message() {
        let err = SecretStoreError::Internal {
            message: "locked".to_string(),
        };
        assert_eq!(err.to_string(), "internal error: locked");
    }
}
