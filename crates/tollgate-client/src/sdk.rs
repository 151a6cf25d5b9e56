use tracing::info;

use tollgate_core::{SdkConfig, SdkError};

use crate::client::{Client, Collaborators};

/// Owner of at most one [`Client`]. Empty until `initialize` succeeds.
#[derive(Default)]
pub struct Sdk {
    client: Option<Client>,
}

impl Sdk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        config: SdkConfig,
        collaborators: Collaborators,
    ) -> Result<&Client, SdkError> {
        if self.client.is_some() {
            return Err(SdkError::AlreadyInitialized);
        }
        let client = Client::initialize(config, collaborators)?;
        Ok(self.client.insert(client))
    }

    /// Drops the client, which stops its scheduler and channel. No-op when
    /// already empty.
    pub fn uninitialize(&mut self) {
        if self.client.take().is_some() {
            info!(event = "sdk_uninitialized");
        }
    }

    pub fn client(&self) -> Result<&Client, SdkError> {
        self.client.as_ref().ok_or(SdkError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.client.is_some()
    }
}
