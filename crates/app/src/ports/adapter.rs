//! Adapter directory port — lookup and control of local controllers.

use std::future::Future;
use std::sync::Arc;

use gattkit_domain::error::GattError;

/// Snapshot of a local Bluetooth controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Identifier such as `hci0`.
    pub id: String,
    /// Public address, `XX:XX:XX:XX:XX:XX`.
    pub address: String,
    pub powered: bool,
    /// Friendly name shown to remote devices.
    pub alias: String,
}

/// Lookup and control of the host's Bluetooth controllers.
pub trait AdapterDirectory {
    /// Whether a controller with this identifier is present.
    fn adapter_exists(&self, adapter_id: &str)
    -> impl Future<Output = Result<bool, GattError>> + Send;

    /// Read the current controller properties.
    fn get_adapter(
        &self,
        adapter_id: &str,
    ) -> impl Future<Output = Result<AdapterInfo, GattError>> + Send;

    /// Power the controller on or off.
    fn set_powered(
        &self,
        adapter_id: &str,
        powered: bool,
    ) -> impl Future<Output = Result<(), GattError>> + Send;

    /// Change the friendly name.
    fn set_alias(
        &self,
        adapter_id: &str,
        alias: &str,
    ) -> impl Future<Output = Result<(), GattError>> + Send;
}

/// Handle on one controller, bound to the backend that manages it.
#[derive(Debug)]
pub struct AdapterHandle<B> {
    backend: Arc<B>,
    id: String,
}

impl<B> Clone for AdapterHandle<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            id: self.id.clone(),
        }
    }
}

impl<B: AdapterDirectory> AdapterHandle<B> {
    pub fn new(backend: Arc<B>, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn info(&self) -> Result<AdapterInfo, GattError> {
        self.backend.get_adapter(&self.id).await
    }

    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn address(&self) -> Result<String, GattError> {
        Ok(self.info().await?.address)
    }

    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn is_powered(&self) -> Result<bool, GattError> {
        Ok(self.info().await?.powered)
    }

    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn set_powered(&self, powered: bool) -> Result<(), GattError> {
        self.backend.set_powered(&self.id, powered).await
    }

    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn set_alias(&self, alias: &str) -> Result<(), GattError> {
        self.backend.set_alias(&self.id, alias).await
    }
}
