//! BlueZ adapter error types.

use gattkit_domain::error::GattError;

/// Errors specific to the BlueZ adapter.
#[derive(Debug, thiserror::Error)]
pub enum BluezError {
    /// D-Bus or BlueZ operation failed.
    #[error("bluez error")]
    Bus(#[from] bluer::Error),

    /// No controller with this identifier.
    #[error("adapter {0} not found")]
    UnknownAdapter(String),

    /// Nothing was registered at this root by this backend.
    #[error("no application registered at {0}")]
    NotRegistered(String),

    /// No agent was registered at this path by this backend.
    #[error("no agent registered at {0}")]
    UnknownAgent(String),
}

impl BluezError {
    /// Convert into a [`GattError`] for propagation across port boundaries.
    #[must_use]
    pub fn into_domain(self) -> GattError {
        match self {
            Self::UnknownAdapter(adapter_id) => GattError::AdapterUnavailable { adapter_id },
            other => GattError::Backend(Box::new(other)),
        }
    }
}

impl From<BluezError> for GattError {
    fn from(err: BluezError) -> Self {
        err.into_domain()
    }
}
