//! Virtual bus error types.

use gattkit_domain::error::GattError;

/// Errors raised by the simulated bus.
#[derive(Debug, thiserror::Error)]
pub enum VirtualBusError {
    /// No adapter with this identifier was added to the bus.
    #[error("unknown adapter {0}")]
    UnknownAdapter(String),

    /// Another application is already exported at this root.
    #[error("an application is already exported at {0}")]
    AlreadyExported(String),

    /// Nothing is exported at this root.
    #[error("no application exported at {0}")]
    NotExported(String),

    /// The bus was told to refuse attributes with this UUID.
    #[error("attribute UUID {0} rejected by the bus")]
    RejectedUuid(uuid::Uuid),

    /// No agent is registered at this path.
    #[error("no agent registered at {0}")]
    UnknownAgent(String),

    /// No default agent is set.
    #[error("no default agent")]
    NoDefaultAgent,

    /// A failure injected by the test harness.
    #[error("{0} refused by the bus")]
    Injected(&'static str),

    /// A domain-level error (dispatch failures, unknown paths).
    #[error("domain error")]
    Domain(#[source] GattError),
}

impl VirtualBusError {
    /// Convert into a [`GattError`] for propagation across port boundaries.
    #[must_use]
    pub fn into_domain(self) -> GattError {
        match self {
            Self::Domain(err) => err,
            Self::UnknownAdapter(adapter_id) => GattError::AdapterUnavailable { adapter_id },
            other => GattError::Backend(Box::new(other)),
        }
    }
}

impl From<VirtualBusError> for GattError {
    fn from(err: VirtualBusError) -> Self {
        err.into_domain()
    }
}

impl From<GattError> for VirtualBusError {
    fn from(err: GattError) -> Self {
        Self::Domain(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_rejected_uuid() {
        let err = VirtualBusError::RejectedUuid(uuid::Uuid::nil());
        assert_eq!(
            err.to_string(),
            "attribute UUID 00000000-0000-0000-0000-000000000000 rejected by the bus"
        );
    }

    #[test]
    fn should_convert_unknown_adapter_to_unavailable() {
        let err: GattError = VirtualBusError::UnknownAdapter("hci3".to_owned()).into();
        assert!(matches!(err, GattError::AdapterUnavailable { adapter_id } if adapter_id == "hci3"));
    }

    #[test]
    fn should_convert_injected_failure_to_backend_error() {
        let err: GattError = VirtualBusError::Injected("advertising").into();
        assert!(matches!(err, GattError::Backend(_)));
    }

    #[test]
    fn should_convert_domain_error_back_to_domain() {
        let err: GattError = VirtualBusError::Domain(GattError::NotRegistered).into();
        assert!(matches!(err, GattError::NotRegistered));
    }
}
