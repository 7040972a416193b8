//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`GattError`]
//! via `#[from]`. Adapter crates box their backend errors into
//! [`GattError::Backend`] or [`GattError::RegistrationFailed`].

/// Boxed error used to carry backend failures across port boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error for every gattkit operation.
#[derive(Debug, thiserror::Error)]
pub enum GattError {
    /// A child with the same identifier already exists under the parent.
    #[error("duplicate identifier")]
    DuplicateId(#[from] DuplicateIdError),

    /// An input violated a domain invariant.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// The configured adapter is not present on the host.
    #[error("adapter {adapter_id} is not available")]
    AdapterUnavailable {
        /// Adapter identifier such as `hci0`.
        adapter_id: String,
    },

    /// The peripheral publisher rejected the attribute tree or the agent.
    #[error("application registration failed")]
    RegistrationFailed(#[source] BoxError),

    /// `run` was called on an application that is already published.
    #[error("application is already registered")]
    AlreadyRegistered,

    /// A request targeted an application that is not published.
    #[error("application is not registered")]
    NotRegistered,

    /// No attribute is published at the given object path.
    #[error("no attribute published at {0}")]
    NotFound(String),

    /// A user read/write callback failed.
    #[error("callback failed")]
    Callback(#[from] CallbackError),

    /// A pairing prompt could not be answered.
    #[error("pairing agent error")]
    Agent(#[from] AgentError),

    /// Event bus misuse.
    #[error("event bus error")]
    EventBus(#[from] EventBusError),

    /// Backend (message bus, controller) failure.
    #[error("backend error")]
    Backend(#[source] BoxError),
}

/// Attempt to attach a child whose identifier is already used by a sibling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} with id {id} already exists")]
pub struct DuplicateIdError {
    /// Kind of child (`service`, `characteristic`, `descriptor`).
    pub kind: &'static str,
    /// The colliding short identifier.
    pub id: String,
}

/// Domain invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Identifiers must contain at least one non-whitespace character.
    #[error("identifier must not be empty")]
    EmptyId,

    /// A generated or supplied UUID does not parse.
    #[error("invalid UUID {value}")]
    InvalidUuid {
        /// The text that failed to parse.
        value: String,
        #[source]
        source: uuid::Error,
    },

    /// Object paths must start with `/` and contain `[A-Za-z0-9_]` segments.
    #[error("invalid object path {0}")]
    InvalidObjectPath(String),

    /// The adapter identifier could not be extracted from an object path.
    #[error("cannot parse adapter id from {0}")]
    InvalidAdapterPath(String),

    /// The child already belongs to a parent.
    #[error("{kind} {id} is already attached")]
    AlreadyAttached {
        /// Kind of child.
        kind: &'static str,
        /// Child identifier.
        id: String,
    },

    /// The entity belongs to a published tree and cannot change shape.
    #[error("{kind} {id} is part of a registered tree")]
    Frozen {
        /// Kind of entity.
        kind: &'static str,
        /// Entity identifier.
        id: String,
    },

    /// Unknown pairing capability name.
    #[error("unknown agent capability {0}")]
    UnknownCapability(String),
}

/// Failure returned by a user read/write callback.
///
/// The variants mirror the ATT error responses a remote central can
/// receive, so adapters translate them one to one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// Generic failure with a human readable reason.
    #[error("request failed: {0}")]
    Failed(String),
    /// The operation is not permitted on this attribute.
    #[error("operation not permitted")]
    NotPermitted,
    /// The remote is not authorized.
    #[error("not authorized")]
    NotAuthorized,
    /// The requested offset is out of range.
    #[error("invalid offset")]
    InvalidOffset,
    /// The written value has an unacceptable length.
    #[error("invalid value length")]
    InvalidValueLength,
    /// The operation is not supported.
    #[error("operation not supported")]
    NotSupported,
}

/// Pairing prompt failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// The policy refused the request.
    #[error("pairing request rejected")]
    Rejected,
    /// The request was canceled by the remote or the policy.
    #[error("pairing request canceled")]
    Canceled,
    /// The policy did not answer in time.
    #[error("pairing request timed out")]
    Timeout,
}

/// Event bus misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventBusError {
    /// Event names must not be empty.
    #[error("event name must not be empty")]
    EmptyName,
    /// The dispatch loop needs a tokio runtime to start.
    #[error("no async runtime available to start the dispatch loop")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_duplicate_id_error() {
        let err = DuplicateIdError {
            kind: "service",
            id: "2233".to_string(),
        };
        assert_eq!(err.to_string(), "service with id 2233 already exists");
    }

    #[test]
    fn should_convert_duplicate_id_into_gatt_error() {
        let err: GattError = DuplicateIdError {
            kind: "descriptor",
            id: "4455".to_string(),
        }
        .into();
        assert!(matches!(err, GattError::DuplicateId(_)));
    }

    #[test]
    fn should_display_adapter_unavailable() {
        let err = GattError::AdapterUnavailable {
            adapter_id: "hci9".to_string(),
        };
        assert_eq!(err.to_string(), "adapter hci9 is not available");
    }

    #[test]
    fn should_keep_source_of_registration_failure() {
        let inner = std::io::Error::other("rejected by bus");
        let err = GattError::RegistrationFailed(Box::new(inner));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "rejected by bus");
    }

    #[test]
    fn should_convert_agent_timeout_into_gatt_error() {
        let err: GattError = AgentError::Timeout.into();
        assert!(matches!(err, GattError::Agent(AgentError::Timeout)));
    }
}
