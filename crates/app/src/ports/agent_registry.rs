//! Agent registry port — makes a pairing agent reachable by the bus.

use std::future::Future;

use gattkit_domain::error::GattError;
use gattkit_domain::path::ObjectPath;

use crate::agent::PairingAgent;

/// Registers pairing agents with the host's agent manager.
///
/// The registry keeps the agent handle and routes every pairing prompt
/// aimed at `agent.path()` to it.
pub trait AgentRegistry {
    fn register_agent(
        &self,
        agent: &PairingAgent,
    ) -> impl Future<Output = Result<(), GattError>> + Send;

    /// Make the agent at `path` the default for every controller.
    fn request_default_agent(
        &self,
        path: &ObjectPath,
    ) -> impl Future<Output = Result<(), GattError>> + Send;

    fn unregister_agent(
        &self,
        path: &ObjectPath,
    ) -> impl Future<Output = Result<(), GattError>> + Send;
}
