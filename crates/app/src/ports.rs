//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod adapter;
pub mod advertising;
pub mod agent_registry;
pub mod publisher;

pub use adapter::{AdapterDirectory, AdapterHandle, AdapterInfo};
pub use advertising::{Advertisement, AdvertisementHandle, AdvertisingController};
pub use agent_registry::AgentRegistry;
pub use publisher::PeripheralPublisher;

/// Everything an [`Application`](crate::application::Application) needs
/// from a backend.
pub trait Peripheral:
    AdapterDirectory + PeripheralPublisher + AdvertisingController + AgentRegistry + Send + Sync + 'static
{
}

impl<T> Peripheral for T where
    T: AdapterDirectory
        + PeripheralPublisher
        + AdvertisingController
        + AgentRegistry
        + Send
        + Sync
        + 'static
{
}
