//! Peripheral publisher port — exposes a GATT tree on the message bus.

use std::future::Future;

use gattkit_domain::error::GattError;
use gattkit_domain::gatt::PublishedTree;
use gattkit_domain::path::ObjectPath;

/// Registers attribute trees with the peripheral role of a controller.
pub trait PeripheralPublisher {
    /// Expose every attribute of `tree` in a single registration.
    ///
    /// Implementations must leave nothing exported when they fail.
    fn register_application(
        &self,
        adapter_id: &str,
        tree: &PublishedTree,
    ) -> impl Future<Output = Result<(), GattError>> + Send;

    /// Withdraw the tree rooted at `root`.
    fn unregister_application(
        &self,
        adapter_id: &str,
        root: &ObjectPath,
    ) -> impl Future<Output = Result<(), GattError>> + Send;

    /// Signal subscribed centrals that a property changed.
    ///
    /// Called from inside [`Characteristic::notify`](gattkit_domain::gatt::Characteristic::notify),
    /// which is synchronous; implementations hand the value off and return.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the value cannot be queued.
    fn notify_property_changed(
        &self,
        path: &ObjectPath,
        property: &str,
        value: &[u8],
    ) -> Result<(), GattError>;
}
