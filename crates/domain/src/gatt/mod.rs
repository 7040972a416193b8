//! GATT attribute tree: services own characteristics, characteristics own
//! descriptors.
//!
//! Entities are cheap-to-clone handles around shared state. Each entity
//! guards its own value, notify state and callback slots with a private
//! mutex and never locks a sibling or parent, so concurrent requests on
//! different attributes never contend and no lock ordering is required.
//!
//! A child records its parent's identifier once, at attach time. It never
//! holds a reference that would keep the parent alive.

mod characteristic;
mod descriptor;
mod request;
mod service;
mod tree;

pub use characteristic::{CharNotifyFn, CharReadFn, CharWriteFn, Characteristic};
pub use descriptor::{DescrReadFn, DescrWriteFn, Descriptor};
pub use request::{ReadRequest, TreeObserver};
pub use service::Service;
pub use tree::{
    ApplicationTree, Attribute, PublishedCharacteristic, PublishedDescriptor, PublishedService,
    PublishedTree,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock an entity guard, recovering the data if a callback panicked while
/// another thread held it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
