//! Advertising controller port.

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use gattkit_domain::error::GattError;

/// What to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Advertisement {
    pub service_uuids: Vec<Uuid>,
    pub local_name: Option<String>,
    /// Upper bound enforced by the controller, `None` for no limit.
    pub timeout: Option<Duration>,
}

/// A running advertisement. Stopping consumes it.
pub trait AdvertisementHandle: Send + 'static {
    fn stop(self);
}

/// Starts LE advertisements on a controller.
pub trait AdvertisingController {
    type Handle: AdvertisementHandle;

    /// Start broadcasting `advertisement` on `adapter_id`.
    fn start_advertising(
        &self,
        adapter_id: &str,
        advertisement: &Advertisement,
    ) -> impl Future<Output = Result<Self::Handle, GattError>> + Send;
}
