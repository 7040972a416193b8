//! Remote central simulation.
//!
//! Requests are routed by derived object path to whichever exported tree
//! contains it, exactly as the system bus would route method calls.

use gattkit_domain::error::GattError;
use gattkit_domain::gatt::ReadRequest;
use gattkit_domain::path::ObjectPath;

use crate::VirtualBus;

/// Object path of the simulated central.
pub const REMOTE_DEVICE: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF";

/// ATT MTU reported with simulated reads.
const REMOTE_MTU: u16 = 517;

impl VirtualBus {
    /// `ReadValue` from the remote central.
    ///
    /// # Errors
    ///
    /// [`GattError::NotFound`] if nothing is exported at `path`, or the
    /// failure returned by the attribute.
    pub fn remote_read(&self, path: &ObjectPath, offset: u16) -> Result<Vec<u8>, GattError> {
        let tree = self.tree_for(path)?;
        tracing::debug!(%path, offset, "remote read");
        tree.read(
            path,
            &ReadRequest {
                offset,
                mtu: Some(REMOTE_MTU),
                device: Some(REMOTE_DEVICE.to_owned()),
            },
        )
    }

    /// `WriteValue` from the remote central.
    ///
    /// # Errors
    ///
    /// Same as [`remote_read`](Self::remote_read).
    pub fn remote_write(&self, path: &ObjectPath, value: &[u8]) -> Result<(), GattError> {
        let tree = self.tree_for(path)?;
        tracing::debug!(%path, len = value.len(), "remote write");
        tree.write(path, value).map(|_| ())
    }

    /// `StartNotify` from the remote central.
    ///
    /// # Errors
    ///
    /// [`GattError::NotFound`] if nothing is exported at `path`, or
    /// `NotSupported` when the characteristic cannot notify.
    pub fn remote_start_notify(&self, path: &ObjectPath) -> Result<(), GattError> {
        self.tree_for(path)?.set_notifying(path, true)
    }

    /// `StopNotify` from the remote central.
    ///
    /// # Errors
    ///
    /// Same as [`remote_start_notify`](Self::remote_start_notify).
    pub fn remote_stop_notify(&self, path: &ObjectPath) -> Result<(), GattError> {
        self.tree_for(path)?.set_notifying(path, false)
    }

    /// `RequestPinCode` on the default agent.
    ///
    /// # Errors
    ///
    /// A backend error when no default agent is set, otherwise the agent's
    /// answer.
    pub async fn request_pin_code(&self) -> Result<String, GattError> {
        let agent = self.default_agent()?;
        Ok(agent.request_pin_code(REMOTE_DEVICE).await?)
    }

    /// `RequestPasskey` on the default agent.
    ///
    /// # Errors
    ///
    /// Same as [`request_pin_code`](Self::request_pin_code).
    pub async fn request_passkey(&self) -> Result<u32, GattError> {
        let agent = self.default_agent()?;
        Ok(agent.request_passkey(REMOTE_DEVICE).await?)
    }

    /// `RequestConfirmation` on the default agent.
    ///
    /// # Errors
    ///
    /// Same as [`request_pin_code`](Self::request_pin_code).
    pub async fn request_confirmation(&self, passkey: u32) -> Result<(), GattError> {
        let agent = self.default_agent()?;
        Ok(agent.request_confirmation(REMOTE_DEVICE, passkey).await?)
    }

    /// `RequestAuthorization` on the default agent.
    ///
    /// # Errors
    ///
    /// Same as [`request_pin_code`](Self::request_pin_code).
    pub async fn request_authorization(&self) -> Result<(), GattError> {
        let agent = self.default_agent()?;
        Ok(agent.request_authorization(REMOTE_DEVICE).await?)
    }

    /// `Cancel` on the default agent.
    ///
    /// # Errors
    ///
    /// A backend error when no default agent is set.
    pub fn cancel_pairing(&self) -> Result<(), GattError> {
        self.default_agent()?.cancel();
        Ok(())
    }
}
