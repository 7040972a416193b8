//! # gattkit-adapter-bluez
//!
//! BlueZ implementation of every `gattkit-app` port, built on the `bluer`
//! crate. [`BluezBackend`] holds one D-Bus session and the handles that
//! keep registrations alive: dropping a handle withdraws the matching
//! object from `bluetoothd`.
//!
//! ## Dependency rule
//!
//! Depends on `gattkit-app` (port traits), `gattkit-domain` and `bluer`.

mod agent;
mod error;
mod gatt;

pub use error::BluezError;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluer::Session;
use bluer::adv::{Advertisement as BluerAdvertisement, AdvertisementHandle as BluerAdvHandle};
use bluer::agent::AgentHandle;
use bluer::gatt::local::ApplicationHandle;

use gattkit_app::agent::PairingAgent;
use gattkit_app::ports::{
    AdapterDirectory, AdapterInfo, Advertisement, AdvertisementHandle, AdvertisingController,
    AgentRegistry, PeripheralPublisher,
};
use gattkit_domain::error::GattError;
use gattkit_domain::gatt::PublishedTree;
use gattkit_domain::path::ObjectPath;

use crate::gatt::Notifiers;

/// The only property BlueZ lets a local characteristic signal.
const VALUE_PROPERTY: &str = "Value";

struct AgentSlot {
    agent: PairingAgent,
    handle: Option<AgentHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Peripheral backend talking to `bluetoothd` over the system bus.
pub struct BluezBackend {
    session: Session,
    applications: Mutex<HashMap<ObjectPath, ApplicationHandle>>,
    agents: Mutex<HashMap<ObjectPath, AgentSlot>>,
    notifiers: Notifiers,
}

impl std::fmt::Debug for BluezBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezBackend")
            .field("applications", &lock(&self.applications).len())
            .field("agents", &lock(&self.agents).len())
            .finish_non_exhaustive()
    }
}

impl BluezBackend {
    /// Open a session on the system bus.
    ///
    /// # Errors
    ///
    /// Returns [`BluezError::Bus`] if `bluetoothd` cannot be reached.
    pub async fn new() -> Result<Self, BluezError> {
        let session = Session::new().await?;
        tracing::debug!("connected to bluetoothd");
        Ok(Self {
            session,
            applications: Mutex::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
            notifiers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn adapter(&self, adapter_id: &str) -> Result<bluer::Adapter, BluezError> {
        let names = self.session.adapter_names().await?;
        if !names.iter().any(|name| name == adapter_id) {
            return Err(BluezError::UnknownAdapter(adapter_id.to_owned()));
        }
        Ok(self.session.adapter(adapter_id)?)
    }
}

impl AdapterDirectory for BluezBackend {
    async fn adapter_exists(&self, adapter_id: &str) -> Result<bool, GattError> {
        let names = self
            .session
            .adapter_names()
            .await
            .map_err(BluezError::from)?;
        Ok(names.iter().any(|name| name == adapter_id))
    }

    async fn get_adapter(&self, adapter_id: &str) -> Result<AdapterInfo, GattError> {
        let adapter = self.adapter(adapter_id).await?;
        let address = adapter.address().await.map_err(BluezError::from)?;
        let powered = adapter.is_powered().await.map_err(BluezError::from)?;
        let alias = adapter.alias().await.map_err(BluezError::from)?;
        Ok(AdapterInfo {
            id: adapter_id.to_owned(),
            address: address.to_string(),
            powered,
            alias,
        })
    }

    async fn set_powered(&self, adapter_id: &str, powered: bool) -> Result<(), GattError> {
        let adapter = self.adapter(adapter_id).await?;
        adapter
            .set_powered(powered)
            .await
            .map_err(BluezError::from)?;
        tracing::info!(adapter = adapter_id, powered, "adapter power changed");
        Ok(())
    }

    async fn set_alias(&self, adapter_id: &str, alias: &str) -> Result<(), GattError> {
        let adapter = self.adapter(adapter_id).await?;
        adapter
            .set_alias(alias.to_owned())
            .await
            .map_err(BluezError::from)?;
        Ok(())
    }
}

impl PeripheralPublisher for BluezBackend {
    async fn register_application(
        &self,
        adapter_id: &str,
        tree: &PublishedTree,
    ) -> Result<(), GattError> {
        let adapter = self.adapter(adapter_id).await?;
        let application = gatt::application(tree, &self.notifiers);
        let handle = adapter
            .serve_gatt_application(application)
            .await
            .map_err(BluezError::from)?;
        tracing::info!(
            adapter = adapter_id,
            root = %tree.root(),
            attributes = tree.len(),
            "gatt application served"
        );
        lock(&self.applications).insert(tree.root().clone(), handle);
        Ok(())
    }

    async fn unregister_application(
        &self,
        adapter_id: &str,
        root: &ObjectPath,
    ) -> Result<(), GattError> {
        let handle = lock(&self.applications)
            .remove(root)
            .ok_or_else(|| BluezError::NotRegistered(root.to_string()))?;
        drop(handle);
        lock(&self.notifiers).retain(|path, _| !path.starts_with(root));
        tracing::info!(adapter = adapter_id, %root, "gatt application withdrawn");
        Ok(())
    }

    fn notify_property_changed(
        &self,
        path: &ObjectPath,
        property: &str,
        value: &[u8],
    ) -> Result<(), GattError> {
        if property != VALUE_PROPERTY {
            tracing::debug!(%path, property, "ignoring non-value property change");
            return Ok(());
        }
        let notifiers = lock(&self.notifiers);
        match notifiers.get(path) {
            Some(sender) if sender.send(value.to_vec()).is_ok() => {}
            _ => tracing::debug!(%path, "no live notification session"),
        }
        Ok(())
    }
}

/// A running `bluer` advertisement. Stopping drops the handle.
pub struct BluezAdvertisement(BluerAdvHandle);

impl std::fmt::Debug for BluezAdvertisement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezAdvertisement").finish_non_exhaustive()
    }
}

impl AdvertisementHandle for BluezAdvertisement {
    fn stop(self) {
        drop(self.0);
        tracing::debug!("advertisement stopped");
    }
}

impl AdvertisingController for BluezBackend {
    type Handle = BluezAdvertisement;

    async fn start_advertising(
        &self,
        adapter_id: &str,
        advertisement: &Advertisement,
    ) -> Result<BluezAdvertisement, GattError> {
        let adapter = self.adapter(adapter_id).await?;
        let adv = BluerAdvertisement {
            advertisement_type: bluer::adv::Type::Peripheral,
            service_uuids: advertisement.service_uuids.iter().copied().collect(),
            local_name: advertisement.local_name.clone(),
            discoverable: Some(true),
            timeout: advertisement.timeout,
            ..Default::default()
        };
        let handle = adapter.advertise(adv).await.map_err(BluezError::from)?;
        tracing::info!(
            adapter = adapter_id,
            uuids = advertisement.service_uuids.len(),
            "advertising started"
        );
        Ok(BluezAdvertisement(handle))
    }
}

impl AgentRegistry for BluezBackend {
    async fn register_agent(&self, agent: &PairingAgent) -> Result<(), GattError> {
        // `bluer` registers and promotes an agent in one call, so the slot
        // stays empty until the agent is made the default.
        lock(&self.agents).insert(
            agent.path().clone(),
            AgentSlot {
                agent: agent.clone(),
                handle: None,
            },
        );
        tracing::debug!(path = %agent.path(), capability = %agent.capability(), "agent staged");
        Ok(())
    }

    async fn request_default_agent(&self, path: &ObjectPath) -> Result<(), GattError> {
        let agent = lock(&self.agents)
            .get(path)
            .map(|slot| slot.agent.clone())
            .ok_or_else(|| BluezError::UnknownAgent(path.to_string()))?;
        let handle = self
            .session
            .register_agent(agent::default_agent(&agent))
            .await
            .map_err(BluezError::from)?;
        if let Some(slot) = lock(&self.agents).get_mut(path) {
            slot.handle = Some(handle);
        }
        tracing::info!(%path, capability = %agent.capability(), "default agent registered");
        Ok(())
    }

    async fn unregister_agent(&self, path: &ObjectPath) -> Result<(), GattError> {
        let slot = lock(&self.agents)
            .remove(path)
            .ok_or_else(|| BluezError::UnknownAgent(path.to_string()))?;
        drop(slot);
        tracing::debug!(%path, "agent unregistered");
        Ok(())
    }
}
