//! # gattkit-adapter-virtual
//!
//! In-memory stand-in for the system message bus. [`VirtualBus`] implements
//! every port of `gattkit-app`, keeps a log of what was asked of it and can
//! play the part of a remote central: read, write and subscribe by object
//! path, and drive pairing prompts against the default agent.
//!
//! ## Failure injection
//!
//! | Knob | Effect |
//! |------|--------|
//! | [`VirtualBus::reject_uuid`] | `register_application` fails if any attribute carries the UUID |
//! | [`VirtualBus::fail_default_agent`] | `request_default_agent` fails |
//! | [`VirtualBus::fail_advertising`] | `start_advertising` fails |
//!
//! ## Dependency rule
//!
//! Depends on `gattkit-app` (port traits) and `gattkit-domain` only.

mod error;
mod remote;

pub use error::VirtualBusError;
pub use remote::REMOTE_DEVICE;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use gattkit_app::agent::PairingAgent;
use gattkit_app::ports::{
    AdapterDirectory, AdapterInfo, Advertisement, AdvertisementHandle, AdvertisingController,
    AgentRegistry, PeripheralPublisher,
};
use gattkit_domain::error::GattError;
use gattkit_domain::gatt::PublishedTree;
use gattkit_domain::pairing::AgentCapability;
use gattkit_domain::path::ObjectPath;

/// A property change signalled to subscribed centrals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub path: ObjectPath,
    pub property: String,
    pub value: Vec<u8>,
}

/// A mutating call received by the bus, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    SetPowered { adapter_id: String, powered: bool },
    SetAlias { adapter_id: String, alias: String },
    RegisterApplication { adapter_id: String, root: ObjectPath },
    UnregisterApplication { adapter_id: String, root: ObjectPath },
    StartAdvertising { adapter_id: String },
    StopAdvertising { adapter_id: String },
    RegisterAgent { path: ObjectPath, capability: AgentCapability },
    RequestDefaultAgent { path: ObjectPath },
    UnregisterAgent { path: ObjectPath },
}

struct Exported {
    adapter_id: String,
    tree: PublishedTree,
}

#[derive(Default)]
struct BusState {
    adapters: BTreeMap<String, AdapterInfo>,
    exported: HashMap<ObjectPath, Exported>,
    notifications: Vec<Notification>,
    advertisements: BTreeMap<u64, (String, Advertisement)>,
    next_advertisement: u64,
    agents: HashMap<ObjectPath, PairingAgent>,
    default_agent: Option<ObjectPath>,
    calls: Vec<BusCall>,
    rejected_uuids: HashSet<Uuid>,
    fail_default_agent: bool,
    fail_advertising: bool,
}

impl BusState {
    fn adapter_mut(&mut self, adapter_id: &str) -> Result<&mut AdapterInfo, VirtualBusError> {
        self.adapters
            .get_mut(adapter_id)
            .ok_or_else(|| VirtualBusError::UnknownAdapter(adapter_id.to_owned()))
    }

    fn export(&mut self, adapter_id: &str, tree: &PublishedTree) -> Result<(), VirtualBusError> {
        self.adapter_mut(adapter_id)?;
        if self.exported.contains_key(tree.root()) {
            return Err(VirtualBusError::AlreadyExported(tree.root().to_string()));
        }
        self.check_uuids(tree)?;
        self.exported.insert(
            tree.root().clone(),
            Exported {
                adapter_id: adapter_id.to_owned(),
                tree: tree.clone(),
            },
        );
        tracing::debug!(root = %tree.root(), attributes = tree.len(), "application exported");
        Ok(())
    }

    fn check_uuids(&self, tree: &PublishedTree) -> Result<(), VirtualBusError> {
        let mut uuids = Vec::new();
        for service in tree.services() {
            uuids.push(service.service().uuid());
            for characteristic in service.characteristics() {
                uuids.push(characteristic.characteristic().uuid());
                uuids.extend(
                    characteristic
                        .descriptors()
                        .iter()
                        .map(|d| d.descriptor().uuid()),
                );
            }
        }
        match uuids.into_iter().find(|uuid| self.rejected_uuids.contains(uuid)) {
            Some(uuid) => Err(VirtualBusError::RejectedUuid(uuid)),
            None => Ok(()),
        }
    }
}

/// Simulated message bus shared by cloning.
#[derive(Clone, Default)]
pub struct VirtualBus {
    state: Arc<Mutex<BusState>>,
}

impl VirtualBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with a single, unpowered adapter.
    #[must_use]
    pub fn with_adapter(adapter_id: &str) -> Self {
        let bus = Self::new();
        bus.add_adapter(adapter_id);
        bus
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug in a controller. Addresses are assigned in insertion order.
    pub fn add_adapter(&self, adapter_id: &str) -> &Self {
        let mut state = self.lock();
        let index = state.adapters.len() + 1;
        state.adapters.insert(
            adapter_id.to_owned(),
            AdapterInfo {
                id: adapter_id.to_owned(),
                address: format!("02:00:00:00:00:{index:02X}"),
                powered: false,
                alias: adapter_id.to_owned(),
            },
        );
        self
    }

    pub fn reject_uuid(&self, uuid: Uuid) -> &Self {
        self.lock().rejected_uuids.insert(uuid);
        self
    }

    pub fn fail_default_agent(&self, fail: bool) -> &Self {
        self.lock().fail_default_agent = fail;
        self
    }

    pub fn fail_advertising(&self, fail: bool) -> &Self {
        self.lock().fail_advertising = fail;
        self
    }

    /// Every mutating call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BusCall> {
        self.lock().calls.clone()
    }

    /// Every property change signalled so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    /// Roots of the currently exported applications.
    #[must_use]
    pub fn exported_roots(&self) -> Vec<ObjectPath> {
        let mut roots: Vec<_> = self.lock().exported.keys().cloned().collect();
        roots.sort();
        roots
    }

    /// Whether an object is exported at `path`, at any depth.
    #[must_use]
    pub fn is_exported(&self, path: &ObjectPath) -> bool {
        self.lock()
            .exported
            .values()
            .any(|exported| exported.tree.root() == path || exported.tree.attribute(path).is_some())
    }

    /// Advertisements currently broadcast, oldest first.
    #[must_use]
    pub fn advertisements(&self) -> Vec<(String, Advertisement)> {
        self.lock().advertisements.values().cloned().collect()
    }

    #[must_use]
    pub fn default_agent_path(&self) -> Option<ObjectPath> {
        self.lock().default_agent.clone()
    }

    #[must_use]
    pub fn registered_agents(&self) -> usize {
        self.lock().agents.len()
    }

    /// Tree exported under a root that is an ancestor of `path`.
    pub(crate) fn tree_for(&self, path: &ObjectPath) -> Result<PublishedTree, VirtualBusError> {
        self.lock()
            .exported
            .values()
            .find(|exported| path.starts_with(exported.tree.root()))
            .map(|exported| exported.tree.clone())
            .ok_or_else(|| VirtualBusError::Domain(GattError::NotFound(path.to_string())))
    }

    pub(crate) fn default_agent(&self) -> Result<PairingAgent, VirtualBusError> {
        let state = self.lock();
        let path = state
            .default_agent
            .as_ref()
            .ok_or(VirtualBusError::NoDefaultAgent)?;
        state
            .agents
            .get(path)
            .cloned()
            .ok_or_else(|| VirtualBusError::UnknownAgent(path.to_string()))
    }
}

impl std::fmt::Debug for VirtualBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualBus")
            .field("adapters", &state.adapters.keys().collect::<Vec<_>>())
            .field("exported", &state.exported.len())
            .field("advertisements", &state.advertisements.len())
            .finish_non_exhaustive()
    }
}

impl AdapterDirectory for VirtualBus {
    fn adapter_exists(
        &self,
        adapter_id: &str,
    ) -> impl Future<Output = Result<bool, GattError>> + Send {
        let exists = self.lock().adapters.contains_key(adapter_id);
        async move { Ok(exists) }
    }

    fn get_adapter(
        &self,
        adapter_id: &str,
    ) -> impl Future<Output = Result<AdapterInfo, GattError>> + Send {
        let result: Result<AdapterInfo, GattError> = self
            .lock()
            .adapters
            .get(adapter_id)
            .cloned()
            .ok_or_else(|| VirtualBusError::UnknownAdapter(adapter_id.to_owned()).into());
        async move { result }
    }

    fn set_powered(
        &self,
        adapter_id: &str,
        powered: bool,
    ) -> impl Future<Output = Result<(), GattError>> + Send {
        let mut state = self.lock();
        let result = state.adapter_mut(adapter_id).map(|info| info.powered = powered);
        if result.is_ok() {
            state.calls.push(BusCall::SetPowered {
                adapter_id: adapter_id.to_owned(),
                powered,
            });
        }
        let result = result.map_err(GattError::from);
        async move { result }
    }

    fn set_alias(
        &self,
        adapter_id: &str,
        alias: &str,
    ) -> impl Future<Output = Result<(), GattError>> + Send {
        let mut state = self.lock();
        let result = state
            .adapter_mut(adapter_id)
            .map(|info| info.alias = alias.to_owned());
        if result.is_ok() {
            state.calls.push(BusCall::SetAlias {
                adapter_id: adapter_id.to_owned(),
                alias: alias.to_owned(),
            });
        }
        let result = result.map_err(GattError::from);
        async move { result }
    }
}

impl PeripheralPublisher for VirtualBus {
    fn register_application(
        &self,
        adapter_id: &str,
        tree: &PublishedTree,
    ) -> impl Future<Output = Result<(), GattError>> + Send {
        let mut state = self.lock();
        state.calls.push(BusCall::RegisterApplication {
            adapter_id: adapter_id.to_owned(),
            root: tree.root().clone(),
        });
        let result = state.export(adapter_id, tree).map_err(GattError::from);
        async move { result }
    }

    fn unregister_application(
        &self,
        adapter_id: &str,
        root: &ObjectPath,
    ) -> impl Future<Output = Result<(), GattError>> + Send {
        let mut state = self.lock();
        state.calls.push(BusCall::UnregisterApplication {
            adapter_id: adapter_id.to_owned(),
            root: root.clone(),
        });
        let result: Result<(), GattError> = match state.exported.remove(root) {
            Some(exported) if exported.adapter_id == adapter_id => Ok(()),
            Some(exported) => {
                state.exported.insert(root.clone(), exported);
                Err(VirtualBusError::NotExported(root.to_string()).into())
            }
            None => Err(VirtualBusError::NotExported(root.to_string()).into()),
        };
        async move { result }
    }

    fn notify_property_changed(
        &self,
        path: &ObjectPath,
        property: &str,
        value: &[u8],
    ) -> Result<(), GattError> {
        tracing::debug!(%path, property, len = value.len(), "property changed");
        self.lock().notifications.push(Notification {
            path: path.clone(),
            property: property.to_owned(),
            value: value.to_vec(),
        });
        Ok(())
    }
}

/// A running simulated advertisement.
#[derive(Debug)]
pub struct VirtualAdvertisement {
    bus: VirtualBus,
    id: u64,
}

impl AdvertisementHandle for VirtualAdvertisement {
    fn stop(self) {
        let mut state = self.bus.lock();
        if let Some((adapter_id, _)) = state.advertisements.remove(&self.id) {
            state.calls.push(BusCall::StopAdvertising { adapter_id });
        }
    }
}

impl AdvertisingController for VirtualBus {
    type Handle = VirtualAdvertisement;

    fn start_advertising(
        &self,
        adapter_id: &str,
        advertisement: &Advertisement,
    ) -> impl Future<Output = Result<Self::Handle, GattError>> + Send {
        let mut state = self.lock();
        let result: Result<Self::Handle, GattError> = if state.fail_advertising {
            Err(VirtualBusError::Injected("advertising").into())
        } else if !state.adapters.contains_key(adapter_id) {
            Err(VirtualBusError::UnknownAdapter(adapter_id.to_owned()).into())
        } else {
            let id = state.next_advertisement;
            state.next_advertisement += 1;
            state
                .advertisements
                .insert(id, (adapter_id.to_owned(), advertisement.clone()));
            state.calls.push(BusCall::StartAdvertising {
                adapter_id: adapter_id.to_owned(),
            });
            Ok(VirtualAdvertisement {
                bus: self.clone(),
                id,
            })
        };
        async move { result }
    }
}

impl AgentRegistry for VirtualBus {
    fn register_agent(
        &self,
        agent: &PairingAgent,
    ) -> impl Future<Output = Result<(), GattError>> + Send {
        let mut state = self.lock();
        state.calls.push(BusCall::RegisterAgent {
            path: agent.path().clone(),
            capability: agent.capability(),
        });
        state.agents.insert(agent.path().clone(), agent.clone());
        async { Ok(()) }
    }

    fn request_default_agent(
        &self,
        path: &ObjectPath,
    ) -> impl Future<Output = Result<(), GattError>> + Send {
        let mut state = self.lock();
        state.calls.push(BusCall::RequestDefaultAgent { path: path.clone() });
        let result: Result<(), GattError> = if state.fail_default_agent {
            Err(VirtualBusError::Injected("default agent").into())
        } else if state.agents.contains_key(path) {
            state.default_agent = Some(path.clone());
            Ok(())
        } else {
            Err(VirtualBusError::UnknownAgent(path.to_string()).into())
        };
        async move { result }
    }

    fn unregister_agent(
        &self,
        path: &ObjectPath,
    ) -> impl Future<Output = Result<(), GattError>> + Send {
        let mut state = self.lock();
        state.calls.push(BusCall::UnregisterAgent { path: path.clone() });
        let result: Result<(), GattError> = match state.agents.remove(path) {
            Some(_) => {
                if state.default_agent.as_ref() == Some(path) {
                    state.default_agent = None;
                }
                Ok(())
            }
            None => Err(VirtualBusError::UnknownAgent(path.to_string()).into()),
        };
        async move { result }
    }
}
