use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use uuid::Uuid;

use super::descriptor::Descriptor;
use super::lock;
use super::request::{ReadRequest, TreeObserver};
use crate::error::{CallbackError, DuplicateIdError, GattError, ValidationError};
use crate::flags;
use crate::id::{CharId, DescrId, ServiceId};
use crate::path::ObjectPath;
use crate::uuid_base::UuidBase;

/// Read callback: returns the bytes sent to the central.
pub type CharReadFn =
    Arc<dyn Fn(&Characteristic, &ReadRequest) -> Result<Vec<u8>, CallbackError> + Send + Sync>;

/// Write callback: validates or transforms the incoming bytes and returns
/// the value to store.
pub type CharWriteFn =
    Arc<dyn Fn(&Characteristic, &[u8]) -> Result<Vec<u8>, CallbackError> + Send + Sync>;

/// Called when a remote central enables (`true`) or disables notifications.
pub type CharNotifyFn = Arc<dyn Fn(&Characteristic, bool) + Send + Sync>;

/// GATT characteristic: a value with read/write/notify behaviour and zero
/// or more descriptors.
#[derive(Clone)]
pub struct Characteristic {
    inner: Arc<Inner>,
}

struct Inner {
    id: CharId,
    uuid: Uuid,
    uuid_base: UuidBase,
    owner: OnceLock<ServiceId>,
    structure: Mutex<Structure>,
    slot: Mutex<Slot>,
}

struct Structure {
    flags: Vec<String>,
    descriptors: Vec<Descriptor>,
    frozen: bool,
}

#[derive(Default)]
struct Slot {
    value: Vec<u8>,
    notifying: bool,
    on_read: Option<CharReadFn>,
    on_write: Option<CharWriteFn>,
    on_notify: Option<CharNotifyFn>,
    binding: Option<Binding>,
}

#[derive(Clone)]
struct Binding {
    path: ObjectPath,
    observer: Arc<dyn TreeObserver>,
}

impl Characteristic {
    /// Allocate a detached characteristic with read/write flags.
    ///
    /// `uuid_base` is used to expand the ids of descriptors created through
    /// [`new_descr`](Self::new_descr).
    #[must_use]
    pub fn new(id: CharId, uuid: Uuid, uuid_base: UuidBase) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                uuid,
                uuid_base,
                owner: OnceLock::new(),
                structure: Mutex::new(Structure {
                    flags: flags::default_characteristic(),
                    descriptors: Vec::new(),
                    frozen: false,
                }),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &CharId {
        &self.inner.id
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Identifier of the owning service, once attached.
    #[must_use]
    pub fn owner(&self) -> Option<&ServiceId> {
        self.inner.owner.get()
    }

    #[must_use]
    pub fn flags(&self) -> Vec<String> {
        lock(&self.inner.structure).flags.clone()
    }

    /// Whether any flag allows notifications or indications.
    #[must_use]
    pub fn can_notify(&self) -> bool {
        lock(&self.inner.structure)
            .flags
            .iter()
            .any(|flag| flag == flags::characteristic::NOTIFY || flag == flags::characteristic::INDICATE)
    }

    /// Replace the flag set.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Frozen`] while the characteristic is published.
    pub fn set_flags<I, S>(&self, flags: I) -> Result<&Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut structure = lock(&self.inner.structure);
        if structure.frozen {
            return Err(self.frozen_error());
        }
        structure.flags = flags::collect(flags);
        Ok(self)
    }

    /// Allocate a descriptor whose UUID derives from `id`. It is not attached.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::Validation`] if `id` is empty or does not expand
    /// into a valid UUID.
    pub fn new_descr(&self, id: &str) -> Result<Descriptor, GattError> {
        let uuid = self.inner.uuid_base.generate(id)?;
        Ok(Descriptor::new(DescrId::new(id)?, uuid))
    }

    /// Attach a descriptor.
    ///
    /// # Errors
    ///
    /// - [`GattError::DuplicateId`] if a descriptor with the same id exists
    /// - [`ValidationError::AlreadyAttached`] if the descriptor has an owner
    /// - [`ValidationError::Frozen`] while the characteristic is published
    ///
    /// The descriptor list is unchanged on error.
    pub fn add_descr(&self, descriptor: &Descriptor) -> Result<(), GattError> {
        let mut structure = lock(&self.inner.structure);
        if structure.frozen {
            return Err(self.frozen_error().into());
        }
        if structure
            .descriptors
            .iter()
            .any(|existing| existing.id() == descriptor.id())
        {
            return Err(DuplicateIdError {
                kind: "descriptor",
                id: descriptor.id().to_string(),
            }
            .into());
        }
        descriptor.attach_to(&self.inner.id)?;
        structure.descriptors.push(descriptor.clone());
        Ok(())
    }

    /// Detach a descriptor by id. The descriptor keeps its owner id: it can
    /// be added back here but not to another characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Frozen`] while the characteristic is published.
    pub fn remove_descr(&self, id: &DescrId) -> Result<Option<Descriptor>, GattError> {
        let mut structure = lock(&self.inner.structure);
        if structure.frozen {
            return Err(self.frozen_error().into());
        }
        let position = structure.descriptors.iter().position(|d| d.id() == id);
        Ok(position.map(|index| structure.descriptors.remove(index)))
    }

    /// Attached descriptors in attachment order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Descriptor> {
        lock(&self.inner.structure).descriptors.clone()
    }

    /// Install the read callback, replacing any previous one.
    pub fn on_read<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Characteristic, &ReadRequest) -> Result<Vec<u8>, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        lock(&self.inner.slot).on_read = Some(Arc::new(callback));
        self
    }

    /// Install the write callback, replacing any previous one.
    pub fn on_write<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Characteristic, &[u8]) -> Result<Vec<u8>, CallbackError> + Send + Sync + 'static,
    {
        lock(&self.inner.slot).on_write = Some(Arc::new(callback));
        self
    }

    /// Install the notify-state callback, replacing any previous one.
    pub fn on_notify<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Characteristic, bool) + Send + Sync + 'static,
    {
        lock(&self.inner.slot).on_notify = Some(Arc::new(callback));
        self
    }

    /// The cached value.
    #[must_use]
    pub fn value(&self) -> Vec<u8> {
        lock(&self.inner.slot).value.clone()
    }

    /// Set the cached value without running callbacks or notifying.
    pub fn set_value(&self, value: impl Into<Vec<u8>>) -> &Self {
        lock(&self.inner.slot).value = value.into();
        self
    }

    #[must_use]
    pub fn is_notifying(&self) -> bool {
        lock(&self.inner.slot).notifying
    }

    /// Serve a read: the callback when installed, the cached value otherwise.
    ///
    /// # Errors
    ///
    /// Propagates the callback error unchanged, or
    /// [`CallbackError::InvalidOffset`] when the offset exceeds the cached value.
    pub fn read(&self, request: &ReadRequest) -> Result<Vec<u8>, CallbackError> {
        let callback = {
            let slot = lock(&self.inner.slot);
            match &slot.on_read {
                Some(callback) => Arc::clone(callback),
                None => return request.slice(&slot.value).ok_or(CallbackError::InvalidOffset),
            }
        };
        callback(self, request)
    }

    /// Serve a write and return the value actually stored.
    ///
    /// A local write stays silent; only writes routed through
    /// [`PublishedTree::write`](super::PublishedTree::write) reach the
    /// observer.
    ///
    /// # Errors
    ///
    /// Propagates the callback error unchanged; the cached value is left
    /// untouched in that case.
    pub fn write(&self, value: &[u8]) -> Result<Vec<u8>, CallbackError> {
        let callback = lock(&self.inner.slot).on_write.clone();
        let stored = match callback {
            Some(callback) => callback(self, value)?,
            None => value.to_vec(),
        };
        lock(&self.inner.slot).value.clone_from(&stored);
        Ok(stored)
    }

    /// [`write`](Self::write) on behalf of a central, then report the
    /// accepted value to the observer.
    pub(crate) fn remote_write(&self, value: &[u8]) -> Result<Vec<u8>, CallbackError> {
        let stored = self.write(value)?;
        let binding = lock(&self.inner.slot).binding.clone();
        if let Some(binding) = binding {
            binding.observer.value_written(&binding.path, &stored);
        }
        Ok(stored)
    }

    /// Update the value and, when a central subscribed, signal it.
    ///
    /// Returns whether a notification was emitted. The value is stored in
    /// both cases.
    pub fn notify(&self, value: impl Into<Vec<u8>>) -> bool {
        let value = value.into();
        let target = {
            let mut slot = lock(&self.inner.slot);
            slot.value.clone_from(&value);
            if slot.notifying {
                slot.binding.clone()
            } else {
                None
            }
        };
        match target {
            Some(binding) => {
                binding.observer.value_changed(&binding.path, &value);
                true
            }
            None => false,
        }
    }

    /// Record whether a remote central subscribed to notifications.
    ///
    /// Called by the publisher layer on `StartNotify`/`StopNotify`. The
    /// notify callback and the observer only run when the state changes.
    pub fn set_notifying(&self, notifying: bool) {
        let (callback, binding) = {
            let mut slot = lock(&self.inner.slot);
            if slot.notifying == notifying {
                return;
            }
            slot.notifying = notifying;
            (slot.on_notify.clone(), slot.binding.clone())
        };
        if let Some(callback) = callback {
            callback(self, notifying);
        }
        if let Some(binding) = binding {
            binding.observer.notifying_changed(&binding.path, notifying);
        }
    }

    /// Record `owner` as the parent. Re-attaching to the same parent after
    /// a removal is allowed; any other parent is rejected.
    pub(crate) fn attach_to(&self, owner: &ServiceId) -> Result<(), ValidationError> {
        if self.inner.owner.get_or_init(|| owner.clone()) == owner {
            return Ok(());
        }
        Err(ValidationError::AlreadyAttached {
            kind: "characteristic",
            id: self.inner.id.to_string(),
        })
    }

    /// Freeze the shape and route signals to `observer` under `path`.
    pub(crate) fn bind(&self, path: ObjectPath, observer: Arc<dyn TreeObserver>) {
        lock(&self.inner.structure).frozen = true;
        lock(&self.inner.slot).binding = Some(Binding { path, observer });
    }

    /// Undo [`bind`](Self::bind); a pending subscription is dropped.
    pub(crate) fn unbind(&self) {
        lock(&self.inner.structure).frozen = false;
        let mut slot = lock(&self.inner.slot);
        slot.binding = None;
        slot.notifying = false;
    }

    fn frozen_error(&self) -> ValidationError {
        ValidationError::Frozen {
            kind: "characteristic",
            id: self.inner.id.to_string(),
        }
    }
}

impl PartialEq for Characteristic {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id && self.owner() == other.owner()
    }
}

impl Eq for Characteristic {}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("id", &self.inner.id)
            .field("uuid", &self.inner.uuid)
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}
