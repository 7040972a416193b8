use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use uuid::Uuid;

use super::lock;
use super::request::ReadRequest;
use crate::error::{CallbackError, ValidationError};
use crate::flags;
use crate::id::{CharId, DescrId};

/// Read callback: returns the bytes sent to the central.
pub type DescrReadFn =
    Arc<dyn Fn(&Descriptor, &ReadRequest) -> Result<Vec<u8>, CallbackError> + Send + Sync>;

/// Write callback: validates or transforms the incoming bytes and returns
/// the value to store.
pub type DescrWriteFn =
    Arc<dyn Fn(&Descriptor, &[u8]) -> Result<Vec<u8>, CallbackError> + Send + Sync>;

/// Leaf GATT attribute attached to a [`Characteristic`](super::Characteristic).
#[derive(Clone)]
pub struct Descriptor {
    inner: Arc<Inner>,
}

struct Inner {
    id: DescrId,
    uuid: Uuid,
    owner: OnceLock<CharId>,
    meta: Mutex<Meta>,
    slot: Mutex<Slot>,
}

struct Meta {
    flags: Vec<String>,
    frozen: bool,
}

#[derive(Default)]
struct Slot {
    value: Vec<u8>,
    on_read: Option<DescrReadFn>,
    on_write: Option<DescrWriteFn>,
}

impl Descriptor {
    /// Allocate a detached descriptor with read/write flags and an empty value.
    #[must_use]
    pub fn new(id: DescrId, uuid: Uuid) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                uuid,
                owner: OnceLock::new(),
                meta: Mutex::new(Meta {
                    flags: flags::default_descriptor(),
                    frozen: false,
                }),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &DescrId {
        &self.inner.id
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Identifier of the owning characteristic, once attached.
    #[must_use]
    pub fn owner(&self) -> Option<&CharId> {
        self.inner.owner.get()
    }

    #[must_use]
    pub fn flags(&self) -> Vec<String> {
        lock(&self.inner.meta).flags.clone()
    }

    /// Replace the flag set.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Frozen`] while the descriptor is published.
    pub fn set_flags<I, S>(&self, flags: I) -> Result<&Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut meta = lock(&self.inner.meta);
        if meta.frozen {
            return Err(self.frozen_error());
        }
        meta.flags = flags::collect(flags);
        Ok(self)
    }

    /// Install the read callback, replacing any previous one.
    pub fn on_read<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Descriptor, &ReadRequest) -> Result<Vec<u8>, CallbackError> + Send + Sync + 'static,
    {
        lock(&self.inner.slot).on_read = Some(Arc::new(callback));
        self
    }

    /// Install the write callback, replacing any previous one.
    pub fn on_write<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Descriptor, &[u8]) -> Result<Vec<u8>, CallbackError> + Send + Sync + 'static,
    {
        lock(&self.inner.slot).on_write = Some(Arc::new(callback));
        self
    }

    /// The cached value.
    #[must_use]
    pub fn value(&self) -> Vec<u8> {
        lock(&self.inner.slot).value.clone()
    }

    /// Set the cached value without running callbacks.
    pub fn set_value(&self, value: impl Into<Vec<u8>>) -> &Self {
        lock(&self.inner.slot).value = value.into();
        self
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

    /// Record `owner` as the parent. Re-attaching to the same parent after
    /// a removal is allowed; any other parent is rejected.
    pub(crate) fn attach_to(&self, owner: &CharId) -> Result<(), ValidationError> {
        if self.inner.owner.get_or_init(|| owner.clone()) == owner {
            return Ok(());
        }
        Err(ValidationError::AlreadyAttached {
            kind: "descriptor",
            id: self.inner.id.to_string(),
        })
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        lock(&self.inner.meta).frozen = frozen;
    }

    fn frozen_error(&self) -> ValidationError {
        ValidationError::Frozen {
            kind: "descriptor",
            id: self.inner.id.to_string(),
        }
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id && self.owner() == other.owner()
    }
}

impl Eq for Descriptor {}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.inner.id)
            .field("uuid", &self.inner.uuid)
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> Descriptor {
        Descriptor::new(DescrId::new("4455").unwrap(), Uuid::nil())
    }

    #[test]
    fn should_return_cached_value_without_read_callback() {
        let d = descriptor();
        d.write(&[1, 2, 3]).unwrap();
        assert_eq!(d.read(&ReadRequest::default()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn should_roundtrip_empty_value() {
        let d = descriptor();
        d.set_value(vec![9]);
        d.write(&[]).unwrap();
        assert!(d.read(&ReadRequest::default()).unwrap().is_empty());
    }

    #[test]
    fn should_honor_read_offset_on_cached_value() {
        let d = descriptor();
        d.set_value(vec![1, 2, 3]);
        let request = ReadRequest {
            offset: 1,
            ..ReadRequest::default()
        };
        assert_eq!(d.read(&request).unwrap(), vec![2, 3]);
    }

    #[test]
    fn should_reject_offset_past_end() {
        let d = descriptor();
        let request = ReadRequest {
            offset: 4,
            ..ReadRequest::default()
        };
        assert_eq!(d.read(&request), Err(CallbackError::InvalidOffset));
    }

    #[test]
    fn should_prefer_read_callback_over_cached_value() {
        let d = descriptor();
        d.set_value(vec![1]).on_read(|_, _| Ok(vec![42]));
        assert_eq!(d.read(&ReadRequest::default()).unwrap(), vec![42]);
        assert_eq!(d.value(), vec![1]);
    }

    #[test]
    fn should_store_value_returned_by_write_callback() {
        let d = descriptor();
        d.on_write(|_, value| Ok(value.iter().map(|b| b.wrapping_add(1)).collect()));
        let stored = d.write(&[1, 2]).unwrap();
        assert_eq!(stored, vec![2, 3]);
        assert_eq!(d.value(), vec![2, 3]);
    }

    #[test]
    fn should_keep_value_when_write_callback_fails() {
        let d = descriptor();
        d.set_value(vec![7])
            .on_write(|_, _| Err(CallbackError::InvalidValueLength));
        assert_eq!(d.write(&[1]), Err(CallbackError::InvalidValueLength));
        assert_eq!(d.value(), vec![7]);
    }

    #[test]
    fn should_propagate_read_callback_error() {
        let d = descriptor();
        d.on_read(|_, _| Err(CallbackError::NotAuthorized));
        assert_eq!(
            d.read(&ReadRequest::default()),
            Err(CallbackError::NotAuthorized)
        );
    }

    #[test]
    fn should_let_callback_inspect_its_descriptor() {
        let d = descriptor();
        d.on_read(|descr, _| Ok(descr.id().as_str().as_bytes().to_vec()));
        assert_eq!(d.read(&ReadRequest::default()).unwrap(), b"4455".to_vec());
    }

    #[test]
    fn should_set_owner_only_once() {
        let d = descriptor();
        d.attach_to(&CharId::new("3344").unwrap()).unwrap();
        let again = d.attach_to(&CharId::new("9999").unwrap());
        assert!(matches!(again, Err(ValidationError::AlreadyAttached { .. })));
        assert_eq!(d.owner().unwrap().as_str(), "3344");
    }

    #[test]
    fn should_reject_flag_change_while_frozen() {
        let d = descriptor();
        d.set_frozen(true);
        assert!(d.set_flags([flags::descriptor::READ]).is_err());
        d.set_frozen(false);
        d.set_flags([flags::descriptor::READ]).unwrap();
        assert_eq!(d.flags(), vec!["read".to_string()]);
    }
}
