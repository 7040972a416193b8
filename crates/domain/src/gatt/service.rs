use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use uuid::Uuid;

use super::characteristic::Characteristic;
use super::lock;
use crate::error::{DuplicateIdError, GattError, ValidationError};
use crate::id::{CharId, ServiceId};
use crate::path::ObjectPath;
use crate::uuid_base::UuidBase;

/// GATT service: an ordered set of characteristics.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

struct Inner {
    id: ServiceId,
    uuid: Uuid,
    primary: bool,
    uuid_base: UuidBase,
    owner: OnceLock<ObjectPath>,
    structure: Mutex<Structure>,
}

#[derive(Default)]
struct Structure {
    characteristics: Vec<Characteristic>,
    frozen: bool,
}

impl Service {
    /// Allocate a detached service.
    ///
    /// `uuid_base` is inherited by characteristics created through
    /// [`new_char`](Self::new_char).
    #[must_use]
    pub fn new(id: ServiceId, uuid: Uuid, primary: bool, uuid_base: UuidBase) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                uuid,
                primary,
                uuid_base,
                owner: OnceLock::new(),
                structure: Mutex::new(Structure::default()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ServiceId {
        &self.inner.id
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.inner.primary
    }

    /// Base path of the owning application, once attached.
    #[must_use]
    pub fn owner(&self) -> Option<&ObjectPath> {
        self.inner.owner.get()
    }

    /// Allocate a characteristic whose UUID derives from `id`. It is not
    /// attached.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::Validation`] if `id` is empty or does not expand
    /// into a valid UUID.
    pub fn new_char(&self, id: &str) -> Result<Characteristic, GattError> {
        let uuid = self.inner.uuid_base.generate(id)?;
        Ok(Characteristic::new(
            CharId::new(id)?,
            uuid,
            self.inner.uuid_base.clone(),
        ))
    }

    /// Attach a characteristic.
    ///
    /// # Errors
    ///
    /// - [`GattError::DuplicateId`] if a characteristic with the same id exists
    /// - [`ValidationError::AlreadyAttached`] if it already has an owner
    /// - [`ValidationError::Frozen`] while the service is published
    ///
    /// The characteristic list is unchanged on error.
    pub fn add_char(&self, characteristic: &Characteristic) -> Result<(), GattError> {
        let mut structure = lock(&self.inner.structure);
        if structure.frozen {
            return Err(self.frozen_error().into());
        }
        if structure
            .characteristics
            .iter()
            .any(|existing| existing.id() == characteristic.id())
        {
            return Err(DuplicateIdError {
                kind: "characteristic",
                id: characteristic.id().to_string(),
            }
            .into());
        }
        characteristic.attach_to(&self.inner.id)?;
        structure.characteristics.push(characteristic.clone());
        Ok(())
    }

    /// Detach a characteristic by id. It may later be added back to this
    /// service only.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Frozen`] while the service is published.
    pub fn remove_char(&self, id: &CharId) -> Result<Option<Characteristic>, GattError> {
        let mut structure = lock(&self.inner.structure);
        if structure.frozen {
            return Err(self.frozen_error().into());
        }
        let position = structure.characteristics.iter().position(|c| c.id() == id);
        Ok(position.map(|index| structure.characteristics.remove(index)))
    }

    /// Attached characteristics in attachment order.
    #[must_use]
    pub fn characteristics(&self) -> Vec<Characteristic> {
        lock(&self.inner.structure).characteristics.clone()
    }

    /// Look up an attached characteristic.
    #[must_use]
    pub fn characteristic(&self, id: &str) -> Option<Characteristic> {
        lock(&self.inner.structure)
            .characteristics
            .iter()
            .find(|c| c.id().as_str() == id)
            .cloned()
    }

    /// Record `owner` as the parent. Re-attaching to the same parent after
    /// a removal is allowed; any other parent is rejected.
    pub(crate) fn attach_to(&self, owner: &ObjectPath) -> Result<(), ValidationError> {
        if self.inner.owner.get_or_init(|| owner.clone()) == owner {
            return Ok(());
        }
        Err(ValidationError::AlreadyAttached {
            kind: "service",
            id: self.inner.id.to_string(),
        })
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        lock(&self.inner.structure).frozen = frozen;
    }

    fn frozen_error(&self) -> ValidationError {
        ValidationError::Frozen {
            kind: "service",
            id: self.inner.id.to_string(),
        }
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id && self.owner() == other.owner()
    }
}

impl Eq for Service {}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.inner.id)
            .field("uuid", &self.inner.uuid)
            .field("primary", &self.inner.primary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Service {
        let base = UuidBase::default();
        Service::new(
            ServiceId::new("2233").unwrap(),
            base.generate("2233").unwrap(),
            true,
            base,
        )
    }

    #[test]
    fn should_inherit_uuid_base_for_new_characteristics() {
        let s = service();
        let c = s.new_char("3344").unwrap();
        assert_eq!(
            c.uuid(),
            Uuid::parse_str("33441234-0000-1000-8000-00805F9B34FB").unwrap()
        );
        assert!(c.owner().is_none());
        assert!(s.characteristics().is_empty());
    }

    #[test]
    fn should_attach_characteristics_in_order() {
        let s = service();
        for id in ["0001", "0002", "0003"] {
            s.add_char(&s.new_char(id).unwrap()).unwrap();
        }
        let ids: Vec<_> = s
            .characteristics()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["0001", "0002", "0003"]);
        assert_eq!(s.characteristic("0002").unwrap().owner(), Some(s.id()));
    }

    #[test]
    fn should_reject_duplicate_characteristic_without_mutation() {
        let s = service();
        s.add_char(&s.new_char("3344").unwrap()).unwrap();
        s.add_char(&s.new_char("5566").unwrap()).unwrap();

        let result = s.add_char(&s.new_char("3344").unwrap());
        let Err(GattError::DuplicateId(err)) = result else {
            panic!("expected duplicate id error");
        };
        assert_eq!(err.kind, "characteristic");
        assert_eq!(err.id, "3344");
        let ids: Vec<_> = s
            .characteristics()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["3344", "5566"]);
    }

    #[test]
    fn should_reject_new_char_with_invalid_id() {
        let s = service();
        assert!(s.new_char("").is_err());
        assert!(s.new_char("not-hex").is_err());
    }

    #[test]
    fn should_remove_characteristic_by_id() {
        let s = service();
        let c = s.new_char("3344").unwrap();
        s.add_char(&c).unwrap();
        let removed = s.remove_char(c.id()).unwrap();
        assert_eq!(removed.as_ref().map(Characteristic::id), Some(c.id()));
        assert!(s.characteristics().is_empty());
    }


    #[test]
    fn should_readd_removed_characteristic_to_same_service() {
        let s = service();
        let c = s.new_char("3344").unwrap();
        s.add_char(&c).unwrap();
        s.remove_char(c.id()).unwrap();

        s.add_char(&c).unwrap();

        assert_eq!(s.characteristics().len(), 1);
        assert_eq!(c.owner(), Some(s.id()));
    }

    #[test]
    fn should_keep_removed_characteristic_out_of_other_services() {
        let s = service();
        let base = UuidBase::default();
        let other = Service::new(
            ServiceId::new("5566").unwrap(),
            base.generate("5566").unwrap(),
            true,
            base,
        );
        let c = s.new_char("3344").unwrap();
        s.add_char(&c).unwrap();
        s.remove_char(c.id()).unwrap();

        let result = other.add_char(&c);

        assert!(matches!(
            result,
            Err(GattError::Validation(ValidationError::AlreadyAttached { .. }))
        ));
        assert!(other.characteristics().is_empty());
    }

    #[test]
    fn should_reject_additions_while_frozen() {
        let s = service();
        s.set_frozen(true);
        let result = s.add_char(&s.new_char("3344").unwrap());
        assert!(matches!(
            result,
            Err(GattError::Validation(ValidationError::Frozen { .. }))
        ));
    }
}
