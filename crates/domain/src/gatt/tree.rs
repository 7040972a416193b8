use std::collections::HashMap;
use std::sync::Arc;

use super::characteristic::Characteristic;
use super::descriptor::Descriptor;
use super::request::{ReadRequest, TreeObserver};
use super::service::Service;
use crate::error::{CallbackError, DuplicateIdError, GattError, ValidationError};
use crate::id::ServiceId;
use crate::path::ObjectPath;
use crate::uuid_base::UuidBase;

/// The services owned by one application, rooted at its base path.
#[derive(Debug)]
pub struct ApplicationTree {
    root: ObjectPath,
    uuid_base: UuidBase,
    services: Vec<Service>,
    published: bool,
}

impl ApplicationTree {
    #[must_use]
    pub fn new(root: ObjectPath, uuid_base: UuidBase) -> Self {
        Self {
            root,
            uuid_base,
            services: Vec::new(),
            published: false,
        }
    }

    #[must_use]
    pub fn root(&self) -> &ObjectPath {
        &self.root
    }

    #[must_use]
    pub fn uuid_base(&self) -> &UuidBase {
        &self.uuid_base
    }

    /// Allocate a primary service whose UUID derives from `id`. It is not
    /// attached.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::Validation`] if `id` is empty or does not expand
    /// into a valid UUID.
    pub fn new_service(&self, id: &str) -> Result<Service, GattError> {
        self.allocate(id, true)
    }

    /// Allocate a secondary service. See [`new_service`](Self::new_service).
    ///
    /// # Errors
    ///
    /// Same as [`new_service`](Self::new_service).
    pub fn new_secondary_service(&self, id: &str) -> Result<Service, GattError> {
        self.allocate(id, false)
    }

    fn allocate(&self, id: &str, primary: bool) -> Result<Service, GattError> {
        let uuid = self.uuid_base.generate(id)?;
        Ok(Service::new(
            ServiceId::new(id)?,
            uuid,
            primary,
            self.uuid_base.clone(),
        ))
    }

    /// Attach a service.
    ///
    /// # Errors
    ///
    /// - [`GattError::DuplicateId`] if a service with the same id exists
    /// - [`ValidationError::AlreadyAttached`] if it already has an owner
    /// - [`ValidationError::Frozen`] while the tree is published
    ///
    /// The service list is unchanged on error.
    pub fn add_service(&mut self, service: &Service) -> Result<(), GattError> {
        if self.published {
            return Err(self.frozen_error().into());
        }
        if self.services.iter().any(|s| s.id() == service.id()) {
            return Err(DuplicateIdError {
                kind: "service",
                id: service.id().to_string(),
            }
            .into());
        }
        service.attach_to(&self.root)?;
        self.services.push(service.clone());
        Ok(())
    }

    /// Detach a service by id.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Frozen`] while the tree is published.
    pub fn remove_service(&mut self, id: &ServiceId) -> Result<Option<Service>, GattError> {
        if self.published {
            return Err(self.frozen_error().into());
        }
        let position = self.services.iter().position(|s| s.id() == id);
        Ok(position.map(|index| self.services.remove(index)))
    }

    /// Attached services in attachment order.
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    #[must_use]
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id().as_str() == id)
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Freeze the whole tree, derive object paths and bind every
    /// characteristic to `observer`.
    ///
    /// Each parent is frozen before its children are listed, so the
    /// snapshot matches what stays frozen until [`unpublish`](Self::unpublish).
    ///
    /// # Errors
    ///
    /// Returns [`GattError::AlreadyRegistered`] if the tree is already published.
    pub fn publish(&mut self, observer: &Arc<dyn TreeObserver>) -> Result<PublishedTree, GattError> {
        if self.published {
            return Err(GattError::AlreadyRegistered);
        }
        self.published = true;

        let mut index = HashMap::new();
        let mut services = Vec::with_capacity(self.services.len());
        for (n, service) in self.services.iter().enumerate() {
            service.set_frozen(true);
            let service_path = self.root.indexed("service", n);
            let mut characteristics = Vec::new();
            for (m, characteristic) in service.characteristics().into_iter().enumerate() {
                let char_path = service_path.indexed("char", m);
                characteristic.bind(char_path.clone(), Arc::clone(observer));
                let mut descriptors = Vec::new();
                for (k, descriptor) in characteristic.descriptors().into_iter().enumerate() {
                    descriptor.set_frozen(true);
                    let descr_path = char_path.indexed("descr", k);
                    index.insert(descr_path.clone(), Attribute::Descriptor(descriptor.clone()));
                    descriptors.push(PublishedDescriptor {
                        path: descr_path,
                        descriptor,
                    });
                }
                index.insert(char_path.clone(), Attribute::Characteristic(characteristic.clone()));
                characteristics.push(PublishedCharacteristic {
                    path: char_path,
                    characteristic,
                    descriptors,
                });
            }
            index.insert(service_path.clone(), Attribute::Service(service.clone()));
            services.push(PublishedService {
                path: service_path,
                service: service.clone(),
                characteristics,
            });
        }

        Ok(PublishedTree {
            inner: Arc::new(PublishedInner {
                root: self.root.clone(),
                services,
                index,
            }),
        })
    }

    /// Release a snapshot produced by [`publish`](Self::publish): unbind and
    /// unfreeze every entity it covers.
    pub fn unpublish(&mut self, published: &PublishedTree) {
        for service in published.services() {
            for characteristic in &service.characteristics {
                for descriptor in &characteristic.descriptors {
                    descriptor.descriptor.set_frozen(false);
                }
                characteristic.characteristic.unbind();
            }
            service.service.set_frozen(false);
        }
        self.published = false;
    }

    fn frozen_error(&self) -> ValidationError {
        ValidationError::Frozen {
            kind: "application",
            id: self.root.to_string(),
        }
    }
}

/// Any published attribute.
#[derive(Debug, Clone)]
pub enum Attribute {
    Service(Service),
    Characteristic(Characteristic),
    Descriptor(Descriptor),
}

/// A published service and its derived path.
#[derive(Debug, Clone)]
pub struct PublishedService {
    path: ObjectPath,
    service: Service,
    characteristics: Vec<PublishedCharacteristic>,
}

impl PublishedService {
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    #[must_use]
    pub fn characteristics(&self) -> &[PublishedCharacteristic] {
        &self.characteristics
    }
}

/// A published characteristic and its derived path.
#[derive(Debug, Clone)]
pub struct PublishedCharacteristic {
    path: ObjectPath,
    characteristic: Characteristic,
    descriptors: Vec<PublishedDescriptor>,
}

impl PublishedCharacteristic {
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub fn characteristic(&self) -> &Characteristic {
        &self.characteristic
    }

    #[must_use]
    pub fn descriptors(&self) -> &[PublishedDescriptor] {
        &self.descriptors
    }
}

/// A published descriptor and its derived path.
#[derive(Debug, Clone)]
pub struct PublishedDescriptor {
    path: ObjectPath,
    descriptor: Descriptor,
}

impl PublishedDescriptor {
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

/// Immutable snapshot of a published tree, addressable by derived path.
///
/// The path mapping is stable for as long as the snapshot lives.
#[derive(Debug, Clone)]
pub struct PublishedTree {
    inner: Arc<PublishedInner>,
}

#[derive(Debug)]
struct PublishedInner {
    root: ObjectPath,
    services: Vec<PublishedService>,
    index: HashMap<ObjectPath, Attribute>,
}

impl PublishedTree {
    #[must_use]
    pub fn root(&self) -> &ObjectPath {
        &self.inner.root
    }

    #[must_use]
    pub fn services(&self) -> &[PublishedService] {
        &self.inner.services
    }

    /// Number of published attributes of every kind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    #[must_use]
    pub fn attribute(&self, path: &ObjectPath) -> Option<&Attribute> {
        self.inner.index.get(path)
    }

    /// Route a remote read to the attribute at `path`.
    ///
    /// # Errors
    ///
    /// - [`GattError::NotFound`] if nothing is published at `path`
    /// - [`GattError::Callback`] carrying the user callback failure, or
    ///   [`CallbackError::NotSupported`] when `path` names a service
    pub fn read(&self, path: &ObjectPath, request: &ReadRequest) -> Result<Vec<u8>, GattError> {
        match self.lookup(path)? {
            Attribute::Characteristic(c) => Ok(c.read(request)?),
            Attribute::Descriptor(d) => Ok(d.read(request)?),
            Attribute::Service(_) => Err(CallbackError::NotSupported.into()),
        }
    }

    /// Route a remote write to the attribute at `path` and return the
    /// stored value. An accepted characteristic write is reported to the
    /// observer.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn write(&self, path: &ObjectPath, value: &[u8]) -> Result<Vec<u8>, GattError> {
        match self.lookup(path)? {
            Attribute::Characteristic(c) => Ok(c.remote_write(value)?),
            Attribute::Descriptor(d) => Ok(d.write(value)?),
            Attribute::Service(_) => Err(CallbackError::NotSupported.into()),
        }
    }

    /// Route `StartNotify`/`StopNotify` to the characteristic at `path`.
    ///
    /// # Errors
    ///
    /// - [`GattError::NotFound`] if nothing is published at `path`
    /// - [`CallbackError::NotSupported`] unless `path` names a characteristic
    ///   flagged `notify` or `indicate`
    pub fn set_notifying(&self, path: &ObjectPath, notifying: bool) -> Result<(), GattError> {
        match self.lookup(path)? {
            Attribute::Characteristic(c) if c.can_notify() => {
                c.set_notifying(notifying);
                Ok(())
            }
            _ => Err(CallbackError::NotSupported.into()),
        }
    }

    fn lookup(&self, path: &ObjectPath) -> Result<&Attribute, GattError> {
        self.attribute(path)
            .ok_or_else(|| GattError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags;

    struct NullObserver;

    impl TreeObserver for NullObserver {
        fn value_changed(&self, _path: &ObjectPath, _value: &[u8]) {}
        fn notifying_changed(&self, _path: &ObjectPath, _notifying: bool) {}
        fn value_written(&self, _path: &ObjectPath, _value: &[u8]) {}
    }

    fn observer() -> Arc<dyn TreeObserver> {
        Arc::new(NullObserver)
    }

    fn tree() -> ApplicationTree {
        ApplicationTree::new(
            ObjectPath::new("/org/gattkit/hci0/app").unwrap(),
            UuidBase::default(),
        )
    }

    fn populated() -> ApplicationTree {
        let mut tree = tree();
        let service = tree.new_service("2233").unwrap();
        let c = service.new_char("3344").unwrap();
        c.set_flags([flags::characteristic::READ, flags::characteristic::NOTIFY])
            .unwrap();
        c.add_descr(&c.new_descr("4455").unwrap()).unwrap();
        service.add_char(&c).unwrap();
        service.add_char(&service.new_char("5566").unwrap()).unwrap();
        tree.add_service(&service).unwrap();
        tree.add_service(&tree.new_secondary_service("6677").unwrap())
            .unwrap();
        tree
    }

    fn path(text: &str) -> ObjectPath {
        ObjectPath::new(text).unwrap()
    }

    #[test]
    fn should_default_to_primary_service() {
        let tree = tree();
        assert!(tree.new_service("2233").unwrap().is_primary());
        assert!(!tree.new_secondary_service("2233").unwrap().is_primary());
    }

    #[test]
    fn should_reject_duplicate_service_without_mutation() {
        let mut tree = tree();
        tree.add_service(&tree.new_service("2233").unwrap()).unwrap();
        let result = tree.add_service(&tree.new_service("2233").unwrap());
        assert!(matches!(result, Err(GattError::DuplicateId(_))));
        assert_eq!(tree.services().len(), 1);
    }

    #[test]
    fn should_record_application_root_as_service_owner() {
        let mut tree = tree();
        let service = tree.new_service("2233").unwrap();
        tree.add_service(&service).unwrap();
        assert_eq!(service.owner(), Some(tree.root()));
    }


    #[test]
    fn should_readd_removed_service_to_same_tree() {
        let mut tree = tree();
        let service = tree.new_service("2233").unwrap();
        tree.add_service(&service).unwrap();
        tree.remove_service(service.id()).unwrap();

        tree.add_service(&service).unwrap();

        assert_eq!(tree.services().len(), 1);
        assert_eq!(service.owner(), Some(tree.root()));
    }

    #[test]
    fn should_derive_paths_from_attachment_order() {
        let mut tree = populated();
        let published = tree.publish(&observer()).unwrap();

        let services = published.services();
        assert_eq!(services[0].path().as_str(), "/org/gattkit/hci0/app/service0");
        assert_eq!(services[1].path().as_str(), "/org/gattkit/hci0/app/service1");
        let chars = services[0].characteristics();
        assert_eq!(chars[0].path().as_str(), "/org/gattkit/hci0/app/service0/char0");
        assert_eq!(chars[1].path().as_str(), "/org/gattkit/hci0/app/service0/char1");
        assert_eq!(
            chars[0].descriptors()[0].path().as_str(),
            "/org/gattkit/hci0/app/service0/char0/descr0"
        );
        assert_eq!(published.len(), 5);
    }

    #[test]
    fn should_publish_empty_tree() {
        let mut tree = tree();
        let published = tree.publish(&observer()).unwrap();
        assert!(published.is_empty());
        assert!(tree.is_published());
    }

    #[test]
    fn should_refuse_second_publish() {
        let mut tree = populated();
        let _published = tree.publish(&observer()).unwrap();
        assert!(matches!(
            tree.publish(&observer()),
            Err(GattError::AlreadyRegistered)
        ));
    }

    #[test]
    fn should_freeze_every_level_while_published() {
        let mut tree = populated();
        let published = tree.publish(&observer()).unwrap();

        assert!(tree.add_service(&tree.new_service("7788").unwrap()).is_err());
        let service = tree.service("2233").unwrap().clone();
        assert!(service.add_char(&service.new_char("7788").unwrap()).is_err());
        let c = service.characteristic("3344").unwrap();
        assert!(c.add_descr(&c.new_descr("7788").unwrap()).is_err());
        assert!(c.descriptors()[0].set_flags(["read"]).is_err());

        tree.unpublish(&published);
        assert!(!tree.is_published());
        service.add_char(&service.new_char("7788").unwrap()).unwrap();
        c.add_descr(&c.new_descr("7788").unwrap()).unwrap();
    }

    #[test]
    fn should_route_reads_and_writes_by_path() {
        let mut tree = populated();
        let published = tree.publish(&observer()).unwrap();
        let char_path = path("/org/gattkit/hci0/app/service0/char0");

        published.write(&char_path, &[0x2A]).unwrap();
        assert_eq!(
            published.read(&char_path, &ReadRequest::default()).unwrap(),
            vec![0x2A]
        );

        let descr_path = path("/org/gattkit/hci0/app/service0/char0/descr0");
        published.write(&descr_path, &[1]).unwrap();
        assert_eq!(
            published.read(&descr_path, &ReadRequest::default()).unwrap(),
            vec![1]
        );
    }

    #[test]
    fn should_report_written_path_for_remote_writes_only() {
        #[derive(Default)]
        struct Written(std::sync::Mutex<Vec<String>>);

        impl TreeObserver for Written {
            fn value_changed(&self, _path: &ObjectPath, _value: &[u8]) {}
            fn notifying_changed(&self, _path: &ObjectPath, _notifying: bool) {}
            fn value_written(&self, path: &ObjectPath, _value: &[u8]) {
                self.0.lock().unwrap().push(path.to_string());
            }
        }

        let mut tree = populated();
        let written = Arc::new(Written::default());
        let published = tree
            .publish(&(Arc::clone(&written) as Arc<dyn TreeObserver>))
            .unwrap();
        let char_path = path("/org/gattkit/hci0/app/service0/char0");

        tree.service("2233")
            .unwrap()
            .characteristic("3344")
            .unwrap()
            .write(&[1])
            .unwrap();
        assert!(written.0.lock().unwrap().is_empty());

        published.write(&char_path, &[2]).unwrap();
        assert_eq!(*written.0.lock().unwrap(), vec![char_path.to_string()]);
    }

    #[test]
    fn should_report_unknown_path() {
        let mut tree = populated();
        let published = tree.publish(&observer()).unwrap();
        let result = published.read(&path("/nowhere"), &ReadRequest::default());
        assert!(matches!(result, Err(GattError::NotFound(_))));
    }

    #[test]
    fn should_refuse_value_access_on_service_path() {
        let mut tree = populated();
        let published = tree.publish(&observer()).unwrap();
        let result = published.write(&path("/org/gattkit/hci0/app/service0"), &[1]);
        assert!(matches!(
            result,
            Err(GattError::Callback(CallbackError::NotSupported))
        ));
    }

    #[test]
    fn should_only_toggle_notify_on_notifiable_characteristics() {
        let mut tree = populated();
        let published = tree.publish(&observer()).unwrap();

        let notifiable = path("/org/gattkit/hci0/app/service0/char0");
        published.set_notifying(&notifiable, true).unwrap();
        let Some(Attribute::Characteristic(c)) = published.attribute(&notifiable) else {
            panic!("expected characteristic");
        };
        assert!(c.is_notifying());

        let plain = path("/org/gattkit/hci0/app/service0/char1");
        assert!(published.set_notifying(&plain, true).is_err());
    }

    #[test]
    fn should_clear_notify_state_on_unpublish() {
        let mut tree = populated();
        let published = tree.publish(&observer()).unwrap();
        let notifiable = path("/org/gattkit/hci0/app/service0/char0");
        published.set_notifying(&notifiable, true).unwrap();
        tree.unpublish(&published);

        let c = tree.service("2233").unwrap().characteristic("3344").unwrap();
        assert!(!c.is_notifying());
    }
}
