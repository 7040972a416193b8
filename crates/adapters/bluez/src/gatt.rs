//! Translation of a [`PublishedTree`] into a `bluer` GATT application.
//!
//! Each handler captures the published tree and the derived path of its
//! attribute, so requests are routed exactly as the virtual bus routes
//! them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bluer::gatt::local::{
    Application, Characteristic as BluerCharacteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicRead,
    CharacteristicReadRequest, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, Descriptor as BluerDescriptor, DescriptorRead,
    DescriptorReadRequest, DescriptorWrite, DescriptorWriteRequest, ReqError,
    Service as BluerService,
};
use gattkit_domain::error::{CallbackError, GattError};
use gattkit_domain::flags;
use gattkit_domain::gatt::{
    PublishedCharacteristic, PublishedDescriptor, PublishedService, PublishedTree, ReadRequest,
};
use gattkit_domain::path::ObjectPath;
use tokio::sync::mpsc;

/// How often an idle notification session checks whether the central left.
const STOP_POLL: Duration = Duration::from_millis(500);

/// Live notification sessions, keyed by characteristic path.
pub(crate) type Notifiers = Arc<Mutex<HashMap<ObjectPath, mpsc::UnboundedSender<Vec<u8>>>>>;

/// Characteristic flags decoded into the switches `bluer` exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct CharSwitches {
    pub broadcast: bool,
    pub read: bool,
    pub encrypt_read: bool,
    pub encrypt_authenticated_read: bool,
    pub secure_read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub reliable_write: bool,
    pub authenticated_signed_writes: bool,
    pub encrypt_write: bool,
    pub encrypt_authenticated_write: bool,
    pub secure_write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub writable_auxiliaries: bool,
    pub authorize: bool,
}

impl CharSwitches {
    pub(crate) fn from_flags(path: &ObjectPath, names: &[String]) -> Self {
        use flags::characteristic as f;

        let mut switches = Self::default();
        for name in names {
            match name.as_str() {
                f::BROADCAST => switches.broadcast = true,
                f::READ => switches.read = true,
                f::ENCRYPT_READ => switches.encrypt_read = true,
                f::ENCRYPT_AUTHENTICATED_READ => switches.encrypt_authenticated_read = true,
                f::SECURE_READ => switches.secure_read = true,
                f::WRITE => switches.write = true,
                f::WRITE_WITHOUT_RESPONSE => switches.write_without_response = true,
                f::RELIABLE_WRITE => switches.reliable_write = true,
                f::AUTHENTICATED_SIGNED_WRITES => switches.authenticated_signed_writes = true,
                f::ENCRYPT_WRITE => switches.encrypt_write = true,
                f::ENCRYPT_AUTHENTICATED_WRITE => switches.encrypt_authenticated_write = true,
                f::SECURE_WRITE => switches.secure_write = true,
                f::NOTIFY => switches.notify = true,
                f::INDICATE => switches.indicate = true,
                f::WRITABLE_AUXILIARIES => switches.writable_auxiliaries = true,
                f::AUTHORIZE => switches.authorize = true,
                // BlueZ derives the extended properties descriptor itself.
                f::EXTENDED_PROPERTIES => {}
                other => tracing::warn!(%path, flag = other, "ignoring unknown characteristic flag"),
            }
        }
        switches
    }

    fn readable(self) -> bool {
        self.read || self.encrypt_read || self.encrypt_authenticated_read || self.secure_read
    }

    fn writable(self) -> bool {
        self.write
            || self.write_without_response
            || self.reliable_write
            || self.authenticated_signed_writes
            || self.encrypt_write
            || self.encrypt_authenticated_write
            || self.secure_write
    }
}

/// Descriptor flags decoded into the switches `bluer` exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct DescrSwitches {
    pub read: bool,
    pub encrypt_read: bool,
    pub encrypt_authenticated_read: bool,
    pub secure_read: bool,
    pub write: bool,
    pub encrypt_write: bool,
    pub encrypt_authenticated_write: bool,
    pub secure_write: bool,
}

impl DescrSwitches {
    pub(crate) fn from_flags(path: &ObjectPath, names: &[String]) -> Self {
        use flags::descriptor as f;

        let mut switches = Self::default();
        for name in names {
            match name.as_str() {
                f::READ => switches.read = true,
                f::ENCRYPT_READ => switches.encrypt_read = true,
                f::ENCRYPT_AUTHENTICATED_READ => switches.encrypt_authenticated_read = true,
                f::SECURE_READ => switches.secure_read = true,
                f::WRITE => switches.write = true,
                f::ENCRYPT_WRITE => switches.encrypt_write = true,
                f::ENCRYPT_AUTHENTICATED_WRITE => switches.encrypt_authenticated_write = true,
                f::SECURE_WRITE => switches.secure_write = true,
                // Descriptor authorization is negotiated per request by BlueZ.
                f::AUTHORIZE => {}
                other => tracing::warn!(%path, flag = other, "ignoring unknown descriptor flag"),
            }
        }
        switches
    }
}

/// Map a domain failure onto the ATT error returned to the central.
pub(crate) fn req_error(err: &GattError) -> ReqError {
    match err {
        GattError::Callback(CallbackError::NotPermitted) => ReqError::NotPermitted,
        GattError::Callback(CallbackError::NotAuthorized) => ReqError::NotAuthorized,
        GattError::Callback(CallbackError::InvalidOffset) => ReqError::InvalidOffset,
        GattError::Callback(CallbackError::InvalidValueLength) => ReqError::InvalidValueLength,
        GattError::Callback(CallbackError::NotSupported) => ReqError::NotSupported,
        _ => ReqError::Failed,
    }
}

fn read_request(offset: u16, mtu: Option<u16>, device: Option<String>) -> ReadRequest {
    ReadRequest {
        offset,
        mtu,
        device,
    }
}

/// Build the `bluer` application for a published tree.
pub(crate) fn application(tree: &PublishedTree, notifiers: &Notifiers) -> Application {
    Application {
        services: tree
            .services()
            .iter()
            .map(|service| build_service(tree, service, notifiers))
            .collect(),
        ..Default::default()
    }
}

fn build_service(
    tree: &PublishedTree,
    published: &PublishedService,
    notifiers: &Notifiers,
) -> BluerService {
    BluerService {
        uuid: published.service().uuid(),
        primary: published.service().is_primary(),
        characteristics: published
            .characteristics()
            .iter()
            .map(|c| build_characteristic(tree, c, notifiers))
            .collect(),
        ..Default::default()
    }
}

fn build_characteristic(
    tree: &PublishedTree,
    published: &PublishedCharacteristic,
    notifiers: &Notifiers,
) -> BluerCharacteristic {
    let path = published.path();
    let characteristic = published.characteristic();
    let switches = CharSwitches::from_flags(path, &characteristic.flags());

    let read = switches.readable().then(|| {
        let tree = tree.clone();
        let path = path.clone();
        CharacteristicRead {
            read: switches.read,
            encrypt_read: switches.encrypt_read,
            encrypt_authenticated_read: switches.encrypt_authenticated_read,
            secure_read: switches.secure_read,
            fun: Box::new(move |req: CharacteristicReadRequest| {
                let request = read_request(
                    req.offset,
                    Some(req.mtu),
                    Some(req.device_address.to_string()),
                );
                let result = tree.read(&path, &request).map_err(|err| {
                    tracing::debug!(%path, error = %err, "characteristic read failed");
                    req_error(&err)
                });
                Box::pin(async move { result })
            }),
            ..Default::default()
        }
    });

    let write = switches.writable().then(|| {
        let tree = tree.clone();
        let path = path.clone();
        CharacteristicWrite {
            write: switches.write,
            write_without_response: switches.write_without_response,
            reliable_write: switches.reliable_write,
            authenticated_signed_writes: switches.authenticated_signed_writes,
            encrypt_write: switches.encrypt_write,
            encrypt_authenticated_write: switches.encrypt_authenticated_write,
            secure_write: switches.secure_write,
            method: CharacteristicWriteMethod::Fun(Box::new(
                move |value: Vec<u8>, _req: CharacteristicWriteRequest| {
                    let result = tree.write(&path, &value).map(|_| ()).map_err(|err| {
                        tracing::debug!(%path, error = %err, "characteristic write failed");
                        req_error(&err)
                    });
                    Box::pin(async move { result })
                },
            )),
            ..Default::default()
        }
    });

    let notify = (switches.notify || switches.indicate).then(|| {
        let tree = tree.clone();
        let path = path.clone();
        let notifiers = Arc::clone(notifiers);
        CharacteristicNotify {
            notify: switches.notify,
            indicate: switches.indicate,
            method: CharacteristicNotifyMethod::Fun(Box::new(
                move |notifier: CharacteristicNotifier| {
                    let tree = tree.clone();
                    let path = path.clone();
                    let notifiers = Arc::clone(&notifiers);
                    Box::pin(async move {
                        notification_session(tree, path, notifiers, notifier).await;
                    })
                },
            )),
            ..Default::default()
        }
    });

    BluerCharacteristic {
        uuid: characteristic.uuid(),
        broadcast: switches.broadcast,
        writable_auxiliaries: switches.writable_auxiliaries,
        authorize: switches.authorize,
        read,
        write,
        notify,
        descriptors: published
            .descriptors()
            .iter()
            .map(|d| build_descriptor(tree, d))
            .collect(),
        ..Default::default()
    }
}

fn build_descriptor(tree: &PublishedTree, published: &PublishedDescriptor) -> BluerDescriptor {
    let path = published.path();
    let switches = DescrSwitches::from_flags(path, &published.descriptor().flags());

    let read = (switches.read
        || switches.encrypt_read
        || switches.encrypt_authenticated_read
        || switches.secure_read)
        .then(|| {
            let tree = tree.clone();
            let path = path.clone();
            DescriptorRead {
                read: switches.read,
                encrypt_read: switches.encrypt_read,
                encrypt_authenticated_read: switches.encrypt_authenticated_read,
                secure_read: switches.secure_read,
                fun: Box::new(move |req: DescriptorReadRequest| {
                    let request =
                        read_request(req.offset, None, Some(req.device_address.to_string()));
                    let result = tree.read(&path, &request).map_err(|err| req_error(&err));
                    Box::pin(async move { result })
                }),
                ..Default::default()
            }
        });

    let write = (switches.write
        || switches.encrypt_write
        || switches.encrypt_authenticated_write
        || switches.secure_write)
        .then(|| {
            let tree = tree.clone();
            let path = path.clone();
            DescriptorWrite {
                write: switches.write,
                encrypt_write: switches.encrypt_write,
                encrypt_authenticated_write: switches.encrypt_authenticated_write,
                secure_write: switches.secure_write,
                fun: Box::new(move |value: Vec<u8>, _req: DescriptorWriteRequest| {
                    let result = tree
                        .write(&path, &value)
                        .map(|_| ())
                        .map_err(|err| req_error(&err));
                    Box::pin(async move { result })
                }),
                ..Default::default()
            }
        });

    BluerDescriptor {
        uuid: published.descriptor().uuid(),
        read,
        write,
        ..Default::default()
    }
}

/// Pump values into a `bluer` notifier until the central unsubscribes.
async fn notification_session(
    tree: PublishedTree,
    path: ObjectPath,
    notifiers: Notifiers,
    mut notifier: CharacteristicNotifier,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = tx.downgrade();
    notifiers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(path.clone(), tx);
    if let Err(err) = tree.set_notifying(&path, true) {
        tracing::warn!(%path, error = %err, "cannot start notification session");
    }
    tracing::debug!(%path, "notification session started");

    loop {
        tokio::select! {
            value = rx.recv() => {
                let Some(value) = value else { break };
                if let Err(err) = notifier.notify(value).await {
                    tracing::debug!(%path, error = %err, "notification delivery failed");
                    break;
                }
            }
            () = tokio::time::sleep(STOP_POLL) => {
                if notifier.is_stopped() {
                    break;
                }
            }
        }
    }

    if release_notifier(&notifiers, &path, &session) {
        tracing::debug!(%path, "notification session superseded");
        return;
    }
    if let Err(err) = tree.set_notifying(&path, false) {
        tracing::warn!(%path, error = %err, "cannot stop notification session");
    }
    tracing::debug!(%path, "notification session stopped");
}

/// Remove the sender registered for `path` if it still belongs to
/// `session`. Returns `true` when a newer session owns `path`.
fn release_notifier(
    notifiers: &Notifiers,
    path: &ObjectPath,
    session: &mpsc::WeakUnboundedSender<Vec<u8>>,
) -> bool {
    let mut notifiers = notifiers.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(current) = notifiers.get(path) else {
        return false;
    };
    let own = session
        .upgrade()
        .is_some_and(|tx| tx.same_channel(current));
    if own {
        notifiers.remove(path);
    }
    !own
}
