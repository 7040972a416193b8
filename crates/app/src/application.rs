//! Application — owns a GATT tree, publishes it and drives the pairing agent.
//!
//! Lifecycle: build the tree, [`run`](Application::run) to register it with
//! the peripheral publisher and activate the agent, optionally
//! [`advertise`](Application::advertise), then [`close`](Application::close).

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::task::AbortHandle;

use gattkit_domain::error::GattError;
use gattkit_domain::event::names;
use gattkit_domain::gatt::{ApplicationTree, PublishedTree, ReadRequest, Service, TreeObserver};
use gattkit_domain::id::ServiceId;
use gattkit_domain::pairing::AgentCapability;
use gattkit_domain::path::{DEFAULT_ADAPTER_ID, ObjectPath};
use gattkit_domain::uuid_base::{DEFAULT_APP_UUID, DEFAULT_UUID_SUFFIX, UuidBase};

use crate::agent::{AgentPolicy, AgentState, DEFAULT_REPLY_TIMEOUT, PairingAgent};
use crate::event_bus::{self, EventBus};
use crate::ports::{
    AdapterHandle, AdapterInfo, Advertisement, AdvertisementHandle, Peripheral,
    PeripheralPublisher,
};

/// Property name signalled when a characteristic value changes.
const VALUE_PROPERTY: &str = "Value";

/// Construction options for an [`Application`].
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub adapter_id: String,
    /// Adapter alias and advertised local name.
    pub name: Option<String>,
    /// Short application UUID combined with every child id.
    pub uuid: String,
    pub uuid_suffix: String,
    /// Root of the exported tree. Derived from the adapter id when unset.
    pub base_path: Option<String>,
    pub agent_capability: AgentCapability,
    pub agent_policy: AgentPolicy,
    pub agent_timeout: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            adapter_id: DEFAULT_ADAPTER_ID.to_owned(),
            name: None,
            uuid: DEFAULT_APP_UUID.to_owned(),
            uuid_suffix: DEFAULT_UUID_SUFFIX.to_owned(),
            base_path: None,
            agent_capability: AgentCapability::default(),
            agent_policy: AgentPolicy::default(),
            agent_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl AppOptions {
    fn root(&self) -> Result<ObjectPath, GattError> {
        let path = match &self.base_path {
            Some(path) => path.clone(),
            None => format!("/org/gattkit/{}/app", self.adapter_id),
        };
        Ok(ObjectPath::new(path)?)
    }
}

/// Stops an advertisement. Cheap to clone, safe to call repeatedly and from
/// any task.
#[derive(Clone)]
pub struct AdvertiseCancel {
    inner: Arc<CancelInner>,
}

type StopFn = Box<dyn FnOnce() + Send>;

struct CancelInner {
    stop: Mutex<Option<StopFn>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl AdvertiseCancel {
    fn new<H: AdvertisementHandle>(handle: H) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                stop: Mutex::new(Some(Box::new(move || handle.stop()))),
                timer: Mutex::new(None),
            }),
        }
    }

    fn expire_after(&self, timeout: Duration) {
        let cancel = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::info!("advertisement timed out");
            cancel.cancel();
        });
        *self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());
    }

    /// Stop advertising. Later calls do nothing.
    pub fn cancel(&self) {
        let stop = self
            .inner
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop {
            stop();
            tracing::debug!("advertisement stopped");
        }
        let timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for AdvertiseCancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvertiseCancel")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Forwards tree signals to the publisher and the event bus.
struct PublisherSink<B> {
    backend: Arc<B>,
    events: EventBus,
}

impl<B: PeripheralPublisher + Send + Sync> TreeObserver for PublisherSink<B> {
    fn value_changed(&self, path: &ObjectPath, value: &[u8]) {
        if let Err(err) = self
            .backend
            .notify_property_changed(path, VALUE_PROPERTY, value)
        {
            tracing::warn!(%path, error = %err, "unable to signal value change");
        }
    }

    fn notifying_changed(&self, path: &ObjectPath, notifying: bool) {
        tracing::debug!(%path, notifying, "notify state changed");
        self.events.publish(
            names::NOTIFYING,
            json!({ "path": path.as_str(), "notifying": notifying }),
        );
    }

    fn value_written(&self, path: &ObjectPath, value: &[u8]) {
        self.events.publish(
            names::WRITTEN,
            json!({ "path": path.as_str(), "len": value.len() }),
        );
    }
}

/// A GATT application bound to one adapter of backend `B`.
pub struct Application<B> {
    backend: Arc<B>,
    adapter_id: String,
    name: Option<String>,
    tree: ApplicationTree,
    published: Option<PublishedTree>,
    agent: PairingAgent,
    events: EventBus,
    advertising: Option<AdvertiseCancel>,
}

impl<B: Peripheral> Application<B> {
    /// Create an application. Nothing is exported until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`GattError::Validation`] if the UUID parts or the base path
    /// are malformed.
    pub fn new(backend: Arc<B>, options: AppOptions) -> Result<Self, GattError> {
        let root = options.root()?;
        let uuid_base = UuidBase::new(options.uuid.clone(), options.uuid_suffix.clone())?;
        let agent = PairingAgent::new(
            root.child("agent")?,
            options.agent_capability,
            options.agent_policy,
        )
        .with_reply_timeout(options.agent_timeout);
        Ok(Self {
            backend,
            adapter_id: options.adapter_id,
            name: options.name,
            tree: ApplicationTree::new(root, uuid_base),
            published: None,
            agent,
            events: EventBus::new(),
            advertising: None,
        })
    }

    #[must_use]
    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    #[must_use]
    pub fn root(&self) -> &ObjectPath {
        self.tree.root()
    }

    #[must_use]
    pub fn uuid_base(&self) -> &UuidBase {
        self.tree.uuid_base()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The pairing agent, installed even when no policy was configured.
    #[must_use]
    pub fn agent(&self) -> &PairingAgent {
        &self.agent
    }

    /// Bus carrying `gatt.notifying`, `gatt.written` and `app.registered`.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.published.is_some()
    }

    /// The snapshot exported by the last successful [`run`](Self::run).
    #[must_use]
    pub fn published(&self) -> Option<&PublishedTree> {
        self.published.as_ref()
    }

    /// Handle on the configured controller.
    #[must_use]
    pub fn adapter(&self) -> AdapterHandle<B> {
        AdapterHandle::new(Arc::clone(&self.backend), self.adapter_id.clone())
    }

    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn adapter_info(&self) -> Result<AdapterInfo, GattError> {
        self.adapter().info().await
    }

    /// Set the adapter alias and the advertised local name.
    ///
    /// # Errors
    ///
    /// Propagates the backend error; the local name is updated regardless.
    pub async fn set_name(&mut self, name: impl Into<String>) -> Result<(), GattError> {
        let name = name.into();
        self.name = Some(name.clone());
        self.backend.set_alias(&self.adapter_id, &name).await
    }

    /// Allocate a primary service. See [`ApplicationTree::new_service`].
    ///
    /// # Errors
    ///
    /// Returns [`GattError::Validation`] for a malformed id.
    pub fn new_service(&self, id: &str) -> Result<Service, GattError> {
        self.tree.new_service(id)
    }

    /// # Errors
    ///
    /// Returns [`GattError::Validation`] for a malformed id.
    pub fn new_secondary_service(&self, id: &str) -> Result<Service, GattError> {
        self.tree.new_secondary_service(id)
    }

    /// # Errors
    ///
    /// See [`ApplicationTree::add_service`].
    pub fn add_service(&mut self, service: &Service) -> Result<(), GattError> {
        self.tree.add_service(service)
    }

    /// # Errors
    ///
    /// See [`ApplicationTree::remove_service`].
    pub fn remove_service(&mut self, id: &ServiceId) -> Result<Option<Service>, GattError> {
        self.tree.remove_service(id)
    }

    #[must_use]
    pub fn services(&self) -> &[Service] {
        self.tree.services()
    }

    /// Register the whole tree and activate the agent.
    ///
    /// Either both succeed or nothing stays exported.
    ///
    /// # Errors
    ///
    /// - [`GattError::AlreadyRegistered`] if already running
    /// - [`GattError::AdapterUnavailable`] if the adapter is absent
    /// - [`GattError::RegistrationFailed`] if the publisher or the agent
    ///   registry refused
    pub async fn run(&mut self) -> Result<(), GattError> {
        if self.published.is_some() {
            return Err(GattError::AlreadyRegistered);
        }
        if !self.backend.adapter_exists(&self.adapter_id).await? {
            return Err(GattError::AdapterUnavailable {
                adapter_id: self.adapter_id.clone(),
            });
        }

        let observer: Arc<dyn TreeObserver> = Arc::new(PublisherSink {
            backend: Arc::clone(&self.backend),
            events: self.events.clone(),
        });
        let published = self.tree.publish(&observer)?;

        if let Err(err) = self
            .backend
            .register_application(&self.adapter_id, &published)
            .await
        {
            self.tree.unpublish(&published);
            return Err(registration_failed(err));
        }

        if let Err(err) = self.activate_agent().await {
            if let Err(rollback) = self
                .backend
                .unregister_application(&self.adapter_id, published.root())
                .await
            {
                tracing::warn!(error = %rollback, "unable to roll back application registration");
            }
            self.tree.unpublish(&published);
            return Err(registration_failed(err));
        }

        tracing::info!(
            adapter = %self.adapter_id,
            root = %published.root(),
            attributes = published.len(),
            "application registered"
        );
        self.events.publish(
            names::APP_REGISTERED,
            json!({ "path": published.root().as_str(), "adapter": self.adapter_id }),
        );
        self.published = Some(published);
        Ok(())
    }

    async fn activate_agent(&self) -> Result<(), GattError> {
        self.backend.register_agent(&self.agent).await?;
        self.agent.set_state(AgentState::Registered);
        if let Err(err) = self.backend.request_default_agent(self.agent.path()).await {
            if let Err(rollback) = self.backend.unregister_agent(self.agent.path()).await {
                tracing::warn!(error = %rollback, "unable to roll back agent registration");
            }
            self.agent.set_state(AgentState::Inactive);
            return Err(err);
        }
        self.agent.set_state(AgentState::Active);
        Ok(())
    }

    /// Broadcast the application UUID for `timeout_secs` seconds, or until
    /// cancelled when zero. Replaces any running advertisement.
    ///
    /// # Errors
    ///
    /// Propagates the controller error. A running advertisement is left
    /// untouched in that case.
    pub async fn advertise(&mut self, timeout_secs: u32) -> Result<AdvertiseCancel, GattError> {
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(u64::from(timeout_secs)));
        let advertisement = Advertisement {
            service_uuids: vec![self.tree.uuid_base().app_uuid()?],
            local_name: self.name.clone(),
            timeout,
        };
        let handle = self
            .backend
            .start_advertising(&self.adapter_id, &advertisement)
            .await?;

        let cancel = AdvertiseCancel::new(handle);
        if let Some(timeout) = timeout {
            cancel.expire_after(timeout);
        }
        if let Some(previous) = self.advertising.replace(cancel.clone()) {
            previous.cancel();
        }
        tracing::info!(adapter = %self.adapter_id, ?timeout, "advertising");
        Ok(cancel)
    }

    /// Tear everything down. Failures are logged, never returned, and a
    /// second call does nothing.
    pub async fn close(&mut self) {
        if let Some(advertising) = self.advertising.take() {
            advertising.cancel();
        }
        if let Some(published) = self.published.take() {
            if let Err(err) = self
                .backend
                .unregister_application(&self.adapter_id, published.root())
                .await
            {
                tracing::warn!(error = %err, "unable to unregister application");
            }
            self.tree.unpublish(&published);
            if let Err(err) = self.backend.unregister_agent(self.agent.path()).await {
                tracing::warn!(error = %err, "unable to unregister agent");
            }
            self.agent.set_state(AgentState::Released);
            tracing::info!(adapter = %self.adapter_id, "application closed");
        }
        self.events.unsubscribe(event_bus::ALL);
    }

    /// Route a remote read by derived object path.
    ///
    /// # Errors
    ///
    /// [`GattError::NotRegistered`] before [`run`](Self::run), otherwise see
    /// [`PublishedTree::read`].
    pub fn dispatch_read(
        &self,
        path: &ObjectPath,
        request: &ReadRequest,
    ) -> Result<Vec<u8>, GattError> {
        tracing::debug!(%path, offset = request.offset, "remote read");
        self.published()
            .ok_or(GattError::NotRegistered)?
            .read(path, request)
    }

    /// Route a remote write by derived object path.
    ///
    /// # Errors
    ///
    /// [`GattError::NotRegistered`] before [`run`](Self::run), otherwise see
    /// [`PublishedTree::write`].
    pub fn dispatch_write(&self, path: &ObjectPath, value: &[u8]) -> Result<Vec<u8>, GattError> {
        tracing::debug!(%path, len = value.len(), "remote write");
        self.published()
            .ok_or(GattError::NotRegistered)?
            .write(path, value)
    }

    /// Route `StartNotify`/`StopNotify` by derived object path.
    ///
    /// # Errors
    ///
    /// [`GattError::NotRegistered`] before [`run`](Self::run), otherwise see
    /// [`PublishedTree::set_notifying`].
    pub fn dispatch_notifying(&self, path: &ObjectPath, notifying: bool) -> Result<(), GattError> {
        self.published()
            .ok_or(GattError::NotRegistered)?
            .set_notifying(path, notifying)
    }
}

impl<B> std::fmt::Debug for Application<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("adapter_id", &self.adapter_id)
            .field("root", self.tree.root())
            .field("registered", &self.published.is_some())
            .finish_non_exhaustive()
    }
}

fn registration_failed(err: GattError) -> GattError {
    match err {
        GattError::RegistrationFailed(_) => err,
        other => GattError::RegistrationFailed(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::future::Future;

    use super::*;
    use crate::ports::{AdapterDirectory, AdvertisingController, AgentRegistry};
    use gattkit_domain::error::CallbackError;
    use gattkit_domain::flags;
    use gattkit_domain::gatt::Attribute;

    #[derive(Default)]
    struct FakeState {
        registered: HashSet<String>,
        agents: HashSet<String>,
        notifications: Vec<(String, Vec<u8>)>,
        advertising: usize,
        fail_registration: bool,
        fail_default_agent: bool,
        fail_advertising: bool,
        calls: Vec<&'static str>,
    }

    #[derive(Default)]
    struct FakeBackend {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeBackend {
        fn with(setup: impl FnOnce(&mut FakeState)) -> Arc<Self> {
            let backend = Self::default();
            setup(&mut backend.state());
            Arc::new(backend)
        }

        fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
            self.state.lock().unwrap()
        }
    }

    struct FakeHandle(Arc<Mutex<FakeState>>);

    impl AdvertisementHandle for FakeHandle {
        fn stop(self) {
            self.0.lock().unwrap().advertising -= 1;
        }
    }

    fn refused() -> GattError {
        GattError::Backend("refused".into())
    }

    impl AdapterDirectory for FakeBackend {
        fn adapter_exists(
            &self,
            adapter_id: &str,
        ) -> impl Future<Output = Result<bool, GattError>> + Send {
            let exists = adapter_id == "hci0";
            async move { Ok(exists) }
        }

        fn get_adapter(
            &self,
            adapter_id: &str,
        ) -> impl Future<Output = Result<AdapterInfo, GattError>> + Send {
            let info = AdapterInfo {
                id: adapter_id.to_owned(),
                address: "00:11:22:33:44:55".to_owned(),
                powered: true,
                alias: "fake".to_owned(),
            };
            async { Ok(info) }
        }

        fn set_powered(
            &self,
            _adapter_id: &str,
            _powered: bool,
        ) -> impl Future<Output = Result<(), GattError>> + Send {
            async { Ok(()) }
        }

        fn set_alias(
            &self,
            _adapter_id: &str,
            _alias: &str,
        ) -> impl Future<Output = Result<(), GattError>> + Send {
            self.state().calls.push("set_alias");
            async { Ok(()) }
        }
    }

    impl PeripheralPublisher for FakeBackend {
        fn register_application(
            &self,
            _adapter_id: &str,
            tree: &PublishedTree,
        ) -> impl Future<Output = Result<(), GattError>> + Send {
            let mut state = self.state();
            state.calls.push("register_application");
            let result = if state.fail_registration {
                Err(refused())
            } else {
                state.registered.insert(tree.root().to_string());
                Ok(())
            };
            async { result }
        }

        fn unregister_application(
            &self,
            _adapter_id: &str,
            root: &ObjectPath,
        ) -> impl Future<Output = Result<(), GattError>> + Send {
            let mut state = self.state();
            state.calls.push("unregister_application");
            state.registered.remove(root.as_str());
            async { Ok(()) }
        }

        fn notify_property_changed(
            &self,
            path: &ObjectPath,
            _property: &str,
            value: &[u8],
        ) -> Result<(), GattError> {
            self.state()
                .notifications
                .push((path.to_string(), value.to_vec()));
            Ok(())
        }
    }

    impl AdvertisingController for FakeBackend {
        type Handle = FakeHandle;

        fn start_advertising(
            &self,
            _adapter_id: &str,
            _advertisement: &Advertisement,
        ) -> impl Future<Output = Result<Self::Handle, GattError>> + Send {
            let mut state = self.state();
            let result = if state.fail_advertising {
                Err(refused())
            } else {
                state.advertising += 1;
                Ok(FakeHandle(Arc::clone(&self.state)))
            };
            async { result }
        }
    }

    impl AgentRegistry for FakeBackend {
        fn register_agent(
            &self,
            agent: &PairingAgent,
        ) -> impl Future<Output = Result<(), GattError>> + Send {
            let mut state = self.state();
            state.calls.push("register_agent");
            state.agents.insert(agent.path().to_string());
            async { Ok(()) }
        }

        fn request_default_agent(
            &self,
            _path: &ObjectPath,
        ) -> impl Future<Output = Result<(), GattError>> + Send {
            let mut state = self.state();
            state.calls.push("request_default_agent");
            let result = if state.fail_default_agent {
                Err(refused())
            } else {
                Ok(())
            };
            async { result }
        }

        fn unregister_agent(
            &self,
            path: &ObjectPath,
        ) -> impl Future<Output = Result<(), GattError>> + Send {
            let mut state = self.state();
            state.calls.push("unregister_agent");
            state.agents.remove(path.as_str());
            async { Ok(()) }
        }
    }

    fn app(backend: &Arc<FakeBackend>) -> Application<FakeBackend> {
        Application::new(Arc::clone(backend), AppOptions::default()).unwrap()
    }

    fn with_echo_char(app: &mut Application<FakeBackend>) -> ObjectPath {
        let service = app.new_service("2233").unwrap();
        let c = service.new_char("3344").unwrap();
        c.set_flags([
            flags::characteristic::READ,
            flags::characteristic::WRITE,
            flags::characteristic::NOTIFY,
        ])
        .unwrap();
        c.on_write(|_, value| Ok(value.to_vec()));
        service.add_char(&c).unwrap();
        app.add_service(&service).unwrap();
        ObjectPath::new("/org/gattkit/hci0/app/service0/char0").unwrap()
    }

    #[test]
    fn should_install_default_agent() {
        let backend = FakeBackend::with(|_| {});
        let app = app(&backend);
        assert_eq!(app.agent().path().as_str(), "/org/gattkit/hci0/app/agent");
        assert_eq!(app.agent().state(), AgentState::Inactive);
        assert!(!app.is_registered());
    }

    #[test]
    fn should_reject_malformed_base_path() {
        let backend = FakeBackend::with(|_| {});
        let options = AppOptions {
            base_path: Some("relative/path".to_owned()),
            ..AppOptions::default()
        };
        let result = Application::new(backend, options);
        assert!(matches!(result, Err(GattError::Validation(_))));
    }

    #[tokio::test]
    async fn should_run_and_dispatch_by_path() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let path = with_echo_char(&mut app);

        app.run().await.unwrap();
        assert!(app.is_registered());
        assert_eq!(app.agent().state(), AgentState::Active);

        app.dispatch_write(&path, &[0x2A]).unwrap();
        assert_eq!(
            app.dispatch_read(&path, &ReadRequest::default()).unwrap(),
            vec![0x2A]
        );
    }

    #[tokio::test]
    async fn should_refuse_dispatch_before_run() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let path = with_echo_char(&mut app);
        assert!(matches!(
            app.dispatch_read(&path, &ReadRequest::default()),
            Err(GattError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn should_surface_callback_errors_at_dispatch() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let service = app.new_service("2233").unwrap();
        let c = service.new_char("3344").unwrap();
        c.on_read(|_, _| Err(CallbackError::NotAuthorized));
        service.add_char(&c).unwrap();
        app.add_service(&service).unwrap();
        app.run().await.unwrap();

        let path = ObjectPath::new("/org/gattkit/hci0/app/service0/char0").unwrap();
        assert!(matches!(
            app.dispatch_read(&path, &ReadRequest::default()),
            Err(GattError::Callback(CallbackError::NotAuthorized))
        ));
    }

    #[tokio::test]
    async fn should_fail_on_missing_adapter() {
        let backend = FakeBackend::with(|_| {});
        let options = AppOptions {
            adapter_id: "hci7".to_owned(),
            ..AppOptions::default()
        };
        let mut app = Application::new(Arc::clone(&backend), options).unwrap();
        let result = app.run().await;
        assert!(matches!(
            result,
            Err(GattError::AdapterUnavailable { adapter_id }) if adapter_id == "hci7"
        ));
        assert!(!app.is_registered());
        assert!(backend.state().calls.is_empty());
    }

    #[tokio::test]
    async fn should_leave_nothing_registered_when_publisher_refuses() {
        let backend = FakeBackend::with(|s| s.fail_registration = true);
        let mut app = app(&backend);
        with_echo_char(&mut app);

        let result = app.run().await;
        assert!(matches!(result, Err(GattError::RegistrationFailed(_))));
        assert!(!app.is_registered());
        // The tree is editable again.
        app.add_service(&app.new_service("5566").unwrap()).unwrap();
    }

    #[tokio::test]
    async fn should_roll_back_tree_when_agent_fails() {
        let backend = FakeBackend::with(|s| s.fail_default_agent = true);
        let mut app = app(&backend);
        with_echo_char(&mut app);

        let result = app.run().await;
        assert!(matches!(result, Err(GattError::RegistrationFailed(_))));
        assert!(!app.is_registered());
        assert_eq!(app.agent().state(), AgentState::Inactive);
        let state = backend.state();
        assert!(state.registered.is_empty());
        assert!(state.agents.is_empty());
        assert_eq!(
            state.calls,
            vec![
                "register_application",
                "register_agent",
                "request_default_agent",
                "unregister_agent",
                "unregister_application",
            ]
        );
    }

    #[tokio::test]
    async fn should_refuse_second_run() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        app.run().await.unwrap();
        assert!(matches!(app.run().await, Err(GattError::AlreadyRegistered)));
    }

    #[tokio::test]
    async fn should_close_once() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        with_echo_char(&mut app);
        app.run().await.unwrap();

        app.close().await;
        app.close().await;

        let calls = backend.state().calls.clone();
        assert_eq!(
            calls.iter().filter(|c| **c == "unregister_application").count(),
            1
        );
        assert_eq!(calls.iter().filter(|c| **c == "unregister_agent").count(), 1);
        assert_eq!(app.agent().state(), AgentState::Released);
        assert!(!app.is_registered());
    }

    #[tokio::test]
    async fn should_close_unstarted_application() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        app.close().await;
        assert!(backend.state().calls.is_empty());
    }

    #[tokio::test]
    async fn should_run_again_after_close() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        with_echo_char(&mut app);
        app.run().await.unwrap();
        app.close().await;
        app.run().await.unwrap();
        assert_eq!(app.agent().state(), AgentState::Active);
    }

    #[tokio::test]
    async fn should_forward_notifications_only_while_notifying() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let path = with_echo_char(&mut app);
        app.run().await.unwrap();

        let Some(Attribute::Characteristic(c)) = app.published().unwrap().attribute(&path).cloned()
        else {
            panic!("expected characteristic");
        };
        assert!(!c.notify(vec![1]));
        assert!(backend.state().notifications.is_empty());

        app.dispatch_notifying(&path, true).unwrap();
        assert!(c.notify(vec![2]));
        assert_eq!(
            backend.state().notifications,
            vec![(path.to_string(), vec![2])]
        );
        assert_eq!(c.value(), vec![2]);
    }

    #[tokio::test]
    async fn should_publish_notify_events() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let path = with_echo_char(&mut app);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        app.events()
            .subscribe(names::NOTIFYING, move |event| {
                let _ = tx.send(event.data().clone());
            })
            .unwrap();
        app.run().await.unwrap();

        app.dispatch_notifying(&path, true).unwrap();
        let data = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, json!({ "path": path.as_str(), "notifying": true }));
    }

    #[tokio::test]
    async fn should_release_subscriptions_on_close() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        app.events().subscribe(names::WRITTEN, |_| {}).unwrap();
        app.run().await.unwrap();
        app.close().await;
        assert!(!app.events().is_running());
    }

    #[tokio::test]
    async fn should_replace_previous_advertisement() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);

        let first = app.advertise(0).await.unwrap();
        let second = app.advertise(0).await.unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(backend.state().advertising, 1);

        second.cancel();
        second.cancel();
        assert_eq!(backend.state().advertising, 0);
    }

    #[tokio::test]
    async fn should_keep_advertisement_when_restart_fails() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let running = app.advertise(0).await.unwrap();

        backend.state().fail_advertising = true;
        assert!(app.advertise(0).await.is_err());
        assert!(!running.is_cancelled());
        assert_eq!(backend.state().advertising, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_advertising_after_timeout() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let cancel = app.advertise(5).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cancel.is_cancelled());
        assert_eq!(backend.state().advertising, 0);
    }

    #[tokio::test]
    async fn should_stop_advertising_on_close() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        let cancel = app.advertise(0).await.unwrap();
        app.close().await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn should_remember_name() {
        let backend = FakeBackend::with(|_| {});
        let mut app = app(&backend);
        app.set_name("gattkit").await.unwrap();
        assert_eq!(app.name(), Some("gattkit"));
        assert_eq!(backend.state().calls, vec!["set_alias"]);
    }
}
