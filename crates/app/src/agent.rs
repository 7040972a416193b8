//! Pairing agent — answers authentication prompts during bonding.
//!
//! The agent moves through `Inactive -> Registered -> Active -> Released`.
//! Prompts are only answered while `Active`; anything else is rejected.
//! Answers from a [`PairingPolicy`] run on the blocking pool and are bounded
//! by the agent's reply timeout.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gattkit_domain::error::AgentError;
use gattkit_domain::pairing::AgentCapability;
use gattkit_domain::path::ObjectPath;

/// Pass code answered by a [`SimpleAgent`] that was never configured.
pub const DEFAULT_PASS_CODE: &str = "0000";
/// Pass key answered by a [`SimpleAgent`] that was never configured.
pub const DEFAULT_PASS_KEY: u32 = 1024;
/// Time a policy gets to answer a prompt.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a [`PairingAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Inactive,
    Registered,
    Active,
    Released,
}

/// Caller-supplied pairing behaviour.
///
/// Methods are synchronous and may block (waiting for a button press, for
/// instance). They run off the async executor.
pub trait PairingPolicy: Send + Sync {
    /// Legacy PIN code for `device`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Rejected`] or [`AgentError::Canceled`] to refuse.
    fn request_pin_code(&self, device: &str) -> Result<String, AgentError>;

    /// Six digit passkey for `device`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Rejected`] or [`AgentError::Canceled`] to refuse.
    fn request_passkey(&self, device: &str) -> Result<u32, AgentError>;

    /// Confirm that `passkey` matches the one displayed on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Rejected`] to refuse.
    fn request_confirmation(&self, device: &str, passkey: u32) -> Result<(), AgentError> {
        let _ = (device, passkey);
        Ok(())
    }

    /// Authorize a pairing that requires no secret.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Rejected`] to refuse.
    fn request_authorization(&self, device: &str) -> Result<(), AgentError> {
        let _ = device;
        Ok(())
    }

    fn display_pin_code(&self, device: &str, pin_code: &str) {
        tracing::info!(device, pin_code, "display pin code");
    }

    fn display_passkey(&self, device: &str, passkey: u32, entered: u16) {
        tracing::info!(device, passkey, entered, "display passkey");
    }

    /// The remote aborted the pending prompt.
    fn cancel(&self) {}
}

/// Policy answering with a static pass code and pass key, accepting every
/// confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleAgent {
    pass_code: String,
    pass_key: u32,
}

impl Default for SimpleAgent {
    fn default() -> Self {
        Self {
            pass_code: DEFAULT_PASS_CODE.to_owned(),
            pass_key: DEFAULT_PASS_KEY,
        }
    }
}

impl SimpleAgent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pass_code(&self) -> &str {
        &self.pass_code
    }

    #[must_use]
    pub fn pass_key(&self) -> u32 {
        self.pass_key
    }

    pub fn set_pass_code(&mut self, pass_code: impl Into<String>) -> &mut Self {
        self.pass_code = pass_code.into();
        self
    }

    pub fn set_pass_key(&mut self, pass_key: u32) -> &mut Self {
        self.pass_key = pass_key;
        self
    }
}

impl PairingPolicy for SimpleAgent {
    fn request_pin_code(&self, _device: &str) -> Result<String, AgentError> {
        Ok(self.pass_code.clone())
    }

    fn request_passkey(&self, _device: &str) -> Result<u32, AgentError> {
        Ok(self.pass_key)
    }
}

/// How an agent answers prompts.
#[derive(Clone, Default)]
pub enum AgentPolicy {
    /// Accept everything, answering secrets with the defaults.
    #[default]
    AutoAccept,
    StaticPassCode(SimpleAgent),
    Custom(Arc<dyn PairingPolicy>),
}

impl fmt::Debug for AgentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoAccept => f.write_str("AutoAccept"),
            Self::StaticPassCode(simple) => f.debug_tuple("StaticPassCode").field(simple).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Pairing agent exported at a fixed object path.
///
/// Cloning shares the lifecycle state.
#[derive(Debug, Clone)]
pub struct PairingAgent {
    path: ObjectPath,
    capability: AgentCapability,
    policy: AgentPolicy,
    reply_timeout: Duration,
    state: Arc<Mutex<AgentState>>,
}

impl PairingAgent {
    #[must_use]
    pub fn new(path: ObjectPath, capability: AgentCapability, policy: AgentPolicy) -> Self {
        Self {
            path,
            capability,
            policy,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            state: Arc::new(Mutex::new(AgentState::Inactive)),
        }
    }

    #[must_use]
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub fn capability(&self) -> AgentCapability {
        self.capability
    }

    #[must_use]
    pub fn policy(&self) -> &AgentPolicy {
        &self.policy
    }

    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    #[must_use]
    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            tracing::debug!(path = %self.path, from = ?*current, to = ?state, "agent state changed");
            *current = state;
        }
    }

    /// Configured static pass code, if the policy has one.
    #[must_use]
    pub fn pass_code(&self) -> Option<&str> {
        match &self.policy {
            AgentPolicy::StaticPassCode(simple) => Some(simple.pass_code()),
            _ => None,
        }
    }

    /// Configured static pass key, if the policy has one.
    #[must_use]
    pub fn pass_key(&self) -> Option<u32> {
        match &self.policy {
            AgentPolicy::StaticPassCode(simple) => Some(simple.pass_key()),
            _ => None,
        }
    }

    /// # Errors
    ///
    /// - [`AgentError::Rejected`] unless the agent is active or when the
    ///   policy refuses
    /// - [`AgentError::Timeout`] when a custom policy does not answer in time
    pub async fn request_pin_code(&self, device: &str) -> Result<String, AgentError> {
        self.ensure_active(device, "request_pin_code")?;
        match &self.policy {
            AgentPolicy::AutoAccept => Ok(DEFAULT_PASS_CODE.to_owned()),
            AgentPolicy::StaticPassCode(simple) => simple.request_pin_code(device),
            AgentPolicy::Custom(policy) => {
                self.ask(policy, device, |p, d| p.request_pin_code(d)).await
            }
        }
    }

    /// # Errors
    ///
    /// Same as [`request_pin_code`](Self::request_pin_code).
    pub async fn request_passkey(&self, device: &str) -> Result<u32, AgentError> {
        self.ensure_active(device, "request_passkey")?;
        match &self.policy {
            AgentPolicy::AutoAccept => Ok(DEFAULT_PASS_KEY),
            AgentPolicy::StaticPassCode(simple) => simple.request_passkey(device),
            AgentPolicy::Custom(policy) => self.ask(policy, device, |p, d| p.request_passkey(d)).await,
        }
    }

    /// # Errors
    ///
    /// Same as [`request_pin_code`](Self::request_pin_code).
    pub async fn request_confirmation(&self, device: &str, passkey: u32) -> Result<(), AgentError> {
        self.ensure_active(device, "request_confirmation")?;
        match &self.policy {
            AgentPolicy::AutoAccept | AgentPolicy::StaticPassCode(_) => Ok(()),
            AgentPolicy::Custom(policy) => {
                self.ask(policy, device, move |p, d| p.request_confirmation(d, passkey))
                    .await
            }
        }
    }

    /// # Errors
    ///
    /// Same as [`request_pin_code`](Self::request_pin_code).
    pub async fn request_authorization(&self, device: &str) -> Result<(), AgentError> {
        self.ensure_active(device, "request_authorization")?;
        match &self.policy {
            AgentPolicy::AutoAccept | AgentPolicy::StaticPassCode(_) => Ok(()),
            AgentPolicy::Custom(policy) => {
                self.ask(policy, device, |p, d| p.request_authorization(d)).await
            }
        }
    }

    pub fn display_pin_code(&self, device: &str, pin_code: &str) {
        match &self.policy {
            AgentPolicy::Custom(policy) => policy.display_pin_code(device, pin_code),
            _ => tracing::info!(device, pin_code, "display pin code"),
        }
    }

    pub fn display_passkey(&self, device: &str, passkey: u32, entered: u16) {
        match &self.policy {
            AgentPolicy::Custom(policy) => policy.display_passkey(device, passkey, entered),
            _ => tracing::info!(device, passkey, entered, "display passkey"),
        }
    }

    /// The remote aborted the pending prompt.
    pub fn cancel(&self) {
        tracing::info!(path = %self.path, "pairing canceled");
        if let AgentPolicy::Custom(policy) = &self.policy {
            policy.cancel();
        }
    }

    fn ensure_active(&self, device: &str, prompt: &'static str) -> Result<(), AgentError> {
        let state = self.state();
        if state == AgentState::Active {
            tracing::debug!(device, prompt, "pairing prompt");
            Ok(())
        } else {
            tracing::warn!(device, prompt, ?state, "pairing prompt on inactive agent");
            Err(AgentError::Rejected)
        }
    }

    async fn ask<T, F>(
        &self,
        policy: &Arc<dyn PairingPolicy>,
        device: &str,
        question: F,
    ) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PairingPolicy, &str) -> Result<T, AgentError> + Send + 'static,
    {
        let policy = Arc::clone(policy);
        let device = device.to_owned();
        let task = tokio::task::spawn_blocking({
            let policy = Arc::clone(&policy);
            move || question(policy.as_ref(), &device)
        });
        match tokio::time::timeout(self.reply_timeout, task).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "pairing policy panicked");
                Err(AgentError::Canceled)
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.reply_timeout, "pairing policy did not answer in time");
                policy.cancel();
                Err(AgentError::Timeout)
            }
        }
    }
}
