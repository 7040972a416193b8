//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `gattkit.toml` in the working directory. Every field has a
//! sensible default so the file is optional; without it the daemon serves
//! an empty application. Environment variables take precedence over file
//! values.

use std::str::FromStr;

use serde::Deserialize;

use gattkit_app::agent::{DEFAULT_PASS_CODE, DEFAULT_PASS_KEY};
use gattkit_domain::pairing::AgentCapability;
use gattkit_domain::path::DEFAULT_ADAPTER_ID;
use gattkit_domain::uuid_base::{DEFAULT_APP_UUID, DEFAULT_UUID_SUFFIX};

/// Largest passkey a six-digit display can show.
const MAX_PASS_KEY: u32 = 999_999;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
    /// Attribute tree, in declaration order.
    pub services: Vec<ServiceConfig>,
}

/// Which peripheral backend serves the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `bluetoothd` over the system bus.
    #[default]
    Bluez,
    /// In-memory bus, for dry runs without a controller.
    Virtual,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bluez" => Ok(Self::Bluez),
            "virtual" => Ok(Self::Virtual),
            other => Err(ConfigError::Validation(format!("unknown backend {other}"))),
        }
    }
}

/// Application identity and advertising.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Controller identifier (e.g. `hci0`).
    pub adapter_id: String,
    /// Adapter alias and advertised local name.
    pub name: Option<String>,
    pub uuid: String,
    pub uuid_suffix: String,
    /// Root object path; derived from the adapter id when unset.
    pub base_path: Option<String>,
    /// Advertising duration, `0` for indefinitely.
    pub advertise_timeout_secs: u32,
    pub backend: Backend,
}

/// Pairing agent settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// IO capability name (`NoInputNoOutput`, `KeyboardDisplay`, ...).
    pub capability: String,
    /// Static PIN answered to `RequestPinCode`. Setting it or `pass_key`
    /// switches the agent from auto-accept to static answers.
    pub pass_code: Option<String>,
    pub pass_key: Option<u32>,
    /// Seconds a prompt may wait for its answer.
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// One service and its characteristics.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    #[serde(default = "primary_default")]
    pub primary: bool,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicConfig>,
}

fn primary_default() -> bool {
    true
}

/// One characteristic and its descriptors.
#[derive(Debug, Clone, Deserialize)]
pub struct CharacteristicConfig {
    pub id: String,
    /// Flag names; the default `read`/`write` pair when omitted.
    pub flags: Option<Vec<String>>,
    /// Initial cached value.
    #[serde(default)]
    pub value: Vec<u8>,
    /// Notify every written value back to subscribed centrals.
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub descriptors: Vec<DescriptorConfig>,
}

/// One descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorConfig {
    pub id: String,
    pub flags: Option<Vec<String>>,
    #[serde(default)]
    pub value: Vec<u8>,
}

impl Config {
    /// Load configuration from `gattkit.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("gattkit.toml")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("GATTKIT_ADAPTER") {
            self.app.adapter_id = val;
        }
        if let Ok(val) = std::env::var("GATTKIT_NAME") {
            self.app.name = Some(val);
        }
        if let Ok(val) = std::env::var("GATTKIT_BACKEND") {
            self.app.backend = val.parse()?;
        }
        if let Ok(val) = std::env::var("GATTKIT_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.adapter_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "adapter_id must not be empty".to_string(),
            ));
        }
        if let Some(name) = &self.app.name
            && name.trim().is_empty()
        {
            return Err(ConfigError::Validation("name must not be blank".to_string()));
        }
        self.agent.capability()?;
        if let Some(code) = &self.agent.pass_code
            && (code.is_empty() || code.len() > 16 || !code.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(ConfigError::Validation(format!(
                "pass_code must be 1 to 16 digits, got {code:?}"
            )));
        }
        if let Some(key) = self.agent.pass_key
            && key > MAX_PASS_KEY
        {
            return Err(ConfigError::Validation(format!(
                "pass_key must be at most {MAX_PASS_KEY}, got {key}"
            )));
        }
        for service in &self.services {
            if service.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "service id must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl AgentConfig {
    /// The parsed IO capability.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an unknown name.
    pub fn capability(&self) -> Result<AgentCapability, ConfigError> {
        self.capability
            .parse()
            .map_err(|_| ConfigError::Validation(format!("unknown capability {}", self.capability)))
    }

    /// Whether prompts get static answers instead of the auto-accept ones.
    #[must_use]
    pub fn uses_static_answers(&self) -> bool {
        self.pass_code.is_some() || self.pass_key.is_some()
    }

    /// The PIN answered in static mode.
    #[must_use]
    pub fn pass_code(&self) -> &str {
        self.pass_code.as_deref().unwrap_or(DEFAULT_PASS_CODE)
    }

    /// The passkey answered in static mode.
    #[must_use]
    pub fn pass_key(&self) -> u32 {
        self.pass_key.unwrap_or(DEFAULT_PASS_KEY)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adapter_id: DEFAULT_ADAPTER_ID.to_string(),
            name: None,
            uuid: DEFAULT_APP_UUID.to_string(),
            uuid_suffix: DEFAULT_UUID_SUFFIX.to_string(),
            base_path: None,
            advertise_timeout_secs: 0,
            backend: Backend::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            capability: AgentCapability::default().to_string(),
            pass_code: None,
            pass_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "gattkitd=info,gattkit=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.app.adapter_id, "hci0");
        assert_eq!(config.app.uuid, "1234");
        assert_eq!(config.app.backend, Backend::Bluez);
        assert_eq!(config.app.advertise_timeout_secs, 0);
        assert_eq!(
            config.agent.capability().unwrap(),
            AgentCapability::NoInputNoOutput
        );
        assert!(!config.agent.uses_static_answers());
        assert!(config.services.is_empty());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.app.adapter_id, "hci0");
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [app]
            adapter_id = 'hci1'
            name = 'thermo'
            uuid = 'ABCD'
            base_path = '/com/example/thermo'
            advertise_timeout_secs = 60
            backend = 'virtual'

            [agent]
            capability = 'KeyboardDisplay'
            pass_code = '043210'
            timeout_secs = 5

            [logging]
            filter = 'debug'

            [[services]]
            id = '2233'

            [[services.characteristics]]
            id = '3344'
            flags = ['read', 'write', 'notify']
            value = [1, 2]
            echo = true

            [[services.characteristics.descriptors]]
            id = '4455'
            value = [9]

            [[services]]
            id = '5566'
            primary = false
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.app.adapter_id, "hci1");
        assert_eq!(config.app.name.as_deref(), Some("thermo"));
        assert_eq!(config.app.backend, Backend::Virtual);
        assert_eq!(config.app.advertise_timeout_secs, 60);
        assert_eq!(
            config.agent.capability().unwrap(),
            AgentCapability::KeyboardDisplay
        );
        assert_eq!(config.agent.pass_code(), "043210");
        assert_eq!(config.agent.pass_key(), DEFAULT_PASS_KEY);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.services.len(), 2);
        assert!(config.services[0].primary);
        assert!(!config.services[1].primary);
        let c = &config.services[0].characteristics[0];
        assert_eq!(c.value, vec![1, 2]);
        assert!(c.echo);
        assert_eq!(c.descriptors[0].value, vec![9]);
        assert!(c.descriptors[0].flags.is_none());
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.app.adapter_id, "hci0");
    }

    #[test]
    fn should_parse_backend_names() {
        assert_eq!("Virtual".parse::<Backend>().unwrap(), Backend::Virtual);
        assert_eq!(" bluez ".parse::<Backend>().unwrap(), Backend::Bluez);
        assert!("dbus".parse::<Backend>().is_err());
    }

    #[test]
    fn should_reject_empty_adapter() {
        let mut config = Config::default();
        config.app.adapter_id = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_unknown_capability() {
        let mut config = Config::default();
        config.agent.capability = "Telepathy".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_non_numeric_pass_code() {
        let mut config = Config::default();
        config.agent.pass_code = Some("12ab".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_oversized_pass_key() {
        let mut config = Config::default();
        config.agent.pass_key = Some(1_000_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_blank_service_id() {
        let result = Config::from_toml("[[services]]\nid = ''");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_accept_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        assert!(matches!(
            Config::from_toml("invalid {{{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
