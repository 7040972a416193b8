//! Builds an [`Application`] from the declarative `[[services]]` tables.

use std::sync::Arc;
use std::time::Duration;

use gattkit_app::agent::{AgentPolicy, SimpleAgent};
use gattkit_app::application::{AppOptions, Application};
use gattkit_app::ports::Peripheral;
use gattkit_domain::error::GattError;
use gattkit_domain::gatt::{Characteristic, Service};

use crate::config::{CharacteristicConfig, Config, ConfigError, ServiceConfig};

/// Errors raised while turning a configuration into an application.
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("cannot build attribute tree")]
    Gatt(#[from] GattError),
}

/// Translate the `[app]` and `[agent]` sections into application options.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] for an unknown agent capability.
pub fn options(config: &Config) -> Result<AppOptions, ConfigError> {
    let agent_policy = if config.agent.uses_static_answers() {
        let mut simple = SimpleAgent::new();
        simple
            .set_pass_code(config.agent.pass_code())
            .set_pass_key(config.agent.pass_key());
        AgentPolicy::StaticPassCode(simple)
    } else {
        AgentPolicy::AutoAccept
    };
    Ok(AppOptions {
        adapter_id: config.app.adapter_id.clone(),
        name: config.app.name.clone(),
        uuid: config.app.uuid.clone(),
        uuid_suffix: config.app.uuid_suffix.clone(),
        base_path: config.app.base_path.clone(),
        agent_capability: config.agent.capability()?,
        agent_policy,
        agent_timeout: Duration::from_secs(config.agent.timeout_secs),
    })
}

/// Create the application and attach every configured service.
///
/// # Errors
///
/// Returns [`BlueprintError::Gatt`] for malformed ids or flags and for
/// duplicate siblings.
pub fn build<B: Peripheral>(
    backend: Arc<B>,
    config: &Config,
) -> Result<Application<B>, BlueprintError> {
    let mut app = Application::new(backend, options(config)?)?;
    for service_config in &config.services {
        let service = build_service(&app, service_config)?;
        app.add_service(&service)?;
    }
    tracing::debug!(services = app.services().len(), "attribute tree built");
    Ok(app)
}

fn build_service<B: Peripheral>(
    app: &Application<B>,
    config: &ServiceConfig,
) -> Result<Service, GattError> {
    let service = if config.primary {
        app.new_service(&config.id)?
    } else {
        app.new_secondary_service(&config.id)?
    };
    for char_config in &config.characteristics {
        let characteristic = build_characteristic(&service, char_config)?;
        service.add_char(&characteristic)?;
    }
    Ok(service)
}

fn build_characteristic(
    service: &Service,
    config: &CharacteristicConfig,
) -> Result<Characteristic, GattError> {
    let characteristic = service.new_char(&config.id)?;
    if let Some(flags) = &config.flags {
        characteristic.set_flags(flags.iter().cloned())?;
    }
    characteristic.set_value(config.value.clone());
    if config.echo {
        characteristic.on_write(|c, value| {
            c.notify(value.to_vec());
            Ok(value.to_vec())
        });
    }
    for descr_config in &config.descriptors {
        let descriptor = characteristic.new_descr(&descr_config.id)?;
        if let Some(flags) = &descr_config.flags {
            descriptor.set_flags(flags.iter().cloned())?;
        }
        descriptor.set_value(descr_config.value.clone());
        characteristic.add_descr(&descriptor)?;
    }
    Ok(characteristic)
}
