//! # gattkitd — gattkit daemon
//!
//! Composition root that turns `gattkit.toml` into a running GATT
//! peripheral.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Build the attribute tree and the pairing agent from it
//! - Pick the peripheral backend (`bluez` or `virtual`)
//! - Power the adapter, register the application and advertise it
//! - Withdraw everything on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

pub mod blueprint;
pub mod config;

use std::sync::Arc;

use gattkit_app::application::Application;
use gattkit_app::ports::Peripheral;
use gattkit_domain::error::GattError;
use gattkit_domain::event::names;

use crate::blueprint::BlueprintError;
use crate::config::Config;

/// Errors that stop the daemon.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Blueprint(#[from] BlueprintError),
    #[error("peripheral failure")]
    Gatt(#[from] GattError),
    #[error("cannot listen for shutdown signal")]
    Signal(#[source] std::io::Error),
}

/// Serve the configured application on `backend` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the first failure while building, powering, registering or
/// advertising. Once built, the application is closed before returning,
/// whatever the outcome.
pub async fn serve<B, S>(backend: Arc<B>, config: &Config, shutdown: S) -> Result<(), ServeError>
where
    B: Peripheral,
    S: Future<Output = std::io::Result<()>>,
{
    let mut app = blueprint::build(backend, config)?;
    let outcome = run_until(&mut app, config, shutdown).await;
    app.close().await;
    outcome
}

async fn run_until<B, S>(
    app: &mut Application<B>,
    config: &Config,
    shutdown: S,
) -> Result<(), ServeError>
where
    B: Peripheral,
    S: Future<Output = std::io::Result<()>>,
{
    let adapter = app.adapter();
    if !adapter.is_powered().await? {
        adapter.set_powered(true).await?;
    }
    if let Some(name) = &config.app.name {
        app.set_name(name.clone()).await?;
    }
    for name in [names::APP_REGISTERED, names::NOTIFYING, names::WRITTEN] {
        app.events()
            .subscribe(name, |event| {
                tracing::debug!(name = event.name(), data = %event.data(), "event");
            })
            .map_err(GattError::from)?;
    }

    app.run().await?;
    let _advertising = app.advertise(config.app.advertise_timeout_secs).await?;
    shutdown.await.map_err(ServeError::Signal)
}
