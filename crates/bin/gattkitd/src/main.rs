use std::sync::Arc;

use gattkit_adapter_bluez::BluezBackend;
use gattkit_adapter_virtual::VirtualBus;
use gattkitd::config::{Backend, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    tracing::info!(
        backend = ?config.app.backend,
        adapter = %config.app.adapter_id,
        "starting gattkitd"
    );

    match config.app.backend {
        Backend::Bluez => {
            let backend = Arc::new(BluezBackend::new().await?);
            gattkitd::serve(backend, &config, tokio::signal::ctrl_c()).await?;
        }
        Backend::Virtual => {
            let backend = Arc::new(VirtualBus::with_adapter(&config.app.adapter_id));
            gattkitd::serve(backend, &config, tokio::signal::ctrl_c()).await?;
        }
    }

    Ok(())
}
