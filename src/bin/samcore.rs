//! The hub process entry point. Launched with no arguments; configuration
//! comes entirely from `SamCore.toml` and `SAMCORE_*` environment
//! variables (`samcore::config::HubConfig::load`).

use samcore::{Hub, HubConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = HubConfig::load()?;
    samcore::logging::init(config.debug_mode);

    let hub = Hub::new(config).await?;

    let shutdown_hub = hub.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_hub.shutdown().await;
        }
    });

    hub.run().await?;
    Ok(())
}
