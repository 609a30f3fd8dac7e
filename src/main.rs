use log::{error, info, warn};

use relaypad::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting relaypad...");

    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        RelayConfig::default()
    });

    let server = RelayServer::new(config);
    if let Err(e) = server.run().await {
        error!("Relay server error: {}", e);
        std::process::exit(1);
    }
}
