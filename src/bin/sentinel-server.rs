#![forbid(unsafe_code)]
//! SentinelChain API server

use sentinelchain::config::load_config;
use sentinelchain::node;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    node::init_tracing();
    let config = load_config()?;
    tracing::info!(
        port = config.server.port,
        backend = ?config.storage.backend,
        "Starting SentinelChain"
    );
    node::run(config).await
}
