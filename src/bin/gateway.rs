// Event gateway binary.
// Loads configuration, initializes logging, builds the broker adapter for
// the configured backend, and serves the /events WebSocket endpoint.

use clap::Parser;
use event_gateway::broker::registry;
use event_gateway::config::{CliArgs, GatewayConfig};
use event_gateway::server::GatewayServerBuilder;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(err) = dotenv::dotenv() {
        eprintln!("no .env file loaded: {err}");
    }
    tracing_subscriber::fmt::init();

    let args = CliArgs::parse();

    let config = match GatewayConfig::load(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let adapter = match registry::build_adapter(&config.broker) {
        Ok(adapter) => adapter,
        Err(err) => {
            error!(%err, "failed to construct broker adapter");
            std::process::exit(1);
        }
    };

    info!(
        broker = %config.broker.name,
        port = config.port,
        debug = config.debug,
        "starting event gateway"
    );

    let server = GatewayServerBuilder::new()
        .with_port(config.port)
        .with_broker(adapter)
        .with_secret_key(config.secret_key.into_bytes());

    if let Err(err) = server.run().await {
        error!(%err, "event gateway exited with error");
        std::process::exit(1);
    }
}
