use rentledger::{bootstrap, config, server};

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,rentledger=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting rent escrow & reconciliation service");

    dotenv::dotenv().ok();
    let config = config::Config::from_env()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state, background) = bootstrap::initialize_app(&config, shutdown_rx).await?;

    let app = server::create_app(state);
    server::run_server(app, &config.bind_address, shutdown_tx).await?;

    // Workers observe the flipped shutdown flag and drain on their own;
    // in-flight leases simply expire on TTL.
    for handle in background {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}
