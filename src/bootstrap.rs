use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    adapters::{HttpLedgerClient, LedgerClient, SimulatedLedger},
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::{MemoryPaymentStore, PaymentStore, PgPaymentStore},
    notifier::{EventNotifier, LogNotifier, WebhookNotifier},
    reconciliation::{AgreementSweep, ReconciliationEngine, ReconciliationScheduler},
};

/// Wire up storage, the ledger client, the notifier, and the background
/// reconciliation tasks.
pub async fn initialize_app(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> AppResult<(AppState, Vec<JoinHandle<()>>)> {
    info!("Initializing application components ...");

    let store: Arc<dyn PaymentStore> = match &config.database_url {
        Some(database_url) => {
            let pool = initialize_database(database_url).await?;
            Arc::new(PgPaymentStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set - using in-memory payment ledger (dev only)");
            Arc::new(MemoryPaymentStore::new())
        }
    };

    let ledger: Arc<dyn LedgerClient> = match config.ledger_mode.as_str() {
        "remote" => {
            info!("Ledger client: remote gateway at {}", config.ledger_gateway_url);
            Arc::new(HttpLedgerClient::new(
                config.ledger_gateway_url.clone(),
                Duration::from_millis(config.ledger_timeout_ms),
            )?)
        }
        _ => {
            info!("Ledger client: in-process simulated ledger");
            Arc::new(SimulatedLedger::new())
        }
    };

    let notifier: Arc<dyn EventNotifier> = match &config.notify_webhook_url {
        Some(url) => {
            info!("Event notifier: webhook at {}", url);
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => {
            info!("Event notifier: log only");
            Arc::new(LogNotifier)
        }
    };

    let engine = ReconciliationEngine::new(
        store.clone(),
        ledger.clone(),
        notifier.clone(),
        config.reconcile.clone(),
    );
    let sweep = Arc::new(AgreementSweep::new(store.clone(), ledger.clone()));

    let scheduler =
        ReconciliationScheduler::new(engine, sweep, config.reconcile.clone(), shutdown);
    let handles = scheduler.start();
    info!(
        "Reconciliation running: {} workers, sweep every {}s",
        config.reconcile.worker_count, config.reconcile.sweep_interval_secs
    );

    let state = AppState {
        store,
        ledger,
        reconcile: config.reconcile.clone(),
    };

    Ok((state, handles))
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}
