use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::engine::ReconciliationEngine;
use super::sweep::AgreementSweep;
use crate::config::ReconcileConfig;

/// Runs the reconciliation worker pool and the periodic agreement sweep.
///
/// Workers are independent tasks pulling from the shared due-record queue;
/// the per-record lease keeps them from stepping on each other. Shutdown
/// flips the watch flag: no new batches start, in-flight ledger calls run
/// to completion, and held leases expire on their TTL.
pub struct ReconciliationScheduler {
    engine: ReconciliationEngine,
    sweep: Arc<AgreementSweep>,
    config: ReconcileConfig,
    shutdown: watch::Receiver<bool>,
}

impl ReconciliationScheduler {
    pub fn new(
        engine: ReconciliationEngine,
        sweep: Arc<AgreementSweep>,
        config: ReconcileConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            sweep,
            config,
            shutdown,
        }
    }

    /// Start all background tasks, returning their handles.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.worker_count + 1);

        for index in 0..self.config.worker_count {
            let engine = self.engine.for_worker(index);
            let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
            let mut shutdown = self.shutdown.clone();

            handles.push(tokio::spawn(async move {
                info!("Reconciliation worker {} started", engine.holder_id());
                let mut ticker = interval(poll_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match engine.run_once().await {
                                Ok(0) => {}
                                Ok(n) => info!("Worker {} advanced {} records", engine.holder_id(), n),
                                Err(e) => error!("Worker {} batch failed: {:?}", engine.holder_id(), e),
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("Reconciliation worker {} stopping", engine.holder_id());
                                break;
                            }
                        }
                    }
                }
            }));
        }

        let sweep = self.sweep.clone();
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs);
        let mut shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            info!("Agreement sweep started");
            let mut ticker = interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sweep.run_once().await {
                            error!("Agreement sweep failed: {:?}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Agreement sweep stopping");
                            break;
                        }
                    }
                }
            }
        }));

        handles
    }
}
