use std::sync::{Arc, Mutex as StdMutex};

use log::{error, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::download::orchestrator::DownloadOrchestrator;
use crate::download::progress::TransferGauge;
use crate::download::{DownloadRequest, TransferSnapshot};
use crate::errors::{AppError, Result};
use crate::utils::generate_run_id;

struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the one-at-a-time orchestration lifecycle: starts runs, exposes the
/// latest snapshot, and relays user cancellation to whichever sub-phase is
/// currently live. Every run gets fresh state; nothing from a finished run
/// (tokens, timers, gauges) is ever reused.
pub struct TransferManager {
    config: Arc<Mutex<AppConfig>>,
    active: Mutex<Option<ActiveRun>>,
    last_snapshot: Arc<StdMutex<TransferSnapshot>>,
}

impl TransferManager {
    pub fn new(config: Arc<Mutex<AppConfig>>) -> Self {
        Self {
            config,
            active: Mutex::new(None),
            last_snapshot: Arc::new(StdMutex::new(TransferSnapshot::new(""))),
        }
    }

    /// Starts a new run and returns its id. Rejected while another run is
    /// still active; invoking again after a terminal state is fine and
    /// resets everything.
    pub async fn start<F>(&self, request: DownloadRequest, notify: F) -> Result<String>
    where
        F: Fn(TransferSnapshot) + Send + Sync + 'static,
    {
        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            if !run.handle.is_finished() {
                return Err(AppError::Job(
                    "A download is already in progress".to_string(),
                ));
            }
        }

        let run_id = generate_run_id();
        let cancel = CancellationToken::new();

        let last_snapshot = self.last_snapshot.clone();
        let sink = Box::new(move |snapshot: TransferSnapshot| {
            *last_snapshot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot.clone();
            notify(snapshot);
        });
        let gauge = Arc::new(TransferGauge::new(run_id.clone(), sink));

        let orchestrator = {
            let config = self.config.lock().await;
            DownloadOrchestrator::new(&config)
        };

        info!("[TRANSFER] Starting run {} for {}", run_id, request.url);
        let handle = {
            let run_id = run_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                match orchestrator.run(request, gauge.clone(), cancel).await {
                    Ok(path) => {
                        info!("[TRANSFER] Run {} finished: {}", run_id, path.display());
                    }
                    Err(e) if e.is_cancellation() => {
                        info!("[TRANSFER] Run {} cancelled", run_id);
                        gauge.cancelled();
                    }
                    Err(e) => {
                        error!("[TRANSFER] Run {} failed: {}", run_id, e);
                        gauge.fail(&e.to_string());
                    }
                }
            })
        };

        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            cancel,
            handle,
        });
        Ok(run_id)
    }

    /// Aborts whichever network sub-phase is live and stops its timers.
    pub async fn cancel(&self) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run) if !run.handle.is_finished() => {
                info!("[TRANSFER] Cancelling run {}", run.run_id);
                run.cancel.cancel();
                Ok(())
            }
            _ => Err(AppError::Job("No active download to cancel".to_string())),
        }
    }

    pub fn current(&self) -> TransferSnapshot {
        self.last_snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
