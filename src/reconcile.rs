//! Scheduled reconciliation.
//!
//! A [`ReconcileWorker`] runs [`SubscriptionManager::reconcile_all`] on a
//! fixed interval until it is told to stop. Every finished sweep, scheduled
//! or triggered over HTTP, is recorded in a shared [`ReconcileStatus`] that
//! the health check reads.
//!
//! [`SubscriptionManager::reconcile_all`]: crate::billing::SubscriptionManager::reconcile_all

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::billing::{DynSubscriptionManager, ReconcileSummary};
use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::utils::unix_now;

/// Outcome of the most recent sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReconcile {
    pub summary: ReconcileSummary,
    /// Unix timestamp the sweep finished at.
    pub finished_at: u64,
    /// Set when the sweep could not run at all (e.g. listing failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LastReconcile {
    /// The sweep ran and no tenant failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.summary.is_clean()
    }
}

/// Shared record of the last sweep.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStatus {
    last: Arc<RwLock<Option<LastReconcile>>>,
}

impl ReconcileStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last(&self) -> Option<LastReconcile> {
        self.last.read().await.clone()
    }

    async fn record(&self, last: LastReconcile) {
        *self.last.write().await = Some(last);
    }
}

/// Run one sweep and record its outcome.
pub async fn run_sweep(
    manager: &DynSubscriptionManager,
    status: &ReconcileStatus,
) -> Result<ReconcileSummary> {
    match manager.reconcile_all().await {
        Ok(summary) => {
            status
                .record(LastReconcile {
                    summary: summary.clone(),
                    finished_at: unix_now(),
                    error: None,
                })
                .await;
            Ok(summary)
        }
        Err(e) => {
            tracing::error!(
                target: "consign::reconcile",
                error = %e,
                "reconcile sweep failed"
            );
            status
                .record(LastReconcile {
                    summary: ReconcileSummary::default(),
                    finished_at: unix_now(),
                    error: Some(e.to_string()),
                })
                .await;
            Err(e)
        }
    }
}

/// Background task that sweeps on a fixed interval.
pub struct ReconcileWorker {
    manager: Arc<DynSubscriptionManager>,
    status: ReconcileStatus,
    interval: Duration,
    run_on_startup: bool,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconcileWorker {
    /// Create a worker and the receiver that stops it.
    pub fn new(
        manager: Arc<DynSubscriptionManager>,
        status: ReconcileStatus,
        config: &ReconcileConfig,
    ) -> (Self, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                manager,
                status,
                interval: Duration::from_secs(config.interval_seconds.max(1)),
                run_on_startup: config.run_on_startup,
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Run until shutdown is requested.
    ///
    /// A sweep in progress is finished before the loop exits.
    pub async fn start(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            target: "consign::reconcile",
            interval_seconds = self.interval.as_secs(),
            run_on_startup = self.run_on_startup,
            "reconcile worker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_on_startup {
            // the first tick completes immediately
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(target: "consign::reconcile", "shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    // Failures are already logged and recorded.
                    let _ = run_sweep(&self.manager, &self.status).await;
                }
            }
        }

        tracing::info!(target: "consign::reconcile", "reconcile worker stopped");
    }

    /// Spawn the worker onto the runtime.
    pub fn spawn(self, shutdown_rx: mpsc::Receiver<()>) -> ReconcileHandle {
        let shutdown_tx = self.shutdown_tx.clone();
        let task = tokio::spawn(self.start(shutdown_rx));
        ReconcileHandle { task, shutdown_tx }
    }
}

/// Handle to a spawned [`ReconcileWorker`].
pub struct ReconcileHandle {
    task: JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconcileHandle {
    /// Stop the worker and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(target: "consign::reconcile", error = %e, "reconcile worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;

    fn config(run_on_startup: bool) -> ReconcileConfig {
        ReconcileConfig {
            enabled: true,
            interval_seconds: 3600,
            run_on_startup,
            trigger_token: None,
        }
    }

    #[tokio::test]
    async fn test_run_sweep_records_summary() {
        let ctx = TestContext::new();
        ctx.subscribe("t1", "price_basic").await;
        let status = ReconcileStatus::new();
        assert!(status.last().await.is_none());

        let summary = run_sweep(&ctx.manager, &status).await.unwrap();
        assert_eq!(summary.considered, 1);

        let last = status.last().await.unwrap();
        assert_eq!(last.summary, summary);
        assert!(last.is_clean());
    }

    #[tokio::test]
    async fn test_worker_runs_on_startup_and_stops() {
        let ctx = TestContext::new();
        ctx.subscribe("t1", "price_basic").await;
        let status = ReconcileStatus::new();

        let (worker, rx) = ReconcileWorker::new(ctx.manager.clone(), status.clone(), &config(true));
        let handle = worker.spawn(rx);

        let recorded = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(last) = status.last().await {
                    return last;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(recorded.summary.considered, 1);

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_waits_a_full_interval_without_startup_run() {
        let ctx = TestContext::new();
        let status = ReconcileStatus::new();

        let (worker, rx) =
            ReconcileWorker::new(ctx.manager.clone(), status.clone(), &config(false));
        let handle = worker.spawn(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(status.last().await.is_none());

        handle.shutdown().await;
    }

    #[test]
    fn test_last_reconcile_cleanliness() {
        let mut last = LastReconcile {
            summary: ReconcileSummary::default(),
            finished_at: 1,
            error: None,
        };
        assert!(last.is_clean());

        last.summary.errors = 1;
        assert!(!last.is_clean());

        last.summary.errors = 0;
        last.error = Some("database down".to_string());
        assert!(!last.is_clean());
    }
}
