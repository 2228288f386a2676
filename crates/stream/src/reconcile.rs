use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use worldspace_kernel::{Materialization, ObjectRegistry};

use crate::lifecycle::{LifecycleError, LifecycleManager};

/// Per-tick reconciliation statistics for instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickStats {
    /// False when the tick was skipped because the remote snapshot has not arrived.
    pub ran: bool,
    pub scanned: usize,
    pub requested: usize,
    pub skipped_in_flight: usize,
    pub duration: Duration,
}

/// Attempts started by one tick. Dropping it detaches them.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub stats: TickStats,
    tasks: Vec<(String, JoinHandle<Result<Materialization, LifecycleError>>)>,
}

impl TickOutcome {
    /// Names a materialization was requested for.
    pub fn requested(&self) -> impl Iterator<Item = &str> + '_ {
        self.tasks.iter().map(|(name, _)| name.as_str())
    }

    /// Wait for every attempt this tick started.
    pub async fn join(self) -> Vec<(String, Result<Materialization, LifecycleError>)> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for (name, task) in self.tasks {
            match task.await {
                Ok(result) => results.push((name, result)),
                Err(err) => tracing::warn!(object = %name, %err, "materialization task did not complete"),
            }
        }
        results
    }
}

/// Periodic scan that requests materialization for eligible objects.
pub struct ReconciliationLoop {
    registry: Arc<RwLock<ObjectRegistry>>,
    lifecycle: Arc<LifecycleManager>,
    period: Duration,
    last_stats: Mutex<TickStats>,
}

impl ReconciliationLoop {
    pub fn new(
        registry: Arc<RwLock<ObjectRegistry>>,
        lifecycle: Arc<LifecycleManager>,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            period,
            last_stats: Mutex::new(TickStats::default()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Statistics from the last tick.
    pub fn stats(&self) -> TickStats {
        self.last_stats.lock().clone()
    }

    /// Run one scan. Does nothing until the registry is seeded.
    ///
    /// Each request runs as its own task; the tick returns without waiting
    /// for any of them. Registrations made during the scan show up next tick.
    pub async fn tick(&self) -> TickOutcome {
        self.scan().instrument(tracing::info_span!("reconcile_tick")).await
    }

    async fn scan(&self) -> TickOutcome {
        let started = Instant::now();

        let scan = {
            let registry = self.registry.read().await;
            if !registry.is_seeded() {
                tracing::trace!("awaiting remote snapshot, skipping tick");
                return TickOutcome::default();
            }
            registry.materialization_candidates()
        };

        let mut tasks = Vec::with_capacity(scan.candidates.len());
        for name in scan.candidates {
            let lifecycle = self.lifecycle.clone();
            let task_name = name.clone();
            let task = tokio::spawn(async move {
                let result = lifecycle.materialize(&task_name).await;
                if let Err(err) = &result {
                    log_deferred(&task_name, err);
                }
                result
            });
            tasks.push((name, task));
        }

        let stats = TickStats {
            ran: true,
            scanned: scan.scanned,
            requested: tasks.len(),
            skipped_in_flight: scan.skipped_in_flight,
            duration: started.elapsed(),
        };
        tracing::debug!(
            scanned = stats.scanned,
            requested = stats.requested,
            in_flight = stats.skipped_in_flight,
            "reconcile tick complete"
        );
        *self.last_stats.lock() = stats.clone();

        TickOutcome { stats, tasks }
    }

    /// Tick every period until the task is aborted. The first tick fires one
    /// full period after the call.
    pub async fn run(self: Arc<Self>) {
        let start = tokio::time::Instant::now() + self.period;
        let mut interval = tokio::time::interval_at(start, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            drop(self.tick().await);
        }
    }
}

fn log_deferred(name: &str, err: &LifecycleError) {
    match err {
        LifecycleError::NoObserverInRange { .. } => {
            tracing::trace!(object = name, "deferred: no observer in range");
        }
        LifecycleError::CreateFailed(_) => {
            tracing::debug!(object = name, "deferred: engine creation failed, will retry");
        }
        other => tracing::debug!(object = name, reason = %other, "materialization skipped"),
    }
}
