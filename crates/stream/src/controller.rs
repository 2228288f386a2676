use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use worldspace_common::{EntityHandle, NetworkId, WorldObject};
use worldspace_kernel::{
    CellCoord, LifecycleState, Materialization, ObjectRegistry, RegistryError, RegistrySummary,
    SeedReport,
};

use crate::config::{ConfigError, StreamConfig};
use crate::host::{Host, HostError};
use crate::lifecycle::{LifecycleError, LifecycleManager};
use crate::reconcile::{ReconciliationLoop, TickOutcome, TickStats};

/// Errors from applying the remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeedError {
    #[error("failed to fetch registered objects: {0}")]
    Fetch(#[from] HostError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Owns the registry and drives object streaming for one process.
///
/// Construct once at startup and share behind an `Arc`. All registry access
/// goes through the single lock held here.
pub struct WorldController {
    config: StreamConfig,
    host: Host,
    registry: Arc<RwLock<ObjectRegistry>>,
    lifecycle: Arc<LifecycleManager>,
    reconciler: Arc<ReconciliationLoop>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorldController {
    pub fn new(config: StreamConfig, host: Host) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(RwLock::new(ObjectRegistry::new(config.cell_size)));
        let lifecycle = Arc::new(LifecycleManager::new(registry.clone(), &host, &config));
        let reconciler = Arc::new(ReconciliationLoop::new(
            registry.clone(),
            lifecycle.clone(),
            config.tick_interval(),
        ));
        Ok(Self {
            config,
            host,
            registry,
            lifecycle,
            reconciler,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Register a world object. Duplicates are rejected and the first definition kept.
    pub async fn register(&self, object: WorldObject) -> Result<CellCoord, RegistryError> {
        self.registry.write().await.register(object)
    }

    pub async fn get(&self, name: &str) -> Option<WorldObject> {
        self.registry.read().await.get(name).cloned()
    }

    /// Local entity handle for external collaborators addressing the live object.
    pub async fn entity_for(&self, name: &str) -> Option<EntityHandle> {
        self.registry.read().await.entity_for(name)
    }

    pub async fn network_id(&self, name: &str) -> Option<NetworkId> {
        self.registry.read().await.network_id(name)
    }

    pub async fn lifecycle_state(&self, name: &str) -> LifecycleState {
        self.registry.read().await.lifecycle_state(name)
    }

    pub async fn is_seeded(&self) -> bool {
        self.registry.read().await.is_seeded()
    }

    pub async fn materialize(&self, name: &str) -> Result<Materialization, LifecycleError> {
        self.lifecycle.materialize(name).await
    }

    pub async fn dematerialize(&self, name: &str) -> Option<EntityHandle> {
        self.lifecycle.dematerialize(name).await
    }

    /// Fetch the remote snapshot once and apply it.
    pub async fn seed_from_authority(&self) -> Result<SeedReport, SeedError> {
        seed_once(&self.registry, &self.host).await
    }

    /// Run one reconciliation scan now.
    pub async fn tick(&self) -> TickOutcome {
        self.reconciler.tick().await
    }

    pub fn last_tick_stats(&self) -> TickStats {
        self.reconciler.stats()
    }

    pub async fn summary(&self) -> RegistrySummary {
        self.registry.read().await.summary()
    }

    /// Spawn the seeding task and the reconciliation timer.
    ///
    /// Must be called from within a tokio runtime. Calling it again while
    /// running is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let registry = self.registry.clone();
        let host = self.host.clone();
        let retry = self.config.seed_retry();
        tasks.push(tokio::spawn(seed_until_done(registry, host, retry)));
        tasks.push(tokio::spawn(self.reconciler.clone().run()));

        tracing::info!(
            period_ms = self.config.tick_interval_ms,
            cell_size = self.config.cell_size,
            "world streaming started"
        );
    }

    /// Stop the timer and the seeding task. In-flight attempts run to completion.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("world streaming stopped");
    }
}

impl Drop for WorldController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn seed_once(
    registry: &RwLock<ObjectRegistry>,
    host: &Host,
) -> Result<SeedReport, SeedError> {
    let snapshot = host.authority.registered_objects().await?;
    let engine = host.engine.clone();
    let report = registry
        .write()
        .await
        .seed_remote(snapshot, |id| engine.entity_from_network_id(id))?;
    tracing::info!(
        restored = report.restored.len(),
        dropped = report.dropped.len(),
        "applied remote object snapshot"
    );
    Ok(report)
}

async fn seed_until_done(registry: Arc<RwLock<ObjectRegistry>>, host: Host, retry: Duration) {
    loop {
        if registry.read().await.is_seeded() {
            return;
        }
        match seed_once(&registry, &host).await {
            Ok(_) | Err(SeedError::Registry(RegistryError::AlreadySeeded)) => return,
            Err(err) => {
                tracing::warn!(%err, retry_ms = retry.as_millis() as u64, "remote snapshot unavailable");
                tokio::time::sleep(retry).await;
            }
        }
    }
}
