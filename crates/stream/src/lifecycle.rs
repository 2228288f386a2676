use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use worldspace_common::{EntityHandle, WorldObject};
use worldspace_kernel::{MaterializePhase, Materialization, ObjectRegistry, RegistryError};

use crate::config::StreamConfig;
use crate::host::{Engine, Host, PeerChannel, SpawnFlags};
use crate::observer::ObserverLocator;

/// Why a materialization attempt did not produce an entity.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("unknown object: {0:?}")]
    Unknown(String),
    #[error("object is not networked: {0:?}")]
    NotNetworked(String),
    #[error("object already materialized: {0:?}")]
    AlreadyMaterialized(String),
    #[error("materialization already in flight: {0:?}")]
    InFlight(String),
    #[error("no observer within {radius} units of {name:?}")]
    NoObserverInRange { name: String, radius: f32 },
    #[error("engine failed to create {0:?}")]
    CreateFailed(String),
}

impl LifecycleError {
    /// Errors that a later tick is expected to resolve on its own.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            Self::NoObserverInRange { .. } | Self::InFlight(_) | Self::CreateFailed(_)
        )
    }
}

/// Creates and destroys the live entities backing registered objects.
pub struct LifecycleManager {
    registry: Arc<RwLock<ObjectRegistry>>,
    engine: Arc<dyn Engine>,
    peers: Arc<dyn PeerChannel>,
    locator: ObserverLocator,
    spawn_radius: f32,
    settle_delay: Duration,
}

impl LifecycleManager {
    pub fn new(registry: Arc<RwLock<ObjectRegistry>>, host: &Host, config: &StreamConfig) -> Self {
        Self {
            registry,
            engine: host.engine.clone(),
            peers: host.peers.clone(),
            locator: ObserverLocator::new(host.observers.clone()),
            spawn_radius: config.spawn_radius(),
            settle_delay: config.settle_delay(),
        }
    }

    /// Materialize `name` if an observer is close enough.
    ///
    /// The name is claimed in the registry for the whole attempt, so a
    /// concurrent call for the same name fails fast with `InFlight`. If the
    /// attempt fails or its future is dropped, the claim is released, any
    /// entity it created is deleted and no lifecycle state is recorded.
    pub async fn materialize(&self, name: &str) -> Result<Materialization, LifecycleError> {
        let object = {
            let mut registry = self.registry.write().await;
            let object = registry
                .get(name)
                .cloned()
                .ok_or_else(|| LifecycleError::Unknown(name.to_owned()))?;
            if !object.networked {
                return Err(LifecycleError::NotNetworked(object.name));
            }
            registry.begin_materialize(name).map_err(|e| match e {
                RegistryError::AlreadyMaterialized(n) => LifecycleError::AlreadyMaterialized(n),
                _ => LifecycleError::InFlight(name.to_owned()),
            })?;
            object
        };

        let mut claim = Claim {
            registry: self.registry.clone(),
            engine: self.engine.clone(),
            name: object.name.clone(),
            entity: None,
            committed: false,
        };
        self.create(&object, &mut claim).await
    }

    async fn create(
        &self,
        object: &WorldObject,
        claim: &mut Claim,
    ) -> Result<Materialization, LifecycleError> {
        let name = object.name.as_str();

        let Some(observer) = self.locator.nearest(object.coords, self.spawn_radius).await else {
            tracing::trace!(object = name, "no observer in range");
            return Err(LifecycleError::NoObserverInRange {
                name: name.to_owned(),
                radius: self.spawn_radius,
            });
        };
        tracing::debug!(object = name, %observer, "observer in range, creating object");

        self.registry
            .write()
            .await
            .advance(name, MaterializePhase::Creating);
        let Some(entity) =
            self.engine
                .create_object(object.model, object.coords, SpawnFlags::WORLD_OBJECT)
        else {
            tracing::warn!(object = name, "failed to create world object");
            return Err(LifecycleError::CreateFailed(name.to_owned()));
        };
        claim.entity = Some(entity);

        self.registry
            .write()
            .await
            .advance(name, MaterializePhase::Settling);
        tokio::time::sleep(self.settle_delay).await;

        let network_id = self.engine.network_id_from_entity(entity);
        let materialization = Materialization { entity, network_id };
        if self
            .registry
            .write()
            .await
            .finish_materialize(name, materialization)
            .is_err()
        {
            tracing::warn!(object = name, %entity, "object restored while creating, discarding new entity");
            return Err(LifecycleError::AlreadyMaterialized(name.to_owned()));
        }
        claim.committed = true;

        // Engine-side creation does not always apply the exact transform across the network.
        if let Some(owner) = self.engine.entity_owner(entity) {
            self.peers
                .push_transform(owner, network_id, object.coords, object.rotation);
        }
        tracing::info!(object = name, %entity, %network_id, "created world object");
        self.peers.object_registered(name, network_id);

        Ok(materialization)
    }

    /// Destroy the live entity of `name`. Returns `None` if nothing was live.
    pub async fn dematerialize(&self, name: &str) -> Option<EntityHandle> {
        let Materialization { entity, .. } = self.registry.write().await.clear_materialized(name)?;

        self.engine.delete_entity(entity);
        tracing::info!(object = name, %entity, "destroyed world object");
        self.peers.object_unregistered(name);
        Some(entity)
    }
}

/// In-flight claim on a name for one materialization attempt.
///
/// Dropped uncommitted, it deletes the entity the attempt created and
/// releases the name, including when the attempt's future is cancelled.
struct Claim {
    registry: Arc<RwLock<ObjectRegistry>>,
    engine: Arc<dyn Engine>,
    name: String,
    entity: Option<EntityHandle>,
    committed: bool,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(entity) = self.entity.take() {
            self.engine.delete_entity(entity);
            tracing::debug!(object = %self.name, %entity, "deleted entity of abandoned attempt");
        }
        if let Ok(mut registry) = self.registry.try_write() {
            registry.abort_materialize(&self.name);
            return;
        }
        // lock is busy: release from a task once it frees up
        let registry = self.registry.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { registry.write().await.abort_materialize(&name) });
            }
            Err(_) => tracing::warn!(object = %name, "no runtime to release in-flight claim"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PeerEvent, SimHost};
    use glam::Vec3;
    use worldspace_common::{ModelHash, NetworkId};
    use worldspace_kernel::LifecycleState;

    struct Fixture {
        sim: Arc<SimHost>,
        registry: Arc<RwLock<ObjectRegistry>>,
        lifecycle: Arc<LifecycleManager>,
    }

    fn fixture() -> Fixture {
        let sim = Arc::new(SimHost::new());
        let config = StreamConfig::default();
        let registry = Arc::new(RwLock::new(ObjectRegistry::new(config.cell_size)));
        let lifecycle = Arc::new(LifecycleManager::new(
            registry.clone(),
            &Host::from_shared(sim.clone()),
            &config,
        ));
        Fixture {
            sim,
            registry,
            lifecycle,
        }
    }

    async fn register(f: &Fixture, name: &str, coords: Vec3, networked: bool) {
        let object = WorldObject::new(name, ModelHash(77), coords, Vec3::new(0.0, 0.0, 45.0))
            .networked(networked);
        f.registry.write().await.register(object).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn materialize_records_and_announces() {
        let f = fixture();
        let observer = f.sim.add_observer(Vec3::new(20.0, 0.0, 0.0));
        register(&f, "lamp1", Vec3::ZERO, true).await;

        let m = f.lifecycle.materialize("lamp1").await.unwrap();

        let registry = f.registry.read().await;
        assert_eq!(registry.entity_for("lamp1"), Some(m.entity));
        assert_eq!(registry.network_id("lamp1"), Some(m.network_id));
        assert_eq!(f.sim.position_of(m.entity), Some(Vec3::ZERO));
        assert_eq!(
            f.sim.events(),
            vec![
                PeerEvent::TransformPushed {
                    observer,
                    network_id: m.network_id,
                    coords: Vec3::ZERO,
                    rotation: Vec3::new(0.0, 0.0, 45.0),
                },
                PeerEvent::Registered {
                    name: "lamp1".into(),
                    network_id: m.network_id,
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_observer_leaves_no_trace() {
        let f = fixture();
        f.sim.add_observer(Vec3::new(500.0, 0.0, 0.0));
        register(&f, "lamp1", Vec3::ZERO, true).await;

        let err = f.lifecycle.materialize("lamp1").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NoObserverInRange { .. }));
        assert!(err.is_deferred());
        assert_eq!(
            f.registry.read().await.lifecycle_state("lamp1"),
            LifecycleState::Unmaterialized
        );
        assert_eq!(f.sim.create_count(), 0);
        assert!(f.sim.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_releases_claim() {
        let f = fixture();
        f.sim.add_observer(Vec3::ZERO);
        f.sim.set_fail_creates(true);
        register(&f, "lamp1", Vec3::ZERO, true).await;

        let err = f.lifecycle.materialize("lamp1").await.unwrap_err();
        assert_eq!(err, LifecycleError::CreateFailed("lamp1".into()));
        assert_eq!(f.registry.read().await.in_flight_count(), 0);
        assert!(f.registry.read().await.entity_for("lamp1").is_none());

        f.sim.set_fail_creates(false);
        assert!(f.lifecycle.materialize("lamp1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_and_static_objects_are_refused() {
        let f = fixture();
        f.sim.add_observer(Vec3::ZERO);
        register(&f, "bench", Vec3::ZERO, false).await;

        assert_eq!(
            f.lifecycle.materialize("missing").await,
            Err(LifecycleError::Unknown("missing".into()))
        );
        assert_eq!(
            f.lifecycle.materialize("bench").await,
            Err(LifecycleError::NotNetworked("bench".into()))
        );
        assert_eq!(f.sim.create_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_attempts_create_once() {
        let f = fixture();
        f.sim.add_observer(Vec3::ZERO);
        register(&f, "lamp1", Vec3::ZERO, true).await;

        let first = {
            let lifecycle = f.lifecycle.clone();
            tokio::spawn(async move { lifecycle.materialize("lamp1").await })
        };
        // let the first attempt reach its settling delay
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            f.registry.read().await.lifecycle_state("lamp1"),
            LifecycleState::Settling
        );

        let second = f.lifecycle.materialize("lamp1").await;
        assert_eq!(second, Err(LifecycleError::InFlight("lamp1".into())));

        assert!(first.await.unwrap().is_ok());
        assert_eq!(f.sim.create_count(), 1);
        assert_eq!(f.sim.registered_events("lamp1"), 1);
        assert_eq!(
            f.lifecycle.materialize("lamp1").await,
            Err(LifecycleError::AlreadyMaterialized("lamp1".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_restoring_mid_attempt_wins() {
        let f = fixture();
        f.sim.add_observer(Vec3::ZERO);
        register(&f, "lamp1", Vec3::ZERO, true).await;
        let (remote, remote_net) = f.sim.spawn_remote(ModelHash(77), Vec3::ZERO);

        let attempt = {
            let lifecycle = f.lifecycle.clone();
            tokio::spawn(async move { lifecycle.materialize("lamp1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sim = f.sim.clone();
        f.registry
            .write()
            .await
            .seed_remote([("lamp1".to_owned(), remote_net)], |id| {
                sim.entity_from_network_id(id)
            })
            .unwrap();

        assert_eq!(
            attempt.await.unwrap(),
            Err(LifecycleError::AlreadyMaterialized("lamp1".into()))
        );
        let registry = f.registry.read().await;
        assert_eq!(registry.entity_for("lamp1"), Some(remote));
        assert_eq!(registry.network_id("lamp1"), Some(remote_net));
        assert_eq!(registry.in_flight_count(), 0);
        assert_eq!(f.sim.create_count(), 1);
        assert_eq!(f.sim.live_objects(), 1);
        assert_eq!(f.sim.registered_events("lamp1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_attempt_releases_claim() {
        let f = fixture();
        f.sim.add_observer(Vec3::ZERO);
        register(&f, "lamp1", Vec3::ZERO, true).await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), f.lifecycle.materialize("lamp1")).await;
        assert!(cancelled.is_err());
        assert_eq!(
            f.registry.read().await.lifecycle_state("lamp1"),
            LifecycleState::Unmaterialized
        );
        assert_eq!(f.sim.live_objects(), 0);
        assert!(f.sim.events().is_empty());

        let m = f.lifecycle.materialize("lamp1").await.unwrap();
        assert_eq!(f.registry.read().await.entity_for("lamp1"), Some(m.entity));
        assert_eq!(f.sim.live_objects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dematerialize_clears_once() {
        let f = fixture();
        f.sim.add_observer(Vec3::ZERO);
        register(&f, "lamp1", Vec3::ZERO, true).await;
        let m = f.lifecycle.materialize("lamp1").await.unwrap();

        assert_eq!(f.lifecycle.dematerialize("lamp1").await, Some(m.entity));
        assert!(!f.sim.entity_exists(m.entity));
        {
            let registry = f.registry.read().await;
            assert!(registry.entity_for("lamp1").is_none());
            assert!(registry.network_id("lamp1").is_none());
        }

        assert_eq!(f.lifecycle.dematerialize("lamp1").await, None);
        assert_eq!(f.sim.unregistered_events("lamp1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dematerialize_restored_object() {
        let f = fixture();
        let (entity, network_id) = f.sim.spawn_remote(ModelHash(77), Vec3::ZERO);
        let sim = f.sim.clone();
        f.registry
            .write()
            .await
            .seed_remote([("lamp1".to_owned(), network_id)], |id| {
                sim.entity_from_network_id(id)
            })
            .unwrap();

        assert_eq!(f.lifecycle.dematerialize("lamp1").await, Some(entity));
        assert_eq!(f.sim.live_objects(), 0);
        assert_ne!(network_id, NetworkId(0));
    }
}
