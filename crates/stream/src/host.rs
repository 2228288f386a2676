//! Collaborators supplied by the hosting engine and transport.
//!
//! Engine primitives are synchronous and may fail by returning `None`.
//! Position queries and the remote snapshot fetch may suspend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use glam::Vec3;
use worldspace_common::{EntityHandle, ModelHash, NetworkId, ObserverId};

/// Errors reported by host collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("host unavailable: {0}")]
    Unavailable(String),
    #[error("host rejected request: {0}")]
    Rejected(String),
}

/// Flags passed to the engine when creating an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnFlags {
    pub dynamic: bool,
    pub networked: bool,
    pub persistent: bool,
}

impl SpawnFlags {
    /// Dynamic, networked, not persistent.
    pub const WORLD_OBJECT: Self = Self {
        dynamic: true,
        networked: true,
        persistent: false,
    };
}

/// Entity primitives of the game engine.
pub trait Engine: Send + Sync {
    fn create_object(
        &self,
        model: ModelHash,
        position: Vec3,
        flags: SpawnFlags,
    ) -> Option<EntityHandle>;

    fn delete_entity(&self, entity: EntityHandle);

    fn entity_from_network_id(&self, network_id: NetworkId) -> Option<EntityHandle>;

    fn network_id_from_entity(&self, entity: EntityHandle) -> NetworkId;

    /// Peer currently simulating the entity, if any.
    fn entity_owner(&self, entity: EntityHandle) -> Option<ObserverId>;
}

/// Roster and position queries for connected observers.
#[async_trait]
pub trait ObserverSource: Send + Sync {
    /// Number of observer slots, enumerated as indices `0..count`.
    fn observer_count(&self) -> usize;

    fn observer_at(&self, index: usize) -> Option<ObserverId>;

    fn observer_entity(&self, observer: ObserverId) -> Option<EntityHandle>;

    /// `None` when the entity is gone, e.g. its observer disconnected mid-query.
    async fn entity_position(&self, entity: EntityHandle) -> Option<Vec3>;
}

/// External authority holding the objects that are already live remotely.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn registered_objects(&self) -> Result<HashMap<String, NetworkId>, HostError>;
}

/// Outbound, unacknowledged notifications to peers.
pub trait PeerChannel: Send + Sync {
    /// Push an object's exact transform to the peer that owns its entity.
    fn push_transform(
        &self,
        observer: ObserverId,
        network_id: NetworkId,
        coords: Vec3,
        rotation: Vec3,
    );

    fn object_registered(&self, name: &str, network_id: NetworkId);

    fn object_unregistered(&self, name: &str);
}

/// The full set of host collaborators.
#[derive(Clone)]
pub struct Host {
    pub engine: Arc<dyn Engine>,
    pub observers: Arc<dyn ObserverSource>,
    pub authority: Arc<dyn Authority>,
    pub peers: Arc<dyn PeerChannel>,
}

impl Host {
    /// Build a host from one value implementing every collaborator.
    pub fn from_shared<T>(host: Arc<T>) -> Self
    where
        T: Engine + ObserverSource + Authority + PeerChannel + 'static,
    {
        Self {
            engine: host.clone(),
            observers: host.clone(),
            authority: host.clone(),
            peers: host,
        }
    }
}
