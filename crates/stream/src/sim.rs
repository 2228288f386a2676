//! In-memory host used by tests and the CLI simulation.
//!
//! Observers occupy index slots the way engine player indices do: a
//! disconnected observer leaves an empty slot, which reads as the `0` id.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use glam::Vec3;
use parking_lot::Mutex;
use worldspace_common::{EntityHandle, ModelHash, NetworkId, ObserverId};

use crate::host::{Authority, Engine, HostError, ObserverSource, PeerChannel, SpawnFlags};

/// A notification observed on the peer channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Registered {
        name: String,
        network_id: NetworkId,
    },
    Unregistered {
        name: String,
    },
    TransformPushed {
        observer: ObserverId,
        network_id: NetworkId,
        coords: Vec3,
        rotation: Vec3,
    },
}

#[derive(Debug, Clone)]
struct SimEntity {
    /// `None` for observer avatars.
    model: Option<ModelHash>,
    position: Vec3,
    network_id: NetworkId,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u32,
    next_network_id: u32,
    next_observer: u32,
    entities: HashMap<EntityHandle, SimEntity>,
    slots: Vec<Option<ObserverId>>,
    avatars: HashMap<ObserverId, EntityHandle>,
    remote: HashMap<String, NetworkId>,
    /// Avatars whose observer disconnects during its next position query.
    vanish_on_query: HashSet<EntityHandle>,
    pending_authority_failures: u32,
    fail_creates: bool,
    creates: usize,
    events: Vec<PeerEvent>,
}

impl SimState {
    fn spawn(&mut self, model: Option<ModelHash>, position: Vec3) -> (EntityHandle, NetworkId) {
        self.next_handle += 1;
        self.next_network_id += 1;
        // next_handle starts at 1, never the zero sentinel
        let handle = EntityHandle::from_raw(self.next_handle).unwrap_or_else(|| unreachable!());
        let network_id = NetworkId(self.next_network_id);
        self.entities.insert(
            handle,
            SimEntity {
                model,
                position,
                network_id,
            },
        );
        (handle, network_id)
    }

    fn disconnect(&mut self, observer: ObserverId) {
        for slot in &mut self.slots {
            if *slot == Some(observer) {
                *slot = None;
            }
        }
        if let Some(avatar) = self.avatars.remove(&observer) {
            self.entities.remove(&avatar);
        }
    }
}

/// A single-process stand-in for the engine, roster, authority and transport.
#[derive(Debug, Default)]
pub struct SimHost {
    state: Mutex<SimState>,
}

impl SimHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new observer standing at `position`.
    pub fn add_observer(&self, position: Vec3) -> ObserverId {
        let mut state = self.state.lock();
        state.next_observer += 1;
        let observer =
            ObserverId::from_raw(state.next_observer).unwrap_or_else(|| unreachable!());
        let (avatar, _) = state.spawn(None, position);
        state.avatars.insert(observer, avatar);
        state.slots.push(Some(observer));
        observer
    }

    /// Returns false if the observer has no avatar.
    pub fn move_observer(&self, observer: ObserverId, position: Vec3) -> bool {
        let mut state = self.state.lock();
        let Some(avatar) = state.avatars.get(&observer).copied() else {
            return false;
        };
        match state.entities.get_mut(&avatar) {
            Some(entity) => {
                entity.position = position;
                true
            }
            None => false,
        }
    }

    /// Disconnect an observer, leaving its index slot empty.
    pub fn remove_observer(&self, observer: ObserverId) {
        self.state.lock().disconnect(observer);
    }

    /// Disconnect `observer` while its next position query is suspended.
    pub fn disconnect_during_query(&self, observer: ObserverId) {
        let mut state = self.state.lock();
        if let Some(avatar) = state.avatars.get(&observer).copied() {
            state.vanish_on_query.insert(avatar);
        }
    }

    /// Delete an observer's avatar while it stays connected.
    pub fn drop_observer_entity(&self, observer: ObserverId) {
        let mut state = self.state.lock();
        if let Some(avatar) = state.avatars.get(&observer).copied() {
            state.entities.remove(&avatar);
        }
    }

    /// Create an entity that already exists before startup, as after a restart.
    pub fn spawn_remote(&self, model: ModelHash, position: Vec3) -> (EntityHandle, NetworkId) {
        self.state.lock().spawn(Some(model), position)
    }

    /// Like [`SimHost::spawn_remote`], with a caller-chosen network id.
    pub fn spawn_remote_as(
        &self,
        model: ModelHash,
        position: Vec3,
        network_id: NetworkId,
    ) -> EntityHandle {
        let mut state = self.state.lock();
        let (handle, _) = state.spawn(Some(model), position);
        if let Some(entity) = state.entities.get_mut(&handle) {
            entity.network_id = network_id;
        }
        state.next_network_id = state.next_network_id.max(network_id.0);
        handle
    }

    /// Add an entry to the authority's snapshot.
    pub fn insert_remote(&self, name: impl Into<String>, network_id: NetworkId) {
        self.state.lock().remote.insert(name.into(), network_id);
    }

    /// Make the next `times` snapshot fetches fail.
    pub fn fail_authority(&self, times: u32) {
        self.state.lock().pending_authority_failures = times;
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.state.lock().fail_creates = fail;
    }

    /// Number of successful `create_object` calls.
    pub fn create_count(&self) -> usize {
        self.state.lock().creates
    }

    pub fn entity_exists(&self, entity: EntityHandle) -> bool {
        self.state.lock().entities.contains_key(&entity)
    }

    pub fn position_of(&self, entity: EntityHandle) -> Option<Vec3> {
        self.state.lock().entities.get(&entity).map(|e| e.position)
    }

    /// Live object entities, excluding observer avatars.
    pub fn live_objects(&self) -> usize {
        self.state
            .lock()
            .entities
            .values()
            .filter(|e| e.model.is_some())
            .count()
    }

    pub fn events(&self) -> Vec<PeerEvent> {
        self.state.lock().events.clone()
    }

    pub fn registered_events(&self, name: &str) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, PeerEvent::Registered { name: n, .. } if n == name))
            .count()
    }

    pub fn unregistered_events(&self, name: &str) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, PeerEvent::Unregistered { name: n } if n == name))
            .count()
    }
}

impl Engine for SimHost {
    fn create_object(
        &self,
        model: ModelHash,
        position: Vec3,
        _flags: SpawnFlags,
    ) -> Option<EntityHandle> {
        let mut state = self.state.lock();
        if state.fail_creates {
            return None;
        }
        state.creates += 1;
        Some(state.spawn(Some(model), position).0)
    }

    fn delete_entity(&self, entity: EntityHandle) {
        self.state.lock().entities.remove(&entity);
    }

    fn entity_from_network_id(&self, network_id: NetworkId) -> Option<EntityHandle> {
        self.state
            .lock()
            .entities
            .iter()
            .find(|(_, e)| e.network_id == network_id)
            .map(|(handle, _)| *handle)
    }

    fn network_id_from_entity(&self, entity: EntityHandle) -> NetworkId {
        self.state
            .lock()
            .entities
            .get(&entity)
            .map_or(NetworkId(0), |e| e.network_id)
    }

    /// The first connected observer owns every object.
    fn entity_owner(&self, entity: EntityHandle) -> Option<ObserverId> {
        let state = self.state.lock();
        if !state.entities.contains_key(&entity) {
            return None;
        }
        state.slots.iter().flatten().next().copied()
    }
}

#[async_trait]
impl ObserverSource for SimHost {
    fn observer_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    fn observer_at(&self, index: usize) -> Option<ObserverId> {
        self.state.lock().slots.get(index).copied().flatten()
    }

    fn observer_entity(&self, observer: ObserverId) -> Option<EntityHandle> {
        self.state.lock().avatars.get(&observer).copied()
    }

    async fn entity_position(&self, entity: EntityHandle) -> Option<Vec3> {
        {
            let mut state = self.state.lock();
            if state.vanish_on_query.remove(&entity) {
                let owner = state
                    .avatars
                    .iter()
                    .find(|(_, avatar)| **avatar == entity)
                    .map(|(observer, _)| *observer);
                if let Some(observer) = owner {
                    state.disconnect(observer);
                }
            }
        }
        tokio::task::yield_now().await;
        self.position_of(entity)
    }
}

#[async_trait]
impl Authority for SimHost {
    async fn registered_objects(&self) -> Result<HashMap<String, NetworkId>, HostError> {
        let mut state = self.state.lock();
        if state.pending_authority_failures > 0 {
            state.pending_authority_failures -= 1;
            return Err(HostError::Unavailable("authority not connected".into()));
        }
        Ok(state.remote.clone())
    }
}

impl PeerChannel for SimHost {
    fn push_transform(
        &self,
        observer: ObserverId,
        network_id: NetworkId,
        coords: Vec3,
        rotation: Vec3,
    ) {
        self.state.lock().events.push(PeerEvent::TransformPushed {
            observer,
            network_id,
            coords,
            rotation,
        });
    }

    fn object_registered(&self, name: &str, network_id: NetworkId) {
        self.state.lock().events.push(PeerEvent::Registered {
            name: name.to_owned(),
            network_id,
        });
    }

    fn object_unregistered(&self, name: &str) {
        self.state.lock().events.push(PeerEvent::Unregistered {
            name: name.to_owned(),
        });
    }
}
