use std::collections::{BTreeMap, HashMap};
use std::fmt;

use worldspace_common::{EntityHandle, NetworkId, WorldObject};

use crate::grid::{CellCoord, SpatialGrid};

/// Errors from registry mutations. None of these are fatal to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("object already registered: {0:?}")]
    Duplicate(String),
    #[error("object already materialized: {0:?}")]
    AlreadyMaterialized(String),
    #[error("materialization already in flight: {0:?}")]
    InFlight(String),
    #[error("remote snapshot was already applied")]
    AlreadySeeded,
}

/// The live entity backing a materialized object.
///
/// Entity handle and network id are stored together, so one is never
/// present without the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materialization {
    pub entity: EntityHandle,
    pub network_id: NetworkId,
}

/// In-flight steps of a single materialization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializePhase {
    AwaitingObserver,
    Creating,
    Settling,
}

/// Where an object currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unmaterialized,
    AwaitingObserver,
    Creating,
    Settling,
    Materialized(Materialization),
}

impl From<MaterializePhase> for LifecycleState {
    fn from(phase: MaterializePhase) -> Self {
        match phase {
            MaterializePhase::AwaitingObserver => Self::AwaitingObserver,
            MaterializePhase::Creating => Self::Creating,
            MaterializePhase::Settling => Self::Settling,
        }
    }
}

/// Result of applying the remote snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Names whose entity still exists and were marked materialized.
    pub restored: Vec<String>,
    /// Names whose network id no longer resolves to a live entity.
    pub dropped: Vec<String>,
}

/// Output of one reconciliation scan over the grid.
#[derive(Debug, Clone, Default)]
pub struct CandidateScan {
    /// Names visited across all cells.
    pub scanned: usize,
    /// Names eligible for a materialization request.
    pub candidates: Vec<String>,
    /// Names skipped because an attempt is already running.
    pub skipped_in_flight: usize,
}

/// Authoritative store of object definitions and their lifecycle state.
///
/// Definitions are first-write-wins and never mutated. The grid is owned here
/// so that a registered name is always bucketed in exactly one cell.
#[derive(Debug, Clone)]
pub struct ObjectRegistry {
    grid: SpatialGrid,
    objects: BTreeMap<String, WorldObject>,
    materialized: BTreeMap<String, Materialization>,
    in_flight: HashMap<String, MaterializePhase>,
    seeded: bool,
}

impl ObjectRegistry {
    pub fn new(cell_size: f32) -> Self {
        Self {
            grid: SpatialGrid::new(cell_size),
            objects: BTreeMap::new(),
            materialized: BTreeMap::new(),
            in_flight: HashMap::new(),
            seeded: false,
        }
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Register an object definition. The first registration of a name wins.
    pub fn register(&mut self, object: WorldObject) -> Result<CellCoord, RegistryError> {
        if self.objects.contains_key(&object.name) {
            tracing::warn!(object = %object.name, "tried to register object already registered");
            return Err(RegistryError::Duplicate(object.name));
        }

        let cell = self.grid.insert(&object.name, object.coords);
        tracing::info!(object = %object.name, cell_x = cell.x, cell_y = cell.y, "registering world object");
        self.objects.insert(object.name.clone(), object);
        Ok(cell)
    }

    pub fn get(&self, name: &str) -> Option<&WorldObject> {
        self.objects.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.objects.keys().map(String::as_str)
    }

    /// Apply the one-shot remote snapshot of already-live objects.
    ///
    /// `resolve` maps a network id to the live local entity, if any. Entries
    /// that do not resolve are dropped and left for reconciliation. The seeded
    /// latch is set even when the snapshot is empty.
    pub fn seed_remote<I, F>(&mut self, snapshot: I, resolve: F) -> Result<SeedReport, RegistryError>
    where
        I: IntoIterator<Item = (String, NetworkId)>,
        F: Fn(NetworkId) -> Option<EntityHandle>,
    {
        if self.seeded {
            return Err(RegistryError::AlreadySeeded);
        }

        let mut report = SeedReport::default();
        for (name, network_id) in snapshot {
            match resolve(network_id) {
                Some(entity) => {
                    tracing::info!(object = %name, %network_id, %entity, "restored networked world object");
                    self.materialized
                        .insert(name.clone(), Materialization { entity, network_id });
                    report.restored.push(name);
                }
                None => {
                    tracing::debug!(object = %name, %network_id, "remote world object no longer exists");
                    report.dropped.push(name);
                }
            }
        }

        self.seeded = true;
        Ok(report)
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn materialization(&self, name: &str) -> Option<Materialization> {
        self.materialized.get(name).copied()
    }

    /// Local entity handle of a materialized object.
    pub fn entity_for(&self, name: &str) -> Option<EntityHandle> {
        self.materialized.get(name).map(|m| m.entity)
    }

    pub fn network_id(&self, name: &str) -> Option<NetworkId> {
        self.materialized.get(name).map(|m| m.network_id)
    }

    pub fn is_materialized(&self, name: &str) -> bool {
        self.materialized.contains_key(name)
    }

    pub fn materialized_count(&self) -> usize {
        self.materialized.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn lifecycle_state(&self, name: &str) -> LifecycleState {
        if let Some(m) = self.materialized.get(name) {
            return LifecycleState::Materialized(*m);
        }
        self.in_flight
            .get(name)
            .map_or(LifecycleState::Unmaterialized, |phase| (*phase).into())
    }

    /// Claim `name` for a materialization attempt.
    ///
    /// Only one attempt per name may be in flight at a time.
    pub fn begin_materialize(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.materialized.contains_key(name) {
            return Err(RegistryError::AlreadyMaterialized(name.to_owned()));
        }
        if self.in_flight.contains_key(name) {
            return Err(RegistryError::InFlight(name.to_owned()));
        }
        self.in_flight
            .insert(name.to_owned(), MaterializePhase::AwaitingObserver);
        Ok(())
    }

    /// Move an in-flight attempt to its next phase. Ignored if nothing is in flight.
    pub fn advance(&mut self, name: &str, phase: MaterializePhase) {
        if let Some(current) = self.in_flight.get_mut(name) {
            *current = phase;
        }
    }

    /// Commit a successful attempt and release the in-flight claim.
    ///
    /// Fails if `name` became materialized while the attempt ran, e.g. when
    /// the remote snapshot restored it. The recorded entity is kept and the
    /// caller owns the entity it created.
    pub fn finish_materialize(
        &mut self,
        name: &str,
        materialization: Materialization,
    ) -> Result<(), RegistryError> {
        self.in_flight.remove(name);
        if self.materialized.contains_key(name) {
            return Err(RegistryError::AlreadyMaterialized(name.to_owned()));
        }
        self.materialized.insert(name.to_owned(), materialization);
        Ok(())
    }

    /// Release the in-flight claim without recording anything.
    pub fn abort_materialize(&mut self, name: &str) {
        self.in_flight.remove(name);
    }

    /// Forget the live entity of `name`, returning what was recorded.
    pub fn clear_materialized(&mut self, name: &str) -> Option<Materialization> {
        self.materialized.remove(name)
    }

    /// Full grid pass collecting networked, unmaterialized, idle names.
    pub fn materialization_candidates(&self) -> CandidateScan {
        let mut scan = CandidateScan::default();
        for (_, names) in self.grid.iter() {
            for name in names {
                scan.scanned += 1;
                if self.materialized.contains_key(name) {
                    continue;
                }
                if !self.objects.get(name).is_some_and(|o| o.networked) {
                    continue;
                }
                if self.in_flight.contains_key(name) {
                    scan.skipped_in_flight += 1;
                    continue;
                }
                scan.candidates.push(name.clone());
            }
        }
        scan
    }

    pub fn summary(&self) -> RegistrySummary {
        RegistrySummary {
            registered: self.objects.len(),
            networked: self.objects.values().filter(|o| o.networked).count(),
            materialized: self.materialized.len(),
            in_flight: self.in_flight.len(),
            cells: self.grid.cell_count(),
            seeded: self.seeded,
        }
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CELL_SIZE)
    }
}

/// Point-in-time counts for inspection and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RegistrySummary {
    pub registered: usize,
    pub networked: usize,
    pub materialized: usize,
    pub in_flight: usize,
    pub cells: usize,
    pub seeded: bool,
}

impl fmt::Display for RegistrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry: objects={} networked={} materialized={} in_flight={} cells={} seeded={}",
            self.registered,
            self.networked,
            self.materialized,
            self.in_flight,
            self.cells,
            self.seeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldspace_common::{ModelHash, Vec3};

    fn object(name: &str, x: f32, y: f32) -> WorldObject {
        WorldObject::new(name, ModelHash(1), Vec3::new(x, y, 0.0), Vec3::ZERO)
    }

    fn handle(raw: u32) -> EntityHandle {
        EntityHandle::from_raw(raw).unwrap()
    }

    #[test]
    fn registry_starts_empty() {
        let r = ObjectRegistry::default();
        assert!(r.is_empty());
        assert!(!r.is_seeded());
        assert_eq!(r.grid().cell_size(), 50.0);
    }

    #[test]
    fn register_buckets_into_grid() {
        let mut r = ObjectRegistry::new(50.0);
        let cell = r.register(object("lamp1", 124.0, 76.0)).unwrap();
        assert_eq!(cell, CellCoord::new(2, 2));
        assert!(r.grid().names_in_cell(cell).unwrap().contains("lamp1"));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let mut r = ObjectRegistry::new(50.0);
        r.register(object("lamp1", 0.0, 0.0)).unwrap();
        let err = r.register(object("lamp1", 900.0, 900.0)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("lamp1".into()));
        assert_eq!(r.get("lamp1").unwrap().coords, Vec3::ZERO);
        assert_eq!(r.grid().total_placements(), 1);
    }

    #[test]
    fn seed_restores_live_and_drops_stale() {
        let mut r = ObjectRegistry::new(50.0);
        let snapshot = vec![("lamp1".to_owned(), NetworkId(42)), ("gone".to_owned(), NetworkId(7))];
        let report = r
            .seed_remote(snapshot, |id| (id == NetworkId(42)).then(|| handle(1000)))
            .unwrap();

        assert_eq!(report.restored, ["lamp1"]);
        assert_eq!(report.dropped, ["gone"]);
        assert_eq!(r.entity_for("lamp1"), Some(handle(1000)));
        assert_eq!(r.network_id("lamp1"), Some(NetworkId(42)));
        assert!(r.entity_for("gone").is_none());
        assert!(r.network_id("gone").is_none());
        assert!(r.is_seeded());
    }

    #[test]
    fn empty_seed_still_latches() {
        let mut r = ObjectRegistry::new(50.0);
        r.seed_remote(Vec::new(), |_| None).unwrap();
        assert!(r.is_seeded());
        assert_eq!(
            r.seed_remote(Vec::new(), |_| None),
            Err(RegistryError::AlreadySeeded)
        );
    }

    #[test]
    fn lifecycle_walks_through_phases() {
        let mut r = ObjectRegistry::new(50.0);
        r.register(object("crate", 0.0, 0.0)).unwrap();
        assert_eq!(r.lifecycle_state("crate"), LifecycleState::Unmaterialized);

        r.begin_materialize("crate").unwrap();
        assert_eq!(r.lifecycle_state("crate"), LifecycleState::AwaitingObserver);
        assert_eq!(
            r.begin_materialize("crate"),
            Err(RegistryError::InFlight("crate".into()))
        );

        r.advance("crate", MaterializePhase::Creating);
        assert_eq!(r.lifecycle_state("crate"), LifecycleState::Creating);
        r.advance("crate", MaterializePhase::Settling);
        assert_eq!(r.lifecycle_state("crate"), LifecycleState::Settling);

        let m = Materialization {
            entity: handle(5),
            network_id: NetworkId(9),
        };
        r.finish_materialize("crate", m).unwrap();
        assert_eq!(r.lifecycle_state("crate"), LifecycleState::Materialized(m));
        assert_eq!(r.in_flight_count(), 0);
        assert_eq!(
            r.begin_materialize("crate"),
            Err(RegistryError::AlreadyMaterialized("crate".into()))
        );

        assert_eq!(r.clear_materialized("crate"), Some(m));
        assert_eq!(r.clear_materialized("crate"), None);
        assert_eq!(r.lifecycle_state("crate"), LifecycleState::Unmaterialized);
    }

    #[test]
    fn finish_keeps_entity_restored_mid_attempt() {
        let mut r = ObjectRegistry::new(50.0);
        r.register(object("lamp1", 0.0, 0.0)).unwrap();
        r.begin_materialize("lamp1").unwrap();
        r.advance("lamp1", MaterializePhase::Settling);

        r.seed_remote([("lamp1".to_owned(), NetworkId(42))], |_| Some(handle(2)))
            .unwrap();
        let fresh = Materialization {
            entity: handle(3),
            network_id: NetworkId(43),
        };
        assert_eq!(
            r.finish_materialize("lamp1", fresh),
            Err(RegistryError::AlreadyMaterialized("lamp1".into()))
        );
        assert_eq!(r.entity_for("lamp1"), Some(handle(2)));
        assert_eq!(r.network_id("lamp1"), Some(NetworkId(42)));
        assert_eq!(r.in_flight_count(), 0);
    }

    #[test]
    fn abort_releases_claim() {
        let mut r = ObjectRegistry::new(50.0);
        r.register(object("crate", 0.0, 0.0)).unwrap();
        r.begin_materialize("crate").unwrap();
        r.abort_materialize("crate");
        assert_eq!(r.lifecycle_state("crate"), LifecycleState::Unmaterialized);
        assert!(r.begin_materialize("crate").is_ok());
    }

    #[test]
    fn candidates_skip_static_materialized_and_in_flight() {
        let mut r = ObjectRegistry::new(50.0);
        r.register(object("a", 0.0, 0.0)).unwrap();
        r.register(object("b", 10.0, 0.0)).unwrap();
        r.register(object("static", 200.0, 0.0).networked(false)).unwrap();
        r.register(object("busy", 400.0, 0.0)).unwrap();
        r.finish_materialize(
            "b",
            Materialization {
                entity: handle(1),
                network_id: NetworkId(1),
            },
        )
        .unwrap();
        r.begin_materialize("busy").unwrap();

        let scan = r.materialization_candidates();
        assert_eq!(scan.scanned, 4);
        assert_eq!(scan.candidates, ["a"]);
        assert_eq!(scan.skipped_in_flight, 1);
    }

    #[test]
    fn summary_counts() {
        let mut r = ObjectRegistry::new(50.0);
        r.register(object("a", 0.0, 0.0)).unwrap();
        r.register(object("b", 300.0, 0.0).networked(false)).unwrap();
        let s = r.summary();
        assert_eq!(s.registered, 2);
        assert_eq!(s.networked, 1);
        assert_eq!(s.cells, 2);
        assert!(s.to_string().contains("objects=2"));
    }
}
