//! World Kernel: authoritative object definitions, spatial grid, lifecycle state.
//!
//! # Invariants
//! - A registered name lives in exactly one grid cell, computed once from its coordinates.
//! - An object has an entity handle if and only if it has a network id.
//! - At most one materialization attempt per name is in flight.
//! - All state mutations flow through explicit operations.

pub mod grid;
pub mod registry;

pub use grid::{cell_key, CellCoord, SpatialGrid};
pub use registry::{
    CandidateScan, LifecycleState, MaterializePhase, Materialization, ObjectRegistry,
    RegistryError, RegistrySummary, SeedReport,
};

/// Default grid cell size in world units.
pub const DEFAULT_CELL_SIZE: f32 = 50.0;

pub fn crate_info() -> &'static str {
    "worldspace-kernel v0.1.0"
}
