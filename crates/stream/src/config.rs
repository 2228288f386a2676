use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from validating a [`StreamConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("cell_size must be positive, got {0}")]
    CellSize(f32),
    #[error("spawn_radius_cells must be positive, got {0}")]
    SpawnRadius(f32),
    #[error("tick_interval_ms must be non-zero")]
    TickInterval,
}

/// Streaming configuration: grid resolution, spawn radius and loop cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Side length of a grid cell in world units.
    pub cell_size: f32,
    /// Spawn radius around an object, in cells. An observer must be strictly
    /// closer than `cell_size * spawn_radius_cells` to trigger materialization.
    pub spawn_radius_cells: f32,
    /// Period of the reconciliation scan.
    pub tick_interval_ms: u64,
    /// Wait after creation before reading the network id back from the engine.
    pub settle_delay_ms: u64,
    /// Wait between attempts to fetch the remote snapshot.
    pub seed_retry_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cell_size: worldspace_kernel::DEFAULT_CELL_SIZE,
            spawn_radius_cells: 2.0,
            tick_interval_ms: 10_000,
            settle_delay_ms: 1_000,
            seed_retry_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size > 0.0) {
            return Err(ConfigError::CellSize(self.cell_size));
        }
        if !(self.spawn_radius_cells > 0.0) {
            return Err(ConfigError::SpawnRadius(self.spawn_radius_cells));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::TickInterval);
        }
        Ok(())
    }

    /// Maximum observer distance for materialization, in world units.
    pub fn spawn_radius(&self) -> f32 {
        self.cell_size * self.spawn_radius_cells
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn seed_retry(&self) -> Duration {
        Duration::from_millis(self.seed_retry_ms)
    }
}
