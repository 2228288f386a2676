//! Shared types for the worldspace object streaming crates.
//!
//! Engine handles and observer ids carry the engine's `0` sentinel as `None`
//! at the boundary, so nothing past `from_raw` ever sees a zero handle.

mod types;

pub use glam::Vec3;
pub use types::{EntityHandle, ModelHash, NetworkId, ObserverId, WorldObject};
