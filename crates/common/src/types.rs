use std::fmt;
use std::num::NonZeroU32;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Process-local handle of a live engine entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(NonZeroU32);

impl EntityHandle {
    /// Wrap a raw engine handle. The engine reports failure as `0`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Server-assigned id of a connected observer (player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(NonZeroU32);

impl ObserverId {
    /// Wrap a raw observer id. `0` is the engine's "no such observer".
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Cross-peer network identifier of a materialized entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u32);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net#{}", self.0)
    }
}

/// Opaque model identifier handed to the engine on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelHash(pub u32);

/// A static, world-placed object definition.
///
/// Immutable once registered: the grid cell is computed from `coords` at
/// registration time and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    pub name: String,
    pub model: ModelHash,
    pub coords: Vec3,
    pub rotation: Vec3,
    /// Whether the object ever takes part in materialization.
    #[serde(default = "default_networked")]
    pub networked: bool,
}

fn default_networked() -> bool {
    true
}

impl WorldObject {
    pub fn new(name: impl Into<String>, model: ModelHash, coords: Vec3, rotation: Vec3) -> Self {
        Self {
            name: name.into(),
            model,
            coords,
            rotation,
            networked: true,
        }
    }

    /// Builder-style toggle for the `networked` flag.
    pub fn networked(mut self, networked: bool) -> Self {
        self.networked = networked;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_handle_is_none() {
        assert!(EntityHandle::from_raw(0).is_none());
        assert_eq!(EntityHandle::from_raw(7).map(EntityHandle::raw), Some(7));
    }

    #[test]
    fn zero_observer_is_none() {
        assert!(ObserverId::from_raw(0).is_none());
        assert_eq!(ObserverId::from_raw(3).unwrap().to_string(), "observer#3");
    }

    #[test]
    fn world_object_defaults_to_networked() {
        let obj = WorldObject::new("lamp1", ModelHash(1), Vec3::ZERO, Vec3::ZERO);
        assert!(obj.networked);
        assert!(!obj.networked(false).networked);
    }

    #[test]
    fn networked_flag_defaults_when_missing() {
        let yaml = "name: crate\nmodel: 9\ncoords: [1.0, 2.0, 3.0]\nrotation: [0.0, 0.0, 90.0]\n";
        let obj: WorldObject = serde_yaml::from_str(yaml).unwrap();
        assert!(obj.networked);
        assert_eq!(obj.coords, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(obj.model, ModelHash(9));
    }
}
