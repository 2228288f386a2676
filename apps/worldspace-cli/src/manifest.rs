//! YAML world manifest consumed by the `simulate` command.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use worldspace_common::{NetworkId, Vec3, WorldObject};
use worldspace_stream::StreamConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub config: StreamConfig,
    pub objects: Vec<WorldObject>,
    /// Observer positions, connected in order.
    pub observers: Vec<Vec3>,
    /// Snapshot served by the simulated authority: name -> network id.
    pub remote: BTreeMap<String, NetworkId>,
}

impl Manifest {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing manifest {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let manifest: Self = serde_yaml::from_str(text)?;
        manifest.config.validate()?;
        Ok(manifest)
    }
}
