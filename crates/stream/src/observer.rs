use std::sync::Arc;

use glam::Vec3;
use worldspace_common::ObserverId;

use crate::host::ObserverSource;

/// Finds the observer closest to a point.
#[derive(Clone)]
pub struct ObserverLocator {
    observers: Arc<dyn ObserverSource>,
}

impl ObserverLocator {
    pub fn new(observers: Arc<dyn ObserverSource>) -> Self {
        Self { observers }
    }

    /// Nearest observer strictly closer than `max_distance` to `point`.
    ///
    /// Observers with an invalid id, no entity, or no resolvable position are
    /// skipped; this covers observers that disconnect while the scan awaits.
    /// On equal distances the first observer enumerated wins.
    pub async fn nearest(&self, point: Vec3, max_distance: f32) -> Option<ObserverId> {
        if !(max_distance > 0.0) {
            return None;
        }

        let mut closest: Option<(ObserverId, f32)> = None;
        for index in 0..self.observers.observer_count() {
            let Some(observer) = self.observers.observer_at(index) else {
                continue;
            };
            let Some(entity) = self.observers.observer_entity(observer) else {
                continue;
            };
            let Some(position) = self.observers.entity_position(entity).await else {
                tracing::trace!(%observer, "observer position unavailable, skipping");
                continue;
            };

            let distance = position.distance(point);
            if distance >= max_distance {
                continue;
            }
            if closest.is_none_or(|(_, best)| distance < best) {
                closest = Some((observer, distance));
            }
        }

        closest.map(|(observer, _)| observer)
    }
}
