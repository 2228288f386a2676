//! Streaming: proximity-driven materialization of registered world objects.
//!
//! # Invariants
//! - Nothing is materialized before the remote snapshot has been applied.
//! - Only networked objects with an observer in range are materialized.
//! - Registry locks are never held across host calls that suspend.
//!
//! A [`WorldController`] owns the registry, answers lookups, and runs the
//! [`ReconciliationLoop`] on a fixed period. The host engine, observer roster,
//! remote authority and peer transport are supplied through the traits in
//! [`host`].

mod config;
mod controller;
pub mod host;
mod lifecycle;
mod observer;
mod reconcile;
pub mod sim;

pub use config::{ConfigError, StreamConfig};
pub use controller::{SeedError, WorldController};
pub use host::{Authority, Engine, Host, HostError, ObserverSource, PeerChannel, SpawnFlags};
pub use lifecycle::{LifecycleError, LifecycleManager};
pub use observer::ObserverLocator;
pub use reconcile::{ReconciliationLoop, TickOutcome, TickStats};

pub fn crate_info() -> &'static str {
    "worldspace-stream v0.1.0"
}
