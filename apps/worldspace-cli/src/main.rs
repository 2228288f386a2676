mod manifest;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use worldspace_common::Vec3;
use worldspace_kernel::{cell_key, LifecycleState, RegistrySummary};
use worldspace_stream::sim::SimHost;
use worldspace_stream::{Host, StreamConfig, TickStats, WorldController};

use crate::manifest::Manifest;

#[derive(Parser)]
#[command(name = "worldspace-cli", about = "CLI tool for worldspace object streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the grid cell a coordinate falls into
    Cell {
        #[arg(allow_negative_numbers = true)]
        x: f32,
        #[arg(allow_negative_numbers = true)]
        y: f32,
        /// Grid cell size in world units
        #[arg(long, default_value_t = StreamConfig::default().cell_size)]
        cell_size: f32,
    },
    /// Run reconciliation ticks over a world manifest against an in-memory host
    Simulate {
        /// Path to a YAML world manifest
        manifest: PathBuf,
        /// Number of reconciliation ticks to run
        #[arg(short, long, default_value = "3")]
        ticks: u32,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct ObjectReport {
    name: String,
    /// Cell centre in world units.
    cell: [f32; 2],
    networked: bool,
    state: &'static str,
    network_id: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    summary: RegistrySummary,
    ticks: Vec<TickStats>,
    objects: Vec<ObjectReport>,
    peer_events: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("worldspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("kernel: {}", worldspace_kernel::crate_info());
            println!("stream: {}", worldspace_stream::crate_info());
            let config = StreamConfig::default();
            println!(
                "defaults: cell_size={} spawn_radius={} tick={:?} settle={:?}",
                config.cell_size,
                config.spawn_radius(),
                config.tick_interval(),
                config.settle_delay()
            );
        }
        Commands::Cell { x, y, cell_size } => {
            anyhow::ensure!(cell_size > 0.0, "cell size must be positive");
            let cell = cell_key(Vec3::new(x, y, 0.0), cell_size);
            let origin = cell.origin(cell_size);
            println!(
                "({x}, {y}) -> cell [{}, {}] at ({}, {})",
                cell.x, cell.y, origin.x, origin.y
            );
        }
        Commands::Simulate {
            manifest,
            ticks,
            json,
        } => {
            let report = simulate(Manifest::load(&manifest)?, ticks).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}

async fn simulate(manifest: Manifest, ticks: u32) -> anyhow::Result<SimulationReport> {
    let sim = Arc::new(SimHost::new());
    for position in &manifest.observers {
        sim.add_observer(*position);
    }
    for (name, network_id) in &manifest.remote {
        // entries naming a manifest object survive as live entities
        if let Some(obj) = manifest.objects.iter().find(|o| &o.name == name) {
            sim.spawn_remote_as(obj.model, obj.coords, *network_id);
        }
        sim.insert_remote(name.clone(), *network_id);
    }

    let world = WorldController::new(manifest.config.clone(), Host::from_shared(sim.clone()))
        .context("invalid stream config")?;
    let names: Vec<String> = manifest.objects.iter().map(|o| o.name.clone()).collect();
    for object in manifest.objects {
        if let Err(err) = world.register(object).await {
            tracing::warn!(%err, "skipping object");
        }
    }
    world
        .seed_from_authority()
        .await
        .context("seeding from simulated authority")?;

    let mut tick_stats = Vec::with_capacity(ticks as usize);
    for _ in 0..ticks {
        let outcome = world.tick().await;
        tick_stats.push(outcome.stats.clone());
        outcome.join().await;
    }

    let mut objects = Vec::with_capacity(names.len());
    for name in names {
        let Some(object) = world.get(&name).await else {
            continue;
        };
        let cell_size = world.config().cell_size;
        let origin = cell_key(object.coords, cell_size).origin(cell_size);
        let state = world.lifecycle_state(&name).await;
        objects.push(ObjectReport {
            cell: [origin.x, origin.y],
            networked: object.networked,
            state: state_label(state),
            network_id: world.network_id(&name).await.map(|id| id.0),
            name,
        });
    }

    Ok(SimulationReport {
        summary: world.summary().await,
        ticks: tick_stats,
        objects,
        peer_events: sim.events().len(),
    })
}

fn state_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Unmaterialized => "unmaterialized",
        LifecycleState::AwaitingObserver => "awaiting-observer",
        LifecycleState::Creating => "creating",
        LifecycleState::Settling => "settling",
        LifecycleState::Materialized(_) => "materialized",
    }
}

fn print_report(report: &SimulationReport) {
    println!("{}", report.summary);
    for (i, tick) in report.ticks.iter().enumerate() {
        println!(
            "tick {}: scanned={} requested={} in_flight={} took={:?}",
            i + 1,
            tick.scanned,
            tick.requested,
            tick.skipped_in_flight,
            tick.duration
        );
    }
    for obj in &report.objects {
        let net = obj
            .network_id
            .map_or_else(|| "-".to_owned(), |id| id.to_string());
        println!(
            "  {:<20} cell=({:>5}, {:>5}) networked={:<5} state={:<17} net={}",
            obj.name, obj.cell[0], obj.cell[1], obj.networked, obj.state, net
        );
    }
    println!("peer events: {}", report.peer_events);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulate_demo_manifest() {
        let mut manifest = Manifest::parse(include_str!("../demo/harbor.yaml")).unwrap();
        manifest.config.settle_delay_ms = 0;
        let report = simulate(manifest, 2).await.unwrap();

        let state = |name: &str| {
            report
                .objects
                .iter()
                .find(|o| o.name == name)
                .map(|o| o.state)
                .unwrap()
        };
        assert_eq!(state("dock_lamp_1"), "materialized");
        assert_eq!(state("dock_lamp_2"), "materialized");
        assert_eq!(state("crane_hook"), "materialized");
        assert_eq!(state("warehouse_sign"), "unmaterialized");
        assert_eq!(state("lighthouse_lens"), "unmaterialized");

        let crane = report.objects.iter().find(|o| o.name == "crane_hook").unwrap();
        assert_eq!(crane.network_id, Some(17));
        assert_eq!(crane.cell, [400.0, -50.0]);
        assert_eq!(report.ticks[0].requested, 3);
        assert_eq!(report.ticks[1].requested, 1);
        assert!(report.summary.seeded);
        assert_eq!(report.summary.materialized, 3);
    }
}
