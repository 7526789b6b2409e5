use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use grid_traffic::simulation::{SimConfig, SimWorld};

#[derive(Parser)]
#[command(name = "grid_traffic")]
#[command(about = "Signal-controlled, congestion-aware grid traffic simulation")]
struct Cli {
    /// Intersections per side of the grid
    #[arg(long, default_value = "4")]
    grid: usize,

    /// Number of simulation ticks to run
    #[arg(long, default_value = "1000")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Vehicles spawned per second
    #[arg(long)]
    spawn_rate: Option<f32>,

    /// Cap on live vehicles
    #[arg(long)]
    max_vehicles: Option<usize>,

    /// Turns obey the signal like straight movements
    #[arg(long)]
    strict_turns: bool,

    /// Only print the final state
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> SimConfig {
        let mut config = SimConfig {
            grid_size: self.grid,
            turn_on_red: !self.strict_turns,
            ..SimConfig::default()
        };
        if let Some(rate) = self.spawn_rate {
            config.vehicle_spawn_rate = rate;
        }
        if let Some(max) = self.max_vehicles {
            config.max_vehicles = max;
        }
        config
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,grid_traffic=info"),
    )
    .init();

    let cli = Cli::parse();
    if !(cli.delta.is_finite() && cli.delta > 0.0) {
        bail!("--delta must be a positive number of seconds, got {}", cli.delta);
    }
    let config = cli.config();

    let world = match cli.seed {
        Some(seed) => SimWorld::new_with_seed(config, seed)?,
        None => SimWorld::new(config)?,
    };

    run_headless(world, cli.ticks, cli.delta, cli.quiet);
    Ok(())
}

/// Run the simulation in headless mode (no graphics)
fn run_headless(mut world: SimWorld, ticks: u32, delta: f32, quiet: bool) {
    println!("Running grid traffic simulation in headless mode...");
    println!("Ticks: {}, Delta: {}s", ticks, delta);

    // Report once per ten seconds of simulated time
    let ticks_per_report = ((10.0 / delta).ceil() as u32).max(1);

    if !quiet {
        println!();
        println!("Initial state:");
        world.print_summary();
        world.draw_map();
    }

    let mut tick = 0;
    while tick < ticks {
        let ticks_to_run = ticks_per_report.min(ticks - tick);

        for _ in 0..ticks_to_run {
            tick += 1;
            world.tick(delta);
        }

        if !quiet && tick < ticks {
            println!(
                "--- After tick {} ({:.1}s simulated time) ---",
                tick,
                tick as f32 * delta
            );
            world.print_summary();
            world.draw_map();
        }
    }

    info!(
        "Finished {} ticks: {} vehicles completed, {} notifications",
        tick,
        world.stats().vehicles_completed,
        world.notifications().len()
    );

    println!("=== Final State ===");
    world.print_summary();
    if !quiet {
        world.draw_map();
    }
}
