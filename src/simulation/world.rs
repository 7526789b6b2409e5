//! Main simulation world that ties everything together
//!
//! `SimWorld` owns the network, every agent and all shared per-tick state.
//! It is driven by an explicit `dt`, so a caller can run it from a frame loop
//! or step it synchronously in tests.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};

use super::config::{SimConfig, VehicleClass};
use super::congestion::{
    CongestionThresholds, CongestionTracker, EdgeState, EdgeStatus, Notification,
};
use super::geometry::{PathCache, PathGeometry};
use super::ids::IdGenerator;
use super::intersection::QuadrantReservations;
use super::pedestrian::{PedestrianUpdateResult, SimPedestrian};
use super::road_network::{EdgeKey, RoadNetwork};
use super::router::Penalty;
use super::signal::{AxisPhases, SignalController, SignalPhase};
use super::types::{Axis, Direction, LaneSide, NodeId, PedestrianId, Pose, VehicleId};
use super::vehicle::{RouteStep, SimVehicle, StepContext, VehicleState};
use super::vehicle_manager::{
    advance_routes, enforce_headway, path_key_for, plan_route, record_travel, reroute_vehicles,
    spawn_vehicle, tally_loads, update_vehicles, PathOccupancy,
};

/// Counters accumulated over a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimStats {
    pub vehicles_spawned: usize,
    pub vehicles_completed: usize,
    pub vehicles_rerouted: usize,
    /// Vehicles removed because their next path could not be built
    pub vehicles_dropped: usize,
    /// Spawn attempts skipped for an occupied entry or a missing route
    pub spawn_rejections: usize,
    pub pedestrians_spawned: usize,
    pub pedestrians_crossed: usize,
    /// Σ emission factor × distance over every vehicle
    pub emitted: f32,
}

/// The main simulation world
pub struct SimWorld {
    pub config: SimConfig,

    /// Static grid of intersections
    pub network: RoadNetwork,

    pub signal: SignalController,

    /// Per-road load and status
    pub congestion: CongestionTracker,

    /// All live vehicles, in id order so runs are reproducible
    pub vehicles: BTreeMap<VehicleId, SimVehicle>,

    /// All live pedestrians
    pub pedestrians: BTreeMap<PedestrianId, SimPedestrian>,

    /// Simulation time in seconds
    pub time: f32,

    pub stats: SimStats,

    paths: PathCache,
    reservations: QuadrantReservations,
    notifications: Vec<Notification>,
    ids: IdGenerator,
    rng: StdRng,

    vehicle_spawn_budget: f32,
    pedestrian_spawn_budget: f32,
}

impl SimWorld {
    /// Create a world with an OS-seeded RNG
    pub fn new(config: SimConfig) -> Result<Self> {
        Self::with_parts(config, StdRng::from_os_rng(), IdGenerator::new())
    }

    /// Create a new SimWorld with a seeded RNG for reproducible simulations
    pub fn new_with_seed(config: SimConfig, seed: u64) -> Result<Self> {
        Self::with_parts(config, StdRng::seed_from_u64(seed), IdGenerator::new())
    }

    /// Create a world from an explicit random source and identity source
    pub fn with_parts(config: SimConfig, rng: StdRng, ids: IdGenerator) -> Result<Self> {
        config.validate().context("Invalid simulation configuration")?;

        let network = RoadNetwork::grid(config.grid_size, config.block_length);
        let congestion =
            CongestionTracker::new(CongestionThresholds::from_config(&config), network.edges());

        info!(
            "Built {}x{} grid: {} intersections, {} roads",
            config.grid_size,
            config.grid_size,
            network.node_count(),
            network.edge_count()
        );

        Ok(Self {
            signal: SignalController::from_config(&config),
            paths: PathCache::new(PathGeometry::from_config(&config)),
            network,
            congestion,
            vehicles: BTreeMap::new(),
            pedestrians: BTreeMap::new(),
            time: 0.0,
            stats: SimStats::default(),
            reservations: QuadrantReservations::new(),
            notifications: Vec::new(),
            ids,
            rng,
            vehicle_spawn_budget: 0.0,
            pedestrian_spawn_budget: 0.0,
            config,
        })
    }

    /// Signal clock in whole milliseconds
    pub fn elapsed_ms(&self) -> i64 {
        (self.time as f64 * 1000.0).round() as i64
    }

    pub fn phases(&self) -> AxisPhases {
        self.signal.phases_at(self.elapsed_ms())
    }

    /// Advance the simulation by `delta_secs`
    pub fn tick(&mut self, delta_secs: f32) {
        if !(delta_secs.is_finite() && delta_secs > 0.0) {
            warn!("Ignoring tick with non-positive delta {}", delta_secs);
            return;
        }

        self.time += delta_secs;
        let phases = self.phases();

        self.congestion.reset_loads();

        self.spawn_agents(delta_secs);

        // Segment-start route checks against the statuses of the last tick
        let rerouted = reroute_vehicles(
            &mut self.vehicles,
            &self.network,
            &self.congestion,
            &mut self.paths,
            self.config.congested_cost,
            self.config.reroute_probability,
            self.config.min_headway,
            &mut self.rng,
        );
        self.stats.vehicles_rerouted += rerouted;

        let block_until = self.config.pedestrian_block_until;
        let pedestrian_blocked: HashSet<NodeId> = self
            .pedestrians
            .values()
            .filter(|p| p.blocks_intersection(block_until))
            .map(|p| p.node)
            .collect();

        let ctx = StepContext::new(&self.config, delta_secs);
        let finished = update_vehicles(
            &ctx,
            &mut self.vehicles,
            phases,
            &pedestrian_blocked,
            &mut self.reservations,
        );
        enforce_headway(&mut self.vehicles, self.config.min_headway, delta_secs);
        self.stats.emitted += record_travel(&mut self.vehicles);

        if !finished.is_empty() {
            let advance = advance_routes(
                &mut self.vehicles,
                &self.network,
                &mut self.paths,
                self.config.min_headway,
            );
            self.stats.vehicles_completed += advance.completed.len();
            self.stats.vehicles_dropped += advance.dropped.len();
            // Vehicles held at the end of their path may have been pulled back
            enforce_headway(&mut self.vehicles, self.config.min_headway, delta_secs);
        }

        tally_loads(&self.vehicles, &self.network, &mut self.congestion);
        let notifications = self.congestion.advance(self.time, &mut self.ids);
        self.notifications.extend(notifications);

        self.update_pedestrians(delta_secs, phases);
    }

    fn update_pedestrians(&mut self, delta_secs: f32, phases: AxisPhases) {
        let crossing_length = self.config.road_width;
        let mut crossed = Vec::new();

        for pedestrian in self.pedestrians.values_mut() {
            match pedestrian.update(delta_secs, phases, crossing_length) {
                PedestrianUpdateResult::Finished => crossed.push(pedestrian.id),
                PedestrianUpdateResult::StartedCrossing => {
                    debug!(
                        "Pedestrian {:?} crossing {:?} road at {}",
                        pedestrian.id.0, pedestrian.axis, pedestrian.node
                    );
                }
                PedestrianUpdateResult::Continue => {}
            }
        }

        for id in &crossed {
            self.pedestrians.remove(id);
        }
        self.stats.pedestrians_crossed += crossed.len();
    }

    /// Rate-driven spawning of both agent kinds, capped by population limits
    fn spawn_agents(&mut self, delta_secs: f32) {
        let due = take_whole(
            &mut self.vehicle_spawn_budget,
            self.config.vehicle_spawn_rate * delta_secs,
        );
        for _ in 0..due.min(self.config.max_vehicles) {
            if self.vehicles.len() < self.config.max_vehicles {
                self.spawn_random_vehicle();
            }
        }

        let due = take_whole(
            &mut self.pedestrian_spawn_budget,
            self.config.pedestrian_spawn_rate * delta_secs,
        );
        for _ in 0..due.min(self.config.max_pedestrians) {
            if self.pedestrians.len() < self.config.max_pedestrians {
                self.spawn_random_pedestrian();
            }
        }
    }

    /// Spawn a vehicle with a random class, boundary entry, boundary exit
    /// and lane. Returns `None` when the spawn was skipped.
    pub fn spawn_random_vehicle(&mut self) -> Option<VehicleId> {
        let entries = self.network.boundary_entries();
        let entry = *entries.choose(&mut self.rng)?;

        let exits: Vec<(NodeId, Direction)> = self
            .network
            .boundary_exits()
            .into_iter()
            .filter(|&(node, dir)| !(node == entry.0 && dir == entry.1.opposite()))
            .collect();
        let exit = *exits.choose(&mut self.rng)?;

        let class = self
            .config
            .vehicle_classes
            .choose_weighted(&mut self.rng, |c| c.spawn_share)
            .ok()?
            .clone();
        let speed = self.rng.random_range(class.min_speed..=class.max_speed);
        let (lo, hi) = self.config.detour_bias_range;
        let detour_bias = self.rng.random_range(lo..=hi);
        let lane = if self.rng.random_bool(0.5) {
            LaneSide::Inner
        } else {
            LaneSide::Outer
        };

        match self.spawn_vehicle_with(entry, exit, class, speed, detour_bias, lane) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Skipped vehicle spawn: {:#}", e);
                self.stats.spawn_rejections += 1;
                None
            }
        }
    }

    /// Spawn a vehicle of the first configured class at its top speed
    pub fn spawn_vehicle_between(
        &mut self,
        entry: (NodeId, Direction),
        exit: (NodeId, Direction),
        lane: LaneSide,
    ) -> Result<VehicleId> {
        let class = self
            .config
            .vehicle_classes
            .first()
            .cloned()
            .context("No vehicle classes configured")?;
        let speed = class.max_speed;
        self.spawn_vehicle_with(entry, exit, class, speed, 1.0, lane)
    }

    /// Spawn a vehicle routed from `entry` to `exit` under the current road
    /// states. Fails if no route exists or the entry lane is occupied.
    pub fn spawn_vehicle_with(
        &mut self,
        entry: (NodeId, Direction),
        exit: (NodeId, Direction),
        class: VehicleClass,
        speed: f32,
        detour_bias: f32,
        lane: LaneSide,
    ) -> Result<VehicleId> {
        let penalty = Penalty {
            congested_cost: self.config.congested_cost,
            detour_bias,
        };
        let route = plan_route(&self.network, &self.congestion, &penalty, entry, exit, None)
            .with_context(|| {
                format!(
                    "No route from {} heading {:?} to {} heading {:?}",
                    entry.0, entry.1, exit.0, exit.1
                )
            })?;
        self.spawn_vehicle_on_route(route, class, speed, detour_bias, lane)
    }

    /// Spawn a vehicle on an explicit route
    pub fn spawn_vehicle_on_route(
        &mut self,
        route: Vec<RouteStep>,
        class: VehicleClass,
        speed: f32,
        detour_bias: f32,
        lane: LaneSide,
    ) -> Result<VehicleId> {
        let first = *route.first().context("Route has no steps")?;
        let key = path_key_for(first, lane);
        let path = self.paths.get(&self.network, key)?;

        let occupancy = PathOccupancy::from_vehicles(self.vehicles.values());
        if !occupancy.is_entry_clear(key, path.length, self.config.min_headway) {
            bail!("Entry of path {} is occupied", key);
        }

        let id = self.ids.vehicle();
        let vehicle = spawn_vehicle(
            id,
            class,
            speed,
            detour_bias,
            lane,
            route,
            &self.network,
            &mut self.paths,
        )?;

        debug!(
            "Spawned {} {:?} at {} heading {:?}, {} steps to {}",
            vehicle.class.name,
            id.0,
            first.node,
            first.direction,
            vehicle.route.len(),
            vehicle.destination()
        );

        self.vehicles.insert(id, vehicle);
        self.stats.vehicles_spawned += 1;
        Ok(id)
    }

    fn spawn_random_pedestrian(&mut self) -> Option<PedestrianId> {
        let node = self.network.nodes().choose(&mut self.rng)?.id;
        let axis = if self.rng.random_bool(0.5) {
            Axis::NorthSouth
        } else {
            Axis::EastWest
        };
        match self.spawn_pedestrian(node, axis) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Skipped pedestrian spawn: {:#}", e);
                None
            }
        }
    }

    /// Spawn a pedestrian waiting to cross the `axis` road at `node`
    pub fn spawn_pedestrian(&mut self, node: NodeId, axis: Axis) -> Result<PedestrianId> {
        if self.network.node(node).is_none() {
            bail!("Intersection {} not found", node);
        }
        let (lo, hi) = self.config.pedestrian_speed_range;
        let speed = self.rng.random_range(lo..=hi);
        let id = self.ids.pedestrian();
        self.pedestrians
            .insert(id, SimPedestrian::new(id, node, axis, speed));
        self.stats.pedestrians_spawned += 1;
        Ok(id)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&SimVehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_poses(&self) -> Vec<(VehicleId, Pose)> {
        self.vehicles.values().map(|v| (v.id, v.pose())).collect()
    }

    pub fn pedestrian_poses(&self) -> Vec<(PedestrianId, Pose)> {
        let road_width = self.config.road_width;
        self.pedestrians
            .values()
            .filter_map(|p| {
                let center = self.network.position(p.node).ok()?;
                Some((p.id, p.pose(center, road_width)))
            })
            .collect()
    }

    pub fn edge_states(&self) -> impl Iterator<Item = (&EdgeKey, &EdgeState)> {
        self.congestion.edges()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn waiting_vehicle_count(&self) -> usize {
        self.vehicles
            .values()
            .filter(|v| v.state == VehicleState::Waiting)
            .count()
    }

    pub fn pedestrian_count(&self) -> usize {
        self.pedestrians.len()
    }

    /// Notifications not yet drained, oldest first
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Print a summary of the world state
    pub fn print_summary(&self) {
        let phases = self.phases();
        println!("=== Traffic Simulation Summary ===");
        println!("Time: {:.2}s", self.time);
        println!(
            "Signals: north-south {}, east-west {}",
            phase_label(phases.north_south),
            phase_label(phases.east_west)
        );
        println!(
            "Intersections: {}, Roads: {}",
            self.network.node_count(),
            self.network.edge_count()
        );
        println!(
            "Vehicles: {} ({} waiting), Pedestrians: {}",
            self.vehicle_count(),
            self.waiting_vehicle_count(),
            self.pedestrian_count()
        );
        println!(
            "Roads congested: {}, blocked: {}",
            self.congestion.count_with_status(EdgeStatus::Congested),
            self.congestion.count_with_status(EdgeStatus::Blocked)
        );

        let stats = &self.stats;
        println!("--- Totals ---");
        println!(
            "  Vehicles spawned: {}, completed: {}, rerouted: {}, dropped: {}",
            stats.vehicles_spawned,
            stats.vehicles_completed,
            stats.vehicles_rerouted,
            stats.vehicles_dropped
        );
        println!("  Spawn rejections: {}", stats.spawn_rejections);
        println!(
            "  Pedestrians spawned: {}, crossed: {}",
            stats.pedestrians_spawned, stats.pedestrians_crossed
        );
        println!("  Emitted: {:.1}", stats.emitted);

        let loaded: Vec<_> = self
            .congestion
            .edges()
            .filter(|(_, s)| s.status != EdgeStatus::Normal)
            .collect();
        if !loaded.is_empty() {
            println!("--- Congested Roads ---");
            for (edge, state) in loaded {
                println!(
                    "  Road {}: {:?}, load={:.1}",
                    edge, state.status, state.load
                );
            }
        }

        let recent = self.notifications.len().saturating_sub(5);
        if recent < self.notifications.len() {
            println!("--- Recent Notifications ---");
            for note in &self.notifications[recent..] {
                println!(
                    "  [{:>7.2}s] {:?}: {}",
                    note.timestamp, note.kind, note.message
                );
            }
        }
    }

    /// Draw a visual map of the grid in the terminal
    pub fn draw_map(&self) {
        const COL_STEP: usize = 6;
        const ROW_STEP: usize = 3;

        let n = self.network.size();
        if n == 0 {
            return;
        }
        let width = (n - 1) * COL_STEP + 1;
        let height = (n - 1) * ROW_STEP + 1;
        let mut grid = vec![vec![' '; width]; height];

        // Vehicles are counted on the road they occupy
        let mut counts: BTreeMap<EdgeKey, usize> = BTreeMap::new();
        for vehicle in self.vehicles.values() {
            if let Some(edge) = vehicle.occupied_edge(&self.network) {
                *counts.entry(edge).or_default() += 1;
            }
        }

        let cell = |node: NodeId| -> Option<(usize, usize)> {
            self.network
                .node(node)
                .map(|n| (n.row * ROW_STEP, n.col * COL_STEP))
        };

        for edge in self.network.edges() {
            let (a, b) = edge.nodes();
            let (Some((ra, ca)), Some((rb, cb))) = (cell(a), cell(b)) else {
                continue;
            };
            let status = self.congestion.status(edge);
            let count = counts.get(&edge).copied().unwrap_or(0);
            let label = match count {
                0 => None,
                1..=9 => char::from_digit(count as u32, 10),
                _ => Some('*'),
            };

            if ra == rb {
                let fill = match status {
                    EdgeStatus::Normal => '-',
                    EdgeStatus::Congested => '~',
                    EdgeStatus::Blocked => 'X',
                };
                let (lo, hi) = (ca.min(cb), ca.max(cb));
                for c in lo + 1..hi {
                    grid[ra][c] = fill;
                }
                if let Some(label) = label {
                    grid[ra][(lo + hi) / 2] = label;
                }
            } else {
                let fill = match status {
                    EdgeStatus::Normal => '|',
                    EdgeStatus::Congested => ':',
                    EdgeStatus::Blocked => 'X',
                };
                let (lo, hi) = (ra.min(rb), ra.max(rb));
                for r in lo + 1..hi {
                    grid[r][ca] = fill;
                }
                if let Some(label) = label {
                    grid[lo + 1][ca] = label;
                }
            }
        }

        let crossing: HashSet<NodeId> = self
            .pedestrians
            .values()
            .filter(|p| p.blocks_intersection(self.config.pedestrian_block_until))
            .map(|p| p.node)
            .collect();
        for node in self.network.nodes() {
            let (r, c) = (node.row * ROW_STEP, node.col * COL_STEP);
            grid[r][c] = if crossing.contains(&node.id) { 'P' } else { '+' };
        }

        println!("\n=== World Map ===");
        println!("Legend: +=Intersection, P=Pedestrian crossing, -|=Road, ~:=Congested, X=Blocked, digits=Vehicles");
        println!();
        for row in &grid {
            let line: String = row.iter().collect();
            println!("{}", line.trim_end());
        }
        println!();
    }
}

/// Adds `earned` to a fractional spawn budget and takes out the whole spawns
fn take_whole(budget: &mut f32, earned: f32) -> usize {
    *budget += earned;
    let whole = budget.floor();
    *budget -= whole;
    whole as usize
}

fn phase_label(phase: SignalPhase) -> &'static str {
    match phase {
        SignalPhase::Green => "green",
        SignalPhase::Yellow => "yellow",
        SignalPhase::Red => "red",
    }
}
