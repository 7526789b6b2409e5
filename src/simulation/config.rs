//! Simulation configuration
//!
//! Every option is fixed at construction. Distances are world units (one unit
//! is one pixel of the reference layout), durations are seconds unless the
//! field name says otherwise.

use anyhow::{bail, Result};

/// A kind of vehicle and the attributes that differ between kinds
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleClass {
    pub name: &'static str,
    /// Contribution to an edge's congestion load
    pub weight: f32,
    /// Body length, used for the yellow-proceed distance
    pub length: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Emission per world unit travelled (display statistic only)
    pub emission_factor: f32,
    /// Relative spawn share
    pub spawn_share: f32,
}

impl VehicleClass {
    pub fn car() -> Self {
        Self {
            name: "car",
            weight: 1.0,
            length: 8.0,
            min_speed: 90.0,
            max_speed: 145.0,
            emission_factor: 1.0,
            spawn_share: 0.75,
        }
    }

    pub fn truck() -> Self {
        Self {
            name: "truck",
            weight: 2.0,
            length: 12.0,
            min_speed: 75.0,
            max_speed: 115.0,
            emission_factor: 2.6,
            spawn_share: 0.15,
        }
    }

    pub fn bus() -> Self {
        Self {
            name: "bus",
            weight: 2.5,
            length: 14.0,
            min_speed: 70.0,
            max_speed: 105.0,
            emission_factor: 1.8,
            spawn_share: 0.10,
        }
    }

    fn is_valid(&self) -> bool {
        let finite = [
            self.weight,
            self.length,
            self.min_speed,
            self.max_speed,
            self.emission_factor,
            self.spawn_share,
        ]
        .iter()
        .all(|v| v.is_finite());
        finite
            && self.min_speed > 0.0
            && self.max_speed >= self.min_speed
            && self.weight >= 0.0
            && self.length >= 0.0
            && self.emission_factor >= 0.0
            && self.spawn_share >= 0.0
    }
}

/// All recognised simulation options
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Intersections per axis (the network is `grid_size × grid_size`)
    pub grid_size: usize,
    /// Distance between neighbouring intersection centers
    pub block_length: f32,
    /// Width of every road; also the side of each intersection box
    pub road_width: f32,
    /// Safety margin the conflict box is shrunk by
    pub stop_gap: f32,

    pub green_ms: i64,
    pub yellow_ms: i64,
    /// Yellow-proceed distance, in multiples of the vehicle length
    pub yellow_proceed_factor: f32,

    /// General acceleration (units/s²)
    pub accel: f32,
    /// Softer acceleration when launching from the stop line
    pub launch_accel: f32,
    /// Braking deceleration (units/s²)
    pub brake: f32,
    /// Minimum center-to-center gap between vehicles on the same path
    pub min_headway: f32,

    /// Vehicles spawned per second while under the cap
    pub vehicle_spawn_rate: f32,
    pub max_vehicles: usize,
    pub vehicle_classes: Vec<VehicleClass>,
    /// Range the per-vehicle detour bias is drawn from
    pub detour_bias_range: (f32, f32),

    pub pedestrian_spawn_rate: f32,
    pub max_pedestrians: usize,
    pub pedestrian_speed_range: (f32, f32),
    /// A crossing pedestrian blocks its intersection below this progress
    pub pedestrian_block_until: f32,

    pub congest_threshold: f32,
    pub clear_threshold: f32,
    pub block_seconds: f32,
    pub clear_persist_seconds: f32,
    /// Routing cost of a congested edge (free edges cost 1)
    pub congested_cost: f32,
    /// Chance per tick that a vehicle facing a congested edge reroutes
    pub reroute_probability: f64,

    /// Turning movements may enter on any phase when the gap is clear
    pub turn_on_red: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            grid_size: 4,
            block_length: 320.0,
            road_width: 100.0,
            stop_gap: 5.0,
            green_ms: 8000,
            yellow_ms: 3000,
            yellow_proceed_factor: 1.2,
            accel: 240.0,
            launch_accel: 144.0,
            brake: 420.0,
            min_headway: 20.0,
            vehicle_spawn_rate: 2.0,
            max_vehicles: 140,
            vehicle_classes: vec![VehicleClass::car(), VehicleClass::truck(), VehicleClass::bus()],
            detour_bias_range: (1.0, 1.6),
            pedestrian_spawn_rate: 0.8,
            max_pedestrians: 80,
            pedestrian_speed_range: (25.0, 45.0),
            pedestrian_block_until: 0.92,
            congest_threshold: 5.0,
            clear_threshold: 2.0,
            block_seconds: 6.0,
            clear_persist_seconds: 4.0,
            congested_cost: 3.0,
            reroute_probability: 0.35,
            turn_on_red: true,
        }
    }
}

impl SimConfig {
    /// Full signal cycle length in milliseconds
    pub fn cycle_ms(&self) -> i64 {
        2 * (self.green_ms + self.yellow_ms)
    }

    /// Reject option combinations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.block_length,
            self.road_width,
            self.stop_gap,
            self.yellow_proceed_factor,
            self.accel,
            self.launch_accel,
            self.brake,
            self.min_headway,
            self.vehicle_spawn_rate,
            self.pedestrian_spawn_rate,
            self.congest_threshold,
            self.clear_threshold,
            self.block_seconds,
            self.clear_persist_seconds,
            self.congested_cost,
            self.pedestrian_block_until,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            bail!("every numeric option must be finite");
        }
        if self.grid_size == 0 {
            bail!("grid size must be at least 1");
        }
        if self.road_width <= 0.0 {
            bail!("road width must be positive, got {}", self.road_width);
        }
        if self.block_length <= self.road_width {
            bail!(
                "block length {} must exceed road width {}",
                self.block_length,
                self.road_width
            );
        }
        if self.stop_gap < 0.0 || self.stop_gap * 2.0 >= self.road_width {
            bail!("stop gap {} does not fit the road width", self.stop_gap);
        }
        if self.green_ms <= 0 || self.yellow_ms <= 0 {
            bail!("signal durations must be positive");
        }
        if self.accel <= 0.0 || self.launch_accel <= 0.0 || self.brake <= 0.0 {
            bail!("acceleration and braking rates must be positive");
        }
        if self.yellow_proceed_factor < 0.0 {
            bail!("yellow proceed factor must not be negative");
        }
        if self.min_headway <= 0.0 {
            bail!("minimum headway must be positive, got {}", self.min_headway);
        }
        if self.vehicle_spawn_rate < 0.0 || self.pedestrian_spawn_rate < 0.0 {
            bail!("spawn rates must not be negative");
        }
        if self.congested_cost < 1.0 {
            bail!("congested cost {} must be at least 1", self.congested_cost);
        }
        if !(0.0..=1.0).contains(&self.pedestrian_block_until) {
            bail!("pedestrian block threshold must lie in [0, 1]");
        }
        if self.clear_threshold >= self.congest_threshold {
            bail!(
                "clear threshold {} must be below congest threshold {}",
                self.clear_threshold,
                self.congest_threshold
            );
        }
        if self.block_seconds <= 0.0 || self.clear_persist_seconds <= 0.0 {
            bail!("hysteresis durations must be positive");
        }
        if self.vehicle_classes.is_empty() {
            bail!("at least one vehicle class is required");
        }
        if self.vehicle_classes.iter().any(|c| !c.is_valid()) {
            bail!("vehicle class speeds and shares must be positive and ordered");
        }
        let (lo, hi) = self.detour_bias_range;
        if !(lo.is_finite() && hi.is_finite()) || lo < 1.0 || hi < lo {
            bail!("detour bias range must satisfy 1 <= lo <= hi");
        }
        let (lo, hi) = self.pedestrian_speed_range;
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || hi < lo {
            bail!("pedestrian speed range must be positive and ordered");
        }
        if !(0.0..=1.0).contains(&self.reroute_probability) {
            bail!("reroute probability must lie in [0, 1]");
        }
        Ok(())
    }
}
