//! Vehicle movement logic for the traffic simulation
//!
//! A vehicle drives a multi-step route; each step is one movement through one
//! intersection along a precomputed [`IntersectionPath`]. This module holds
//! the per-vehicle kinematic step. Ordering, headway and route hand-over live
//! in `vehicle_manager`.

use anyhow::{bail, Result};

use super::config::{SimConfig, VehicleClass};
use super::geometry::{IntersectionPath, PathKey};
use super::intersection::QuadrantReservations;
use super::road_network::{EdgeKey, RoadNetwork};
use super::signal::{proceed_on_yellow, SignalPhase};
use super::types::{Direction, LaneSide, NodeId, Pose, Turn, VehicleId};

/// Below this rate (progress/s) a vehicle counts as stationary
const STOPPED_RATE: f32 = 0.02;

/// How close to the stop line a stationary vehicle must be to count as held there
const AT_LINE_EPSILON: f32 = 1e-4;

/// One movement of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteStep {
    pub node: NodeId,
    /// Direction of travel when entering `node`
    pub direction: Direction,
    pub turn: Turn,
}

impl RouteStep {
    pub fn exit_direction(&self) -> Direction {
        self.direction.after(self.turn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    Driving,
    /// Held at the start of a segment because no usable route exists
    Waiting,
}

/// Result of a vehicle update indicating what should happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleUpdateResult {
    Continue,
    /// Progress ran past the end of the current path
    SegmentComplete,
}

/// Where a vehicle is relative to its current intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathZone {
    /// At or before the stop line
    Approaching,
    Inside,
    PastExit,
}

/// Inputs shared by every vehicle step in one tick
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub dt: f32,
    pub accel: f32,
    pub launch_accel: f32,
    pub brake: f32,
    pub yellow_proceed_factor: f32,
    pub turn_on_red: bool,
}

impl StepContext {
    pub fn new(config: &SimConfig, dt: f32) -> Self {
        Self {
            dt,
            accel: config.accel,
            launch_accel: config.launch_accel,
            brake: config.brake,
            yellow_proceed_factor: config.yellow_proceed_factor,
            turn_on_red: config.turn_on_red,
        }
    }
}

/// A vehicle in the traffic simulation
#[derive(Debug, Clone)]
pub struct SimVehicle {
    pub id: VehicleId,
    pub class: VehicleClass,
    /// Desired top speed in world units per second
    pub speed: f32,
    pub detour_bias: f32,
    pub lane: LaneSide,
    pub route: Vec<RouteStep>,
    pub step_index: usize,
    pub path: IntersectionPath,
    /// Progress along `path` in `[0, 1]`
    pub progress: f32,
    /// Progress units per second
    pub velocity: f32,
    pub state: VehicleState,
    /// Distance covered over the whole trip
    pub distance_travelled: f32,
    /// Progress at the start of the current tick
    pub(crate) prev_progress: f32,
}

impl SimVehicle {
    /// Fails on an empty route; every other accessor relies on one step existing
    pub fn new(
        id: VehicleId,
        class: VehicleClass,
        speed: f32,
        detour_bias: f32,
        lane: LaneSide,
        route: Vec<RouteStep>,
        path: IntersectionPath,
    ) -> Result<Self> {
        if route.is_empty() {
            bail!("Vehicle {:?} has an empty route", id.0);
        }
        Ok(Self {
            id,
            class,
            speed,
            detour_bias,
            lane,
            route,
            step_index: 0,
            path,
            progress: 0.0,
            velocity: 0.0,
            state: VehicleState::Driving,
            distance_travelled: 0.0,
            prev_progress: 0.0,
        })
    }

    pub fn current_step(&self) -> RouteStep {
        self.route[self.step_index.min(self.route.len() - 1)]
    }

    pub fn is_final_step(&self) -> bool {
        self.step_index + 1 >= self.route.len()
    }

    pub fn destination(&self) -> NodeId {
        self.route[self.route.len() - 1].node
    }

    /// Direction the vehicle leaves the network in
    pub fn exit_direction(&self) -> Direction {
        self.route[self.route.len() - 1].exit_direction()
    }

    pub fn path_key(&self) -> PathKey {
        self.path.key
    }

    /// Road the vehicle drives in on for the current step
    pub fn approach_edge(&self, network: &RoadNetwork) -> Option<EdgeKey> {
        let step = self.current_step();
        network
            .neighbor_in(step.node, step.direction.opposite())
            .map(|prev| EdgeKey::new(prev, step.node))
    }

    /// Road the vehicle leaves on after the current step
    pub fn departure_edge(&self, network: &RoadNetwork) -> Option<EdgeKey> {
        let step = self.current_step();
        network
            .neighbor_in(step.node, step.exit_direction())
            .map(|next| EdgeKey::new(step.node, next))
    }

    /// Road currently carrying the vehicle's weight
    pub fn occupied_edge(&self, network: &RoadNetwork) -> Option<EdgeKey> {
        match self.zone() {
            PathZone::Approaching => self.approach_edge(network),
            _ => self.departure_edge(network),
        }
    }

    pub fn zone(&self) -> PathZone {
        self.zone_at(self.progress)
    }

    pub fn zone_at(&self, t: f32) -> PathZone {
        if t <= self.path.stop_t {
            PathZone::Approaching
        } else if t < self.path.exit_t {
            PathZone::Inside
        } else {
            PathZone::PastExit
        }
    }

    pub fn is_inside(&self) -> bool {
        self.zone() == PathZone::Inside
    }

    /// Stop-line distance in world units, zero once past the line
    pub fn distance_to_stop(&self) -> f32 {
        (self.path.stop_t - self.progress).max(0.0) * self.path.length
    }

    /// Stationary at the stop line
    pub fn is_held_at_line(&self) -> bool {
        self.zone() == PathZone::Approaching
            && self.velocity < STOPPED_RATE
            && (self.progress - self.path.stop_t).abs() < AT_LINE_EPSILON
    }

    pub fn pose(&self) -> Pose {
        self.path.eval(self.progress)
    }

    /// Puts the vehicle at the start of `path` for `step_index`
    pub fn begin_step(&mut self, step_index: usize, path: IntersectionPath) {
        self.step_index = step_index;
        self.path = path;
        self.progress = 0.0;
        self.prev_progress = 0.0;
        self.velocity = 0.0;
    }

    /// Integrates one tick of motion and resolves entry into the box.
    ///
    /// `phase` is the phase of the axis controlling this vehicle's approach,
    /// `pedestrian_block` whether someone is crossing at its intersection.
    pub fn update(
        &mut self,
        ctx: &StepContext,
        phase: SignalPhase,
        pedestrian_block: bool,
        reservations: &mut QuadrantReservations,
    ) -> VehicleUpdateResult {
        self.prev_progress = self.progress;

        if self.state == VehicleState::Waiting {
            self.velocity = 0.0;
            return VehicleUpdateResult::Continue;
        }

        let length = self.path.length;
        let desired_rate = self.speed / length;
        let zone = self.zone();
        let started_from_stop = self.is_held_at_line();

        let signal_allows = match phase {
            SignalPhase::Green => true,
            SignalPhase::Yellow => proceed_on_yellow(
                self.distance_to_stop(),
                self.class.length * ctx.yellow_proceed_factor,
                started_from_stop,
            ),
            SignalPhase::Red => false,
        };
        let is_turn = self.path.key.turn != Turn::Straight;
        let phase_permits = signal_allows || (is_turn && ctx.turn_on_red);

        let target = match zone {
            PathZone::Inside | PathZone::PastExit => desired_rate,
            PathZone::Approaching if phase_permits && !pedestrian_block => desired_rate,
            PathZone::Approaching => 0.0,
        };

        let mut velocity = self.velocity;
        if target > velocity {
            let accel = if started_from_stop {
                ctx.launch_accel
            } else {
                ctx.accel
            };
            velocity = (velocity + accel / length * ctx.dt).min(target);
        } else if target < velocity {
            velocity = (velocity - ctx.brake / length * ctx.dt).max(target);
        }

        let mut next = self.progress + velocity.max(0.0) * ctx.dt;

        let node = self.path.key.node;
        let quadrants = self.path.quadrants;
        if zone == PathZone::Approaching && next > self.path.stop_t {
            let gap_ok = !pedestrian_block && reservations.all_free(node, quadrants, self.id);
            let may_enter = if is_turn {
                (signal_allows || ctx.turn_on_red) && gap_ok
            } else {
                signal_allows && gap_ok
            };
            if may_enter && reservations.try_acquire(node, quadrants, self.id) {
                // Holds for the rest of the tick
            } else {
                next = next.min(self.path.stop_t);
                velocity = 0.0;
            }
        } else if zone == PathZone::Inside {
            reservations.hold(node, quadrants, self.id);
        }

        self.progress = next;
        self.velocity = velocity;

        if self.progress > 1.0 {
            VehicleUpdateResult::SegmentComplete
        } else {
            VehicleUpdateResult::Continue
        }
    }
}
