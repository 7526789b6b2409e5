//! Vehicle spawning and management for the traffic simulation
//!
//! This module contains functions for spawning, routing, and updating the
//! whole vehicle population. It separates fleet-level rules (processing
//! order, car following, route hand-over, rerouting) from the per-vehicle
//! kinematics in `vehicle`.

use anyhow::{Context, Result};
use log::{debug, warn};
use ordered_float::OrderedFloat;
use rand::Rng;
use sorted_vec::SortedVec;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::config::VehicleClass;
use super::congestion::{CongestionTracker, EdgeStatus};
use super::geometry::{PathCache, PathKey};
use super::intersection::QuadrantReservations;
use super::road_network::{EdgeKey, RoadNetwork};
use super::router::{shortest_path, Penalty};
use super::signal::AxisPhases;
use super::types::{Direction, LaneSide, NodeId, Turn, VehicleId};
use super::vehicle::{
    PathZone, RouteStep, SimVehicle, StepContext, VehicleState, VehicleUpdateResult,
};

/// Turns a node path into route steps.
///
/// `entry` is the direction of travel into the first node and `exit` the
/// direction out of the last one. Returns `None` for an empty path, nodes
/// that are not neighbours, or a U-turn anywhere along the way.
pub fn build_route(
    network: &RoadNetwork,
    nodes: &[NodeId],
    entry: Direction,
    exit: Direction,
) -> Option<Vec<RouteStep>> {
    let mut steps = Vec::with_capacity(nodes.len());
    let mut direction = entry;

    for (i, &node) in nodes.iter().enumerate() {
        let out = match nodes.get(i + 1) {
            Some(&next) => network.direction_between(node, next)?,
            None => exit,
        };
        let turn = Turn::between(direction, out)?;
        steps.push(RouteStep {
            node,
            direction,
            turn,
        });
        direction = out;
    }

    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}

/// Cheapest route from `entry` to `exit` under the current road states
///
/// # Arguments
/// * `entry` - The first intersection and the direction of travel into it
/// * `exit` - The last intersection and the direction of travel out of it
/// * `forbidden` - A road the route may not use as its first hop
pub fn plan_route(
    network: &RoadNetwork,
    congestion: &CongestionTracker,
    penalty: &Penalty,
    entry: (NodeId, Direction),
    exit: (NodeId, Direction),
    forbidden: Option<EdgeKey>,
) -> Option<Vec<RouteStep>> {
    let nodes = shortest_path(
        network,
        entry.0,
        exit.0,
        penalty.edge_cost(congestion, forbidden),
    )?;
    build_route(network, &nodes, entry.1, exit.1)
}

/// Build a vehicle at the start of the first step of `route`
#[allow(clippy::too_many_arguments)]
pub fn spawn_vehicle(
    id: VehicleId,
    class: VehicleClass,
    speed: f32,
    detour_bias: f32,
    lane: LaneSide,
    route: Vec<RouteStep>,
    network: &RoadNetwork,
    paths: &mut PathCache,
) -> Result<SimVehicle> {
    let first = *route.first().context("Route has no steps")?;
    let path = paths
        .get(network, path_key_for(first, lane))
        .context("Could not build the first path of the route")?;

    SimVehicle::new(id, class, speed, detour_bias, lane, route, path)
}

pub fn path_key_for(step: RouteStep, lane: LaneSide) -> PathKey {
    PathKey {
        node: step.node,
        direction: step.direction,
        turn: step.turn,
        lane,
    }
}

/// Lowest progress of any vehicle on each path, used to decide whether a
/// vehicle may be placed at the start of a path
#[derive(Debug, Clone, Default)]
pub struct PathOccupancy {
    lowest: HashMap<PathKey, f32>,
}

impl PathOccupancy {
    pub fn from_vehicles<'a>(vehicles: impl IntoIterator<Item = &'a SimVehicle>) -> Self {
        let mut occupancy = Self::default();
        for vehicle in vehicles {
            occupancy.record(vehicle.path_key(), vehicle.progress);
        }
        occupancy
    }

    pub fn record(&mut self, key: PathKey, progress: f32) {
        self.lowest
            .entry(key)
            .and_modify(|t| *t = t.min(progress))
            .or_insert(progress);
    }

    /// True when a vehicle placed at progress 0 on `key` keeps the headway
    pub fn is_entry_clear(&self, key: PathKey, path_length: f32, min_headway: f32) -> bool {
        let gap = min_headway / path_length;
        self.lowest.get(&key).map_or(true, |&t| t >= gap)
    }
}

/// Order in which vehicles claim quadrants: vehicles inside a box first,
/// then everyone else by distance to their stop line, nearest first
pub fn processing_order(vehicles: &BTreeMap<VehicleId, SimVehicle>) -> Vec<VehicleId> {
    let mut order: Vec<(bool, OrderedFloat<f32>, VehicleId)> = vehicles
        .values()
        .map(|v| (!v.is_inside(), OrderedFloat(v.distance_to_stop()), v.id))
        .collect();
    order.sort();
    order.into_iter().map(|(_, _, id)| id).collect()
}

/// Update all vehicles in the simulation
///
/// Returns the vehicles whose progress ran past the end of their path
pub fn update_vehicles(
    ctx: &StepContext,
    vehicles: &mut BTreeMap<VehicleId, SimVehicle>,
    phases: AxisPhases,
    pedestrian_blocked: &HashSet<NodeId>,
    reservations: &mut QuadrantReservations,
) -> Vec<VehicleId> {
    reservations.clear();

    // Vehicles already committed keep their quadrants for the whole tick
    for vehicle in vehicles.values() {
        if vehicle.is_inside() {
            reservations.hold(vehicle.path.key.node, vehicle.path.quadrants, vehicle.id);
        }
    }

    let mut finished = Vec::new();
    for id in processing_order(vehicles) {
        let Some(vehicle) = vehicles.get_mut(&id) else {
            continue;
        };
        let key = vehicle.path.key;
        let phase = phases.for_axis(key.direction.axis());
        let blocked = pedestrian_blocked.contains(&key.node);

        if vehicle.update(ctx, phase, blocked, reservations) == VehicleUpdateResult::SegmentComplete
        {
            finished.push(id);
        }
    }

    finished
}

/// Keeps every follower at least `min_headway` behind its leader on the
/// same path, clamping its progress and capping its velocity
pub fn enforce_headway(vehicles: &mut BTreeMap<VehicleId, SimVehicle>, min_headway: f32, dt: f32) {
    let mut files: HashMap<PathKey, Vec<(Reverse<OrderedFloat<f32>>, VehicleId)>> = HashMap::new();
    for vehicle in vehicles.values() {
        files
            .entry(vehicle.path_key())
            .or_default()
            .push((Reverse(OrderedFloat(vehicle.progress)), vehicle.id));
    }

    for file in files.into_values() {
        if file.len() < 2 {
            continue;
        }
        // Leader first
        let file = SortedVec::from_unsorted(file);
        let mut leader_progress: Option<f32> = None;

        for (_, id) in file.iter() {
            let Some(vehicle) = vehicles.get_mut(id) else {
                continue;
            };
            if let Some(lead) = leader_progress {
                let limit = lead - min_headway / vehicle.path.length;
                if vehicle.progress > limit {
                    vehicle.progress = limit.max(0.0);
                    let allowed = (limit - vehicle.prev_progress) / dt;
                    vehicle.velocity = vehicle.velocity.min(allowed.max(0.0));
                }
            }
            leader_progress = Some(vehicle.progress);
        }
    }
}

/// Adds this tick's movement to each vehicle's trip distance.
///
/// Movement past the end of the path is not counted.
/// Returns the emission produced, weighted by each vehicle's class.
pub fn record_travel(vehicles: &mut BTreeMap<VehicleId, SimVehicle>) -> f32 {
    let mut emitted = 0.0;
    for vehicle in vehicles.values_mut() {
        let moved = vehicle.progress.min(1.0) - vehicle.prev_progress;
        let distance = moved.max(0.0) * vehicle.path.length;
        vehicle.distance_travelled += distance;
        emitted += distance * vehicle.class.emission_factor;
    }
    emitted
}

/// Vehicles taken off the network by [`advance_routes`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteAdvance {
    /// Finished the last step of their route
    pub completed: Vec<VehicleId>,
    /// Could not be handed their next path
    pub dropped: Vec<VehicleId>,
}

/// Moves vehicles that finished their path onto the next step of their
/// route, or takes them off the network after the last step.
///
/// A vehicle whose next path has no room at its start waits at the end of
/// its current path.
pub fn advance_routes(
    vehicles: &mut BTreeMap<VehicleId, SimVehicle>,
    network: &RoadNetwork,
    paths: &mut PathCache,
    min_headway: f32,
) -> RouteAdvance {
    let mut occupancy = PathOccupancy::from_vehicles(vehicles.values());
    let mut result = RouteAdvance::default();

    // Leaders hand over first so followers cannot jump the queue
    let mut finished: Vec<(Reverse<OrderedFloat<f32>>, VehicleId)> = vehicles
        .values()
        .filter(|v| v.progress > 1.0)
        .map(|v| (Reverse(OrderedFloat(v.progress)), v.id))
        .collect();
    finished.sort();

    for (_, id) in finished {
        let Some(vehicle) = vehicles.get_mut(&id) else {
            continue;
        };

        if vehicle.is_final_step() {
            result.completed.push(id);
            continue;
        }

        let next_index = vehicle.step_index + 1;
        let key = path_key_for(vehicle.route[next_index], vehicle.lane);
        let next_path = match paths.get(network, key) {
            Ok(path) => path,
            Err(e) => {
                warn!("Despawning vehicle {:?}: {:#}", id.0, e);
                result.dropped.push(id);
                continue;
            }
        };

        if occupancy.is_entry_clear(key, next_path.length, min_headway) {
            vehicle.begin_step(next_index, next_path);
            occupancy.record(key, 0.0);
        } else {
            vehicle.progress = 1.0;
            vehicle.velocity = 0.0;
        }
    }

    for id in result.completed.iter().chain(&result.dropped) {
        vehicles.remove(id);
    }

    result
}

/// Decision taken for a vehicle at the start of a segment
#[derive(Debug, Clone, PartialEq)]
pub enum ReroutePlan {
    /// Carry on with the current route
    Keep,
    /// Switch to this route, which starts at the current intersection
    Reroute(Vec<RouteStep>),
    /// No usable route exists; hold and retry next tick
    Wait,
}

/// Decide whether a vehicle at the start of a segment should change route.
///
/// Only vehicles at progress 0 are considered. A blocked next road always
/// triggers a new search, a congested one does so with `reroute_probability`.
/// The road the vehicle arrived on is excluded, so no new route begins with
/// a U-turn.
pub fn plan_reroute<R: Rng + ?Sized>(
    vehicle: &SimVehicle,
    network: &RoadNetwork,
    congestion: &CongestionTracker,
    congested_cost: f32,
    reroute_probability: f64,
    rng: &mut R,
) -> ReroutePlan {
    if vehicle.progress > 0.0 {
        return ReroutePlan::Keep;
    }
    let Some(next_edge) = vehicle.departure_edge(network) else {
        return ReroutePlan::Keep;
    };

    let search = match congestion.status(next_edge) {
        EdgeStatus::Normal => false,
        EdgeStatus::Congested => rng.random_bool(reroute_probability),
        EdgeStatus::Blocked => true,
    };
    if !search {
        return ReroutePlan::Keep;
    }

    let step = vehicle.current_step();
    let penalty = Penalty {
        congested_cost,
        detour_bias: vehicle.detour_bias,
    };
    let route = plan_route(
        network,
        congestion,
        &penalty,
        (step.node, step.direction),
        (vehicle.destination(), vehicle.exit_direction()),
        vehicle.approach_edge(network),
    );

    match route {
        None => ReroutePlan::Wait,
        Some(route) if route[..] == vehicle.route[vehicle.step_index..] => ReroutePlan::Keep,
        Some(route) => ReroutePlan::Reroute(route),
    }
}

/// Run the segment-start reroute check for every vehicle at progress 0.
///
/// Returns how many vehicles switched to a new route.
#[allow(clippy::too_many_arguments)]
pub fn reroute_vehicles<R: Rng + ?Sized>(
    vehicles: &mut BTreeMap<VehicleId, SimVehicle>,
    network: &RoadNetwork,
    congestion: &CongestionTracker,
    paths: &mut PathCache,
    congested_cost: f32,
    reroute_probability: f64,
    min_headway: f32,
    rng: &mut R,
) -> usize {
    let mut occupancy = PathOccupancy::from_vehicles(vehicles.values());
    let mut rerouted = 0;

    let candidates: Vec<VehicleId> = vehicles
        .values()
        .filter(|v| v.progress <= 0.0)
        .map(|v| v.id)
        .collect();

    for id in candidates {
        let Some(vehicle) = vehicles.get_mut(&id) else {
            continue;
        };

        let plan = plan_reroute(
            vehicle,
            network,
            congestion,
            congested_cost,
            reroute_probability,
            rng,
        );

        match plan {
            ReroutePlan::Keep => {
                vehicle.state = VehicleState::Driving;
            }
            ReroutePlan::Wait => {
                if vehicle.state != VehicleState::Waiting {
                    debug!(
                        "Vehicle {:?} has no route to {} and waits at {}",
                        vehicle.id.0,
                        vehicle.destination(),
                        vehicle.current_step().node
                    );
                }
                vehicle.state = VehicleState::Waiting;
                vehicle.velocity = 0.0;
            }
            ReroutePlan::Reroute(route) => {
                let key = path_key_for(route[0], vehicle.lane);
                let path = match paths.get(network, key) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!("Keeping route of vehicle {:?}: {:#}", vehicle.id.0, e);
                        continue;
                    }
                };
                if key != vehicle.path.key
                    && !occupancy.is_entry_clear(key, path.length, min_headway)
                {
                    // No room on the new path yet; a blocked road still cannot be used
                    let blocked = vehicle
                        .departure_edge(network)
                        .is_some_and(|e| congestion.status(e) == EdgeStatus::Blocked);
                    vehicle.state = if blocked {
                        VehicleState::Waiting
                    } else {
                        VehicleState::Driving
                    };
                    continue;
                }

                debug!(
                    "Vehicle {:?} rerouted at {} ({:?} -> {:?}), {} steps to go",
                    vehicle.id.0,
                    route[0].node,
                    vehicle.path.key.turn,
                    route[0].turn,
                    route.len()
                );
                vehicle.route = route;
                vehicle.begin_step(0, path);
                vehicle.state = VehicleState::Driving;
                occupancy.record(key, 0.0);
                rerouted += 1;
            }
        }
    }

    rerouted
}

/// Adds each vehicle's weight to the road it currently occupies
pub fn tally_loads(
    vehicles: &BTreeMap<VehicleId, SimVehicle>,
    network: &RoadNetwork,
    congestion: &mut CongestionTracker,
) {
    for vehicle in vehicles.values() {
        if let Some(edge) = vehicle.occupied_edge(network) {
            congestion.add_load(edge, vehicle.class.weight);
        }
    }
}

/// Vehicles currently inside the box at `node`
pub fn vehicles_inside(
    vehicles: &BTreeMap<VehicleId, SimVehicle>,
    node: NodeId,
) -> impl Iterator<Item = &SimVehicle> {
    vehicles
        .values()
        .filter(move |v| v.path.key.node == node && v.zone() == PathZone::Inside)
}
