//! Fleet-level rules: reservations, car following, hand-over and loads

use std::collections::{BTreeMap, HashSet};

use grid_traffic::simulation::{
    advance_routes, build_route, enforce_headway, processing_order, record_travel,
    spawn_vehicle, tally_loads, update_vehicles, vehicles_inside, AxisPhases,
    CongestionThresholds, CongestionTracker, Direction, EdgeKey, LaneSide, NodeId, PathCache,
    PathGeometry, PathOccupancy, Quadrant, QuadrantReservations, RoadNetwork, SignalPhase,
    SimConfig, SimId, SimVehicle, StepContext, VehicleClass, VehicleId, VehicleState,
    VehicleUpdateResult,
};

const DT: f32 = 0.05;

struct Fixture {
    config: SimConfig,
    network: RoadNetwork,
    paths: PathCache,
}

impl Fixture {
    fn new() -> Self {
        let config = SimConfig::default();
        let network = RoadNetwork::grid(config.grid_size, config.block_length);
        let paths = PathCache::new(PathGeometry::from_config(&config));
        Self {
            config,
            network,
            paths,
        }
    }

    /// A car driving `nodes`, entering heading `entry` and leaving heading `exit`
    fn vehicle(
        &mut self,
        id: u64,
        nodes: &[usize],
        entry: Direction,
        exit: Direction,
    ) -> SimVehicle {
        let nodes: Vec<NodeId> = nodes.iter().map(|&n| NodeId(n)).collect();
        let route = build_route(&self.network, &nodes, entry, exit).unwrap();
        let class = VehicleClass::car();
        let speed = class.max_speed;
        spawn_vehicle(
            VehicleId(SimId(id)),
            class,
            speed,
            1.0,
            LaneSide::Inner,
            route,
            &self.network,
            &mut self.paths,
        )
        .unwrap()
    }
}

fn fleet(vehicles: Vec<SimVehicle>) -> BTreeMap<VehicleId, SimVehicle> {
    vehicles.into_iter().map(|v| (v.id, v)).collect()
}

fn id(n: u64) -> VehicleId {
    VehicleId(SimId(n))
}

#[test]
fn test_reservations_are_all_or_nothing() {
    use Quadrant::*;
    let mut reservations = QuadrantReservations::new();
    let node = NodeId(0);

    assert!(reservations.try_acquire(node, &[NorthEast, SouthEast], id(1)));
    assert!(!reservations.try_acquire(node, &[NorthEast, NorthWest], id(2)));
    // The failed claim took nothing
    assert!(!reservations.is_held(node, NorthWest));
    assert!(reservations.try_acquire(node, &[NorthWest], id(2)));

    assert_eq!(reservations.holder(node, NorthEast), Some(id(1)));
    assert_eq!(reservations.holder(node, SouthWest), None);
    // A holder never blocks itself
    assert!(reservations.all_free(node, &[NorthEast, SouthEast], id(1)));
    // Other intersections are independent
    assert!(reservations.try_acquire(NodeId(1), &[NorthEast], id(3)));
    assert_eq!(reservations.len(), 4);

    reservations.clear();
    assert!(reservations.is_empty());
}

#[test]
fn test_entry_clear_needs_headway() {
    let mut fixture = Fixture::new();
    let vehicle = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    let key = vehicle.path_key();
    let length = vehicle.path.length;

    let mut occupancy = PathOccupancy::default();
    assert!(occupancy.is_entry_clear(key, length, 20.0));

    occupancy.record(key, 10.0 / length);
    assert!(!occupancy.is_entry_clear(key, length, 20.0));

    // The lowest vehicle on the path decides
    occupancy.record(key, 0.9);
    assert!(!occupancy.is_entry_clear(key, length, 20.0));
    assert!(PathOccupancy::from_vehicles([&vehicle]).is_entry_clear(key, length, 0.0));
}

#[test]
fn test_follower_is_pulled_back() {
    let mut fixture = Fixture::new();
    let mut leader = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    let mut follower = fixture.vehicle(2, &[0, 1], Direction::East, Direction::East);
    leader.progress = 0.5;
    follower.progress = 0.49;
    follower.velocity = 0.4;

    let mut vehicles = fleet(vec![leader, follower]);
    enforce_headway(&mut vehicles, 20.0, DT);

    let length = vehicles[&id(2)].path.length;
    let expected = 0.5 - 20.0 / length;
    assert!((vehicles[&id(2)].progress - expected).abs() < 1e-6);
    assert_eq!(vehicles[&id(1)].progress, 0.5);
    assert!(vehicles[&id(2)].velocity <= 0.4);
}

#[test]
fn test_inside_vehicles_go_first() {
    let mut fixture = Fixture::new();
    let mut crossing = fixture.vehicle(5, &[0, 1], Direction::East, Direction::East);
    let mut far = fixture.vehicle(1, &[4, 8], Direction::South, Direction::South);
    let mut near = fixture.vehicle(3, &[1, 2], Direction::East, Direction::East);
    crossing.progress = 0.5;
    far.progress = 0.05;
    near.progress = 0.3;
    assert!(crossing.is_inside());

    let vehicles = fleet(vec![crossing, far, near]);
    assert_eq!(processing_order(&vehicles), vec![id(5), id(3), id(1)]);
}

#[test]
fn test_vehicle_inside_keeps_its_quadrants() {
    let mut fixture = Fixture::new();
    let mut crossing = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    let mut waiting = fixture.vehicle(2, &[0, 4], Direction::South, Direction::South);
    crossing.progress = 0.5;
    waiting.progress = waiting.path.stop_t;
    let stop_t = waiting.path.stop_t;

    let mut vehicles = fleet(vec![crossing, waiting]);
    let ctx = StepContext::new(&fixture.config, DT);
    // Green for the waiting vehicle, red for the one already committed
    let phases = AxisPhases {
        north_south: SignalPhase::Green,
        east_west: SignalPhase::Red,
    };
    let mut reservations = QuadrantReservations::new();

    update_vehicles(&ctx, &mut vehicles, phases, &HashSet::new(), &mut reservations);

    assert_eq!(vehicles[&id(2)].progress, stop_t);
    assert_eq!(vehicles[&id(2)].velocity, 0.0);
    assert!(vehicles[&id(1)].progress > 0.5);
    assert_eq!(reservations.holder(NodeId(0), Quadrant::SouthEast), Some(id(1)));
    assert_eq!(vehicles_inside(&vehicles, NodeId(0)).count(), 1);
}

#[test]
fn test_hand_over_and_completion() {
    let mut fixture = Fixture::new();
    let mut moving_on = fixture.vehicle(1, &[0, 1, 2], Direction::East, Direction::East);
    let mut blocked = fixture.vehicle(2, &[4, 5, 6], Direction::East, Direction::East);
    let mut arriving = fixture.vehicle(3, &[7], Direction::East, Direction::East);
    let occupant = fixture.vehicle(4, &[5, 6], Direction::East, Direction::East);
    moving_on.progress = 1.04;
    blocked.progress = 1.02;
    arriving.progress = 1.1;

    let mut vehicles = fleet(vec![moving_on, blocked, arriving, occupant]);
    let min_headway = fixture.config.min_headway;
    let result = advance_routes(&mut vehicles, &fixture.network, &mut fixture.paths, min_headway);

    assert_eq!(result.completed, vec![id(3)]);
    assert!(result.dropped.is_empty());
    assert!(!vehicles.contains_key(&id(3)));

    let moved = &vehicles[&id(1)];
    assert_eq!(moved.step_index, 1);
    assert_eq!(moved.progress, 0.0);
    assert_eq!(moved.path_key().node, NodeId(1));

    // Vehicle 4 sits at the start of the next path
    let held = &vehicles[&id(2)];
    assert_eq!(held.step_index, 0);
    assert_eq!(held.progress, 1.0);
    assert_eq!(held.velocity, 0.0);
}

#[test]
fn test_loads_follow_the_stop_line() {
    let mut fixture = Fixture::new();
    let mut approaching = fixture.vehicle(1, &[1, 2], Direction::East, Direction::East);
    let mut leaving = fixture.vehicle(2, &[0, 1], Direction::East, Direction::East);
    let mut outbound = fixture.vehicle(3, &[3], Direction::East, Direction::East);
    approaching.progress = 0.1;
    leaving.progress = 0.8;
    outbound.progress = 0.8;

    let vehicles = fleet(vec![approaching, leaving, outbound]);
    let config = &fixture.config;
    let mut tracker = CongestionTracker::new(
        CongestionThresholds::from_config(config),
        fixture.network.edges(),
    );
    tally_loads(&vehicles, &fixture.network, &mut tracker);

    let road = EdgeKey::new(NodeId(0), NodeId(1));
    assert_eq!(tracker.state(road).unwrap().load, 2.0);
    // Leaving the grid loads no road
    let total: f32 = tracker.edges().map(|(_, s)| s.load).sum();
    assert_eq!(total, 2.0);
}

#[test]
fn test_travel_is_weighted_by_class() {
    let mut fixture = Fixture::new();
    let mut vehicle = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    vehicle.class = VehicleClass::truck();
    vehicle.progress = 0.25;
    let length = vehicle.path.length;

    let mut vehicles = fleet(vec![vehicle]);
    let emitted = record_travel(&mut vehicles);

    let travelled = vehicles[&id(1)].distance_travelled;
    assert!((travelled - 0.25 * length).abs() < 1e-3);
    assert!((emitted - travelled * VehicleClass::truck().emission_factor).abs() < 1e-2);
}

#[test]
fn test_held_vehicle_travels_nothing() {
    let mut fixture = Fixture::new();
    let mut held = fixture.vehicle(1, &[0, 1, 2], Direction::East, Direction::East);
    // Parked at the start of the held vehicle's next path
    let mut occupant = fixture.vehicle(2, &[1, 2], Direction::East, Direction::East);
    held.progress = 1.0;
    occupant.state = VehicleState::Waiting;

    let mut vehicles = fleet(vec![held, occupant]);
    let ctx = StepContext::new(&fixture.config, DT);
    let phases = AxisPhases {
        north_south: SignalPhase::Red,
        east_west: SignalPhase::Green,
    };
    let mut reservations = QuadrantReservations::new();
    let min_headway = fixture.config.min_headway;

    let mut emitted = 0.0;
    for _ in 0..200 {
        update_vehicles(&ctx, &mut vehicles, phases, &HashSet::new(), &mut reservations);
        enforce_headway(&mut vehicles, min_headway, DT);
        emitted += record_travel(&mut vehicles);
        advance_routes(&mut vehicles, &fixture.network, &mut fixture.paths, min_headway);
    }

    let held = &vehicles[&id(1)];
    assert_eq!(held.step_index, 0);
    assert_eq!(held.progress, 1.0);
    assert_eq!(held.distance_travelled, 0.0);
    assert_eq!(emitted, 0.0);
}

#[test]
fn test_hand_over_counts_only_the_path() {
    let mut fixture = Fixture::new();
    let mut vehicle = fixture.vehicle(1, &[0, 1, 2], Direction::East, Direction::East);
    vehicle.progress = 0.99;
    vehicle.velocity = vehicle.speed / vehicle.path.length;
    let length = vehicle.path.length;

    let mut vehicles = fleet(vec![vehicle]);
    let ctx = StepContext::new(&fixture.config, DT);
    let phases = AxisPhases {
        north_south: SignalPhase::Red,
        east_west: SignalPhase::Green,
    };
    let mut reservations = QuadrantReservations::new();
    let no_pedestrians = HashSet::new();
    let finished = update_vehicles(&ctx, &mut vehicles, phases, &no_pedestrians, &mut reservations);
    assert_eq!(finished, vec![id(1)]);

    record_travel(&mut vehicles);
    let travelled = vehicles[&id(1)].distance_travelled;
    assert!((travelled - 0.01 * length).abs() < 1e-2);
}

#[test]
fn test_empty_route_is_rejected() {
    let mut fixture = Fixture::new();
    let template = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    let class = VehicleClass::car();
    let speed = class.max_speed;

    let vehicle = SimVehicle::new(
        id(2),
        class,
        speed,
        1.0,
        LaneSide::Inner,
        Vec::new(),
        template.path.clone(),
    );
    assert!(vehicle.is_err());
}

/// A lone eastbound car at `progress` moving at `velocity` world units/s
fn lone_car(fixture: &mut Fixture, progress: f32, velocity: f32) -> SimVehicle {
    let mut vehicle = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    vehicle.progress = progress;
    vehicle.velocity = velocity / vehicle.path.length;
    vehicle
}

#[test]
fn test_launch_accel_and_brake_rates() {
    let mut fixture = Fixture::new();
    let ctx = StepContext::new(&fixture.config, DT);
    let config = fixture.config.clone();

    // Stationary at the line: the softer launch rate
    let mut launching = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    launching.progress = launching.path.stop_t;
    let length = launching.path.length;
    let mut reservations = QuadrantReservations::new();
    launching.update(&ctx, SignalPhase::Green, false, &mut reservations);
    let expected = config.launch_accel / length * DT;
    assert!((launching.velocity - expected).abs() < 1e-6);
    assert!(launching.is_inside());
    assert_eq!(reservations.holder(NodeId(0), Quadrant::SouthEast), Some(id(1)));

    // Stationary elsewhere: the general rate
    let mut starting = lone_car(&mut fixture, 0.1, 0.0);
    starting.update(&ctx, SignalPhase::Green, false, &mut QuadrantReservations::new());
    let expected = config.accel / length * DT;
    assert!((starting.velocity - expected).abs() < 1e-6);

    // Red ahead: braking
    let speed = VehicleClass::car().max_speed;
    let mut braking = lone_car(&mut fixture, 0.1, speed);
    braking.update(&ctx, SignalPhase::Red, false, &mut QuadrantReservations::new());
    let expected = (speed - config.brake * DT) / length;
    assert!((braking.velocity - expected).abs() < 1e-6);
    assert!(braking.progress < braking.path.stop_t);
}

#[test]
fn test_velocity_never_overshoots_target() {
    let mut fixture = Fixture::new();
    let ctx = StepContext::new(&fixture.config, DT);
    let speed = VehicleClass::car().max_speed;

    // Just under the desired rate: acceleration lands exactly on it
    let mut cruising = lone_car(&mut fixture, 0.1, speed - 1.0);
    cruising.update(&ctx, SignalPhase::Green, false, &mut QuadrantReservations::new());
    assert_eq!(cruising.velocity, cruising.speed / cruising.path.length);

    // Barely moving towards a red: braking lands exactly on zero
    let mut creeping = lone_car(&mut fixture, 0.1, 1.0);
    let before = creeping.progress;
    creeping.update(&ctx, SignalPhase::Red, false, &mut QuadrantReservations::new());
    assert_eq!(creeping.velocity, 0.0);
    assert_eq!(creeping.progress, before);
}

#[test]
fn test_yellow_lets_close_moving_vehicle_through() {
    let mut fixture = Fixture::new();
    let ctx = StepContext::new(&fixture.config, DT);
    let speed = VehicleClass::car().max_speed;
    let proceed_distance = VehicleClass::car().length * fixture.config.yellow_proceed_factor;

    let template = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    let (stop_t, length) = (template.path.stop_t, template.path.length);

    // Inside the proceed distance and moving
    let near = stop_t - (proceed_distance / 2.0) / length;
    let mut vehicle = lone_car(&mut fixture, near, speed);
    let mut reservations = QuadrantReservations::new();
    let result = vehicle.update(&ctx, SignalPhase::Yellow, false, &mut reservations);
    assert_eq!(result, VehicleUpdateResult::Continue);
    assert!(vehicle.progress > stop_t);
    assert_eq!(reservations.holder(NodeId(0), Quadrant::SouthEast), Some(id(1)));
}

#[test]
fn test_yellow_stops_far_or_stationary_vehicle() {
    let mut fixture = Fixture::new();
    let ctx = StepContext::new(&fixture.config, DT);
    let proceed_distance = VehicleClass::car().length * fixture.config.yellow_proceed_factor;

    let template = fixture.vehicle(1, &[0, 1], Direction::East, Direction::East);
    let (stop_t, length) = (template.path.stop_t, template.path.length);

    // Beyond the proceed distance and fast enough to reach the line this tick
    let far = stop_t - (proceed_distance + 2.0) / length;
    let mut vehicle = lone_car(&mut fixture, far, 800.0);
    let mut reservations = QuadrantReservations::new();
    vehicle.update(&ctx, SignalPhase::Yellow, false, &mut reservations);
    assert_eq!(vehicle.progress, stop_t);
    assert_eq!(vehicle.velocity, 0.0);
    assert!(reservations.is_empty());

    // Already stopped at the line
    let mut waiting = lone_car(&mut fixture, stop_t, 0.0);
    waiting.update(&ctx, SignalPhase::Yellow, false, &mut reservations);
    assert_eq!(waiting.progress, stop_t);
    assert_eq!(waiting.velocity, 0.0);
    assert!(reservations.is_empty());
}
