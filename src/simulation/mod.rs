//! Grid traffic simulation core
//!
//! Everything needed to run the simulation headless: the road grid,
//! intersection geometry, signals, congestion tracking, routing and the
//! vehicle and pedestrian agents, tied together by [`SimWorld`].

mod config;
mod congestion;
mod geometry;
mod ids;
mod intersection;
mod pedestrian;
mod road_network;
mod router;
mod signal;
mod types;
mod vehicle;
mod vehicle_manager;
mod world;

// Re-export public types for external use
// These may not be used within this crate but are part of the public API
#[allow(unused_imports)]
pub use config::{SimConfig, VehicleClass};
#[allow(unused_imports)]
pub use congestion::{
    CongestionThresholds, CongestionTracker, EdgeState, EdgeStatus, Notification,
    NotificationKind,
};
#[allow(unused_imports)]
pub use geometry::{
    required_quadrants, ConflictBox, CubicCurve, IntersectionPath, PathCache, PathCurve,
    PathGeometry, PathKey, MIN_PATH_LENGTH,
};
#[allow(unused_imports)]
pub use ids::IdGenerator;
#[allow(unused_imports)]
pub use intersection::QuadrantReservations;
#[allow(unused_imports)]
pub use pedestrian::{PedestrianState, PedestrianUpdateResult, SimPedestrian};
#[allow(unused_imports)]
pub use road_network::{EdgeKey, Node, RoadNetwork};
#[allow(unused_imports)]
pub use router::{path_edges, shortest_path, Penalty};
#[allow(unused_imports)]
pub use signal::{proceed_on_yellow, AxisPhases, SignalController, SignalPhase};
#[allow(unused_imports)]
pub use types::{
    Axis, Direction, EventId, LaneSide, NodeId, PedestrianId, Pose, Position, Quadrant, SimId,
    Turn, VehicleId,
};
#[allow(unused_imports)]
pub use vehicle::{
    PathZone, RouteStep, SimVehicle, StepContext, VehicleState, VehicleUpdateResult,
};
#[allow(unused_imports)]
pub use vehicle_manager::{
    advance_routes, build_route, enforce_headway, path_key_for, plan_reroute, plan_route,
    processing_order, record_travel, reroute_vehicles, spawn_vehicle, tally_loads,
    update_vehicles, vehicles_inside, PathOccupancy, ReroutePlan, RouteAdvance,
};
pub use world::{SimStats, SimWorld};
