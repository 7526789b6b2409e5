//! Pedestrians crossing at intersections

use super::signal::{AxisPhases, SignalPhase};
use super::types::{Axis, NodeId, PedestrianId, Pose, Position};

/// Pedestrians stand this far outside the box edge they cross along
const CURB_OFFSET: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedestrianState {
    /// At the curb until the crossing's axis turns red
    Waiting,
    Crossing,
}

/// Result of a pedestrian update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedestrianUpdateResult {
    Continue,
    StartedCrossing,
    Finished,
}

#[derive(Debug, Clone)]
pub struct SimPedestrian {
    pub id: PedestrianId,
    pub node: NodeId,
    /// Axis of the road being crossed; the walk is parallel to the other axis
    pub axis: Axis,
    pub state: PedestrianState,
    /// Progress across the road in `[0, 1]`
    pub progress: f32,
    /// Walking speed in world units per second
    pub speed: f32,
}

impl SimPedestrian {
    pub fn new(id: PedestrianId, node: NodeId, axis: Axis, speed: f32) -> Self {
        Self {
            id,
            node,
            axis,
            state: PedestrianState::Waiting,
            progress: 0.0,
            speed,
        }
    }

    /// Advances one tick. `crossing_length` is the road width.
    pub fn update(&mut self, dt: f32, phases: AxisPhases, crossing_length: f32) -> PedestrianUpdateResult {
        match self.state {
            PedestrianState::Waiting => {
                if phases.for_axis(self.axis) == SignalPhase::Red {
                    self.state = PedestrianState::Crossing;
                    PedestrianUpdateResult::StartedCrossing
                } else {
                    PedestrianUpdateResult::Continue
                }
            }
            PedestrianState::Crossing => {
                self.progress = (self.progress + self.speed / crossing_length * dt).min(1.0);
                if self.progress >= 1.0 {
                    PedestrianUpdateResult::Finished
                } else {
                    PedestrianUpdateResult::Continue
                }
            }
        }
    }

    /// A crossing pedestrian keeps vehicles out of its intersection until
    /// it is nearly across
    pub fn blocks_intersection(&self, block_until: f32) -> bool {
        self.state == PedestrianState::Crossing && self.progress < block_until
    }

    /// Where the pedestrian is drawn, given its intersection's center
    pub fn pose(&self, center: Position, road_width: f32) -> Pose {
        let half = road_width / 2.0;
        let along = -half + self.progress * road_width;
        match self.axis {
            // Crossing the north-south road means walking east along its northern edge
            Axis::NorthSouth => Pose {
                position: Position::new(center.x + along, center.y - half - CURB_OFFSET),
                heading: 0.0,
            },
            Axis::EastWest => Pose {
                position: Position::new(center.x - half - CURB_OFFSET, center.y + along),
                heading: 90.0,
            },
        }
    }
}
