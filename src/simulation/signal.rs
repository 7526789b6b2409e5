//! Signal controller
//!
//! One global fixed-time cycle shared by every intersection:
//! north–south green, north–south yellow, east–west green, east–west yellow.

use super::config::SimConfig;
use super::types::Axis;

/// Permitted phase of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalPhase {
    Green,
    Yellow,
    Red,
}

/// Phases of both axes at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisPhases {
    pub north_south: SignalPhase,
    pub east_west: SignalPhase,
}

impl AxisPhases {
    pub fn for_axis(&self, axis: Axis) -> SignalPhase {
        match axis {
            Axis::NorthSouth => self.north_south,
            Axis::EastWest => self.east_west,
        }
    }
}

/// Deterministic repeating timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalController {
    green_ms: i64,
    yellow_ms: i64,
}

impl SignalController {
    pub fn new(green_ms: i64, yellow_ms: i64) -> Self {
        Self {
            green_ms,
            yellow_ms,
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.green_ms, config.yellow_ms)
    }

    pub fn cycle_ms(&self) -> i64 {
        2 * (self.green_ms + self.yellow_ms)
    }

    /// Phases at `elapsed_ms`. Total for any input, negative included.
    pub fn phases_at(&self, elapsed_ms: i64) -> AxisPhases {
        use SignalPhase::*;

        let g = self.green_ms;
        let y = self.yellow_ms;
        let t = elapsed_ms.rem_euclid(self.cycle_ms().max(1));

        let (north_south, east_west) = if t < g {
            (Green, Red)
        } else if t < g + y {
            (Yellow, Red)
        } else if t < g + y + g {
            (Red, Green)
        } else {
            (Red, Yellow)
        };

        AxisPhases {
            north_south,
            east_west,
        }
    }
}

/// Dilemma-zone rule: on yellow, a vehicle close to the line that is still
/// moving carries on; everyone else stops.
pub fn proceed_on_yellow(distance_to_line: f32, proceed_distance: f32, was_stopped: bool) -> bool {
    distance_to_line <= proceed_distance && !was_stopped
}
