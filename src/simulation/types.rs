//! Core types for the traffic simulation
//!
//! Plain value types shared by every component. World coordinates are 2D with
//! `y` growing downwards (screen convention), so "north" is `-y`.

use std::fmt;

/// A unique identifier for simulation entities
/// This is a simple wrapper around a u64 for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimId(pub u64);

/// A wrapper type for intersection (graph node) IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A wrapper type for vehicle IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(pub SimId);

/// A wrapper type for pedestrian IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PedestrianId(pub SimId);

/// A wrapper type for notification IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub SimId);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A 2D position in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// Where an agent is and which way it faces, for rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Position,
    /// Heading in degrees, `atan2(dy, dx)` of the travel direction
    pub heading: f32,
}

/// Direction of travel of a vehicle entering an intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Eastbound (+x)
    East,
    /// Westbound (-x)
    West,
    /// Northbound (-y)
    North,
    /// Southbound (+y)
    South,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::East,
        Direction::West,
        Direction::North,
        Direction::South,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
        }
    }

    /// Direction after turning left (y grows downwards)
    pub fn left(self) -> Direction {
        match self {
            Direction::East => Direction::North,
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
        }
    }

    pub fn right(self) -> Direction {
        self.left().opposite()
    }

    /// Exit direction after performing `turn`
    pub fn after(self, turn: Turn) -> Direction {
        match turn {
            Turn::Straight => self,
            Turn::Left => self.left(),
            Turn::Right => self.right(),
        }
    }

    /// The signal axis that controls traffic moving in this direction
    pub fn axis(self) -> Axis {
        match self {
            Direction::North | Direction::South => Axis::NorthSouth,
            Direction::East | Direction::West => Axis::EastWest,
        }
    }

    /// Grid step `(dcol, drow)` for one block of travel
    pub fn grid_delta(self) -> (i64, i64) {
        match self {
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
            Direction::North => (0, -1),
            Direction::South => (0, 1),
        }
    }

    /// Short label used in path keys and console output
    pub fn letter(self) -> char {
        match self {
            Direction::East => 'E',
            Direction::West => 'W',
            Direction::North => 'N',
            Direction::South => 'S',
        }
    }
}

/// Movement a vehicle makes through an intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Turn {
    Straight,
    Left,
    Right,
}

impl Turn {
    /// The turn that takes a vehicle travelling `from` onto `to`.
    /// Returns `None` for a U-turn, which has no intersection path.
    pub fn between(from: Direction, to: Direction) -> Option<Turn> {
        if to == from {
            Some(Turn::Straight)
        } else if to == from.left() {
            Some(Turn::Left)
        } else if to == from.right() {
            Some(Turn::Right)
        } else {
            None
        }
    }
}

/// One of the two orthogonal traffic streams sharing the signal cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Axis A: gets green first in every cycle
    NorthSouth,
    /// Axis B
    EastWest,
}

/// A conflict zone inside an intersection's bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quadrant {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

/// Which of the two lanes of an approach a vehicle keeps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LaneSide {
    Inner,
    Outer,
}

impl LaneSide {
    /// Signed lane multiplier applied to the lane offset
    pub fn sign(self) -> f32 {
        match self {
            LaneSide::Inner => -1.0,
            LaneSide::Outer => 1.0,
        }
    }
}
