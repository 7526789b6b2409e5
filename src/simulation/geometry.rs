//! Intersection geometry
//!
//! Every movement through an intersection runs from the middle of the
//! incoming block to the middle of the outgoing one: a straight lead-in up to
//! the box edge, a cubic Bézier across the box, and a straight lead-out.
//! Straight movements use collinear control points; turns pull the inner
//! control points towards the entry and exit edges of the box.

use anyhow::Result;
use std::collections::HashMap;

use super::config::SimConfig;
use super::road_network::RoadNetwork;
use super::types::{Direction, LaneSide, NodeId, Pose, Position, Quadrant, Turn};

/// Samples used to locate the stop and exit markers along a curve
const SCAN_STEPS: usize = 120;

/// Samples used for the numeric arc length
const LENGTH_STEPS: usize = 28;

/// Paths never report a length below this, so speed/length stays finite
pub const MIN_PATH_LENGTH: f32 = 1.0;

/// How far turn control points are pulled into the box, as a share of road width
const TURN_PULL: f32 = 0.2;

/// Lane centers sit this share of the road width off the road's center line
const LANE_CENTER: f32 = 0.25;

/// And each of the two lanes is this share of the road width off the lane center
const LANE_SPREAD: f32 = 0.14;

/// Identity of a precomputed path; vehicles with equal keys drive in file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
    pub node: NodeId,
    pub direction: Direction,
    pub turn: Turn,
    pub lane: LaneSide,
}

impl std::fmt::Display for PathKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{:?}@{}-{:?}",
            self.direction.letter(),
            self.turn,
            self.node,
            self.lane
        )
    }
}

/// A cubic Bézier curve in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicCurve {
    pub p0: Position,
    pub p1: Position,
    pub p2: Position,
    pub p3: Position,
}

impl CubicCurve {
    /// A straight segment expressed as a cubic, evenly parametrized
    pub fn line(p0: Position, p3: Position) -> Self {
        Self {
            p0,
            p1: p0.lerp(&p3, 1.0 / 3.0),
            p2: p0.lerp(&p3, 2.0 / 3.0),
            p3,
        }
    }

    pub fn point(&self, t: f32) -> Position {
        let mt = 1.0 - t;
        let a = mt * mt * mt;
        let b = 3.0 * mt * mt * t;
        let c = 3.0 * mt * t * t;
        let d = t * t * t;
        Position::new(
            a * self.p0.x + b * self.p1.x + c * self.p2.x + d * self.p3.x,
            a * self.p0.y + b * self.p1.y + c * self.p2.y + d * self.p3.y,
        )
    }

    pub fn tangent(&self, t: f32) -> Position {
        let mt = 1.0 - t;
        let a = 3.0 * mt * mt;
        let b = 6.0 * mt * t;
        let c = 3.0 * t * t;
        Position::new(
            a * (self.p1.x - self.p0.x) + b * (self.p2.x - self.p1.x) + c * (self.p3.x - self.p2.x),
            a * (self.p1.y - self.p0.y) + b * (self.p2.y - self.p1.y) + c * (self.p3.y - self.p2.y),
        )
    }

    /// Position and heading (degrees) at `t`
    pub fn eval(&self, t: f32) -> Pose {
        let d = self.tangent(t);
        Pose {
            position: self.point(t),
            heading: d.y.atan2(d.x).to_degrees(),
        }
    }

    /// Polyline approximation of the arc length
    pub fn approximate_length(&self) -> f32 {
        let mut length = 0.0;
        let mut prev = self.p0;
        for i in 1..=LENGTH_STEPS {
            let p = self.point(i as f32 / LENGTH_STEPS as f32);
            length += prev.distance(&p);
            prev = p;
        }
        length
    }
}

/// Lead-in, crossing and lead-out pieces of one movement.
/// `t` is the share of total arc length, so equal steps in `t` cover equal
/// distances whichever piece they fall in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathCurve {
    pieces: [CubicCurve; 3],
    lengths: [f32; 3],
}

impl PathCurve {
    pub fn new(pieces: [CubicCurve; 3]) -> Self {
        Self {
            lengths: pieces.map(|c| c.approximate_length()),
            pieces,
        }
    }

    pub fn length(&self) -> f32 {
        self.lengths.iter().sum()
    }

    /// The piece containing `t` and the local parameter within it
    fn locate(&self, t: f32) -> (&CubicCurve, f32) {
        let mut remaining = t.clamp(0.0, 1.0) * self.length();
        for (i, (piece, length)) in self.pieces.iter().zip(self.lengths).enumerate() {
            if remaining <= length || i == self.pieces.len() - 1 {
                let local = if length > 0.0 { remaining / length } else { 0.0 };
                return (piece, local.clamp(0.0, 1.0));
            }
            remaining -= length;
        }
        (&self.pieces[0], 0.0)
    }

    pub fn point(&self, t: f32) -> Position {
        let (piece, local) = self.locate(t);
        piece.point(local)
    }

    pub fn eval(&self, t: f32) -> Pose {
        let (piece, local) = self.locate(t);
        piece.eval(local)
    }
}

/// Axis-aligned box a point can be tested against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictBox {
    pub min: Position,
    pub max: Position,
}

impl ConflictBox {
    pub fn contains(&self, p: &Position) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// A precomputed trajectory for one movement at one intersection
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionPath {
    pub key: PathKey,
    pub curve: PathCurve,
    /// Arc length in world units, floored at `MIN_PATH_LENGTH`
    pub length: f32,
    /// Last sampled `t` before the conflict box
    pub stop_t: f32,
    /// First sampled `t` after leaving the conflict box
    pub exit_t: f32,
    /// Conflict zones held while `stop_t < t < exit_t`
    pub quadrants: &'static [Quadrant],
}

impl IntersectionPath {
    pub fn eval(&self, t: f32) -> Pose {
        self.curve.eval(t.clamp(0.0, 1.0))
    }

    /// Strictly between the stop and exit markers
    pub fn is_inside(&self, t: f32) -> bool {
        t > self.stop_t && t < self.exit_t
    }

    pub fn conflicts_with(&self, other: &IntersectionPath) -> bool {
        self.key.node == other.key.node
            && self.quadrants.iter().any(|q| other.quadrants.contains(q))
    }
}

/// Quadrants a movement reserves while crossing. Straight movements hold the
/// two quadrants of the half they cross; turns hold the single quadrant on
/// the inside of the turn. Two movements conflict exactly when their sets
/// intersect.
pub fn required_quadrants(direction: Direction, turn: Turn) -> &'static [Quadrant] {
    use Quadrant::*;
    match (direction, turn) {
        (Direction::East, Turn::Left) => &[NorthEast],
        (Direction::East, Turn::Right) => &[SouthEast],
        (Direction::East, Turn::Straight) => &[NorthEast, SouthEast],
        (Direction::West, Turn::Left) => &[SouthWest],
        (Direction::West, Turn::Right) => &[NorthWest],
        (Direction::West, Turn::Straight) => &[NorthWest, SouthWest],
        (Direction::North, Turn::Left) => &[NorthWest],
        (Direction::North, Turn::Right) => &[NorthEast],
        (Direction::North, Turn::Straight) => &[NorthEast, NorthWest],
        (Direction::South, Turn::Left) => &[SouthEast],
        (Direction::South, Turn::Right) => &[SouthWest],
        (Direction::South, Turn::Straight) => &[SouthEast, SouthWest],
    }
}

/// Road dimensions every path is built from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathGeometry {
    pub road_width: f32,
    pub stop_gap: f32,
    /// Distance from an intersection center to where its paths start and end
    pub half_span: f32,
}

impl PathGeometry {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            road_width: config.road_width,
            stop_gap: config.stop_gap,
            half_span: config.block_length / 2.0,
        }
    }

    /// The intersection's bounding square shrunk by the stop gap
    pub fn conflict_box(&self, center: Position) -> ConflictBox {
        let half = self.road_width / 2.0 - self.stop_gap;
        ConflictBox {
            min: Position::new(center.x - half, center.y - half),
            max: Position::new(center.x + half, center.y + half),
        }
    }

    /// Finds `(stop_t, exit_t)` by sampling the curve against the conflict box
    pub fn scan_entry_exit(&self, center: Position, curve: &PathCurve) -> (f32, f32) {
        let conflict_box = self.conflict_box(center);
        let mut stop_t = 0.0;
        let mut exit_t = 1.0;
        let mut inside = false;
        for i in 0..=SCAN_STEPS {
            let t = i as f32 / SCAN_STEPS as f32;
            let in_box = conflict_box.contains(&curve.point(t));
            if !inside && in_box {
                stop_t = (i.saturating_sub(1)) as f32 / SCAN_STEPS as f32;
                inside = true;
            }
            if inside && !in_box {
                exit_t = t;
                break;
            }
        }
        (stop_t, exit_t)
    }

    /// Builds the path for `key` at an intersection centered on `center`.
    /// Pure: equal inputs always give an equal path.
    pub fn build(&self, key: PathKey, center: Position) -> IntersectionPath {
        let w = self.road_width;
        let (cx, cy) = (center.x, center.y);
        let span = self.half_span;
        let lane = key.lane.sign() * w * LANE_SPREAD;

        let x_left = cx - w / 2.0;
        let x_right = cx + w / 2.0;
        let y_top = cy - w / 2.0;
        let y_bottom = cy + w / 2.0;

        // Lane centers, named by direction of travel
        let y_east = cy - w * LANE_CENTER + lane;
        let y_west = cy + w * LANE_CENTER + lane;
        let x_north = cx - w * LANE_CENTER + lane;
        let x_south = cx + w * LANE_CENTER + lane;

        let pull = w * TURN_PULL;

        let p0 = match key.direction {
            Direction::East => Position::new(cx - span, y_east),
            Direction::West => Position::new(cx + span, y_west),
            Direction::North => Position::new(x_north, cy + span),
            Direction::South => Position::new(x_south, cy - span),
        };
        // Where the lane meets the box on the way in
        let entry = match key.direction {
            Direction::East => Position::new(x_left, y_east),
            Direction::West => Position::new(x_right, y_west),
            Direction::North => Position::new(x_north, y_bottom),
            Direction::South => Position::new(x_south, y_top),
        };

        let exit = key.direction.after(key.turn);
        let leave = match exit {
            Direction::East => Position::new(x_right, y_east),
            Direction::West => Position::new(x_left, y_west),
            Direction::North => Position::new(x_north, y_top),
            Direction::South => Position::new(x_south, y_bottom),
        };
        let p3 = match exit {
            Direction::East => Position::new(cx + span, y_east),
            Direction::West => Position::new(cx - span, y_west),
            Direction::North => Position::new(x_north, cy - span),
            Direction::South => Position::new(x_south, cy + span),
        };

        let crossing = if key.turn == Turn::Straight {
            CubicCurve::line(entry, leave)
        } else {
            // First control point: along the entry lane, just inside the box
            let p1 = match key.direction {
                Direction::East if exit == Direction::North => Position::new(x_left + pull, y_east),
                Direction::East => Position::new(x_right - pull, y_east),
                Direction::West if exit == Direction::South => Position::new(x_right - pull, y_west),
                Direction::West => Position::new(x_left + pull, y_west),
                Direction::North if exit == Direction::West => Position::new(x_north, y_bottom - pull),
                Direction::North => Position::new(x_north, y_top + pull),
                Direction::South if exit == Direction::East => Position::new(x_south, y_top + pull),
                Direction::South => Position::new(x_south, y_bottom - pull),
            };
            // Second control point: on the exit lane, just inside the box
            let p2 = match exit {
                Direction::North => Position::new(x_north, y_top + pull),
                Direction::South => Position::new(x_south, y_bottom - pull),
                Direction::West => Position::new(x_left + pull, y_west),
                Direction::East => Position::new(x_right - pull, y_east),
            };
            CubicCurve {
                p0: entry,
                p1,
                p2,
                p3: leave,
            }
        };

        let curve = PathCurve::new([
            CubicCurve::line(p0, entry),
            crossing,
            CubicCurve::line(leave, p3),
        ]);
        let length = curve.length();

        let (stop_t, exit_t) = self.scan_entry_exit(center, &curve);

        IntersectionPath {
            key,
            curve,
            length: length.max(MIN_PATH_LENGTH),
            stop_t,
            exit_t,
            quadrants: required_quadrants(key.direction, key.turn),
        }
    }
}

/// Paths built on first request and reused for the rest of the run
#[derive(Debug, Clone)]
pub struct PathCache {
    geometry: PathGeometry,
    paths: HashMap<PathKey, IntersectionPath>,
}

impl PathCache {
    pub fn new(geometry: PathGeometry) -> Self {
        Self {
            geometry,
            paths: HashMap::new(),
        }
    }

    pub fn geometry(&self) -> &PathGeometry {
        &self.geometry
    }

    /// Gets the path for `key`, building it if this is the first request
    pub fn get(&mut self, network: &RoadNetwork, key: PathKey) -> Result<IntersectionPath> {
        if let Some(path) = self.paths.get(&key) {
            return Ok(path.clone());
        }
        let center = network.position(key.node)?;
        let path = self.geometry.build(key, center);
        self.paths.insert(key, path.clone());
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
