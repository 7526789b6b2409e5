//! Road network graph for pathfinding
//!
//! An `n × n` grid of intersections joined by two-way roads. The graph is
//! built once and never mutated; edge *state* lives in the congestion tracker.

use anyhow::{Context, Result};
use petgraph::graph::{NodeIndex, UnGraph};

use super::types::{Direction, NodeId, Position};

/// Identity of a road: the unordered pair of intersections it joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey(NodeId, NodeId);

impl EdgeKey {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn nodes(&self) -> (NodeId, NodeId) {
        (self.0, self.1)
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}

/// An intersection
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub position: Position,
    pub col: usize,
    pub row: usize,
    pub neighbors: Vec<NodeId>,
}

/// Static grid of intersections and the roads between them
#[derive(Debug, Clone)]
pub struct RoadNetwork {
    /// The underlying petgraph undirected graph (one edge per two-way road)
    graph: UnGraph<NodeId, EdgeKey>,

    nodes: Vec<Node>,

    size: usize,
}

impl RoadNetwork {
    /// Builds an `n × n` grid with intersections `block_length` apart.
    /// Node ids are row-major, so `(col, row)` is node `row * n + col`.
    pub fn grid(n: usize, block_length: f32) -> Self {
        let mut graph = UnGraph::with_capacity(n * n, 2 * n * n.saturating_sub(1));
        let mut nodes = Vec::with_capacity(n * n);

        for row in 0..n {
            for col in 0..n {
                let id = NodeId(row * n + col);
                let position = Position::new(
                    (col as f32 + 1.0) * block_length,
                    (row as f32 + 1.0) * block_length,
                );
                graph.add_node(id);
                nodes.push(Node {
                    id,
                    position,
                    col,
                    row,
                    neighbors: Vec::with_capacity(4),
                });
            }
        }

        let mut network = Self {
            graph,
            nodes,
            size: n,
        };

        for row in 0..n {
            for col in 0..n {
                let id = NodeId(row * n + col);
                for dir in Direction::ALL {
                    if let Some(other) = network.neighbor_in(id, dir) {
                        network.nodes[id.0].neighbors.push(other);
                        // Each road is added once, from its lower-numbered end
                        if id < other {
                            network.graph.add_edge(
                                NodeIndex::new(id.0),
                                NodeIndex::new(other.0),
                                EdgeKey::new(id, other),
                            );
                        }
                    }
                }
            }
        }

        network
    }

    /// Intersections per axis
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Gets the position of an intersection
    pub fn position(&self, id: NodeId) -> Result<Position> {
        self.node(id)
            .map(|n| n.position)
            .with_context(|| format!("Intersection {} not found", id))
    }

    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.neighbors.as_slice()).unwrap_or(&[])
    }

    /// The node one block away in `dir`, if it is inside the grid
    pub fn neighbor_in(&self, id: NodeId, dir: Direction) -> Option<NodeId> {
        let n = self.size as i64;
        let col = (id.0 % self.size.max(1)) as i64;
        let row = (id.0 / self.size.max(1)) as i64;
        if id.0 >= self.size * self.size {
            return None;
        }
        let (dc, dr) = dir.grid_delta();
        let (c, r) = (col + dc, row + dr);
        if (0..n).contains(&c) && (0..n).contains(&r) {
            Some(NodeId((r * n + c) as usize))
        } else {
            None
        }
    }

    /// Direction of travel from `from` to its neighbour `to`
    pub fn direction_between(&self, from: NodeId, to: NodeId) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|&dir| self.neighbor_in(from, dir) == Some(to))
    }

    pub fn has_edge(&self, edge: EdgeKey) -> bool {
        let (a, b) = edge.nodes();
        self.neighbors(a).contains(&b)
    }

    /// All roads, each reported once
    pub fn edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.graph.edge_references().map(|e| *e.weight())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Ways into the network from outside: `(node, direction of travel)`
    /// for every boundary side of every boundary node
    pub fn boundary_entries(&self) -> Vec<(NodeId, Direction)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                Direction::ALL
                    .into_iter()
                    .filter(|dir| self.neighbor_in(node.id, dir.opposite()).is_none())
                    .map(move |dir| (node.id, dir))
            })
            .collect()
    }

    /// Ways out of the network: `(node, direction of travel)`
    pub fn boundary_exits(&self) -> Vec<(NodeId, Direction)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                Direction::ALL
                    .into_iter()
                    .filter(|dir| self.neighbor_in(node.id, *dir).is_none())
                    .map(move |dir| (node.id, dir))
            })
            .collect()
    }

    pub(crate) fn graph(&self) -> &UnGraph<NodeId, EdgeKey> {
        &self.graph
    }
}
