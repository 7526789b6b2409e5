//! Congestion-aware routing
//!
//! Dijkstra over the road network (A* with a null heuristic, the way the
//! graph crate exposes it) with edge costs supplied by the caller.

use petgraph::algo::astar;
use petgraph::graph::NodeIndex;

use super::congestion::{CongestionTracker, EdgeStatus};
use super::road_network::{EdgeKey, RoadNetwork};
use super::types::NodeId;

/// Routing cost of one road given its status
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penalty {
    /// Cost of a congested road before the detour bias is applied
    pub congested_cost: f32,
    /// Per-vehicle aversion to congestion, `>= 1`
    pub detour_bias: f32,
}

impl Penalty {
    pub fn cost(&self, status: EdgeStatus) -> f32 {
        match status {
            EdgeStatus::Normal => 1.0,
            EdgeStatus::Congested => self.congested_cost * self.detour_bias,
            EdgeStatus::Blocked => f32::INFINITY,
        }
    }

    /// Cost function over live road states, optionally refusing one road
    /// (the one a vehicle just drove in on, so routes never start with a U-turn)
    pub fn edge_cost<'a>(
        &'a self,
        congestion: &'a CongestionTracker,
        forbidden: Option<EdgeKey>,
    ) -> impl Fn(EdgeKey) -> f32 + 'a {
        move |edge| {
            if Some(edge) == forbidden {
                f32::INFINITY
            } else {
                self.cost(congestion.status(edge))
            }
        }
    }
}

/// Shortest path from `from` to `to` including both ends, or `None` when the
/// destination cannot be reached with finite cost.
pub fn shortest_path<F>(
    network: &RoadNetwork,
    from: NodeId,
    to: NodeId,
    edge_cost: F,
) -> Option<Vec<NodeId>>
where
    F: Fn(EdgeKey) -> f32,
{
    if network.node(from).is_none() || network.node(to).is_none() {
        return None;
    }
    if from == to {
        return Some(vec![from]);
    }

    let graph = network.graph();
    let goal = NodeIndex::new(to.0);

    let (cost, node_path) = astar(
        graph,
        NodeIndex::new(from.0),
        |node| node == goal,
        |edge| edge_cost(*edge.weight()),
        |_| 0.0, // Null heuristic = Dijkstra
    )?;

    if !cost.is_finite() {
        return None;
    }

    Some(node_path.into_iter().map(|idx| graph[idx]).collect())
}

/// Roads traversed by a node path, in order
pub fn path_edges(path: &[NodeId]) -> impl Iterator<Item = EdgeKey> + '_ {
    path.windows(2).map(|pair| EdgeKey::new(pair[0], pair[1]))
}
