//! Congestion tracking
//!
//! Every road carries a load counter that is rebuilt from scratch each tick
//! and a status that moves along
//! `normal → congested → blocked → congested → normal` with hysteresis.
//! Each transition produces one [`Notification`].

use log::{debug, info};
use std::collections::BTreeMap;

use super::config::SimConfig;
use super::ids::IdGenerator;
use super::road_network::EdgeKey;
use super::types::EventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeStatus {
    Normal,
    Congested,
    Blocked,
}

/// Per-road state. Mutated only by [`CongestionTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeState {
    pub load: f32,
    pub status: EdgeStatus,
    /// When the road last became congested from normal
    pub congested_since: Option<f32>,
    pub blocked_since: Option<f32>,
    /// Start of the current run of load at or above the congest threshold
    high_since: Option<f32>,
    /// Start of the current run of load at or below the clear threshold
    low_since: Option<f32>,
}

impl Default for EdgeState {
    fn default() -> Self {
        Self {
            load: 0.0,
            status: EdgeStatus::Normal,
            congested_since: None,
            blocked_since: None,
            high_since: None,
            low_since: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Warn,
    Block,
    Clear,
    Info,
}

/// One entry of the output event stream
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: EventId,
    pub kind: NotificationKind,
    pub message: String,
    /// Simulation time in seconds
    pub timestamp: f32,
    pub edge: EdgeKey,
}

/// Thresholds and hold times of the status machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionThresholds {
    pub congest: f32,
    pub clear: f32,
    pub block_seconds: f32,
    pub clear_persist_seconds: f32,
}

impl CongestionThresholds {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            congest: config.congest_threshold,
            clear: config.clear_threshold,
            block_seconds: config.block_seconds,
            clear_persist_seconds: config.clear_persist_seconds,
        }
    }
}

/// Load counters and status machines for every road
#[derive(Debug, Clone)]
pub struct CongestionTracker {
    thresholds: CongestionThresholds,
    edges: BTreeMap<EdgeKey, EdgeState>,
}

impl CongestionTracker {
    pub fn new(thresholds: CongestionThresholds, edges: impl IntoIterator<Item = EdgeKey>) -> Self {
        Self {
            thresholds,
            edges: edges
                .into_iter()
                .map(|e| (e, EdgeState::default()))
                .collect(),
        }
    }

    pub fn thresholds(&self) -> &CongestionThresholds {
        &self.thresholds
    }

    /// Zero every load counter; called before agents are processed
    pub fn reset_loads(&mut self) {
        for state in self.edges.values_mut() {
            state.load = 0.0;
        }
    }

    /// Adds `weight` to a road's load. Unknown roads are ignored.
    pub fn add_load(&mut self, edge: EdgeKey, weight: f32) {
        if let Some(state) = self.edges.get_mut(&edge) {
            state.load += weight;
        }
    }

    pub fn state(&self, edge: EdgeKey) -> Option<&EdgeState> {
        self.edges.get(&edge)
    }

    pub fn status(&self, edge: EdgeKey) -> EdgeStatus {
        self.edges
            .get(&edge)
            .map(|s| s.status)
            .unwrap_or(EdgeStatus::Normal)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &EdgeState)> {
        self.edges.iter()
    }

    pub fn count_with_status(&self, status: EdgeStatus) -> usize {
        self.edges.values().filter(|s| s.status == status).count()
    }

    /// Advances every status machine using the loads tallied this tick.
    /// Returns one notification per transition, in road order.
    pub fn advance(&mut self, now: f32, ids: &mut IdGenerator) -> Vec<Notification> {
        let thresholds = self.thresholds;
        let mut notifications = Vec::new();

        for (edge, state) in self.edges.iter_mut() {
            if let Some((kind, message)) = step(state, &thresholds, now, *edge) {
                match kind {
                    NotificationKind::Info => debug!("{}", message),
                    _ => info!("{}", message),
                }
                notifications.push(Notification {
                    id: ids.event(),
                    kind,
                    message,
                    timestamp: now,
                    edge: *edge,
                });
            }
        }

        notifications
    }
}

/// One status-machine step for a single road
fn step(
    state: &mut EdgeState,
    thresholds: &CongestionThresholds,
    now: f32,
    edge: EdgeKey,
) -> Option<(NotificationKind, String)> {
    let load = state.load;
    let high = load >= thresholds.congest;
    let low = load <= thresholds.clear;

    if high {
        state.high_since.get_or_insert(now);
    } else {
        state.high_since = None;
    }
    if low {
        state.low_since.get_or_insert(now);
    } else {
        state.low_since = None;
    }

    match state.status {
        EdgeStatus::Normal if high => {
            state.status = EdgeStatus::Congested;
            state.congested_since = Some(now);
            Some((
                NotificationKind::Warn,
                format!("Heavy congestion on road {} (load {:.1})", edge, load),
            ))
        }
        EdgeStatus::Normal => None,
        EdgeStatus::Congested => {
            let held_high = state
                .high_since
                .is_some_and(|since| now - since >= thresholds.block_seconds);
            let held_low = state
                .low_since
                .is_some_and(|since| now - since >= thresholds.clear_persist_seconds);
            if held_high {
                state.status = EdgeStatus::Blocked;
                state.blocked_since = Some(now);
                Some((
                    NotificationKind::Block,
                    format!("Road {} blocked (load {:.1})", edge, load),
                ))
            } else if held_low {
                state.status = EdgeStatus::Normal;
                state.congested_since = None;
                state.blocked_since = None;
                Some((
                    NotificationKind::Clear,
                    format!("Road {} recovered", edge),
                ))
            } else {
                None
            }
        }
        EdgeStatus::Blocked if low => {
            state.status = EdgeStatus::Congested;
            state.blocked_since = None;
            // The low run restarts so the clear hold is measured from here
            state.low_since = Some(now);
            Some((
                NotificationKind::Info,
                format!("Road {} easing, back to congested", edge),
            ))
        }
        EdgeStatus::Blocked => None,
    }
}
