//! Quadrant reservations at intersections
//!
//! A per-tick advisory lock table. It is rebuilt from scratch every tick:
//! first from vehicles already inside a box, then by vehicles claiming entry
//! in processing order. A claim takes every quadrant it needs or none.

use std::collections::HashMap;

use super::types::{NodeId, Quadrant, VehicleId};

#[derive(Debug, Clone, Default)]
pub struct QuadrantReservations {
    held: HashMap<(NodeId, Quadrant), VehicleId>,
}

impl QuadrantReservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }

    /// True when none of `quadrants` at `node` is held by another vehicle
    pub fn all_free(&self, node: NodeId, quadrants: &[Quadrant], vehicle: VehicleId) -> bool {
        quadrants.iter().all(|q| match self.held.get(&(node, *q)) {
            None => true,
            Some(holder) => *holder == vehicle,
        })
    }

    /// Marks `quadrants` as held by `vehicle` regardless of current holders.
    /// Used for vehicles already committed to the box.
    pub fn hold(&mut self, node: NodeId, quadrants: &[Quadrant], vehicle: VehicleId) {
        for q in quadrants {
            self.held.entry((node, *q)).or_insert(vehicle);
        }
    }

    /// Atomically acquires every quadrant or none
    pub fn try_acquire(&mut self, node: NodeId, quadrants: &[Quadrant], vehicle: VehicleId) -> bool {
        if !self.all_free(node, quadrants, vehicle) {
            return false;
        }
        self.hold(node, quadrants, vehicle);
        true
    }

    pub fn holder(&self, node: NodeId, quadrant: Quadrant) -> Option<VehicleId> {
        self.held.get(&(node, quadrant)).copied()
    }

    pub fn is_held(&self, node: NodeId, quadrant: Quadrant) -> bool {
        self.held.contains_key(&(node, quadrant))
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
