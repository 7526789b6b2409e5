//! Identity source for agents and notifications

use super::types::{EventId, PedestrianId, SimId, VehicleId};

/// Hands out monotonically increasing ids shared by vehicles, pedestrians
/// and notifications. Passed by `&mut` into every spawn so tests can seed it
/// and assert on exact ids.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next);
        self.next += 1;
        id
    }

    pub fn vehicle(&mut self) -> VehicleId {
        VehicleId(self.next_sim_id())
    }

    pub fn pedestrian(&mut self) -> PedestrianId {
        PedestrianId(self.next_sim_id())
    }

    pub fn event(&mut self) -> EventId {
        EventId(self.next_sim_id())
    }

    /// The id the next call will return, without consuming it
    pub fn peek(&self) -> u64 {
        self.next
    }
}
