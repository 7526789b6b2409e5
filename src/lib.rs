//! Grid Traffic Simulation Library
//!
//! A signal-controlled, congestion-aware traffic micro-simulation over a
//! grid of intersections. Runs headless; callers drive it with `tick(dt)`
//! and read agent poses and notifications back out.

pub mod simulation;
