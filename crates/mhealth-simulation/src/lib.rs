//! mHealth-Simulation: synthetic mobile-sensor recordings
//!
//! Deterministic (seeded) signals for tests, benchmarks and demos.

pub mod patterns;
pub mod sensor_simulator;

pub use patterns::SignalPattern;
pub use sensor_simulator::{AxisConfig, SensorSimulator, SimulationConfig};
