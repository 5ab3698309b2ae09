//! Orbital mechanics module
//!
//! SGP4 propagation, coordinate transformations, link budgets and the
//! virtual clock used by replayed simulations.

pub mod coordinates;
pub mod engine;
pub mod propagation;
pub mod signal;
pub mod time;

pub use coordinates::{LookAngles, Position, Vec3, haversine_m};
pub use engine::{Cartesian, OrbitEngine, SatellitePosition, VisibilityWindow, distance};
pub use propagation::{PropagationError, Propagator, minutes_since_epoch, orbital_period};
pub use signal::{RadioConfig, SignalModel, signal_strength};
pub use time::VirtualClock;
