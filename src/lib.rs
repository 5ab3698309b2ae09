//! LEO satellite simulator for NTN measurement studies
//!
//! TLE ingestion, SGP4 propagation, a prioritized precompute job pipeline
//! with batched persistence, and A4/A5/D2 measurement event evaluation
//! against SIB19-style broadcast contexts.

pub mod config;
pub mod logging;
pub mod measurement;
pub mod orbital;
pub mod precompute;
pub mod storage;
pub mod tle;
