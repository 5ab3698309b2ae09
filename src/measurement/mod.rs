//! Measurement event engine
//!
//! Builds SIB19-style broadcast contexts and evaluates the A4, A5 and D2
//! measurement events against them, either one instant at a time or as a
//! replayed scenario on a virtual clock.

use crate::orbital::PropagationError;
use crate::storage::StoreError;
use thiserror::Error;

pub mod broadcast;
pub mod compensation;
pub mod d2_cache;
pub mod engine;
pub mod events;
pub mod params;
pub mod scoring;
pub mod simulation;
pub mod trigger;

pub use broadcast::{
    BroadcastContext, BroadcastManager, BroadcastState, BroadcastStatus, NeighborCell,
    ReferenceLocation, SmtcConfig, TimeCorrection, generate_context,
};
pub use compensation::{CompensationCalculator, PositionCompensation};
pub use d2_cache::{D2Precomputer, D2ScenarioConfig, scenario_hash};
pub use engine::{MeasurementEngine, MeasurementResult};
pub use events::{EventEvaluation, HandoverDecision};
pub use params::{A4Params, A5Params, ConfigError, D2Params, EventParameters, EventType};
pub use scoring::{CandidateScore, select_reference};
pub use simulation::{MeasurementStats, SimulationReport, SimulationScenario, SimulationStatistics};
pub use trigger::{TriggerState, TriggerStateMap};

#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("no valid broadcast context")]
    NoContext,
    #[error("no candidate satellite could be propagated")]
    NoCandidates,
    #[error("broadcast context has no dynamic reference satellite")]
    NoReference,
    #[error("{event} needs {required} cells, context has {available}")]
    MissingCells {
        event: EventType,
        required: usize,
        available: usize,
    },
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
    #[error(transparent)]
    Propagation(#[from] PropagationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Task(String),
}
