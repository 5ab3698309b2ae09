//! TLE (Two-Line Element) data management module
//!
//! This module handles TLE ingestion, validation and storage, plus fetching
//! constellation groups from Celestrak with a disk cache fallback.

pub mod cache;
pub mod fetcher;
pub mod mock_data;
pub mod parser;
pub mod store;
pub mod types;

pub use cache::{CachedTleGroup, TleDiskCache};
pub use fetcher::{CelestrakSource, StaticTleSource, TleSource, refresh_constellation};
pub use parser::{parse_orbital_elements, parse_tle, parse_tle_epoch_to_utc};
pub use store::{IngestReport, TleStore, TleUpdateListener};
pub use types::{AddOutcome, ConstellationInfo, OrbitalElements, TleError, TleRecord};
