//! Reference-satellite scoring for the dynamic (D2) reference

use crate::orbital::{OrbitEngine, Position, distance};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DISTANCE_WEIGHT: f64 = 0.6;
pub const STABILITY_WEIGHT: f64 = 0.25;
pub const VISIBILITY_WEIGHT: f64 = 0.15;

/// Look-ahead used to judge orbit stability
pub const STABILITY_LOOKAHEAD_MIN: i64 = 10;
/// Distance drift over the look-ahead below which an orbit counts as stable
pub const STABLE_DRIFT_KM: f64 = 2.0 * 4.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub satellite_id: String,
    pub distance_km: f64,
    pub elevation_deg: f64,
    pub distance_fit: f64,
    pub stability: f64,
    pub visibility: f64,
    pub score: f64,
}

pub fn distance_fit(distance_km: f64, optimal_km: f64) -> f64 {
    let dev = (distance_km - optimal_km).abs();
    if dev <= 100.0 {
        1.0
    } else if dev <= 200.0 {
        0.9 - (dev - 100.0) / 100.0 * 0.2
    } else if dev <= 400.0 {
        0.7 - (dev - 200.0) / 200.0 * 0.3
    } else {
        0.4 - (dev - 400.0).min(600.0) / 600.0 * 0.4
    }
}

pub fn visibility_score(elevation_deg: f64) -> f64 {
    if elevation_deg > 30.0 {
        0.95
    } else if elevation_deg > 15.0 {
        0.85
    } else if elevation_deg > 5.0 {
        0.7
    } else {
        0.4
    }
}

/// Stability from the drift of the distance to `center` over the look-ahead
pub fn stability_score(drift_km: Option<f64>) -> f64 {
    match drift_km {
        Some(d) if d.abs() < STABLE_DRIFT_KM => 0.95,
        Some(_) => 0.7,
        None => 0.5,
    }
}

pub fn combined_score(distance_fit: f64, stability: f64, visibility: f64) -> f64 {
    DISTANCE_WEIGHT * distance_fit + STABILITY_WEIGHT * stability + VISIBILITY_WEIGHT * visibility
}

/// Score one satellite as seen from `center` at `at`; `None` if it cannot be propagated
pub fn score_candidate(
    engine: &OrbitEngine,
    satellite_id: &str,
    center: &Position,
    at: DateTime<Utc>,
    optimal_km: f64,
) -> Option<CandidateScore> {
    let position = engine.propagate(satellite_id, at).ok()?;
    let distance_km = distance(&position, center);
    let elevation_deg = engine.look_angles(&position, center).elevation_deg;

    let drift = engine
        .propagate(satellite_id, at + Duration::minutes(STABILITY_LOOKAHEAD_MIN))
        .ok()
        .map(|later| distance(&later, center) - distance_km);

    let distance_fit = distance_fit(distance_km, optimal_km);
    let stability = stability_score(drift);
    let visibility = visibility_score(elevation_deg);
    Some(CandidateScore {
        satellite_id: satellite_id.to_string(),
        distance_km,
        elevation_deg,
        distance_fit,
        stability,
        visibility,
        score: combined_score(distance_fit, stability, visibility),
    })
}

/// Qualification tier, lower is better
fn tier(c: &CandidateScore) -> u8 {
    if c.distance_km > 400.0 && c.elevation_deg > 10.0 {
        0
    } else if c.distance_km > 300.0 {
        1
    } else {
        2
    }
}

/// Order candidates best first: qualification tier, score, then lowest id
pub fn rank(candidates: &mut [CandidateScore]) {
    candidates.sort_by(|a, b| {
        tier(a)
            .cmp(&tier(b))
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| a.satellite_id.cmp(&b.satellite_id))
    });
}

/// Best reference satellite among `satellite_ids`
pub fn select_reference(
    engine: &OrbitEngine,
    satellite_ids: &[String],
    center: &Position,
    at: DateTime<Utc>,
    optimal_km: f64,
) -> Option<CandidateScore> {
    let mut scored: Vec<CandidateScore> = satellite_ids
        .iter()
        .filter_map(|id| score_candidate(engine, id, center, at, optimal_km))
        .collect();
    rank(&mut scored);
    scored.into_iter().next()
}
