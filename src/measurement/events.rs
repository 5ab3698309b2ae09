//! A4, A5 and D2 condition evaluation against a broadcast context

use crate::measurement::MeasurementError;
use crate::measurement::broadcast::{BroadcastContext, NeighborCell};
use crate::measurement::compensation::CompensationCalculator;
use crate::measurement::params::{A4Params, A5Params, D2Params, EventParameters, EventType};
use crate::orbital::{
    OrbitEngine, Position, PropagationError, RadioConfig, SatellitePosition, SignalModel, distance,
    haversine_m,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverDecision {
    NoHandover,
    Handover,
}

/// Raw condition outcome before the trigger state machine
#[derive(Debug, Clone, PartialEq)]
pub struct EventEvaluation {
    pub entering: bool,
    pub leaving: bool,
    pub condition_met: bool,
    pub measurement_values: BTreeMap<String, f64>,
    pub details: serde_json::Value,
}

/// Everything an evaluation reads
pub struct EventInputs<'a> {
    pub engine: &'a OrbitEngine,
    pub radio: &'a RadioConfig,
    pub compensation: &'a CompensationCalculator,
    pub context: &'a BroadcastContext,
}

/// (entering, leaving) for A4 against the serving cell
pub fn a4_relative(neighbor_dbm: f64, serving_dbm: f64, hysteresis_db: f64) -> (bool, bool) {
    (
        neighbor_dbm > serving_dbm + hysteresis_db,
        neighbor_dbm < serving_dbm - hysteresis_db,
    )
}

/// (entering, leaving) for A4 against the absolute threshold
pub fn a4_absolute(neighbor_dbm: f64, threshold_dbm: f64, hysteresis_db: f64) -> (bool, bool) {
    (
        neighbor_dbm > threshold_dbm + hysteresis_db,
        neighbor_dbm < threshold_dbm - hysteresis_db,
    )
}

/// (entering, leaving) for A5
pub fn a5_conditions(pcell_dbm: f64, pscell_dbm: f64, p: &A5Params) -> (bool, bool) {
    let hys = p.hysteresis_db;
    (
        pscell_dbm - hys > p.threshold1_dbm && pcell_dbm + hys < p.threshold2_dbm,
        pscell_dbm + hys < p.threshold1_dbm || pcell_dbm - hys > p.threshold2_dbm,
    )
}

/// (condition_met, entering, leaving) for D2, distances in m
pub fn d2_conditions(satellite_m: f64, ground_m: f64, p: &D2Params) -> (bool, bool, bool) {
    let hys = p.hysteresis_m;
    (
        satellite_m > p.thresh1_m && ground_m < p.thresh2_m,
        satellite_m - hys > p.thresh1_m && ground_m + hys < p.thresh2_m,
        satellite_m + hys < p.thresh1_m || ground_m - hys > p.thresh2_m,
    )
}

fn require_cells(
    context: &BroadcastContext,
    event: EventType,
    required: usize,
) -> Result<(), MeasurementError> {
    let available = context.neighbor_cells.len();
    if available < required {
        return Err(MeasurementError::MissingCells {
            event,
            required,
            available,
        });
    }
    Ok(())
}

impl EventInputs<'_> {
    fn cell_rsrp(
        &self,
        cell: &NeighborCell,
        ue: &Position,
        at: DateTime<Utc>,
    ) -> Result<(SatellitePosition, f64), PropagationError> {
        let position = self.engine.propagate(&cell.satellite_id, at)?;
        let rsrp = self.radio.rsrp_dbm(
            distance(&position, ue),
            cell.carrier_frequency_mhz,
            SignalModel::FreeSpace,
        );
        Ok((position, rsrp))
    }

    pub fn evaluate(
        &self,
        ue: &Position,
        params: &EventParameters,
        at: DateTime<Utc>,
    ) -> Result<EventEvaluation, MeasurementError> {
        match params {
            EventParameters::A4(p) => self.evaluate_a4(ue, p, at),
            EventParameters::A5(p) => self.evaluate_a5(ue, p, at),
            EventParameters::D2(p) => self.evaluate_d2(ue, p, at),
        }
    }

    fn evaluate_a4(
        &self,
        ue: &Position,
        p: &A4Params,
        at: DateTime<Utc>,
    ) -> Result<EventEvaluation, MeasurementError> {
        let cells = &self.context.neighbor_cells;
        require_cells(self.context, EventType::A4, 2)?;

        let mut best: Option<(&NeighborCell, f64)> = None;
        let mut last_err = None;
        for cell in &cells[1..] {
            match self.cell_rsrp(cell, ue, at) {
                Ok((_, rsrp)) if best.is_none_or(|(_, b)| rsrp > b) => best = Some((cell, rsrp)),
                Ok(_) => {}
                Err(e) => {
                    debug!("A4 neighbor {} skipped: {}", cell.satellite_id, e);
                    last_err = Some(e);
                }
            }
        }
        let Some((target, neighbor_rsrp)) = best else {
            return Err(last_err
                .map(MeasurementError::from)
                .unwrap_or(MeasurementError::NoCandidates));
        };

        let serving = &cells[0];
        let mut values = BTreeMap::new();
        values.insert("neighbor_rsrp_dbm".to_string(), neighbor_rsrp);

        let compensated = self.cell_rsrp(serving, ue, at).ok().and_then(|(_, serving_rsrp)| {
            self.compensation
                .compensation(
                    self.engine,
                    &serving.satellite_id,
                    &target.satellite_id,
                    ue,
                    target.carrier_frequency_mhz,
                    at,
                )
                .ok()
                .map(|c| (serving_rsrp, c))
        });

        let (entering, leaving) = match &compensated {
            Some((serving_rsrp, c)) => {
                let adjusted = neighbor_rsrp + c.signal_compensation_db;
                values.insert("serving_rsrp_dbm".to_string(), *serving_rsrp);
                values.insert("compensated_neighbor_rsrp_dbm".to_string(), adjusted);
                values.insert("signal_compensation_db".to_string(), c.signal_compensation_db);
                values.insert("delta_s_m".to_string(), c.delta_s_m);
                values.insert("delta_t_ms".to_string(), c.delta_t_ms);
                values.insert("doppler_correction_hz".to_string(), c.doppler_correction_hz);
                a4_relative(adjusted, *serving_rsrp, p.hysteresis_db)
            }
            None => a4_absolute(neighbor_rsrp, p.threshold_dbm, p.hysteresis_db),
        };
        let decision = if entering {
            HandoverDecision::Handover
        } else {
            HandoverDecision::NoHandover
        };

        Ok(EventEvaluation {
            entering,
            leaving,
            condition_met: entering,
            measurement_values: values,
            details: json!({
                "serving_satellite": serving.satellite_id,
                "target_satellite": target.satellite_id,
                "target_pci": target.pci,
                "compensation_applied": compensated.is_some(),
                "threshold_dbm": p.threshold_dbm,
                "hysteresis_db": p.hysteresis_db,
                "decision": decision,
            }),
        })
    }

    fn evaluate_a5(
        &self,
        ue: &Position,
        p: &A5Params,
        at: DateTime<Utc>,
    ) -> Result<EventEvaluation, MeasurementError> {
        require_cells(self.context, EventType::A5, 2)?;
        let pcell = &self.context.neighbor_cells[0];
        let pscell = &self.context.neighbor_cells[1];
        let (_, pcell_rsrp) = self.cell_rsrp(pcell, ue, at)?;
        let (_, pscell_rsrp) = self.cell_rsrp(pscell, ue, at)?;
        let (entering, leaving) = a5_conditions(pcell_rsrp, pscell_rsrp, p);

        let mut values = BTreeMap::new();
        values.insert("pcell_rsrp_dbm".to_string(), pcell_rsrp);
        values.insert("pscell_rsrp_dbm".to_string(), pscell_rsrp);
        Ok(EventEvaluation {
            entering,
            leaving,
            condition_met: entering,
            measurement_values: values,
            details: json!({
                "pcell_satellite": pcell.satellite_id,
                "pscell_satellite": pscell.satellite_id,
                "threshold1_dbm": p.threshold1_dbm,
                "threshold2_dbm": p.threshold2_dbm,
                "hysteresis_db": p.hysteresis_db,
            }),
        })
    }

    /// Nearest non-reference cell satellite to the UE, ties broken by id
    fn nearest_serving(
        &self,
        reference_id: &str,
        ue: &Position,
        at: DateTime<Utc>,
    ) -> Option<SatellitePosition> {
        self.context
            .neighbor_cells
            .iter()
            .filter(|c| c.satellite_id != reference_id)
            .filter_map(|c| self.engine.propagate(&c.satellite_id, at).ok())
            .map(|pos| (distance(&pos, ue), pos))
            .min_by(|(da, a), (db, b)| {
                da.total_cmp(db)
                    .then_with(|| a.satellite_id.cmp(&b.satellite_id))
            })
            .map(|(_, pos)| pos)
    }

    fn evaluate_d2(
        &self,
        ue: &Position,
        p: &D2Params,
        at: DateTime<Utc>,
    ) -> Result<EventEvaluation, MeasurementError> {
        let reference_id = self
            .context
            .dynamic_reference_satellite()
            .ok_or(MeasurementError::NoReference)?;
        let reference = self.engine.propagate(reference_id, at)?;

        let serving = match &p.serving_satellite {
            Some(id) => self.engine.propagate(id, at)?,
            None => self.nearest_serving(reference_id, ue, at).ok_or(
                MeasurementError::MissingCells {
                    event: EventType::D2,
                    required: 2,
                    available: self.context.neighbor_cells.len(),
                },
            )?,
        };

        let satellite_m = distance(&serving, &reference) * 1000.0;
        let reference_ground = reference.ground_projection();
        let ground_m = haversine_m(ue, &reference_ground);
        let (condition_met, entering, leaving) = d2_conditions(satellite_m, ground_m, p);

        let mut values = BTreeMap::new();
        values.insert("satellite_distance_m".to_string(), satellite_m);
        values.insert("ground_distance_m".to_string(), ground_m);
        Ok(EventEvaluation {
            entering,
            leaving,
            condition_met,
            measurement_values: values,
            details: json!({
                "reference_satellite": reference_id,
                "serving_satellite": serving.satellite_id,
                "reference_position": reference_ground,
                "thresh1_m": p.thresh1_m,
                "thresh2_m": p.thresh2_m,
                "hysteresis_m": p.hysteresis_m,
            }),
        })
    }
}
