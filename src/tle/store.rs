//! In-process TLE store
//!
//! Read-heavy, write-rare: lookups take a shared lock, ingestion takes the
//! write lock for the duration of a single record swap. Registered listeners
//! are told synchronously about every replaced satellite so derived caches
//! never propagate stale elements.

use crate::tle::parser::{parse_tle, split_tle_groups};
use crate::tle::types::{AddOutcome, ConstellationInfo, TleError, TleRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Hook for caches that derive state from a satellite's elements
pub trait TleUpdateListener: Send + Sync {
    fn on_tle_update(&self, satellite_id: &str);
}

/// Counts from a multi-group ingestion
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: Vec<TleError>,
}

impl IngestReport {
    pub fn accepted(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Default)]
pub struct TleStore {
    records: RwLock<HashMap<String, TleRecord>>,
    listeners: RwLock<Vec<Arc<dyn TleUpdateListener>>>,
}

impl TleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache to be invalidated when a satellite's elements change
    pub fn subscribe(&self, listener: Arc<dyn TleUpdateListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Add a single TLE pair
    ///
    /// An existing record for the same NORAD id is replaced only when the new
    /// epoch is strictly newer; otherwise this is a no-op returning `Unchanged`.
    pub fn add(
        &self,
        name: Option<&str>,
        line1: &str,
        line2: &str,
        constellation: &str,
    ) -> Result<AddOutcome, TleError> {
        let parsed = parse_tle(name, line1, line2)?;
        let satellite_id = parsed.norad_id.to_string();
        let record = TleRecord {
            name: parsed
                .name
                .unwrap_or_else(|| format!("NORAD {}", parsed.norad_id)),
            satellite_id: satellite_id.clone(),
            norad_id: parsed.norad_id,
            constellation: constellation.to_lowercase(),
            line1: parsed.line1,
            line2: parsed.line2,
            epoch: parsed.epoch,
            last_updated: Utc::now(),
        };

        let outcome = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            match records.get(&satellite_id) {
                Some(existing) if !record.is_newer_than(existing) => AddOutcome::Unchanged,
                Some(_) => {
                    records.insert(satellite_id.clone(), record);
                    AddOutcome::Updated
                }
                None => {
                    records.insert(satellite_id.clone(), record);
                    AddOutcome::Inserted
                }
            }
        };

        if outcome != AddOutcome::Unchanged {
            debug!(satellite_id = %satellite_id, ?outcome, "TLE stored");
            self.notify(&satellite_id);
        }
        Ok(outcome)
    }

    /// Ingest a text body holding one or many `[name] / line1 / line2` groups
    pub fn add_many(&self, text: &str, constellation: &str) -> IngestReport {
        let mut report = IngestReport::default();
        for group in split_tle_groups(text) {
            let result = group.and_then(|g| {
                self.add(g.name.as_deref(), &g.line1, &g.line2, constellation)
            });
            match result {
                Ok(AddOutcome::Inserted) => report.inserted += 1,
                Ok(AddOutcome::Updated) => report.updated += 1,
                Ok(AddOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!(constellation, error = %e, "Rejected TLE group");
                    report.errors.push(e);
                }
            }
        }
        info!(
            constellation,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            rejected = report.errors.len(),
            "TLE ingestion finished"
        );
        report
    }

    pub fn get(&self, satellite_id: &str) -> Option<TleRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(satellite_id)
            .cloned()
    }

    /// All records of a constellation, ordered by satellite id
    pub fn by_constellation(&self, name: &str) -> Vec<TleRecord> {
        let name = name.to_lowercase();
        let mut out: Vec<TleRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.constellation == name)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.satellite_id.cmp(&b.satellite_id));
        out
    }

    /// Records whose epoch lies within `max_age_hours` of `now`
    pub fn active(&self, now: DateTime<Utc>, max_age_hours: f64) -> Vec<TleRecord> {
        let mut out: Vec<TleRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.age_hours(now).abs() <= max_age_hours)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.satellite_id.cmp(&b.satellite_id));
        out
    }

    pub fn constellation_info(&self, name: &str) -> ConstellationInfo {
        let records = self.by_constellation(name);
        ConstellationInfo {
            constellation: name.to_lowercase(),
            satellite_count: records.len(),
            newest_epoch: records.iter().map(|r| r.epoch).max(),
            oldest_epoch: records.iter().map(|r| r.epoch).min(),
        }
    }

    pub fn satellite_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, satellite_id: &str) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_tle_update(satellite_id);
        }
    }
}
