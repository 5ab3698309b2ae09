//! TLE parsing utilities

use crate::tle::types::{OrbitalElements, TLE_LINE_LEN, TleError};
use chrono::{DateTime, NaiveDate, Utc};

/// Earth gravitational parameter in m^3/s^2
const MU_EARTH: f64 = 3.986004418e14;

/// Fields extracted from a validated TLE pair
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTle {
    pub name: Option<String>,
    pub norad_id: u32,
    pub line1: String,
    pub line2: String,
    pub epoch: DateTime<Utc>,
}

/// Parse TLE epoch from line 1 to UTC DateTime
pub fn parse_tle_epoch_to_utc(line1: &str) -> Option<DateTime<Utc>> {
    // TLE line1 epoch fields (columns 19–32, 1-based; 18..32 0-based)
    let s = line1.get(18..32)?;
    let mut parts = s.trim().split('.');
    let yyddd = parts.next()?;
    let frac = parts.next().unwrap_or("0");
    if yyddd.len() != 5 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (yy_str, ddd_str) = yyddd.split_at(2);
    let yy: i32 = yy_str.parse().ok()?;
    let ddd: u32 = ddd_str.parse().ok()?;
    let year = if yy >= 57 { 1900 + yy } else { 2000 + yy };
    // from_yo_opt rejects day 0 and days past the end of the year
    let date = NaiveDate::from_yo_opt(year, ddd)?;
    let frac_sec: f64 = format!("0.{}", frac).parse::<f64>().ok()? * 86400.0;
    let secs = frac_sec.trunc() as i64;
    let nanos = ((frac_sec - (secs as f64)) * 1e9).round() as i64;
    let ndt = date.and_hms_opt(0, 0, 0)?
        + chrono::Duration::seconds(secs)
        + chrono::Duration::nanoseconds(nanos);
    Some(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

/// NORAD catalog number from columns 3–7 of either line
pub fn parse_norad_id(line: &str) -> Option<u32> {
    line.get(2..7)?.trim().parse().ok()
}

/// Validate a TLE pair and extract its identity fields
pub fn parse_tle(name: Option<&str>, line1: &str, line2: &str) -> Result<ParsedTle, TleError> {
    for (idx, line, prefix) in [(1, line1, "1 "), (2, line2, "2 ")] {
        if line.len() != TLE_LINE_LEN || !line.is_ascii() {
            return Err(TleError::InvalidFormat(format!(
                "line {} must be {} ASCII characters, got {}",
                idx,
                TLE_LINE_LEN,
                line.len()
            )));
        }
        if !line.starts_with(prefix) {
            return Err(TleError::InvalidFormat(format!(
                "line {} must start with '{}'",
                idx,
                prefix.trim()
            )));
        }
    }

    let norad_id = parse_norad_id(line1)
        .ok_or_else(|| TleError::InvalidFormat("unreadable NORAD id on line 1".into()))?;
    if parse_norad_id(line2) != Some(norad_id) {
        return Err(TleError::InvalidFormat(format!(
            "NORAD id mismatch between lines for {}",
            norad_id
        )));
    }

    let epoch = parse_tle_epoch_to_utc(line1).ok_or_else(|| {
        TleError::EpochParseError(line1.get(18..32).unwrap_or_default().trim().to_string())
    })?;

    Ok(ParsedTle {
        name: name.map(str::trim).filter(|n| !n.is_empty()).map(String::from),
        norad_id,
        line1: line1.to_string(),
        line2: line2.to_string(),
        epoch,
    })
}

/// Read the mean elements from line 2 and derive the semi-major axis
pub fn parse_orbital_elements(line2: &str) -> Option<OrbitalElements> {
    let field = |range: std::ops::Range<usize>| -> Option<f64> { line2.get(range)?.trim().parse().ok() };
    let mean_motion_rev_per_day = field(52..63)?;
    let eccentricity: f64 = format!("0.{}", line2.get(26..33)?.trim()).parse().ok()?;

    let n_rad_per_s = mean_motion_rev_per_day * std::f64::consts::TAU / 86400.0;
    let semi_major_axis_km = if n_rad_per_s > 0.0 {
        (MU_EARTH / (n_rad_per_s * n_rad_per_s)).cbrt() / 1000.0
    } else {
        0.0
    };

    Some(OrbitalElements {
        inclination_deg: field(8..16)?,
        raan_deg: field(17..25)?,
        eccentricity,
        arg_perigee_deg: field(34..42)?,
        mean_anomaly_deg: field(43..51)?,
        mean_motion_rev_per_day,
        semi_major_axis_km,
    })
}

/// Raw group scanned out of a TLE text body
#[derive(Debug, Clone, PartialEq)]
pub struct RawTleGroup {
    pub name: Option<String>,
    pub line1: String,
    pub line2: String,
}

/// Scan arbitrary text for `[name] / 1 ... / 2 ...` groups
///
/// Orphan element lines are returned as errors so the caller can report them
/// alongside the groups that did parse.
pub fn split_tle_groups(body: &str) -> Vec<Result<RawTleGroup, TleError>> {
    let lines: Vec<&str> = body
        .lines()
        .map(|raw| raw.trim_matches(|c| c == '\u{feff}' || c == '\r' || c == '\n' || c == ' '))
        .filter(|line| !line.is_empty())
        .collect();

    let mut groups = Vec::new();
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("1 ") {
            if let Some(next) = lines.get(i + 1).filter(|l| l.starts_with("2 ")) {
                // A name line directly before line 1 belongs to this group
                let name = i
                    .checked_sub(1)
                    .map(|p| lines[p])
                    .filter(|p| !p.starts_with("1 ") && !p.starts_with("2 "))
                    .map(String::from);
                groups.push(Ok(RawTleGroup {
                    name,
                    line1: line.to_string(),
                    line2: next.to_string(),
                }));
                i += 2;
                continue;
            }
            groups.push(Err(TleError::InvalidFormat(format!(
                "line 1 without matching line 2: {}",
                line
            ))));
        } else if line.starts_with("2 ") {
            groups.push(Err(TleError::InvalidFormat(format!(
                "line 2 without preceding line 1: {}",
                line
            ))));
        }
        i += 1;
    }
    groups
}
