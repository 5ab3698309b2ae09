//! Coordinate utilities
//!
//! Earth-frame transformations and time helpers:
//! - TEME (ECI) to ECEF via a GMST rotation about Z
//! - WGS84 geodetic to ECEF and back (iterative latitude solution)
//! - Topocentric look angles and great-circle ground distance

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// WGS84 equatorial radius in km
pub const WGS84_A_KM: f64 = 6378.137;
/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = 6.69437999014e-3;
/// Mean Earth radius used for haversine ground distances, in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Cartesian vector in km (or km/s for velocities)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f64 {
        (self - other).length()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Geodetic position (degrees, km above the ellipsoid)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
}

impl Position {
    pub const fn new(latitude: f64, longitude: f64, altitude_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_km,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.altitude_km.is_finite()
    }
}

/// Observer-relative pointing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAngles {
    pub elevation_deg: f64,
    /// Clockwise from north, in [0, 360)
    pub azimuth_deg: f64,
    pub range_km: f64,
}

/// Compute the Julian Date (UTC) for a given timestamp.
/// Uses the standard Gregorian calendar to JD conversion.
pub fn julian_date_utc(t: DateTime<Utc>) -> f64 {
    let mut y = t.year();
    let mut m = t.month() as i32;
    let d = t.day() as i32;

    let hour = t.hour() as f64;
    let minute = t.minute() as f64;
    let sec = t.second() as f64 + (t.nanosecond() as f64) * 1e-9_f64;
    let day_fraction = (hour + (minute + sec / 60.0) / 60.0) / 24.0;

    if m <= 2 {
        y -= 1;
        m += 12;
    }

    let a = (y as f64 / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    let jd0 = (365.25 * (y as f64 + 4716.0)).floor()
        + (30.6001 * ((m + 1) as f64)).floor()
        + d as f64
        + b
        - 1524.5;

    jd0 + day_fraction
}

/// Greenwich Mean Sidereal Time (radians) using the IAU 1982 polynomial.
/// Assumes UT1 ~= UTC.
pub fn gmst_rad(t: DateTime<Utc>) -> f64 {
    let jd = julian_date_utc(t);
    let t_cent = (jd - 2451545.0) / 36525.0;

    let gmst_sec =
        67310.54841 + (876600.0 * 3600.0 + 8640184.812866) * t_cent + 0.093104 * t_cent * t_cent
            - 6.2e-6 * t_cent * t_cent * t_cent;

    let sec_in_day = 86400.0_f64;
    let s = gmst_sec.rem_euclid(sec_in_day);
    s * (std::f64::consts::TAU / sec_in_day)
}

/// Rotate ECI (TEME) -> ECEF using simple GMST rotation about Z
pub fn eci_to_ecef_km(eci: Vec3, gmst: f64) -> Vec3 {
    let (s, c) = gmst.sin_cos();
    let x = c * eci.x + s * eci.y;
    let y = -s * eci.x + c * eci.y;
    Vec3::new(x, y, eci.z)
}

/// WGS84 geodetic -> ECEF (km)
pub fn geodetic_to_ecef_km(pos: &Position) -> Vec3 {
    let lat = pos.latitude.to_radians();
    let lon = pos.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let n = WGS84_A_KM / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    Vec3::new(
        (n + pos.altitude_km) * cos_lat * lon.cos(),
        (n + pos.altitude_km) * cos_lat * lon.sin(),
        (n * (1.0 - WGS84_E2) + pos.altitude_km) * sin_lat,
    )
}

/// ECEF (km) -> WGS84 geodetic
///
/// Five fixed-point iterations on the latitude keep the error far below a
/// kilometre for LEO altitudes.
pub fn ecef_to_geodetic(ecef: Vec3) -> Position {
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();
    let longitude = ecef.y.atan2(ecef.x).to_degrees();

    let mut lat = ecef.z.atan2(p * (1.0 - WGS84_E2));
    let mut n = WGS84_A_KM;
    for _ in 0..5 {
        let sin_lat = lat.sin();
        n = WGS84_A_KM / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        lat = (ecef.z + WGS84_E2 * n * sin_lat).atan2(p);
    }

    let altitude_km = if lat.cos().abs() > 1e-10 {
        p / lat.cos() - n
    } else {
        // Polar axis: measure along Z instead
        ecef.z.abs() - n * (1.0 - WGS84_E2)
    };

    Position::new(lat.to_degrees(), longitude, altitude_km)
}

/// Elevation, azimuth and slant range from an observer to an ECEF target
pub fn look_angles(target_ecef: Vec3, observer: &Position) -> LookAngles {
    let obs = geodetic_to_ecef_km(observer);
    let d = target_ecef - obs;
    let lat = observer.latitude.to_radians();
    let lon = observer.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    // ENU projection
    let east = -sin_lon * d.x + cos_lon * d.y;
    let north = -sin_lat * cos_lon * d.x - sin_lat * sin_lon * d.y + cos_lat * d.z;
    let up = cos_lat * cos_lon * d.x + cos_lat * sin_lon * d.y + sin_lat * d.z;

    let range_km = d.length();
    let elevation_deg = if range_km > 0.0 {
        (up / range_km).clamp(-1.0, 1.0).asin().to_degrees()
    } else {
        90.0
    };
    let mut azimuth_deg = east.atan2(north).to_degrees().rem_euclid(360.0);
    if azimuth_deg >= 360.0 {
        azimuth_deg = 0.0;
    }

    LookAngles {
        elevation_deg,
        azimuth_deg,
        range_km,
    }
}

/// Great-circle ground distance in meters between two geodetic points
pub fn haversine_m(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
