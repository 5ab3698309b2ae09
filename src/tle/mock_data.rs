//! Mock TLE data for testing purposes.
//!
//! The TESTSAT group is a synthetic 550 km, 53° shell with epoch 2024-01-01T00:00Z.
//! TESTSAT-1 passes almost directly over Taipei at epoch; the others trail or lead it
//! along the same plane (TESTSAT-6 sits in a plane 6° further east), TESTSAT-7 and
//! TESTSAT-8 are below the Taipei horizon at epoch.

#![cfg(test)]
#![allow(dead_code)]

pub const ISS_LINE1: &str =
    "1 25544U 98067A   24226.56250000  .00007211  00000-0  13379-3 0  9991";
pub const ISS_LINE2: &str =
    "2 25544  51.6422 266.4643 0007888 121.4429 238.6624 15.49494792423450";

pub const MOCK_TLE_DATA: &str = r#"
ISS (ZARYA)
1 25544U 98067A   24226.56250000  .00007211  00000-0  13379-3 0  9991
2 25544  51.6422 266.4643 0007888 121.4429 238.6624 15.49494792423450
"#;

pub const TESTSAT_TLE_DATA: &str = r#"
TESTSAT-1
1 90001U 24001A   24001.00000000  .00001000  00000-0  10000-3 0  9999
2 90001  53.0000 200.9948 0001000  90.0000 301.8915 15.06000000    12
TESTSAT-2
1 90002U 24001B   24001.00000000  .00001000  00000-0  10000-3 0  9990
2 90002  53.0000 200.9948 0001000  90.0000 305.8915 15.06000000    17
TESTSAT-3
1 90003U 24001C   24001.00000000  .00001000  00000-0  10000-3 0  9991
2 90003  53.0000 200.9948 0001000  90.0000 297.8915 15.06000000    18
TESTSAT-4
1 90004U 24001D   24001.00000000  .00001000  00000-0  10000-3 0  9992
2 90004  53.0000 200.9948 0001000  90.0000 310.8915 15.06000000    15
TESTSAT-5
1 90005U 24001E   24001.00000000  .00001000  00000-0  10000-3 0  9993
2 90005  53.0000 200.9948 0001000  90.0000 286.8915 15.06000000    18
TESTSAT-6
1 90006U 24001F   24001.00000000  .00001000  00000-0  10000-3 0  9994
2 90006  53.0000 206.9948 0001000  90.0000 301.8915 15.06000000    13
TESTSAT-7
1 90007U 24001G   24001.00000000  .00001000  00000-0  10000-3 0  9995
2 90007  53.0000 200.9948 0001000  90.0000 341.8915 15.06000000    12
TESTSAT-8
1 90008U 24001H   24001.00000000  .00001000  00000-0  10000-3 0  9996
2 90008  53.0000 200.9948 0001000  90.0000 121.8915 15.06000000    19
"#;

/// Same satellite as TESTSAT-1 with a later epoch (2024-01-02)
pub const TESTSAT_1_NEWER: (&str, &str) = (
    "1 90001U 24001A   24002.00000000  .00001000  00000-0  10000-3 0  9990",
    "2 90001  53.0000 200.9948 0001000  90.0000 301.8915 15.06000000    12",
);

/// Same satellite as TESTSAT-1 with an older epoch (2023-12-31)
pub const TESTSAT_1_OLDER: (&str, &str) = (
    "1 90001U 24001A   23365.00000000  .00001000  00000-0  10000-3 0  9991",
    "2 90001  53.0000 200.9948 0001000  90.0000 301.8915 15.06000000    12",
);

/// Taipei observer used across tests (latitude, longitude, altitude km)
pub const TAIPEI: (f64, f64, f64) = (24.9564, 121.3717, 0.1);
