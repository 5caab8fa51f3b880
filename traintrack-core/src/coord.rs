//! Coordinate transforms: degree/decimal-minute parsing and GCJ-02 offset.
//!
//! Two conversions:
//! - Axis parsing: `D°MM.mmmm'` strings into WGS-84 decimal degrees,
//!   rounded to 5 decimal places.
//! - WGS-84 → GCJ-02: the standard China geodetic offset applied to each
//!   axis. Constants match the published reference algorithm so output is
//!   bit-for-bit compatible with consuming map tiles.
//!
//! A malformed axis is a decode error, not a silent zero. A 0,0 fallback
//! would surface as a spurious point on the prime meridian downstream.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{GeoPoint, Result, TrackError};

/// Krasovsky 1940 ellipsoid semi-major axis (meters).
const A: f64 = 6378245.0;

/// First eccentricity squared.
const EE: f64 = 0.006_693_421_622_965_943;

static AXIS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})°(\d{1,2}\.\d+)'$").expect("axis regex")
});

/// Parse one positional axis (`"39°50.5802'"`) into decimal degrees.
///
/// Computed as degrees + minutes/60, rounded to 5 decimal places.
/// Minutes must be below 60; anything the pattern rejects is an error.
pub fn parse_axis(text: &str) -> Result<f64> {
    let caps = AXIS_RE
        .captures(text.trim())
        .ok_or_else(|| TrackError::MissingCoordinates(format!("unparseable axis {text:?}")))?;

    // Both captures matched \d patterns, so the parses cannot fail.
    let degrees: f64 = caps[1].parse().unwrap_or(0.0);
    let minutes: f64 = caps[2].parse().unwrap_or(0.0);

    if minutes >= 60.0 {
        return Err(TrackError::MissingCoordinates(format!(
            "minutes out of range in axis {text:?}"
        )));
    }

    Ok(round5(degrees + minutes / 60.0))
}

/// Round to 5 decimal places (matching the upstream consumers).
pub fn round5(val: f64) -> f64 {
    (val * 100_000.0).round() / 100_000.0
}

/// WGS-84 → GCJ-02 ("Mars coordinates") offset transform.
///
/// Coordinates outside mainland China pass through unchanged, per the
/// reference algorithm.
pub fn wgs84_to_gcj02(lat: f64, lon: f64) -> GeoPoint {
    if out_of_china(lat, lon) {
        return GeoPoint { lat, lon };
    }

    let d_lat = transform_lat(lon - 105.0, lat - 35.0);
    let d_lon = transform_lon(lon - 105.0, lat - 35.0);

    let rad_lat = lat / 180.0 * std::f64::consts::PI;
    let mut magic = rad_lat.sin();
    magic = 1.0 - EE * magic * magic;
    let sqrt_magic = magic.sqrt();

    let d_lat =
        (d_lat * 180.0) / ((A * (1.0 - EE)) / (magic * sqrt_magic) * std::f64::consts::PI);
    let d_lon = (d_lon * 180.0) / (A / sqrt_magic * rad_lat.cos() * std::f64::consts::PI);

    GeoPoint {
        lat: lat + d_lat,
        lon: lon + d_lon,
    }
}

/// Rectangle check used by the reference implementation.
fn out_of_china(lat: f64, lon: f64) -> bool {
    !(72.004..=137.8347).contains(&lon) || !(0.8293..=55.8271).contains(&lat)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    use std::f64::consts::PI;
    let mut ret = -100.0
        + 2.0 * x
        + 3.0 * y
        + 0.2 * y * y
        + 0.1 * x * y
        + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lon(x: f64, y: f64) -> f64 {
    use std::f64::consts::PI;
    let mut ret =
        300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
