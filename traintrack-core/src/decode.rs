//! Decode POCSAG telegram bodies into typed readings.
//!
//! Two telegram formats, one per capcode:
//! - Movement: 15-char fixed-width body, three 5-char whitespace-padded
//!   fields: train number, speed (km/h), mileage (tenths of km).
//! - Position: whitespace-delimited body with an info field followed by
//!   latitude and longitude axes in `D°MM.mmmm'` notation.
//!
//! Decoding is total: a classified payload either yields a fully-populated
//! reading or a structured error. There is no partial reading.

use chrono::{DateTime, Utc};

use crate::coord;
use crate::frame::{PagerFrame, MOVEMENT_CAPCODE, POSITION_CAPCODE};
use crate::types::*;

/// Fixed width of each movement telegram field.
const FIELD_WIDTH: usize = 5;

/// Total movement telegram body length.
const MOVEMENT_BODY_LEN: usize = 3 * FIELD_WIDTH;

/// Decode a movement telegram body.
///
/// Example: `"69012  19    33"` → train 69012, 19 km/h, mileage 3.3 km.
/// A field holding filler characters (the upstream encoder pads "no data"
/// with dashes) rejects the whole reading.
pub fn decode_movement(captured_at: DateTime<Utc>, body: &str) -> Result<MovementReading> {
    if !body.is_ascii() {
        return Err(TrackError::InvalidBody {
            train: body.to_string(),
            speed: String::new(),
            mileage: String::new(),
        });
    }

    // Right-pad short bodies so field slicing stays in range; trailing
    // spaces are insignificant in the wire format.
    let mut padded = body.to_string();
    while padded.len() < MOVEMENT_BODY_LEN {
        padded.push(' ');
    }

    let train_raw = &padded[0..FIELD_WIDTH];
    let speed_raw = &padded[FIELD_WIDTH..2 * FIELD_WIDTH];
    let mileage_raw = &padded[2 * FIELD_WIDTH..MOVEMENT_BODY_LEN];

    let invalid = || TrackError::InvalidBody {
        train: train_raw.to_string(),
        speed: speed_raw.to_string(),
        mileage: mileage_raw.to_string(),
    };

    let train_number = parse_digits(train_raw).ok_or_else(invalid)?;
    let speed_kmh = parse_digits(speed_raw).ok_or_else(invalid)?;
    let mileage_tenths = parse_digits(mileage_raw).ok_or_else(invalid)?;

    Ok(MovementReading {
        captured_at,
        train_number,
        speed_kmh,
        mileage_km: mileage_tenths as f64 / 10.0,
    })
}

/// Parse a whitespace-padded all-digit field. `None` for empty fields or
/// dash/placeholder filler.
fn parse_digits(field: &str) -> Option<u32> {
    let trimmed = field.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Decode a position telegram body.
///
/// Token layout: `<info> <latitude axis> <longitude axis> [...]`.
/// Both axes must parse into plausible values or the reading is rejected
/// with `MissingCoordinates`; there is no partial position.
pub fn decode_position(captured_at: DateTime<Utc>, body: &str) -> Result<PositionReading> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(TrackError::MissingCoordinates(format!(
            "expected 3 fields, got {} in {body:?}",
            tokens.len()
        )));
    }

    let lat = coord::parse_axis(tokens[1])?;
    let lon = coord::parse_axis(tokens[2])?;

    if !(0.0..=90.0).contains(&lat) || !(0.0..=180.0).contains(&lon) {
        return Err(TrackError::MissingCoordinates(format!(
            "implausible coordinates {lat}, {lon} in {body:?}"
        )));
    }

    let wgs84 = GeoPoint { lat, lon };
    let gcj02 = coord::wgs84_to_gcj02(lat, lon);

    Ok(PositionReading {
        captured_at,
        raw_text: body.to_string(),
        wgs84,
        gcj02,
    })
}

/// Decode a parsed pager frame into a reading, routed by capcode.
///
/// Returns `Ok(None)` for addresses this system does not act on.
pub fn decode_frame(frame: &PagerFrame) -> Result<Option<Reading>> {
    match frame.capcode {
        MOVEMENT_CAPCODE => {
            decode_movement(frame.captured_at, &frame.body).map(|m| Some(Reading::Movement(m)))
        }
        POSITION_CAPCODE => {
            decode_position(frame.captured_at, &frame.body).map(|p| Some(Reading::Position(p)))
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
