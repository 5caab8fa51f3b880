//! Shared types, error enum, and decoded reading types for traintrack-core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by traintrack-core.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid telegram body: train={train:?} speed={speed:?} mileage={mileage:?}")]
    InvalidBody {
        train: String,
        speed: String,
        mileage: String,
    },
    #[error("missing coordinates: {0}")]
    MissingCoordinates(String),
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TrackError>;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

// ---------------------------------------------------------------------------
// Decoded readings
// ---------------------------------------------------------------------------

/// Decoded movement telegram: train number, speed, mileage.
///
/// The three fields are only ever present together; a telegram that fails
/// to parse any one of them is rejected as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementReading {
    pub captured_at: DateTime<Utc>,
    pub train_number: u32,
    pub speed_kmh: u32,
    /// Mileage post in km, one fractional digit (wire carries tenths).
    pub mileage_km: f64,
}

/// Decoded position telegram: raw text plus both coordinate systems.
///
/// `wgs84` and `gcj02` are both present or the reading does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionReading {
    pub captured_at: DateTime<Utc>,
    pub raw_text: String,
    pub wgs84: GeoPoint,
    pub gcj02: GeoPoint,
}

/// Union type for decoded telegrams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    Movement(MovementReading),
    Position(PositionReading),
}

impl Reading {
    /// Get the capture timestamp from either reading type.
    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            Reading::Movement(m) => m.captured_at,
            Reading::Position(p) => p.captured_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Train state
// ---------------------------------------------------------------------------

/// Operational status of a tracked train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainStatus {
    Active,
    Stopped,
    /// Never derived from telemetry; reserved for operator-driven status
    /// set through the push channel or tooling.
    Maintenance,
}

impl std::fmt::Display for TrainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainStatus::Active => write!(f, "active"),
            TrainStatus::Stopped => write!(f, "stopped"),
            TrainStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Latest known state for a single train.
///
/// Keyed by the train number when a movement reading supplies one, or a
/// synthetic identifier derived from capture time and coordinates for
/// position-only readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainState {
    pub id: String,
    pub train_number: Option<u32>,
    pub updated_at: DateTime<Utc>,
    pub status: TrainStatus,
    pub position: Option<PositionReading>,
    pub movement: Option<MovementReading>,
}

impl TrainState {
    pub fn new(id: String, updated_at: DateTime<Utc>) -> Self {
        TrainState {
            id,
            train_number: None,
            updated_at,
            status: TrainStatus::Active,
            position: None,
            movement: None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_reading_captured_at() {
        let m = Reading::Movement(MovementReading {
            captured_at: ts(),
            train_number: 69012,
            speed_kmh: 19,
            mileage_km: 3.3,
        });
        assert_eq!(m.captured_at(), ts());
    }

    #[test]
    fn test_train_state_new() {
        let state = TrainState::new("69012".into(), ts());
        assert_eq!(state.status, TrainStatus::Active);
        assert!(state.train_number.is_none());
        assert!(!state.has_position());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TrainStatus::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = TrainState::new("69012".into(), ts());
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("trainNumber").is_some());
    }

    #[test]
    fn test_movement_reading_json_roundtrip() {
        let m = MovementReading {
            captured_at: ts(),
            train_number: 69012,
            speed_kmh: 19,
            mileage_km: 3.3,
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: MovementReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
