//! UDP datagram framing for relayed POCSAG frames.
//!
//! The SDR-side relay sends one pager frame per datagram:
//! - Bytes 0..8: big-endian u64, capture time as epoch milliseconds.
//! - The rest: NUL-delimited text segments. Segment 1 carries the capcode
//!   as ASCII digits; segment 5 carries the telegram body.
//!
//! Relay clocks drift; a capture time more than an hour from the local
//! clock is replaced with the receive time.

use chrono::{DateTime, Utc};

use crate::types::{Result, TrackError};

/// Capcode carrying movement telegrams (train number / speed / mileage).
pub const MOVEMENT_CAPCODE: u32 = 1_234_000;

/// Capcode carrying position telegrams (GPS bearing strings).
pub const POSITION_CAPCODE: u32 = 1_234_002;

/// Byte length of the leading binary timestamp.
const TIMESTAMP_LEN: usize = 8;

/// Segment index of the capcode within the text region.
const CAPCODE_SEGMENT: usize = 1;

/// Segment index of the telegram body within the text region.
const BODY_SEGMENT: usize = 5;

/// Maximum tolerated skew between relay and local clocks.
const MAX_CLOCK_SKEW_SECS: i64 = 3600;

/// One parsed pager frame: routing key, capture time, telegram body.
#[derive(Debug, Clone, PartialEq)]
pub struct PagerFrame {
    pub capcode: u32,
    pub captured_at: DateTime<Utc>,
    pub body: String,
}

impl PagerFrame {
    /// Whether this frame targets one of the two addresses we act on.
    pub fn is_of_interest(&self) -> bool {
        self.capcode == MOVEMENT_CAPCODE || self.capcode == POSITION_CAPCODE
    }
}

/// Parse one raw datagram into a `PagerFrame`.
///
/// `now` is the receive time, used for the clock-skew fallback.
pub fn parse_datagram(buf: &[u8], now: DateTime<Utc>) -> Result<PagerFrame> {
    if buf.len() <= TIMESTAMP_LEN {
        return Err(TrackError::BadFrame(format!(
            "datagram too short: {} bytes",
            buf.len()
        )));
    }

    let mut ts_bytes = [0u8; TIMESTAMP_LEN];
    ts_bytes.copy_from_slice(&buf[..TIMESTAMP_LEN]);
    let millis = u64::from_be_bytes(ts_bytes);

    let captured_at = match DateTime::<Utc>::from_timestamp_millis(millis as i64) {
        Some(ts) if (ts - now).num_seconds().abs() <= MAX_CLOCK_SKEW_SECS => ts,
        // Relay clock unset or drifted; trust the receive time instead.
        _ => now,
    };

    let segments: Vec<&[u8]> = buf[TIMESTAMP_LEN..].split(|b| *b == 0).collect();
    if segments.len() <= BODY_SEGMENT {
        return Err(TrackError::BadFrame(format!(
            "expected at least {} segments, got {}",
            BODY_SEGMENT + 1,
            segments.len()
        )));
    }

    let capcode_text = std::str::from_utf8(segments[CAPCODE_SEGMENT])
        .map_err(|_| TrackError::BadFrame("capcode segment is not UTF-8".into()))?;
    let capcode: u32 = capcode_text
        .trim()
        .parse()
        .map_err(|_| TrackError::BadFrame(format!("non-numeric capcode {capcode_text:?}")))?;

    let body = std::str::from_utf8(segments[BODY_SEGMENT])
        .map_err(|_| TrackError::BadFrame("body segment is not UTF-8".into()))?
        .to_string();

    Ok(PagerFrame {
        capcode,
        captured_at,
        body,
    })
}

/// Build a relay datagram. Used by tests and the offline tooling; the
/// in-field encoder is the SDR relay itself.
pub fn build_datagram(capcode: u32, captured_at: DateTime<Utc>, body: &str) -> Vec<u8> {
    let millis = captured_at.timestamp_millis().max(0) as u64;
    let mut buf = Vec::with_capacity(TIMESTAMP_LEN + 32 + body.len());
    buf.extend_from_slice(&millis.to_be_bytes());
    // Segments 0..6: protocol tag, capcode, bitrate, function bits,
    // frame counter, body.
    for (i, segment) in [
        "POCSAG1200".to_string(),
        capcode.to_string(),
        "1200".to_string(),
        "3".to_string(),
        "0".to_string(),
        body.to_string(),
    ]
    .iter()
    .enumerate()
    {
        if i > 0 {
            buf.push(0);
        }
        buf.extend_from_slice(segment.as_bytes());
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
