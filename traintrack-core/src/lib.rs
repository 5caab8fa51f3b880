//! traintrack-core: Pure decode + tracking library for POCSAG train telemetry.
//!
//! No async, no I/O, just algorithms. This crate is the shared core used by
//! both `traintrack-server` (UDP bridge + broadcast server) and
//! `traintrack-client` (subscriber).

pub mod config;
pub mod coord;
pub mod decode;
pub mod frame;
pub mod protocol;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use decode::{decode_frame, decode_movement, decode_position};
pub use frame::{parse_datagram, PagerFrame, MOVEMENT_CAPCODE, POSITION_CAPCODE};
pub use store::{SubscriptionId, TrainStore};
pub use types::*;
