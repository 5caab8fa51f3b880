//! UDP ingestion bridge: relayed POCSAG frames in, store updates out.
//!
//! One datagram, one independent unit of work: parse the frame, route by
//! capcode, decode the telegram, apply it to the store. Every failure is
//! logged and the datagram dropped; nothing a peer sends can stop the
//! listener. The only fatal error is failing to bind the socket, which
//! happens before this task starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use traintrack_core::decode::decode_frame;
use traintrack_core::frame::parse_datagram;
use traintrack_core::store::TrainStore;

/// Largest datagram the relay is expected to send.
const MAX_DATAGRAM: usize = 2048;

/// Bridge counters, shared with the serve loop for the shutdown summary.
#[derive(Debug, Default)]
pub struct Counters {
    pub datagrams: AtomicU64,
    pub frames: AtomicU64,
    pub readings: AtomicU64,
    pub failures: AtomicU64,
}

/// Receive loop. Runs until the shutdown signal flips.
pub async fn run(
    store: Arc<TrainStore>,
    socket: UdpSocket,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let local = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    info!("ingestion bridge listening on udp://{local}");

    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, _peer)) => {
                        handle_datagram(&store, &counters, &buf[..len]);
                    }
                    Err(e) => {
                        // Transient receive errors do not stop the bridge
                        warn!("udp receive error: {e}");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!(
        "ingestion bridge stopped: {} datagrams, {} frames, {} readings, {} failures",
        counters.datagrams.load(Ordering::Relaxed),
        counters.frames.load(Ordering::Relaxed),
        counters.readings.load(Ordering::Relaxed),
        counters.failures.load(Ordering::Relaxed),
    );
}

/// Process one datagram. Failures are counted and logged, never returned.
pub fn handle_datagram(store: &TrainStore, counters: &Counters, buf: &[u8]) {
    counters.datagrams.fetch_add(1, Ordering::Relaxed);

    let frame = match parse_datagram(buf, Utc::now()) {
        Ok(f) => f,
        Err(e) => {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!("dropping datagram: {e}");
            return;
        }
    };
    counters.frames.fetch_add(1, Ordering::Relaxed);

    match decode_frame(&frame) {
        Ok(Some(reading)) => {
            counters.readings.fetch_add(1, Ordering::Relaxed);
            let state = store.update(reading);
            debug!("updated train {}", state.id);
        }
        Ok(None) => {
            debug!("ignoring capcode {}", frame.capcode);
        }
        Err(e) => {
            // Decode errors carry the offending raw fields for diagnosis
            counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!("dropping telegram on capcode {}: {e}", frame.capcode);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
