//! traintrack-client: follow a traintrack broadcast server from the terminal.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use traintrack_client::{ClientEvent, ClientOptions, TrainClient};

#[derive(Parser)]
#[command(name = "traintrack-client", version, about = "Subscribe to train telemetry")]
struct Cli {
    /// WebSocket endpoint of the broadcast server
    #[arg(long, env = "TRAINTRACK_URL", default_value = "ws://127.0.0.1:8080")]
    url: String,
    /// Follow only these trains (repeatable); default is all trains
    #[arg(long = "train")]
    trains: Vec<String>,
    /// Base reconnection delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    base_delay_ms: u64,
    /// Reconnection attempts before giving up
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let options = ClientOptions {
        base_delay: Duration::from_millis(cli.base_delay_ms),
        max_attempts: cli.max_attempts,
        trains: cli.trains,
    };
    let (client, mut events) = TrainClient::connect(cli.url, options);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::Connection(up) => {
                        info!("connection {}", if up { "established" } else { "lost" });
                    }
                    ClientEvent::Snapshot(trains) => {
                        println!("snapshot: {} trains", trains.len());
                        for state in trains {
                            print_state(&state);
                        }
                    }
                    ClientEvent::Update(state) => print_state(&state),
                    ClientEvent::GaveUp => {
                        info!("retries exhausted, exiting");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.disconnect();
                break;
            }
        }
    }
}

fn print_state(state: &traintrack_core::types::TrainState) {
    let speed = state
        .movement
        .as_ref()
        .map(|m| format!("{} km/h", m.speed_kmh))
        .unwrap_or_else(|| "-".into());
    let position = state
        .position
        .as_ref()
        .map(|p| format!("{:.5}, {:.5}", p.wgs84.lat, p.wgs84.lon))
        .unwrap_or_else(|| "-".into());
    println!(
        "train {} [{}] speed {} position {} updated {}",
        state.id,
        state.status,
        speed,
        position,
        state.updated_at.format("%H:%M:%S"),
    );
}
