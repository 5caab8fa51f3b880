//! traintrack daemon: POCSAG train-telemetry bridge and broadcast server.

mod broadcast;
mod ingest;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{error, info};

use traintrack_core::config::Config;
use traintrack_core::decode::decode_frame;
use traintrack_core::frame::PagerFrame;
use traintrack_core::store::TrainStore;
use traintrack_core::types::TrainState;

#[derive(Parser)]
#[command(name = "traintrack", version, about = "Pager-network train telemetry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the UDP ingestion bridge and WebSocket broadcast server
    Serve {
        /// UDP port for relayed pager frames
        #[arg(long)]
        udp_port: Option<u16>,
        /// TCP port for WebSocket subscribers
        #[arg(long)]
        ws_port: Option<u16>,
    },
    /// Decode `capcode;body` lines from a file and print the resulting fleet
    Decode {
        /// Input file, one telegram per line; `-` reads stdin
        file: PathBuf,
        /// Print each decoded reading instead of the fleet table
        #[arg(short, long)]
        raw: bool,
    },
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
    let result = match cli.command {
        Commands::Serve { udp_port, ws_port } => cmd_serve(udp_port, ws_port).await,
        Commands::Decode { file, raw } => cmd_decode(&file, raw),
    };
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn cmd_serve(udp_port: Option<u16>, ws_port: Option<u16>) -> traintrack_core::Result<()> {
    // Flags win over environment, environment over defaults.
    let defaults = Config::from_env()?;
    let config = Config {
        udp_port: udp_port.unwrap_or(defaults.udp_port),
        ws_port: ws_port.unwrap_or(defaults.ws_port),
    };

    // Bind both sockets before spawning anything; a taken port is fatal.
    let udp = UdpSocket::bind(("0.0.0.0", config.udp_port)).await?;
    let tcp = TcpListener::bind(("0.0.0.0", config.ws_port)).await?;

    let store = Arc::new(TrainStore::new());
    let counters = Arc::new(ingest::Counters::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bridge = tokio::spawn(ingest::run(
        store.clone(),
        udp,
        counters.clone(),
        shutdown_rx.clone(),
    ));
    let server = tokio::spawn(broadcast::run(store.clone(), tcp, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = bridge.await;
    let _ = server.await;

    info!("{} trains tracked at shutdown", store.len());
    Ok(())
}

fn cmd_decode(file: &PathBuf, raw: bool) -> traintrack_core::Result<()> {
    let text = if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(file)?
    };
    let store = TrainStore::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((capcode, body)) = line.split_once(';') else {
            eprintln!("line {}: expected capcode;body", lineno + 1);
            continue;
        };
        let Ok(capcode) = capcode.trim().parse::<u32>() else {
            eprintln!("line {}: bad capcode {capcode:?}", lineno + 1);
            continue;
        };
        let frame = PagerFrame {
            capcode,
            captured_at: Utc::now(),
            body: body.to_string(),
        };
        match decode_frame(&frame) {
            Ok(Some(reading)) => {
                if raw {
                    println!("{reading:?}");
                }
                store.update(reading);
            }
            Ok(None) => eprintln!("line {}: capcode {capcode} not tracked", lineno + 1),
            Err(e) => eprintln!("line {}: {e}", lineno + 1),
        }
    }

    if !raw {
        println!("{}", fleet_table(&store.get_all()));
    }
    Ok(())
}

fn fleet_table(trains: &[TrainState]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Train", "Status", "Speed (km/h)", "Mileage (km)", "WGS-84", "GCJ-02", "Updated",
    ]);

    for state in trains {
        let (speed, mileage) = match &state.movement {
            Some(m) => (m.speed_kmh.to_string(), format!("{:.1}", m.mileage_km)),
            None => ("-".into(), "-".into()),
        };
        let (wgs, gcj) = match &state.position {
            Some(p) => (
                format!("{:.5}, {:.5}", p.wgs84.lat, p.wgs84.lon),
                format!("{:.5}, {:.5}", p.gcj02.lat, p.gcj02.lon),
            ),
            None => ("-".into(), "-".into()),
        };
        table.add_row(vec![
            Cell::new(&state.id),
            Cell::new(state.status.to_string()),
            Cell::new(speed),
            Cell::new(mileage),
            Cell::new(wgs),
            Cell::new(gcj),
            Cell::new(state.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    table
}
