//! Reconnecting WebSocket subscriber for the traintrack broadcast server.
//!
//! The connection lives on a background task; the caller consumes a single
//! ordered stream of [`ClientEvent`]s and steers the task through the
//! [`TrainClient`] handle. Reconnection backs off exponentially and gives
//! up after a configurable number of attempts, after which only an explicit
//! [`TrainClient::reconnect`] tries again.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use traintrack_core::protocol::{ClientMessage, ServerMessage, TrainRef};
use traintrack_core::types::TrainState;

/// Reconnection tuning.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Delay before the first retry; doubles with each failed attempt.
    pub base_delay: Duration,
    /// Consecutive failures tolerated before the client stops retrying.
    pub max_attempts: u32,
    /// Trains to follow; sent to the server on every (re)connect.
    /// Empty means all trains.
    pub trains: Vec<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
            trains: Vec::new(),
        }
    }
}

/// Events delivered to the consumer, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection established or lost.
    Connection(bool),
    /// Full fleet snapshot, sent by the server right after connect.
    Snapshot(Vec<TrainState>),
    /// Incremental update for one train.
    Update(TrainState),
    /// Retries exhausted; the client is idle until `reconnect` is called.
    GaveUp,
}

enum Command {
    Reconnect,
    Disconnect,
}

/// Handle to the background connection task.
pub struct TrainClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl TrainClient {
    /// Spawn the connection task. Events arrive on the returned receiver;
    /// the receiver closing means the client was disconnected and dropped.
    pub fn connect(
        url: impl Into<String>,
        options: ClientOptions,
    ) -> (TrainClient, mpsc::UnboundedReceiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_client(url.into(), options, event_tx, command_rx));
        (TrainClient { commands: command_tx }, event_rx)
    }

    /// Retry now, resetting the attempt counter. A no-op while connected.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// Close the connection and stop the task. No retry follows.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }
}

/// Delay before retry `attempt` (1-based): base doubled per failure.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift)
}

async fn run_client(
    url: String,
    options: ClientOptions,
    events: mpsc::UnboundedSender<ClientEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut attempt: u32 = 0;
    loop {
        match connect_async(&url).await {
            Ok((ws, _)) => {
                attempt = 0;
                info!("connected to {url}");
                let _ = events.send(ClientEvent::Connection(true));
                let outcome = run_connection(ws, &options, &events, &mut commands).await;
                let _ = events.send(ClientEvent::Connection(false));
                match outcome {
                    ConnectionEnd::Closed => {}
                    ConnectionEnd::Stop => return,
                }
            }
            Err(e) => {
                warn!("connect to {url} failed: {e}");
            }
        }

        attempt += 1;
        if attempt > options.max_attempts {
            warn!("giving up after {} attempts", options.max_attempts);
            let _ = events.send(ClientEvent::GaveUp);
            // Idle until told otherwise
            loop {
                match commands.recv().await {
                    Some(Command::Reconnect) => break,
                    Some(Command::Disconnect) | None => return,
                }
            }
            attempt = 0;
            continue;
        }

        let delay = backoff_delay(options.base_delay, attempt);
        debug!("retrying in {delay:?} (attempt {attempt})");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = commands.recv() => match cmd {
                Some(Command::Reconnect) => attempt = 0,
                Some(Command::Disconnect) | None => return,
            },
        }
    }
}

enum ConnectionEnd {
    /// Server closed or the link dropped; retry.
    Closed,
    /// Caller asked to stop; no retry.
    Stop,
}

async fn run_connection(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    options: &ClientOptions,
    events: &mpsc::UnboundedSender<ClientEvent>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> ConnectionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Server defaults to all trains; narrow it if asked to. Outbound
    // envelopes always carry a send timestamp.
    for train_id in &options.trains {
        let msg = ClientMessage::SubscribeTrain {
            data: TrainRef {
                train_id: train_id.clone(),
            },
            timestamp: Some(Utc::now()),
        };
        if let Ok(text) = serde_json::to_string(&msg) {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                return ConnectionEnd::Closed;
            }
        }
    }

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                let Some(Ok(msg)) = inbound else { return ConnectionEnd::Closed };
                match msg {
                    Message::Text(text) => handle_server_message(&text, events),
                    Message::Ping(payload) => {
                        if ws_tx.send(Message::Pong(payload)).await.is_err() {
                            return ConnectionEnd::Closed;
                        }
                    }
                    Message::Close(_) => return ConnectionEnd::Closed,
                    Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                }
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Reconnect) => {}
                Some(Command::Disconnect) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return ConnectionEnd::Stop;
                }
            },
        }
    }
}

fn handle_server_message(text: &str, events: &mpsc::UnboundedSender<ClientEvent>) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::TrainPositions { data, .. }) => {
            let _ = events.send(ClientEvent::Snapshot(data));
        }
        Ok(ServerMessage::TrainPosition { data, .. }) => {
            let _ = events.send(ClientEvent::Update(*data));
        }
        Ok(ServerMessage::Pong { .. }) => {}
        Ok(ServerMessage::Error { data, .. }) => {
            warn!("server error: {}", data.message);
        }
        Err(e) => debug!("ignoring unrecognized server message: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
