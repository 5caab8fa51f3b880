//! WebSocket broadcast server.
//!
//! Each accepted connection gets its own bookkeeping and its own outbound
//! channel, so one slow or dead subscriber never blocks the rest. Deltas
//! reach connections through a per-connection store subscription that is
//! released on teardown, whatever the teardown path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use traintrack_core::protocol::{parse_client_message, ClientMessage, InboundParse, ServerMessage};
use traintrack_core::store::TrainStore;

/// How often the server pings an idle connection.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Missed intervals before a connection is presumed dead.
const LIVENESS_MISSES: u32 = 2;

/// Accept loop. Runs until the shutdown signal flips; the per-connection
/// tasks watch the same signal and tear themselves down.
pub async fn run(store: Arc<TrainStore>, listener: TcpListener, shutdown: watch::Receiver<bool>) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    info!("broadcast server listening on ws://{local}");

    let mut shutdown_accept = shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let store = store.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(store, stream, shutdown).await {
                                debug!("connection from {peer} ended: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept error: {e}"),
                }
            }
            _ = shutdown_accept.changed() => break,
        }
    }
    info!("broadcast server stopped");
}

async fn handle_connection(
    store: Arc<TrainStore>,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) -> traintrack_core::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| traintrack_core::TrackError::BadFrame(e.to_string()))?;
    let conn_id = Uuid::new_v4();
    info!("subscriber {conn_id} connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    // Writer task owns the sink; everything else talks through the channel.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Full snapshot first, deltas after.
    send_json(&out_tx, &ServerMessage::train_positions(store.get_all()));

    // Empty set means "all trains".
    let subscriptions: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let store_sub = {
        let out_tx = out_tx.clone();
        let subscriptions = subscriptions.clone();
        store.subscribe(move |state| {
            let wanted = {
                let subs = subscriptions.lock().unwrap();
                subs.is_empty() || subs.contains(&state.id)
            };
            if wanted {
                if let Ok(text) = serde_json::to_string(&ServerMessage::train_position(state.clone()))
                {
                    let _ = out_tx.send(Message::Text(text));
                }
            }
        })
    };

    let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
    liveness.tick().await; // first tick fires immediately
    let mut last_inbound = tokio::time::Instant::now();

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                let Some(msg) = inbound else { break };
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("subscriber {conn_id} read error: {e}");
                        break;
                    }
                };
                last_inbound = tokio::time::Instant::now();
                match msg {
                    Message::Text(text) => {
                        handle_text(conn_id, &store, &out_tx, &subscriptions, &text);
                    }
                    Message::Ping(payload) => {
                        let _ = out_tx.send(Message::Pong(payload));
                    }
                    Message::Close(_) => break,
                    Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                }
            }
            _ = liveness.tick() => {
                if last_inbound.elapsed() >= LIVENESS_INTERVAL * LIVENESS_MISSES {
                    info!("subscriber {conn_id} timed out");
                    break;
                }
                let _ = out_tx.send(Message::Ping(Vec::new()));
            }
            _ = shutdown.changed() => break,
        }
    }

    store.unsubscribe(store_sub);
    drop(out_tx);
    let _ = writer.await;
    info!("subscriber {conn_id} disconnected");
    Ok(())
}

fn handle_text(
    conn_id: Uuid,
    store: &TrainStore,
    out_tx: &mpsc::UnboundedSender<Message>,
    subscriptions: &Mutex<HashSet<String>>,
    text: &str,
) {
    match parse_client_message(text) {
        InboundParse::Message(ClientMessage::Ping { .. }) => {
            send_json(out_tx, &ServerMessage::pong());
        }
        InboundParse::Message(ClientMessage::SubscribeTrain { data, .. }) => {
            debug!("subscriber {conn_id} follows train {}", data.train_id);
            subscriptions.lock().unwrap().insert(data.train_id);
        }
        InboundParse::Message(ClientMessage::UnsubscribeTrain { data, .. }) => {
            subscriptions.lock().unwrap().remove(&data.train_id);
        }
        InboundParse::Message(ClientMessage::GetAllTrains { .. }) => {
            send_json(out_tx, &ServerMessage::train_positions(store.get_all()));
        }
        InboundParse::UnknownType(kind) => {
            debug!("subscriber {conn_id} sent unknown message type {kind:?}");
        }
        InboundParse::Malformed(reason) => {
            send_json(out_tx, &ServerMessage::error(format!("invalid message: {reason}")));
        }
    }
}

fn send_json(out_tx: &mpsc::UnboundedSender<Message>, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(text) => {
            let _ = out_tx.send(Message::Text(text));
        }
        Err(e) => warn!("failed to serialize outbound message: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio_tungstenite::connect_async;
    use traintrack_core::types::{MovementReading, Reading};

    fn movement(train: u32, speed: u32) -> Reading {
        Reading::Movement(MovementReading {
            captured_at: Utc::now(),
            train_number: train,
            speed_kmh: speed,
            mileage_km: 1.0,
        })
    }

    async fn start_server(store: Arc<TrainStore>) -> (String, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run(store, listener, shutdown_rx));
        (format!("ws://{addr}"), shutdown_tx)
    }

    async fn next_json<S>(ws: &mut S) -> Value
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .expect("read error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_snapshot_on_connect() {
        let store = Arc::new(TrainStore::new());
        store.update(movement(69012, 19));
        let (url, _shutdown) = start_server(store).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        let msg = next_json(&mut ws).await;
        assert_eq!(msg["type"], "train_positions");
        assert_eq!(msg["data"].as_array().unwrap().len(), 1);
        assert_eq!(msg["data"][0]["id"], "69012");
    }

    #[tokio::test]
    async fn test_delta_after_update() {
        let store = Arc::new(TrainStore::new());
        let (url, _shutdown) = start_server(store.clone()).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        let snapshot = next_json(&mut ws).await;
        assert_eq!(snapshot["type"], "train_positions");

        store.update(movement(11111, 40));
        let delta = next_json(&mut ws).await;
        assert_eq!(delta["type"], "train_position");
        assert_eq!(delta["data"]["id"], "11111");
        assert_eq!(delta["data"]["status"], "active");
    }

    #[tokio::test]
    async fn test_subscription_filters_deltas() {
        let store = Arc::new(TrainStore::new());
        let (url, _shutdown) = start_server(store.clone()).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        next_json(&mut ws).await; // snapshot

        ws.send(Message::Text(
            r#"{"type":"subscribe_train","data":{"trainId":"69012"}}"#.into(),
        ))
        .await
        .unwrap();
        // Let the subscription land before updating
        tokio::time::sleep(Duration::from_millis(100)).await;

        store.update(movement(11111, 40));
        store.update(movement(69012, 19));

        let delta = next_json(&mut ws).await;
        assert_eq!(delta["data"]["id"], "69012", "filtered out the other train");
    }

    #[tokio::test]
    async fn test_ping_pong_and_get_all() {
        let store = Arc::new(TrainStore::new());
        store.update(movement(69012, 0));
        let (url, _shutdown) = start_server(store).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        next_json(&mut ws).await; // snapshot

        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        let pong = next_json(&mut ws).await;
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_string());

        ws.send(Message::Text(r#"{"type":"get_all_trains"}"#.into()))
            .await
            .unwrap();
        let all = next_json(&mut ws).await;
        assert_eq!(all["type"], "train_positions");
        assert_eq!(all["data"][0]["status"], "stopped");
    }

    #[tokio::test]
    async fn test_malformed_message_gets_error_and_connection_survives() {
        let store = Arc::new(TrainStore::new());
        let (url, _shutdown) = start_server(store).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        next_json(&mut ws).await; // snapshot

        ws.send(Message::Text("not json at all".into())).await.unwrap();
        let err = next_json(&mut ws).await;
        assert_eq!(err["type"], "error");
        assert!(err["data"]["message"].as_str().unwrap().starts_with("invalid message"));

        // Still alive
        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        let pong = next_json(&mut ws).await;
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_known_type_with_bad_payload_is_answered_with_error() {
        let store = Arc::new(TrainStore::new());
        let (url, _shutdown) = start_server(store).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        next_json(&mut ws).await; // snapshot

        // Recognized type, missing payload: not silently ignored
        ws.send(Message::Text(r#"{"type":"subscribe_train"}"#.into()))
            .await
            .unwrap();
        let err = next_json(&mut ws).await;
        assert_eq!(err["type"], "error");
    }

    #[tokio::test]
    async fn test_unknown_type_is_ignored() {
        let store = Arc::new(TrainStore::new());
        let (url, _shutdown) = start_server(store.clone()).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        next_json(&mut ws).await; // snapshot

        ws.send(Message::Text(r#"{"type":"teleport_train","data":{}}"#.into()))
            .await
            .unwrap();

        // No error envelope; the next message is a regular delta
        store.update(movement(69012, 19));
        let delta = next_json(&mut ws).await;
        assert_eq!(delta["type"], "train_position");
    }

    #[tokio::test]
    async fn test_disconnect_releases_store_subscription() {
        let store = Arc::new(TrainStore::new());
        let (url, _shutdown) = start_server(store.clone()).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        next_json(&mut ws).await; // snapshot

        for _ in 0..50 {
            if store.subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.subscriber_count(), 1);

        ws.close(None).await.unwrap();
        drop(ws);

        for _ in 0..50 {
            if store.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.subscriber_count(), 0, "subscription released on teardown");
    }
}
