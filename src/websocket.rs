use crate::error::{AppError, AppResult};
use crate::models::{Pool, PoolStatus, Side};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channel every lifecycle message is published on
pub const POOLS_CHANNEL: &str = "pools";

pub fn pool_channel(pool_id: Uuid) -> String {
    format!("pool:{}", pool_id)
}

/// Minimal changed fields of a status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUpdate {
    pub id: Uuid,
    pub status: PoolStatus,
    pub strike_price: Option<u64>,
    pub final_price: Option<u64>,
    pub winner: Option<Side>,
    pub total_up: Option<u64>,
    pub total_down: Option<u64>,
}

impl PoolUpdate {
    pub fn status(id: Uuid, status: PoolStatus) -> Self {
        Self {
            id,
            status,
            strike_price: None,
            final_price: None,
            winner: None,
            total_up: None,
            total_down: None,
        }
    }

    /// Update carrying every settlement field currently set on the pool
    pub fn from_pool(pool: &Pool) -> Self {
        Self {
            id: pool.id,
            status: pool.status,
            strike_price: pool.strike_price,
            final_price: pool.final_price,
            winner: pool.winner,
            total_up: Some(pool.total_up),
            total_down: Some(pool.total_down),
        }
    }
}

/// Receives lifecycle events for real-time fan-out.
///
/// Calls are fire-and-forget: implementations must not block and must not fail.
pub trait NotificationSink: Send + Sync {
    fn emit_pool_created(&self, pool: &Pool);
    fn emit_pool_status_changed(&self, update: PoolUpdate);
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "subscribe")]
    Subscribe {
        channel: String, // "pools" or "pool:{id}"
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        channel: String,
    },
    #[serde(rename = "pool_created")]
    PoolCreated {
        pool_id: String,
        asset: String,
        interval_key: String,
        status: String,
        lock_time: i64,
        start_time: i64,
        end_time: i64,
    },
    #[serde(rename = "pool_status_changed")]
    PoolStatusChanged {
        pool_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        strike_price: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_price: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        winner: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_up: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_down: Option<String>,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
    },
}

impl WsMessage {
    /// Pool the message concerns, for per-pool channel filtering
    fn pool_id(&self) -> Option<&str> {
        match self {
            WsMessage::PoolCreated { pool_id, .. } | WsMessage::PoolStatusChanged { pool_id, .. } => {
                Some(pool_id)
            }
            _ => None,
        }
    }
}

/// WebSocket server for real-time updates
pub struct WebSocketServer {
    /// Broadcast sender for sending messages to all clients
    tx: broadcast::Sender<WsMessage>,
    /// Active subscriptions: channel -> set of client IDs
    subscriptions: Arc<RwLock<HashMap<String, Vec<Uuid>>>>,
    /// Client subscriptions: client_id -> set of channels
    client_channels: Arc<RwLock<HashMap<Uuid, Vec<String>>>>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000); // Buffer up to 1000 messages

        Self {
            tx,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            client_channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Receiver of every published message
    pub fn subscribe_messages(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }

    /// Publish without waiting; a send error only means nobody is listening
    fn publish(&self, message: WsMessage) {
        if let Err(e) = self.tx.send(message) {
            debug!("No WebSocket listeners: {}", e);
        }
    }

    /// Subscribe a client to a channel
    pub async fn subscribe(&self, client_id: Uuid, channel: String) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        let subscribers = subscriptions.entry(channel.clone()).or_insert_with(Vec::new);
        if !subscribers.contains(&client_id) {
            subscribers.push(client_id);
        }

        let channels = client_channels.entry(client_id).or_insert_with(Vec::new);
        if !channels.contains(&channel) {
            channels.push(channel.clone());
        }

        info!("Client {} subscribed to {}", client_id, channel);
    }

    /// Unsubscribe a client from a channel
    pub async fn unsubscribe(&self, client_id: Uuid, channel: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        if let Some(subscribers) = subscriptions.get_mut(channel) {
            subscribers.retain(|&id| id != client_id);
            if subscribers.is_empty() {
                subscriptions.remove(channel);
            }
        }

        if let Some(channels) = client_channels.get_mut(&client_id) {
            channels.retain(|c| c != channel);
        }

        info!("Client {} unsubscribed from {}", client_id, channel);
    }

    /// Drop every subscription a client holds
    async fn disconnect(&self, client_id: Uuid) {
        let channels = self.get_client_channels(client_id).await;
        for channel in channels {
            self.unsubscribe(client_id, &channel).await;
        }
        self.client_channels.write().await.remove(&client_id);
    }

    /// Get all channels a client is subscribed to
    pub async fn get_client_channels(&self, client_id: Uuid) -> Vec<String> {
        let client_channels = self.client_channels.read().await;
        client_channels.get(&client_id).cloned().unwrap_or_default()
    }

    /// Check if client is subscribed to a channel
    async fn is_client_subscribed(&self, client_id: Uuid, channel: &str) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(channel)
            .map(|subscribers| subscribers.contains(&client_id))
            .unwrap_or(false)
    }

    /// Whether a client should receive a message: `pools` gets everything,
    /// `pool:{id}` only that pool's messages
    pub async fn should_deliver(&self, client_id: Uuid, message: &WsMessage) -> bool {
        let Some(pool_id) = message.pool_id() else {
            return false;
        };

        if self.is_client_subscribed(client_id, POOLS_CHANNEL).await {
            return true;
        }
        self.is_client_subscribed(client_id, &format!("pool:{}", pool_id))
            .await
    }

    async fn send_json(
        sender: &tokio::sync::Mutex<
            futures_util::stream::SplitSink<
                tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
                Message,
            >,
        >,
        value: serde_json::Value,
    ) {
        let mut sender = sender.lock().await;
        if let Err(e) = sender.send(Message::Text(value.to_string())).await {
            warn!("Failed to send message: {}", e);
        }
    }

    /// Handle a new WebSocket connection
    pub async fn handle_connection(&self, stream: tokio::net::TcpStream) -> AppResult<()> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| AppError::Message(format!("WebSocket handshake failed: {}", e)))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut rx = self.tx.subscribe();
        let client_id = Uuid::new_v4();

        info!("New WebSocket connection: {}", client_id);

        let welcome = serde_json::json!({
            "type": "connected",
            "client_id": client_id.to_string(),
            "message": "Connected to pool updates"
        });
        if let Err(e) = ws_sender.send(Message::Text(welcome.to_string())).await {
            warn!("Failed to send welcome message: {}", e);
        }

        let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));
        let ws_sender_for_receiver = ws_sender.clone();
        let ws_server_for_receiver = self.clone();

        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                        Ok(WsMessage::Subscribe { channel }) => {
                            ws_server_for_receiver.subscribe(client_id, channel.clone()).await;
                            let ack = serde_json::json!({"type": "subscribed", "channel": channel});
                            Self::send_json(&ws_sender_for_receiver, ack).await;
                        }
                        Ok(WsMessage::Unsubscribe { channel }) => {
                            ws_server_for_receiver.unsubscribe(client_id, &channel).await;
                            let ack = serde_json::json!({"type": "unsubscribed", "channel": channel});
                            Self::send_json(&ws_sender_for_receiver, ack).await;
                        }
                        Ok(_) => {
                            warn!("Unexpected message type from client {}", client_id);
                        }
                        Err(_) => {
                            warn!("Failed to parse message from client {}: {}", client_id, text);
                            let err = serde_json::json!({"type": "error", "message": "Invalid message format"});
                            Self::send_json(&ws_sender_for_receiver, err).await;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("WebSocket connection closed: {}", client_id);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            ws_server_for_receiver.disconnect(client_id).await;
        });

        let ws_server_clone = self.clone();
        tokio::spawn(async move {
            loop {
                let msg = match rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, skipped {} messages", client_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if !ws_server_clone.should_deliver(client_id, &msg).await {
                    continue;
                }

                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                let mut sender = ws_sender.lock().await;
                if let Err(e) = sender.send(Message::Text(json)).await {
                    debug!("Stopping delivery to client {}: {}", client_id, e);
                    break;
                }
            }
        });

        Ok(())
    }
}

impl NotificationSink for WebSocketServer {
    fn emit_pool_created(&self, pool: &Pool) {
        self.publish(WsMessage::PoolCreated {
            pool_id: pool.id.to_string(),
            asset: pool.asset.clone(),
            interval_key: pool.interval_key.clone(),
            status: pool.status.as_str().to_string(),
            lock_time: pool.lock_time.timestamp(),
            start_time: pool.start_time.timestamp(),
            end_time: pool.end_time.timestamp(),
        });
    }

    fn emit_pool_status_changed(&self, update: PoolUpdate) {
        // Amounts travel as strings so clients never round them
        self.publish(WsMessage::PoolStatusChanged {
            pool_id: update.id.to_string(),
            status: update.status.as_str().to_string(),
            strike_price: update.strike_price.map(|p| p.to_string()),
            final_price: update.final_price.map(|p| p.to_string()),
            winner: update.winner.map(|w| w.as_str().to_string()),
            total_up: update.total_up.map(|t| t.to_string()),
            total_down: update.total_down.map(|t| t.to_string()),
        });
    }
}

impl Clone for WebSocketServer {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
            client_channels: Arc::clone(&self.client_channels),
        }
    }
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self::new()
    }
}
