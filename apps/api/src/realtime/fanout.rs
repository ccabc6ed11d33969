//! Event fan-out. `LocalFanout` delivers straight into this instance's registry;
//! `RedisFanout` publishes to a Redis channel that every instance subscribes to.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::realtime::events::ServerEvent;
use crate::realtime::registry::ConnectionRegistry;

pub const FANOUT_CHANNEL: &str = "placement:events";

// Reconnect backoff for the publishing connection: 2^n * 100ms, three tries.
const RECONNECT_BASE: u64 = 2;
const RECONNECT_FACTOR_MS: u64 = 100;
const RECONNECT_RETRIES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    User { user_id: Uuid },
    Room { room: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub target: Target,
    pub event: ServerEvent,
}

impl Envelope {
    pub fn to_user(user_id: Uuid, event: ServerEvent) -> Self {
        Self {
            target: Target::User { user_id },
            event,
        }
    }

    pub fn to_room(room: impl Into<String>, event: ServerEvent) -> Self {
        Self {
            target: Target::Room { room: room.into() },
            event,
        }
    }
}

/// Hands an envelope to the local registry; returns how many connections got it.
pub fn deliver_local(registry: &ConnectionRegistry, envelope: &Envelope) -> usize {
    match &envelope.target {
        Target::User { user_id } => registry.send_to_user(*user_id, &envelope.event),
        Target::Room { room } => registry.send_to_room(room, &envelope.event),
    }
}

/// Fire-and-forget publication of socket events.
#[async_trait]
pub trait Fanout: Send + Sync {
    async fn publish(&self, envelope: Envelope);

    /// "local" | "redis"
    fn backend(&self) -> &'static str;
}

pub struct LocalFanout {
    registry: ConnectionRegistry,
}

impl LocalFanout {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Fanout for LocalFanout {
    async fn publish(&self, envelope: Envelope) {
        let delivered = deliver_local(&self.registry, &envelope);
        debug!(delivered, "Local fan-out");
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

/// Publishes over a `ConnectionManager`, which re-dials after the server drops the socket.
/// A failed first dial leaves the cell empty so the next publish tries again.
pub struct RedisFanout {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisFanout {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
        }
    }

    async fn connection(&self) -> redis::RedisResult<ConnectionManager> {
        self.conn
            .get_or_try_init(|| {
                ConnectionManager::new_with_backoff(
                    self.client.clone(),
                    RECONNECT_BASE,
                    RECONNECT_FACTOR_MS,
                    RECONNECT_RETRIES,
                )
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Fanout for RedisFanout {
    async fn publish(&self, envelope: Envelope) {
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize socket envelope: {e}");
                return;
            }
        };

        let result = match self.connection().await {
            Ok(mut conn) => {
                let published: redis::RedisResult<()> = conn.publish(FANOUT_CHANNEL, payload).await;
                published
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Redis publish failed, event dropped: {e}");
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Relays every envelope published on the channel into the local registry.
/// Reconnects after a short pause if the subscription drops.
pub fn spawn_redis_subscriber(
    client: redis::Client,
    registry: ConnectionRegistry,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match subscribe_and_relay(&client, &registry).await {
                Ok(()) => warn!("Redis subscription ended, reconnecting"),
                Err(e) => warn!("Redis subscription failed: {e}, reconnecting"),
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    })
}

async fn subscribe_and_relay(
    client: &redis::Client,
    registry: &ConnectionRegistry,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(FANOUT_CHANNEL).await?;
    info!("Subscribed to Redis channel {FANOUT_CHANNEL}");

    let mut messages = std::pin::pin!(pubsub.on_message());
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!("Unreadable fan-out payload: {e}");
                continue;
            }
        };
        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) => {
                deliver_local(registry, &envelope);
            }
            Err(e) => warn!("Malformed fan-out envelope: {e}"),
        }
    }
    Ok(())
}
