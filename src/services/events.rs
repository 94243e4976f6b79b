//! Domain event bus
//!
//! Workflow transitions are broadcast in-process (consumed by the SSE
//! endpoint) and optionally published to a Redis channel for other
//! notification consumers. Publishing never fails the operation that
//! emitted the event.

use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::EventsConfig,
    error::{AppError, AppResult},
    models::Transaction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum EventKind {
    #[serde(rename = "transaction.requested")]
    Requested,
    #[serde(rename = "transaction.approved")]
    Approved,
    #[serde(rename = "transaction.rejected")]
    Rejected,
    #[serde(rename = "transaction.returned")]
    Returned,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Requested => "transaction.requested",
            EventKind::Approved => "transaction.approved",
            EventKind::Rejected => "transaction.rejected",
            EventKind::Returned => "transaction.returned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DomainEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub transaction_id: i32,
    pub user_id: i32,
    pub book_id: i32,
    /// Who triggered the transition
    pub actor_id: i32,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, transaction: &Transaction, actor_id: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            transaction_id: transaction.id,
            user_id: transaction.user_id,
            book_id: transaction.book_id,
            actor_id,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
struct RedisSink {
    connection: ConnectionManager,
    channel: String,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
    redis: Option<RedisSink>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, redis: None }
    }

    /// Build the bus, connecting to Redis when configured
    pub async fn from_config(config: &EventsConfig) -> AppResult<Self> {
        let mut bus = Self::new(config.channel_capacity);

        if let Some(ref url) = config.redis_url {
            let client = redis::Client::open(url.as_str())
                .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;
            let connection = ConnectionManager::new(client)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

            tracing::info!(channel = %config.redis_channel, "Publishing domain events to Redis");
            bus.redis = Some(RedisSink {
                connection,
                channel: config.redis_channel.clone(),
            });
        }

        Ok(bus)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DomainEvent) {
        tracing::debug!(event = event.kind.as_str(), transaction_id = event.transaction_id, "Domain event");

        if let Some(ref sink) = self.redis {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    let mut connection = sink.connection.clone();
                    let channel = sink.channel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = connection.publish::<_, _, ()>(&channel, payload).await {
                            tracing::warn!("Failed to publish event to Redis: {}", e);
                        }
                    });
                }
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
        }

        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names() {
        let json = serde_json::to_string(&EventKind::Returned).unwrap();
        assert_eq!(json, "\"transaction.returned\"");
        assert_eq!(EventKind::Approved.as_str(), "transaction.approved");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        let event = DomainEvent {
            id: Uuid::new_v4(),
            kind: EventKind::Requested,
            transaction_id: 1,
            user_id: 2,
            book_id: 3,
            actor_id: 2,
            occurred_at: Utc::now(),
        };
        bus.publish(event.clone());

        let mut rx = bus.subscribe();
        bus.publish(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
