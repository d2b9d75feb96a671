use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use tandem_exchange::ports::Notifier;
use tandem_types::events::{GatewayEvent, SelfieEvent};
use tandem_types::models::ChatMessage;

/// Routes events to connected users. One live connection per user; a newer
/// connection replaces the older one.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user. Returns false when the user
    /// has no live connection.
    pub async fn send_event(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let channels = self.inner.user_channels.read().await;
        match channels.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.inner.user_channels.read().await.len()
    }
}

// Offline users simply miss the push; they can poll the exchange over REST.
#[async_trait]
impl Notifier for Dispatcher {
    async fn send_to_user(&self, user_id: Uuid, event: SelfieEvent) -> Result<()> {
        if !self.send_event(user_id, GatewayEvent::Selfie(event)).await {
            debug!("User {} offline, selfie event dropped", user_id);
        }
        Ok(())
    }

    async fn deliver_message(&self, user_id: Uuid, message: ChatMessage) -> Result<()> {
        if !self.send_event(user_id, GatewayEvent::MessageCreate(message)).await {
            debug!("User {} offline, message push dropped", user_id);
        }
        Ok(())
    }
}
