//! Collaborators the exchange core talks to. Implementations live in
//! [`crate::sqlite`], tandem-media, tandem-gateway and [`crate::fake`].

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tandem_types::events::SelfieEvent;
use tandem_types::models::{ChatMessage, Exchange, SelfieResponse};
use uuid::Uuid;

/// Where a client should PUT its photo, and the key it will be stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub upload_url: String,
    pub key: String,
}

/// Durable exchange and response records. Each call is its own transaction.
#[async_trait]
pub trait ExchangeRepository: Send + Sync + 'static {
    async fn save_exchange(&self, exchange: &Exchange) -> Result<()>;

    async fn find_exchange(&self, id: Uuid) -> Result<Option<Exchange>>;

    /// Latest pending or accepted exchange between two users, either direction.
    async fn find_active_between(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Exchange>>;

    /// Every pending or accepted exchange.
    async fn find_open_exchanges(&self) -> Result<Vec<Exchange>>;

    /// Insert, or overwrite the existing row for the same (exchange, user).
    async fn save_response(&self, response: &SelfieResponse) -> Result<()>;

    async fn find_responses(&self, exchange_id: Uuid) -> Result<Vec<SelfieResponse>>;

    async fn delete_responses(&self, exchange_id: Uuid) -> Result<()>;
}

/// Object storage for uploaded photos.
#[async_trait]
pub trait MediaStore: Send + Sync + 'static {
    /// A fresh key under [`crate::keys::owner_prefix`] of `owner`.
    async fn presign_upload(&self, owner: Uuid) -> Result<UploadTicket>;

    async fn download(&self, key: &str) -> Result<Bytes>;

    /// Deleting a key that is already gone succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Content-hash registry of media referenced by durable records.
#[async_trait]
pub trait MediaIndex: Send + Sync + 'static {
    async fn exists(&self, content_hash: &str) -> Result<bool>;

    async fn record_if_absent(&self, content_hash: &str, object_key: &str) -> Result<()>;
}

/// Chat message streams that revealed photos are posted into.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn post_image(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        object_key: &str,
    ) -> Result<ChatMessage>;
}

/// Read side of the chat streams revealed photos land in.
#[async_trait]
pub trait MessageHistory: Send + Sync + 'static {
    /// Messages between two users in either direction, newest first.
    async fn conversation(&self, user_id: Uuid, other_id: Uuid, limit: u32) -> Result<Vec<ChatMessage>>;
}

/// Best-effort real-time delivery to a single user.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_to_user(&self, user_id: Uuid, event: SelfieEvent) -> Result<()>;

    async fn deliver_message(&self, user_id: Uuid, message: ChatMessage) -> Result<()>;
}

/// Wall-clock source for deadlines.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
