use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use tandem_db::Database;
use tandem_types::models::{ChatMessage, Exchange, SelfieResponse};

use crate::ports::{ExchangeRepository, MediaIndex, MessageHistory, MessageSink};

/// Body text of a chat message carrying a revealed selfie.
pub const SELFIE_MESSAGE_BODY: &str = "[Selfie]";

/// SQLite-backed repository, media index and message store.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// rusqlite blocks; keep it off the async workers.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("database task failed: {}", e)
            })?
    }
}

#[async_trait]
impl ExchangeRepository for SqliteStore {
    async fn save_exchange(&self, exchange: &Exchange) -> Result<()> {
        let exchange = exchange.clone();
        self.blocking(move |db| db.save_exchange(&exchange)).await
    }

    async fn find_exchange(&self, id: Uuid) -> Result<Option<Exchange>> {
        self.blocking(move |db| db.get_exchange(id)).await
    }

    async fn find_active_between(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Exchange>> {
        self.blocking(move |db| db.get_active_exchange_between(user_a, user_b))
            .await
    }

    async fn find_open_exchanges(&self) -> Result<Vec<Exchange>> {
        self.blocking(|db| db.get_open_exchanges()).await
    }

    async fn save_response(&self, response: &SelfieResponse) -> Result<()> {
        let response = response.clone();
        self.blocking(move |db| db.upsert_response(&response)).await
    }

    async fn find_responses(&self, exchange_id: Uuid) -> Result<Vec<SelfieResponse>> {
        self.blocking(move |db| db.get_responses(exchange_id)).await
    }

    async fn delete_responses(&self, exchange_id: Uuid) -> Result<()> {
        self.blocking(move |db| db.delete_responses(exchange_id).map(|_| ()))
            .await
    }
}

#[async_trait]
impl MediaIndex for SqliteStore {
    async fn exists(&self, content_hash: &str) -> Result<bool> {
        let hash = content_hash.to_string();
        self.blocking(move |db| db.media_hash_exists(&hash)).await
    }

    async fn record_if_absent(&self, content_hash: &str, object_key: &str) -> Result<()> {
        let (hash, key) = (content_hash.to_string(), object_key.to_string());
        self.blocking(move |db| db.record_media_if_absent(&hash, &key))
            .await
    }
}

#[async_trait]
impl MessageSink for SqliteStore {
    async fn post_image(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        object_key: &str,
    ) -> Result<ChatMessage> {
        let key = object_key.to_string();
        self.blocking(move |db| {
            db.insert_message(sender_id, recipient_id, SELFIE_MESSAGE_BODY, Some(&key), Utc::now())
        })
        .await
    }
}

#[async_trait]
impl MessageHistory for SqliteStore {
    async fn conversation(&self, user_id: Uuid, other_id: Uuid, limit: u32) -> Result<Vec<ChatMessage>> {
        self.blocking(move |db| db.get_conversation(user_id, other_id, limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::models::ExchangeStatus;

    fn store() -> SqliteStore {
        SqliteStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn exchange_and_responses_persist() {
        let store = store();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut exchange = Exchange::new(alice, bob, Utc::now());
        store.save_exchange(&exchange).await.unwrap();

        exchange.status = ExchangeStatus::Accepted;
        exchange.accepted_at = Some(Utc::now());
        store.save_exchange(&exchange).await.unwrap();

        let loaded = store.find_exchange(exchange.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExchangeStatus::Accepted);
        assert!(store.find_active_between(bob, alice).await.unwrap().is_some());
        assert_eq!(store.find_open_exchanges().await.unwrap().len(), 1);

        let response = SelfieResponse {
            exchange_id: exchange.id,
            user_id: alice,
            object_key: "selfies/a.jpg".into(),
            content_hash: "abc".into(),
            submitted_at: Utc::now(),
        };
        store.save_response(&response).await.unwrap();
        store
            .save_response(&SelfieResponse {
                object_key: "selfies/a2.jpg".into(),
                ..response
            })
            .await
            .unwrap();

        let rows = store.find_responses(exchange.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].object_key, "selfies/a2.jpg");

        store.delete_responses(exchange.id).await.unwrap();
        assert!(store.find_responses(exchange.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn posted_selfie_is_a_chat_message() {
        let store = store();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let message = store.post_image(alice, bob, "selfies/a.jpg").await.unwrap();
        assert_eq!(message.body, SELFIE_MESSAGE_BODY);
        assert_eq!(message.attachment_key.as_deref(), Some("selfies/a.jpg"));

        let conversation = store.conversation(bob, alice, 10).await.unwrap();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].id, message.id);
    }

    #[tokio::test]
    async fn media_index_keeps_first_key() {
        let store = store();
        assert!(!store.exists("h").await.unwrap());
        store.record_if_absent("h", "selfies/one.jpg").await.unwrap();
        store.record_if_absent("h", "selfies/two.jpg").await.unwrap();
        assert!(store.exists("h").await.unwrap());
    }
}
