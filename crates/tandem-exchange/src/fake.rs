//! In-memory collaborators for tests and local experiments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use tandem_types::events::SelfieEvent;
use tandem_types::models::{ChatMessage, Exchange, ExchangeStatus, SelfieResponse};

use crate::keys;
use crate::ports::{
    Clock, ExchangeRepository, MediaIndex, MediaStore, MessageHistory, MessageSink, Notifier,
    UploadTicket,
};

/// Wall clock driven by tokio's clock, so `tokio::time::pause`/`advance`
/// move deadlines and timers together.
pub struct TestClock {
    origin_wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }

    /// Wall time this clock started at.
    pub fn origin(&self) -> DateTime<Utc> {
        self.origin_wall
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.origin;
        self.origin_wall + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}

/// `FakeRepository` keeps exchanges and responses in memory and records every
/// status it is asked to save, so tests can check the lifecycle order.
#[derive(Clone, Default)]
pub struct FakeRepository {
    exchanges: Arc<Mutex<HashMap<Uuid, Exchange>>>,
    responses: Arc<Mutex<HashMap<Uuid, Vec<SelfieResponse>>>>,
    history: Arc<Mutex<HashMap<Uuid, Vec<ExchangeStatus>>>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of every save, in order, with consecutive duplicates collapsed.
    pub async fn status_history(&self, id: Uuid) -> Vec<ExchangeStatus> {
        self.history.lock().await.get(&id).cloned().unwrap_or_default()
    }

    pub async fn response_count(&self, id: Uuid) -> usize {
        self.responses.lock().await.get(&id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl ExchangeRepository for FakeRepository {
    async fn save_exchange(&self, exchange: &Exchange) -> Result<()> {
        self.exchanges.lock().await.insert(exchange.id, exchange.clone());
        let mut history = self.history.lock().await;
        let entry = history.entry(exchange.id).or_default();
        if entry.last() != Some(&exchange.status) {
            entry.push(exchange.status);
        }
        Ok(())
    }

    async fn find_exchange(&self, id: Uuid) -> Result<Option<Exchange>> {
        Ok(self.exchanges.lock().await.get(&id).cloned())
    }

    async fn find_active_between(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Exchange>> {
        let exchanges = self.exchanges.lock().await;
        Ok(exchanges
            .values()
            .filter(|e| e.is_participant(user_a) && e.is_participant(user_b))
            .filter(|e| !e.status.is_terminal())
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn find_open_exchanges(&self) -> Result<Vec<Exchange>> {
        let mut open: Vec<Exchange> = self
            .exchanges
            .lock()
            .await
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|e| e.created_at);
        Ok(open)
    }

    async fn save_response(&self, response: &SelfieResponse) -> Result<()> {
        let mut responses = self.responses.lock().await;
        let rows = responses.entry(response.exchange_id).or_default();
        match rows.iter_mut().find(|r| r.user_id == response.user_id) {
            Some(existing) => *existing = response.clone(),
            None => rows.push(response.clone()),
        }
        Ok(())
    }

    async fn find_responses(&self, exchange_id: Uuid) -> Result<Vec<SelfieResponse>> {
        Ok(self
            .responses
            .lock()
            .await
            .get(&exchange_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_responses(&self, exchange_id: Uuid) -> Result<()> {
        self.responses.lock().await.remove(&exchange_id);
        Ok(())
    }
}

/// `FakeMediaStore` holds objects in memory and logs deletions.
#[derive(Clone, Default)]
pub struct FakeMediaStore {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    fail_deletes: Arc<Mutex<HashSet<String>>>,
}

impl FakeMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.lock().await.insert(key.to_string(), data.into());
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    /// Make every delete of `key` fail.
    pub async fn fake_fail_delete(&self, key: &str) {
        self.fail_deletes.lock().await.insert(key.to_string());
    }
}

#[async_trait]
impl MediaStore for FakeMediaStore {
    async fn presign_upload(&self, owner: Uuid) -> Result<UploadTicket> {
        let key = keys::new_selfie_key(owner);
        Ok(UploadTicket {
            upload_url: format!("memory://{}", key),
            key,
        })
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("Object {} not found", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_deletes.lock().await.contains(key) {
            return Err(anyhow!("Simulated delete failure for {}", key));
        }
        self.objects.lock().await.remove(key);
        self.deleted.lock().await.push(key.to_string());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeMediaIndex {
    hashes: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeMediaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object_for(&self, content_hash: &str) -> Option<String> {
        self.hashes.lock().await.get(content_hash).cloned()
    }
}

#[async_trait]
impl MediaIndex for FakeMediaIndex {
    async fn exists(&self, content_hash: &str) -> Result<bool> {
        Ok(self.hashes.lock().await.contains_key(content_hash))
    }

    async fn record_if_absent(&self, content_hash: &str, object_key: &str) -> Result<()> {
        self.hashes
            .lock()
            .await
            .entry(content_hash.to_string())
            .or_insert_with(|| object_key.to_string());
        Ok(())
    }
}

/// `FakeMessageSink` stores posted messages and serves them back as history.
#[derive(Clone, Default)]
pub struct FakeMessageSink {
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    fail_senders: Arc<Mutex<HashSet<Uuid>>>,
}

impl FakeMessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }

    /// Make every post sent by `sender_id` fail.
    pub async fn fake_fail_posts_from(&self, sender_id: Uuid) {
        self.fail_senders.lock().await.insert(sender_id);
    }
}

#[async_trait]
impl MessageSink for FakeMessageSink {
    async fn post_image(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        object_key: &str,
    ) -> Result<ChatMessage> {
        if self.fail_senders.lock().await.contains(&sender_id) {
            return Err(anyhow!("Simulated post failure for {}", sender_id));
        }
        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            body: crate::sqlite::SELFIE_MESSAGE_BODY.to_string(),
            attachment_key: Some(object_key.to_string()),
            created_at: Utc::now(),
        };
        self.messages.lock().await.push(message.clone());
        Ok(message)
    }
}

#[async_trait]
impl MessageHistory for FakeMessageSink {
    async fn conversation(&self, user_id: Uuid, other_id: Uuid, limit: u32) -> Result<Vec<ChatMessage>> {
        let between = |m: &ChatMessage| {
            (m.sender_id == user_id && m.recipient_id == other_id)
                || (m.sender_id == other_id && m.recipient_id == user_id)
        };
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .rev()
            .filter(|m| between(m))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// `FakeNotifier` records what each user would have received.
#[derive(Clone, Default)]
pub struct FakeNotifier {
    events: Arc<Mutex<Vec<(Uuid, SelfieEvent)>>>,
    messages: Arc<Mutex<Vec<(Uuid, ChatMessage)>>>,
    failing: Arc<Mutex<bool>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events_for(&self, user_id: Uuid) -> Vec<SelfieEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub async fn all_events(&self) -> Vec<(Uuid, SelfieEvent)> {
        self.events.lock().await.clone()
    }

    pub async fn messages_for(&self, user_id: Uuid) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Every send fails from now on (nothing is recorded).
    pub async fn fake_fail_all(&self) {
        *self.failing.lock().await = true;
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_to_user(&self, user_id: Uuid, event: SelfieEvent) -> Result<()> {
        if *self.failing.lock().await {
            return Err(anyhow!("Simulated notifier outage"));
        }
        self.events.lock().await.push((user_id, event));
        Ok(())
    }

    async fn deliver_message(&self, user_id: Uuid, message: ChatMessage) -> Result<()> {
        if *self.failing.lock().await {
            return Err(anyhow!("Simulated notifier outage"));
        }
        self.messages.lock().await.push((user_id, message));
        Ok(())
    }
}
