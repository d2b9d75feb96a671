//! Database row types — these map directly to SQLite rows.
//! Conversion into tandem-types models happens at the query boundary.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tandem_types::models::{ChatMessage, Exchange, SelfieResponse};
use uuid::Uuid;

pub struct ExchangeRow {
    pub id: String,
    pub requester_id: String,
    pub receiver_id: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
    pub accepted_at: Option<String>,
}

pub struct ResponseRow {
    pub exchange_id: String,
    pub user_id: String,
    pub object_key: String,
    pub content_hash: String,
    pub submitted_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub attachment_key: Option<String>,
    pub created_at: String,
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

impl TryFrom<ExchangeRow> for Exchange {
    type Error = anyhow::Error;

    fn try_from(row: ExchangeRow) -> Result<Self> {
        Ok(Exchange {
            id: parse_id(&row.id)?,
            requester_id: parse_id(&row.requester_id)?,
            receiver_id: parse_id(&row.receiver_id)?,
            status: row.status.parse()?,
            created_at: parse_ts(&row.created_at)?,
            expires_at: parse_ts(&row.expires_at)?,
            accepted_at: row.accepted_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

impl TryFrom<ResponseRow> for SelfieResponse {
    type Error = anyhow::Error;

    fn try_from(row: ResponseRow) -> Result<Self> {
        Ok(SelfieResponse {
            exchange_id: parse_id(&row.exchange_id)?,
            user_id: parse_id(&row.user_id)?,
            object_key: row.object_key,
            content_hash: row.content_hash,
            submitted_at: parse_ts(&row.submitted_at)?,
        })
    }
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(ChatMessage {
            id: parse_id(&row.id)?,
            sender_id: parse_id(&row.sender_id)?,
            recipient_id: parse_id(&row.recipient_id)?,
            body: row.body,
            attachment_key: row.attachment_key,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}
