use crate::Database;
use crate::models::{ExchangeRow, MessageRow, ResponseRow, format_ts};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use tandem_types::models::{ChatMessage, Exchange, SelfieResponse};
use uuid::Uuid;

const EXCHANGE_COLUMNS: &str =
    "id, requester_id, receiver_id, status, created_at, expires_at, accepted_at";

impl Database {
    // -- Exchanges --

    /// Insert or overwrite an exchange. Participants and creation time never
    /// change after the first insert.
    pub fn save_exchange(&self, exchange: &Exchange) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO exchanges (id, requester_id, receiver_id, status, created_at, expires_at, accepted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status, accepted_at = excluded.accepted_at",
                rusqlite::params![
                    exchange.id.to_string(),
                    exchange.requester_id.to_string(),
                    exchange.receiver_id.to_string(),
                    exchange.status.as_str(),
                    format_ts(&exchange.created_at),
                    format_ts(&exchange.expires_at),
                    exchange.accepted_at.as_ref().map(format_ts),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_exchange(&self, id: Uuid) -> Result<Option<Exchange>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM exchanges WHERE id = ?1", EXCHANGE_COLUMNS);
            let row = conn
                .query_row(&sql, [id.to_string()], exchange_row)
                .optional()?;
            row.map(Exchange::try_from).transpose()
        })
    }

    /// Latest open (pending or accepted) exchange between two users, in either direction.
    pub fn get_active_exchange_between(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Exchange>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM exchanges
                 WHERE ((requester_id = ?1 AND receiver_id = ?2) OR (requester_id = ?2 AND receiver_id = ?1))
                   AND status IN ('PENDING', 'ACCEPTED')
                 ORDER BY created_at DESC
                 LIMIT 1",
                EXCHANGE_COLUMNS
            );
            let row = conn
                .query_row(&sql, [user_a.to_string(), user_b.to_string()], exchange_row)
                .optional()?;
            row.map(Exchange::try_from).transpose()
        })
    }

    /// Every pending or accepted exchange, oldest first.
    pub fn get_open_exchanges(&self) -> Result<Vec<Exchange>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM exchanges WHERE status IN ('PENDING', 'ACCEPTED') ORDER BY created_at",
                EXCHANGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], exchange_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(Exchange::try_from).collect()
        })
    }

    // -- Responses --

    /// One row per (exchange, user); a resubmission overwrites in place.
    pub fn upsert_response(&self, response: &SelfieResponse) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO selfie_responses (exchange_id, user_id, object_key, content_hash, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(exchange_id, user_id) DO UPDATE SET
                    object_key = excluded.object_key,
                    content_hash = excluded.content_hash,
                    submitted_at = excluded.submitted_at",
                rusqlite::params![
                    response.exchange_id.to_string(),
                    response.user_id.to_string(),
                    response.object_key,
                    response.content_hash,
                    format_ts(&response.submitted_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_responses(&self, exchange_id: Uuid) -> Result<Vec<SelfieResponse>> {
        self.with_conn(|conn| query_responses(conn, exchange_id))
    }

    pub fn delete_responses(&self, exchange_id: Uuid) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM selfie_responses WHERE exchange_id = ?1",
                [exchange_id.to_string()],
            )?;
            Ok(n)
        })
    }

    // -- Media index --

    pub fn media_hash_exists(&self, content_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM media_files WHERE content_hash = ?1",
                    [content_hash],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Register a hash once; the first object key recorded for it wins.
    pub fn record_media_if_absent(&self, content_hash: &str, object_key: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO media_files (content_hash, object_key) VALUES (?1, ?2)",
                (content_hash, object_key),
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        body: &str,
        attachment_key: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, body, attachment_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.to_string(),
                    sender_id.to_string(),
                    recipient_id.to_string(),
                    body,
                    attachment_key,
                    format_ts(&created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(ChatMessage {
            id,
            sender_id,
            recipient_id,
            body: body.to_string(),
            attachment_key: attachment_key.map(str::to_string),
            created_at,
        })
    }

    /// Messages between two users, newest first.
    pub fn get_conversation(&self, user_a: Uuid, user_b: Uuid, limit: u32) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, body, attachment_key, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(
                    rusqlite::params![user_a.to_string(), user_b.to_string(), limit],
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            sender_id: row.get(1)?,
                            recipient_id: row.get(2)?,
                            body: row.get(3)?,
                            attachment_key: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(ChatMessage::try_from).collect()
        })
    }
}

fn exchange_row(row: &Row<'_>) -> rusqlite::Result<ExchangeRow> {
    Ok(ExchangeRow {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        receiver_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        accepted_at: row.get(6)?,
    })
}

fn query_responses(conn: &Connection, exchange_id: Uuid) -> Result<Vec<SelfieResponse>> {
    let mut stmt = conn.prepare(
        "SELECT exchange_id, user_id, object_key, content_hash, submitted_at
         FROM selfie_responses
         WHERE exchange_id = ?1
         ORDER BY submitted_at",
    )?;

    let rows = stmt
        .query_map([exchange_id.to_string()], |row| {
            Ok(ResponseRow {
                exchange_id: row.get(0)?,
                user_id: row.get(1)?,
                object_key: row.get(2)?,
                content_hash: row.get(3)?,
                submitted_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(SelfieResponse::try_from).collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
