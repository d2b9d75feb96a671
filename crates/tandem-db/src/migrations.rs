use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (selfie exchanges)");
        conn.execute_batch(
            "
            CREATE TABLE exchanges (
                id              TEXT PRIMARY KEY,
                requester_id    TEXT NOT NULL,
                receiver_id     TEXT NOT NULL,
                status          TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                expires_at      TEXT NOT NULL,
                accepted_at     TEXT
            );

            CREATE INDEX idx_exchanges_pair
                ON exchanges(requester_id, receiver_id);

            CREATE INDEX idx_exchanges_status
                ON exchanges(status);

            CREATE TABLE selfie_responses (
                exchange_id     TEXT NOT NULL REFERENCES exchanges(id),
                user_id         TEXT NOT NULL,
                object_key      TEXT NOT NULL,
                content_hash    TEXT NOT NULL,
                submitted_at    TEXT NOT NULL,
                PRIMARY KEY (exchange_id, user_id)
            );

            CREATE TABLE media_files (
                content_hash    TEXT PRIMARY KEY,
                object_key      TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL,
                recipient_id    TEXT NOT NULL,
                body            TEXT NOT NULL,
                attachment_key  TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(sender_id, recipient_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
