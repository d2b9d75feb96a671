use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ports::{ExchangeRepository, MediaIndex, MediaStore};

/// What happened to one uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Deleted,
    /// The hash is referenced by another durable record.
    Retained,
    /// Deletion or the dedup lookup failed; the object may linger.
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub retained: usize,
    pub failed: usize,
}

impl CleanupReport {
    fn record(&mut self, disposal: Disposal) {
        match disposal {
            Disposal::Deleted => self.deleted += 1,
            Disposal::Retained => self.retained += 1,
            Disposal::Failed => self.failed += 1,
        }
    }
}

/// Removes media uploaded for an exchange that ended without a reveal.
///
/// Objects whose content hash is registered in the media index are left
/// alone. Safe to run any number of times for the same exchange.
pub struct CleanupAgent {
    repo: Arc<dyn ExchangeRepository>,
    media: Arc<dyn MediaStore>,
    index: Arc<dyn MediaIndex>,
}

impl CleanupAgent {
    pub fn new(
        repo: Arc<dyn ExchangeRepository>,
        media: Arc<dyn MediaStore>,
        index: Arc<dyn MediaIndex>,
    ) -> Self {
        Self { repo, media, index }
    }

    /// Dispose of every response's media, then drop the response rows.
    /// The exchange record itself is kept.
    pub async fn cleanup(&self, exchange_id: Uuid) -> Result<CleanupReport> {
        let responses = self.repo.find_responses(exchange_id).await?;
        let mut report = CleanupReport::default();

        for response in &responses {
            let disposal = self.discard(&response.object_key, &response.content_hash).await;
            report.record(disposal);
        }

        self.repo.delete_responses(exchange_id).await?;

        if !responses.is_empty() {
            info!(
                "Cleanup for exchange {}: {} deleted, {} retained, {} failed",
                exchange_id, report.deleted, report.retained, report.failed
            );
        }
        Ok(report)
    }

    /// Delete one object unless its hash is referenced elsewhere.
    pub async fn discard(&self, object_key: &str, content_hash: &str) -> Disposal {
        if !content_hash.is_empty() {
            match self.index.exists(content_hash).await {
                Ok(true) => {
                    debug!("Keeping {}: hash {} is referenced elsewhere", object_key, content_hash);
                    return Disposal::Retained;
                }
                Ok(false) => {}
                Err(e) => {
                    // Unknown reference state: leave the object for a later sweep.
                    warn!("Dedup lookup for {} failed, not deleting: {}", object_key, e);
                    return Disposal::Failed;
                }
            }
        }

        match self.media.delete(object_key).await {
            Ok(()) => Disposal::Deleted,
            Err(e) => {
                warn!("Failed to delete media object {}: {}", object_key, e);
                Disposal::Failed
            }
        }
    }
}
