use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_types::models::{Exchange, ExchangeStatus, SelfieResponse};

use crate::error::ExchangeError;
use crate::ports::{Clock, ExchangeRepository};
use crate::scheduler::ExpiryScheduler;

/// Hand-off from a committed completion to the delivery step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealEvent {
    pub exchange_id: Uuid,
    pub requester: SelfieResponse,
    pub receiver: SelfieResponse,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum RevealOutcome {
    Completed(Exchange),
    /// A photo arrived after the capture deadline; the caller must expire
    /// the exchange instead.
    Late(Exchange),
}

/// The only code path that moves an exchange to `COMPLETED`.
pub struct RevealCoordinator {
    repo: Arc<dyn ExchangeRepository>,
    scheduler: Arc<ExpiryScheduler>,
    clock: Arc<dyn Clock>,
    reveals: mpsc::UnboundedSender<RevealEvent>,
}

impl RevealCoordinator {
    pub fn new(
        repo: Arc<dyn ExchangeRepository>,
        scheduler: Arc<ExpiryScheduler>,
        clock: Arc<dyn Clock>,
        reveals: mpsc::UnboundedSender<RevealEvent>,
    ) -> Self {
        Self {
            repo,
            scheduler,
            clock,
            reveals,
        }
    }

    /// Must be called with the exchange's transition permit held and both
    /// responses present. Both photos have to be inside the same capture
    /// window; arriving before cleanup ran is not enough.
    pub async fn reveal(
        &self,
        mut exchange: Exchange,
        requester: SelfieResponse,
        receiver: SelfieResponse,
    ) -> Result<RevealOutcome, ExchangeError> {
        if exchange.status != ExchangeStatus::Accepted {
            return Err(ExchangeError::Conflict(format!(
                "cannot reveal exchange {} in state {}",
                exchange.id, exchange.status
            )));
        }
        let deadline = exchange.capture_deadline().ok_or_else(|| {
            ExchangeError::Conflict(format!("exchange {} has no acceptance time", exchange.id))
        })?;

        if requester.submitted_at > deadline || receiver.submitted_at > deadline {
            warn!(
                "Exchange {} has a photo past the {} deadline, not revealing",
                exchange.id, deadline
            );
            return Ok(RevealOutcome::Late(exchange));
        }

        exchange.status = ExchangeStatus::Completed;
        self.repo.save_exchange(&exchange).await?;
        self.scheduler.disarm(exchange.id);
        info!("Exchange {} completed, revealing both photos", exchange.id);

        let event = RevealEvent {
            exchange_id: exchange.id,
            requester,
            receiver,
            completed_at: self.clock.now(),
        };
        if self.reveals.send(event).is_err() {
            warn!("Reveal queue closed, exchange {} photos not delivered", exchange.id);
        }

        Ok(RevealOutcome::Completed(exchange))
    }
}
