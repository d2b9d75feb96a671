use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tandem_types::events::SelfieEvent;
use tandem_types::models::{
    CAPTURE_DELAY_SECS, Exchange, ExchangeStatus, ExchangeView, SelfieResponse,
};

use crate::cleanup::CleanupAgent;
use crate::error::ExchangeError;
use crate::guard::TransitionGuard;
use crate::keys;
use crate::ports::{Clock, ExchangeRepository, MediaIndex, MediaStore, Notifier};
use crate::reveal::{RevealCoordinator, RevealEvent, RevealOutcome};
use crate::scheduler::ExpiryScheduler;

/// Why an exchange ended without a reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Expired,
    Cancelled { by: Uuid },
}

/// Side effects that run after a transition has committed and its permit is
/// released. Their failures are logged, never propagated.
enum AfterCommit {
    Nothing,
    Started(Exchange),
    Ended {
        exchange: Exchange,
        termination: Termination,
        /// Upload that arrived too late to be stored as a response.
        orphan: Option<(String, String)>,
    },
}

/// Receivers the owner of an [`ExchangeService`] must drain: fired expiry
/// timers (feed them to [`ExchangeService::run_expiry_loop`]) and completed
/// reveals (feed them to [`crate::delivery::RevealDelivery::run`]).
pub struct ExchangeQueues {
    pub fired: mpsc::UnboundedReceiver<Uuid>,
    pub reveals: mpsc::UnboundedReceiver<RevealEvent>,
}

/// The selfie-exchange state machine.
///
/// Every mutation of an exchange goes through one of these methods, each of
/// which holds the exchange's transition permit while it reads, decides and
/// commits. Whoever commits a terminal state first wins; later callers see
/// that state and back off.
pub struct ExchangeService {
    repo: Arc<dyn ExchangeRepository>,
    media: Arc<dyn MediaStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<ExpiryScheduler>,
    cleanup: CleanupAgent,
    reveal: RevealCoordinator,
    guard: TransitionGuard,
}

impl ExchangeService {
    pub fn new(
        repo: Arc<dyn ExchangeRepository>,
        media: Arc<dyn MediaStore>,
        index: Arc<dyn MediaIndex>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, ExchangeQueues) {
        let (scheduler, fired) = ExpiryScheduler::new(clock.clone());
        let scheduler = Arc::new(scheduler);
        let (reveal_tx, reveals) = mpsc::unbounded_channel();

        let service = Arc::new(Self {
            cleanup: CleanupAgent::new(repo.clone(), media.clone(), index),
            reveal: RevealCoordinator::new(repo.clone(), scheduler.clone(), clock.clone(), reveal_tx),
            repo,
            media,
            notifier,
            clock,
            scheduler,
            guard: TransitionGuard::new(),
        });

        (service, ExchangeQueues { fired, reveals })
    }

    pub fn scheduler(&self) -> &ExpiryScheduler {
        &self.scheduler
    }

    // -- Transitions --

    pub async fn create(
        &self,
        requester_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<ExchangeView, ExchangeError> {
        if requester_id == receiver_id {
            return Err(ExchangeError::InvalidOperation(
                "cannot request a selfie exchange with yourself".into(),
            ));
        }

        let exchange = Exchange::new(requester_id, receiver_id, self.clock.now());
        self.repo.save_exchange(&exchange).await?;
        info!(
            "Exchange {} requested by {} for {}, accept by {}",
            exchange.id, requester_id, receiver_id, exchange.expires_at
        );

        // Nothing to clean up if nobody accepts, so no timer yet; the accept
        // deadline is checked when the receiver answers.
        self.notify(
            receiver_id,
            SelfieEvent::RequestCreated {
                exchange_id: exchange.id,
                requester_id,
                expires_at: exchange.expires_at,
            },
        )
        .await;

        Ok(ExchangeView::new(&exchange, requester_id, &[]))
    }

    pub async fn accept(
        &self,
        exchange_id: Uuid,
        caller_id: Uuid,
    ) -> Result<ExchangeView, ExchangeError> {
        let (view, effects) = {
            let _permit = self.guard.acquire(exchange_id).await;
            let mut exchange = self.load(exchange_id).await?;

            if exchange.receiver_id != caller_id {
                return Err(ExchangeError::Forbidden { exchange_id, user_id: caller_id });
            }

            match exchange.status {
                ExchangeStatus::Accepted | ExchangeStatus::Completed => {
                    return self.view_of(&exchange, caller_id).await;
                }
                ExchangeStatus::Expired => {
                    return Err(ExchangeError::Conflict(format!(
                        "exchange {} has already ended",
                        exchange_id
                    )));
                }
                ExchangeStatus::Pending => {}
            }

            let now = self.clock.now();
            if now > exchange.expires_at {
                info!("Accept for exchange {} arrived after {}", exchange_id, exchange.expires_at);
                let exchange = self.commit_expired(exchange).await?;
                (
                    ExchangeView::new(&exchange, caller_id, &[]),
                    AfterCommit::Ended {
                        exchange,
                        termination: Termination::Expired,
                        orphan: None,
                    },
                )
            } else {
                exchange.status = ExchangeStatus::Accepted;
                exchange.accepted_at = Some(now);
                self.repo.save_exchange(&exchange).await?;
                if let Some(deadline) = exchange.capture_deadline() {
                    self.scheduler.arm(exchange_id, deadline);
                }
                info!("Exchange {} accepted, capture window open", exchange_id);
                (
                    ExchangeView::new(&exchange, caller_id, &[]),
                    AfterCommit::Started(exchange),
                )
            }
        };

        self.after_commit(effects).await;
        Ok(view)
    }

    pub async fn submit(
        &self,
        exchange_id: Uuid,
        caller_id: Uuid,
        object_key: &str,
        content_hash: &str,
    ) -> Result<ExchangeView, ExchangeError> {
        let (view, effects) = {
            let _permit = self.guard.acquire(exchange_id).await;
            let exchange = self.load(exchange_id).await?;

            if !exchange.is_participant(caller_id) {
                return Err(ExchangeError::Forbidden { exchange_id, user_id: caller_id });
            }

            match exchange.status {
                ExchangeStatus::Completed | ExchangeStatus::Expired => {
                    debug!("Submit for finished exchange {} ignored", exchange_id);
                    return self.view_of(&exchange, caller_id).await;
                }
                ExchangeStatus::Pending => {
                    return Err(ExchangeError::Conflict(format!(
                        "exchange {} has not been accepted",
                        exchange_id
                    )));
                }
                ExchangeStatus::Accepted => {}
            }

            let content_hash = self.verify_upload(caller_id, object_key, content_hash).await?;
            let deadline = exchange.capture_deadline().ok_or_else(|| {
                ExchangeError::Conflict(format!("exchange {} has no acceptance time", exchange_id))
            })?;
            let now = self.clock.now();

            if now > deadline {
                info!("Photo from {} for exchange {} missed {}", caller_id, exchange_id, deadline);
                let exchange = self.commit_expired(exchange).await?;
                (
                    ExchangeView::new(&exchange, caller_id, &[]),
                    AfterCommit::Ended {
                        exchange,
                        termination: Termination::Expired,
                        orphan: Some((object_key.to_string(), content_hash)),
                    },
                )
            } else {
                self.repo
                    .save_response(&SelfieResponse {
                        exchange_id,
                        user_id: caller_id,
                        object_key: object_key.to_string(),
                        content_hash,
                        submitted_at: now,
                    })
                    .await?;

                let responses = self.repo.find_responses(exchange_id).await?;
                let from = |user_id: Uuid| responses.iter().find(|r| r.user_id == user_id).cloned();

                match (from(exchange.requester_id), from(exchange.receiver_id)) {
                    (Some(requester), Some(receiver)) => {
                        match self.reveal.reveal(exchange, requester, receiver).await? {
                            RevealOutcome::Completed(exchange) => (
                                ExchangeView::new(&exchange, caller_id, &responses),
                                AfterCommit::Nothing,
                            ),
                            RevealOutcome::Late(exchange) => {
                                let exchange = self.commit_expired(exchange).await?;
                                (
                                    ExchangeView::new(&exchange, caller_id, &[]),
                                    AfterCommit::Ended {
                                        exchange,
                                        termination: Termination::Expired,
                                        orphan: None,
                                    },
                                )
                            }
                        }
                    }
                    _ => {
                        if self.scheduler.arm(exchange_id, deadline) {
                            debug!("Re-armed missing expiry timer for exchange {}", exchange_id);
                        }
                        debug!("Exchange {} waiting for the other photo", exchange_id);
                        (
                            ExchangeView::new(&exchange, caller_id, &responses),
                            AfterCommit::Nothing,
                        )
                    }
                }
            }
        };

        self.after_commit(effects).await;
        Ok(view)
    }

    pub async fn cancel(&self, exchange_id: Uuid, caller_id: Uuid) -> Result<(), ExchangeError> {
        let effects = {
            let _permit = self.guard.acquire(exchange_id).await;
            let exchange = self.load(exchange_id).await?;

            if !exchange.is_participant(caller_id) {
                return Err(ExchangeError::Forbidden { exchange_id, user_id: caller_id });
            }
            if exchange.status.is_terminal() {
                debug!("Cancel for finished exchange {} ignored", exchange_id);
                return Ok(());
            }

            info!("Exchange {} cancelled by {}", exchange_id, caller_id);
            let exchange = self.commit_expired(exchange).await?;
            AfterCommit::Ended {
                exchange,
                termination: Termination::Cancelled { by: caller_id },
                orphan: None,
            }
        };

        self.after_commit(effects).await;
        Ok(())
    }

    /// Called for every timer the scheduler fires. A no-op when a racing
    /// submit or cancel already finished the exchange.
    pub async fn on_timer_fired(&self, exchange_id: Uuid) -> Result<(), ExchangeError> {
        let effects = {
            let _permit = self.guard.acquire(exchange_id).await;
            let Some(exchange) = self.repo.find_exchange(exchange_id).await? else {
                warn!("Expiry fired for unknown exchange {}", exchange_id);
                return Ok(());
            };
            if exchange.status.is_terminal() {
                debug!("Expiry for exchange {} lost the race to {}", exchange_id, exchange.status);
                return Ok(());
            }

            info!("Exchange {} timed out in state {}", exchange_id, exchange.status);
            let exchange = self.commit_expired(exchange).await?;
            AfterCommit::Ended {
                exchange,
                termination: Termination::Expired,
                orphan: None,
            }
        };

        self.after_commit(effects).await;
        Ok(())
    }

    /// Drain fired timers until the scheduler's sender goes away.
    pub async fn run_expiry_loop(self: Arc<Self>, mut fired: mpsc::UnboundedReceiver<Uuid>) {
        while let Some(exchange_id) = fired.recv().await {
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.on_timer_fired(exchange_id).await {
                    error!("Expiring exchange {} failed: {}", exchange_id, e);
                }
            });
        }
        info!("Expiry channel closed, expiry loop exiting");
    }

    /// Startup sweep. Timers do not survive a restart, so re-arm every
    /// accepted exchange (a passed deadline fires at once) and expire
    /// pending requests nobody answered in time. Returns how many exchanges
    /// were touched.
    pub async fn recover(&self) -> Result<usize, ExchangeError> {
        let now = self.clock.now();
        let mut touched = 0;

        for exchange in self.repo.find_open_exchanges().await? {
            match exchange.status {
                ExchangeStatus::Accepted => {
                    if let Some(deadline) = exchange.capture_deadline() {
                        self.scheduler.arm(exchange.id, deadline);
                        touched += 1;
                    }
                }
                ExchangeStatus::Pending if now > exchange.expires_at => {
                    self.on_timer_fired(exchange.id).await?;
                    touched += 1;
                }
                _ => {}
            }
        }

        if touched > 0 {
            info!("Recovered {} open exchanges", touched);
        }
        Ok(touched)
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    // -- Queries --

    /// Current state of an exchange, for one of its participants.
    pub async fn view(&self, exchange_id: Uuid, caller_id: Uuid) -> Result<ExchangeView, ExchangeError> {
        let exchange = self.load(exchange_id).await?;
        if !exchange.is_participant(caller_id) {
            return Err(ExchangeError::Forbidden { exchange_id, user_id: caller_id });
        }
        self.view_of(&exchange, caller_id).await
    }

    /// The open exchange between the caller and `other_id`, if any.
    pub async fn active_between(
        &self,
        caller_id: Uuid,
        other_id: Uuid,
    ) -> Result<Option<ExchangeView>, ExchangeError> {
        match self.repo.find_active_between(caller_id, other_id).await? {
            Some(exchange) => Ok(Some(self.view_of(&exchange, caller_id).await?)),
            None => Ok(None),
        }
    }

    // -- Internals --

    async fn load(&self, exchange_id: Uuid) -> Result<Exchange, ExchangeError> {
        self.repo
            .find_exchange(exchange_id)
            .await?
            .ok_or(ExchangeError::NotFound(exchange_id))
    }

    async fn view_of(&self, exchange: &Exchange, viewer_id: Uuid) -> Result<ExchangeView, ExchangeError> {
        let responses = self.repo.find_responses(exchange.id).await?;
        Ok(ExchangeView::new(exchange, viewer_id, &responses))
    }

    /// Callers may only submit objects presigned for them. The hash is taken
    /// from the stored bytes; a client-supplied one must agree with it.
    async fn verify_upload(
        &self,
        caller_id: Uuid,
        object_key: &str,
        claimed_hash: &str,
    ) -> Result<String, ExchangeError> {
        if !keys::is_owned_by(object_key, caller_id) {
            warn!("{} submitted {}, which is not their upload", caller_id, object_key);
            return Err(ExchangeError::InvalidOperation(format!(
                "{} is not an upload of yours",
                object_key
            )));
        }

        let data = self.media.download(object_key).await.map_err(|e| {
            debug!("Submitted object {} unreadable: {}", object_key, e);
            ExchangeError::InvalidOperation(format!("nothing uploaded at {}", object_key))
        })?;
        let content_hash = keys::content_hash(&data);
        if !claimed_hash.is_empty() && claimed_hash != content_hash {
            return Err(ExchangeError::InvalidOperation(format!(
                "content hash does not match {}",
                object_key
            )));
        }
        Ok(content_hash)
    }

    async fn commit_expired(&self, mut exchange: Exchange) -> Result<Exchange, ExchangeError> {
        exchange.status = ExchangeStatus::Expired;
        self.repo.save_exchange(&exchange).await?;
        self.scheduler.disarm(exchange.id);
        Ok(exchange)
    }

    async fn after_commit(&self, effects: AfterCommit) {
        match effects {
            AfterCommit::Nothing => {}
            AfterCommit::Started(exchange) => {
                let Some(deadline) = exchange.capture_deadline() else {
                    return;
                };
                let start = SelfieEvent::Start {
                    exchange_id: exchange.id,
                    capture_delay_seconds: CAPTURE_DELAY_SECS,
                    deadline,
                };
                self.notify(exchange.requester_id, start.clone()).await;
                self.notify(exchange.receiver_id, start).await;
            }
            AfterCommit::Ended {
                exchange,
                termination,
                orphan,
            } => {
                if let Err(e) = self.cleanup.cleanup(exchange.id).await {
                    warn!("Cleanup for exchange {} failed: {}", exchange.id, e);
                }
                if let Some((key, hash)) = orphan {
                    self.cleanup.discard(&key, &hash).await;
                }

                let event = match termination {
                    Termination::Expired => SelfieEvent::Expired { exchange_id: exchange.id },
                    Termination::Cancelled { by } => SelfieEvent::Cancelled {
                        exchange_id: exchange.id,
                        cancelled_by: by,
                    },
                };
                self.notify(exchange.requester_id, event.clone()).await;
                self.notify(exchange.receiver_id, event).await;
            }
        }
    }

    async fn notify(&self, user_id: Uuid, event: SelfieEvent) {
        if let Err(e) = self.notifier.send_to_user(user_id, event).await {
            warn!("Notification to {} failed: {}", user_id, e);
        }
    }
}

