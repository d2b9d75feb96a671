use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ports::Clock;

struct ArmedTimer {
    generation: u64,
    deadline: DateTime<Utc>,
    token: CancellationToken,
}

type TimerMap = Arc<Mutex<HashMap<Uuid, ArmedTimer>>>;

/// One cancellable deadline per open exchange.
///
/// A timer that reaches its deadline pushes the exchange id onto the channel
/// returned by [`ExpiryScheduler::new`]; the state machine drains it and
/// decides whether the exchange still needs expiring. Disarming before the
/// deadline guarantees nothing is sent. Disarming while the timer is firing
/// is resolved by the state machine's terminal-state check, not here.
pub struct ExpiryScheduler {
    clock: Arc<dyn Clock>,
    timers: TimerMap,
    fired_tx: mpsc::UnboundedSender<Uuid>,
    root: CancellationToken,
    next_generation: AtomicU64,
}

impl ExpiryScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            clock,
            timers: Arc::new(Mutex::new(HashMap::new())),
            fired_tx,
            root: CancellationToken::new(),
            next_generation: AtomicU64::new(0),
        };
        (scheduler, fired_rx)
    }

    /// Schedule a fire at `deadline`. Returns false (and changes nothing) if
    /// the id already has a pending timer or the scheduler is shut down.
    /// A deadline already in the past fires right away.
    pub fn arm(&self, exchange_id: Uuid, deadline: DateTime<Utc>) -> bool {
        if self.root.is_cancelled() {
            warn!("Scheduler shut down, not arming exchange {}", exchange_id);
            return false;
        }

        let mut timers = self.lock_timers();
        if let Some(existing) = timers.get(&exchange_id) {
            trace!(
                "Exchange {} already armed for {}, ignoring re-arm",
                exchange_id, existing.deadline
            );
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        timers.insert(
            exchange_id,
            ArmedTimer {
                generation,
                deadline,
                token: token.clone(),
            },
        );
        drop(timers);

        let delay = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let fire_at = tokio::time::Instant::now() + delay;
        debug!("Armed expiry for exchange {} in {:?}", exchange_id, delay);

        let timers = self.timers.clone();
        let fired_tx = self.fired_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!("Expiry for exchange {} disarmed", exchange_id);
                }
                _ = tokio::time::sleep_until(fire_at) => {
                    {
                        let mut timers = timers.lock().unwrap_or_else(|e| e.into_inner());
                        if timers.get(&exchange_id).is_some_and(|t| t.generation == generation) {
                            timers.remove(&exchange_id);
                        }
                    }
                    debug!("Expiry timer fired for exchange {}", exchange_id);
                    if fired_tx.send(exchange_id).is_err() {
                        warn!("Expiry receiver dropped, exchange {} not expired", exchange_id);
                    }
                }
            }
        });

        true
    }

    /// Cancel the pending timer for `exchange_id`, if any.
    pub fn disarm(&self, exchange_id: Uuid) -> bool {
        match self.lock_timers().remove(&exchange_id) {
            Some(timer) => {
                timer.token.cancel();
                debug!("Disarmed expiry for exchange {}", exchange_id);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, exchange_id: Uuid) -> bool {
        self.lock_timers().contains_key(&exchange_id)
    }

    pub fn armed_count(&self) -> usize {
        self.lock_timers().len()
    }

    /// Cancel every pending timer and refuse new ones.
    pub fn shutdown(&self) {
        self.root.cancel();
        let dropped = {
            let mut timers = self.lock_timers();
            let n = timers.len();
            timers.clear();
            n
        };
        debug!("Expiry scheduler shut down, {} timers cancelled", dropped);
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ArmedTimer>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
