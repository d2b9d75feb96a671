use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>;

/// Serializes transitions per exchange id. Different exchanges never wait on
/// each other; two handlers racing on the same id run one after the other.
#[derive(Default)]
pub struct TransitionGuard {
    locks: LockMap,
}

/// Held for the duration of one read-decide-commit step.
pub struct TransitionPermit {
    id: Uuid,
    lock: Arc<AsyncMutex<()>>,
    locks: LockMap,
    _held: OwnedMutexGuard<()>,
}

impl TransitionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: Uuid) -> TransitionPermit {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id).or_default().clone()
        };
        let held = lock.clone().lock_owned().await;
        TransitionPermit {
            id,
            lock,
            locks: self.locks.clone(),
            _held: held,
        }
    }

    /// Number of ids with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Drop for TransitionPermit {
    fn drop(&mut self) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // map entry + our clone + the owned guard; anything more is a waiter
        if Arc::strong_count(&self.lock) <= 3 {
            locks.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_id_is_serialized() {
        let guard = Arc::new(TransitionGuard::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let inside = inside.clone();
            handles.push(tokio::spawn(async move {
                let _permit = guard.acquire(id).await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(guard.tracked(), 0);
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let guard = TransitionGuard::new();
        let _a = guard.acquire(Uuid::new_v4()).await;
        let _b = guard.acquire(Uuid::new_v4()).await;
        assert_eq!(guard.tracked(), 2);
    }
}
