//! Per-identity serialization of sync operations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

type LockKey = (String, String);

/// One async lock per `(record_type, identity)`.
///
/// Holding the guard serializes existence lookup and write for that
/// identity, so two near-simultaneous webhooks for the same record cannot
/// both decide to create it. Entries nobody holds or waits on are dropped
/// on the next acquire.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

/// Held for the duration of one operation
pub struct IdentityGuard {
    _guard: OwnedMutexGuard<()>,
}

impl IdentityLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, record_type: &str, identity: &str) -> IdentityGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((record_type.to_string(), identity.to_string()))
                .or_default()
                .clone()
        };
        IdentityGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of identities currently held or waited on
    pub async fn active(&self) -> usize {
        let locks = self.locks.lock().await;
        locks
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
