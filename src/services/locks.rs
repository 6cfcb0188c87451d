use {
    crate::domain::id::AccountId,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex, PoisonError},
    },
    tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard},
};

/// Entries are pruned once the map grows past this many idle locks.
const PRUNE_THRESHOLD: usize = 4096;

/// Per-account mutual exclusion shared by every path that mutates account
/// state (webhook pipeline, commission auto-approval).
///
/// In-process only. Running several instances against one database relies on
/// the ledger's unique `transaction_id` to stop double application.
#[derive(Clone, Default)]
pub struct AccountLocks {
    inner: Arc<Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, account: AccountId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(account).or_default().clone()
        };
        slot.lock_owned().await
    }
}
