//! The per-collection Sync ledger (`spec.md` §3).

use super::batch::Batch;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A monotonically non-decreasing counter rendered as a decimal
/// string on the wire. `0` is the reserved "initial sync" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncKey(pub u64);

impl SyncKey {
    pub const INITIAL: Self = Self(0);

    #[must_use]
    pub const fn succ(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const DEFAULT_WINDOW_SIZE: usize = 25;
pub const MIN_WINDOW_SIZE: usize = 1;
pub const MAX_WINDOW_SIZE: usize = 512;

/// Clamp a client-requested window size to `[1, 512]`, defaulting to
/// 25 when the client didn't specify one.
#[must_use]
pub fn clamp_window_size(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_WINDOW_SIZE)
        .clamp(MIN_WINDOW_SIZE, MAX_WINDOW_SIZE)
}

/// Ledger for one `(user_id, device_id, collection_id)` triple.
#[derive(Debug, Clone)]
pub struct CollectionState {
    pub current_key: SyncKey,
    pub next_key: SyncKey,
    pub pending_batch: Option<Batch>,
    pub cursor: usize,
    pub window_size: usize,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            current_key: SyncKey::INITIAL,
            next_key: SyncKey(1),
            pending_batch: None,
            cursor: 0,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

type Key = (u64, String, String);

/// All `CollectionState` ledgers this server holds, keyed by
/// `(user_id, device_id, collection_id)`.
///
/// Fine-grained locking: the outer map lock only guards membership,
/// each ledger is individually lockable so two different collections
/// never contend on the same mutex.
#[derive(Default)]
pub struct CollectionStateTable {
    inner: Mutex<HashMap<Key, Arc<Mutex<CollectionState>>>>,
}

impl CollectionStateTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        user_id: u64,
        device_id: &str,
        collection_id: &str,
    ) -> Arc<Mutex<CollectionState>> {
        let key = (user_id, device_id.to_string(), collection_id.to_string());
        let mut table = self.inner.lock().unwrap();
        table
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(CollectionState::default())))
            .clone()
    }
}
