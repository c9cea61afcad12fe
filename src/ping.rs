//! Long-poll Ping notifier (C6).
//!
//! A subscription bus keyed by `user_id` (`spec.md` §4.6). Publish is
//! non-blocking and level-then-drain: `notify` records which
//! collections changed and wakes every matching subscriber once; a
//! parked request observes the accumulated set exactly once per park.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;

pub const MIN_HEARTBEAT_SECS: u64 = 60;
pub const MAX_HEARTBEAT_SECS: u64 = 3540;

/// Clamp a client-requested heartbeat to `[60, 3540]` seconds.
#[must_use]
pub const fn clamp_heartbeat(requested: u64) -> u64 {
    if requested < MIN_HEARTBEAT_SECS {
        MIN_HEARTBEAT_SECS
    } else if requested > MAX_HEARTBEAT_SECS {
        MAX_HEARTBEAT_SECS
    } else {
        requested
    }
}

/// Ping response status (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PingStatus {
    HeartbeatExpired = 1,
    ChangesAvailable = 2,
    MissingParameters = 3,
    Malformed = 4,
    InvalidHeartbeat = 5,
    TooManyFolders = 6,
    FolderHierarchyChanged = 7,
    ServerError = 8,
}

impl PingStatus {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// What a parked `ping` call resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    /// The call completed; folders lists the changed collection ids
    /// (empty unless `status == ChangesAvailable`).
    Completed { status: PingStatus, folders: Vec<String> },
    /// The client disconnected before the call resolved. No response
    /// is sent for a cancelled request.
    Cancelled,
}

struct Subscription {
    collections: Vec<String>,
    notify: Arc<Notify>,
    changed: Arc<Mutex<Vec<String>>>,
}

/// A handle returned by [`PingBus::subscribe`]; always released via
/// [`PingBus::unsubscribe`] on every exit path.
pub struct SubscriptionToken {
    user_id: u64,
    id: u64,
}

/// The subscription bus. One coarse lock guards subscribe, unsubscribe,
/// and notify — all O(subscribers-for-user), which is small per
/// `spec.md` §5.
#[derive(Default)]
pub struct PingBus {
    subs: Mutex<HashMap<u64, HashMap<u64, Subscription>>>,
    next_id: Mutex<u64>,
}

impl PingBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription for `user_id` on the given collections.
    fn subscribe(
        &self,
        user_id: u64,
        collections: Vec<String>,
    ) -> (Arc<Notify>, Arc<Mutex<Vec<String>>>, SubscriptionToken) {
        let notify = Arc::new(Notify::new());
        let changed = Arc::new(Mutex::new(Vec::new()));
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.subs.lock().unwrap().entry(user_id).or_default().insert(
            id,
            Subscription {
                collections,
                notify: notify.clone(),
                changed: changed.clone(),
            },
        );
        (notify, changed, SubscriptionToken { user_id, id })
    }

    /// Release a subscription. Idempotent.
    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        if let Some(subs) = self.subs.lock().unwrap().get_mut(&token.user_id) {
            subs.remove(&token.id);
        }
    }

    /// Wake every subscriber of `user_id` watching `collection_id`.
    /// A no-op if nobody is subscribed.
    pub fn notify(&self, user_id: u64, collection_id: &str) {
        let subs = self.subs.lock().unwrap();
        let Some(user_subs) = subs.get(&user_id) else {
            return;
        };
        for sub in user_subs.values() {
            if sub.collections.iter().any(|c| c == collection_id) {
                sub.changed.lock().unwrap().push(collection_id.to_string());
                sub.notify.notify_one();
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self, user_id: u64) -> usize {
        self.subs.lock().unwrap().get(&user_id).map_or(0, HashMap::len)
    }
}

/// Park until a matching notify, cooperative cancellation, or the
/// clamped heartbeat timer fires, per `spec.md` §4.6.
pub async fn ping(
    bus: &PingBus,
    user_id: u64,
    collections: Vec<String>,
    heartbeat_secs: u64,
    cancel: &Notify,
) -> PingOutcome {
    let heartbeat = clamp_heartbeat(heartbeat_secs);
    let (notify, changed, token) = bus.subscribe(user_id, collections);

    let outcome = tokio::select! {
        () = notify.notified() => {
            let folders = changed.lock().unwrap().clone();
            PingOutcome::Completed { status: PingStatus::ChangesAvailable, folders }
        }
        () = cancel.notified() => PingOutcome::Cancelled,
        () = time::sleep(Duration::from_secs(heartbeat)) => {
            PingOutcome::Completed { status: PingStatus::HeartbeatExpired, folders: Vec::new() }
        }
    };

    bus.unsubscribe(&token);
    outcome
}
