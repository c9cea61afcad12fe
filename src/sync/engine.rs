//! The per-collection Sync algorithm (`spec.md` §4.5).

use super::batch::{
    render_body, Batch, BodyPreference, ClientCommand, CommandResponse, CommandStatus,
    RenderedItem,
};
use super::state::{clamp_window_size, CollectionState, SyncKey};
use crate::store::Store;
use std::sync::{Arc, Mutex};

/// Per-collection status code (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncStatus {
    Ok = 1,
    ServerError = 3,
    ProtocolError = 4,
    ServerRetryable = 6,
    Conflict = 7,
    NotFound = 8,
    InvalidSyncKey = 9,
}

impl SyncStatus {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// One collection's worth of a client's Sync request.
#[derive(Debug, Clone)]
pub struct CollectionRequest<'a> {
    pub collection_id: &'a str,
    pub client_sync_key: &'a str,
    pub window_size: Option<usize>,
    pub body_preference: BodyPreference,
    pub commands: Vec<ClientCommand>,
}

/// One collection's worth of a Sync response.
#[derive(Debug, Clone)]
pub struct CollectionResponse {
    pub status: SyncStatus,
    pub sync_key: String,
    pub batch: Option<Batch>,
}

/// Run the five-case algorithm for one collection.
///
/// # Errors
///
/// Propagates any error the backing store returns while fetching a
/// fresh page of items.
pub async fn sync_collection<S: Store>(
    store: &S,
    user_id: u64,
    state: &Arc<Mutex<CollectionState>>,
    req: &CollectionRequest<'_>,
) -> crate::Result<CollectionResponse> {
    // Case 1: initial sync. Unconditionally resets and primes; never
    // carries items (testable property 5).
    if req.client_sync_key == "0" {
        let mut s = state.lock().unwrap();
        s.current_key = SyncKey::INITIAL;
        s.next_key = SyncKey(1);
        s.pending_batch = None;
        s.cursor = 0;
        return Ok(CollectionResponse {
            status: SyncStatus::Ok,
            sync_key: s.next_key.to_string(),
            batch: None,
        });
    }

    let (current_key, next_key, pending) = {
        let s = state.lock().unwrap();
        (s.current_key, s.next_key, s.pending_batch.clone())
    };

    // Case 2: idempotent resend. Re-emits the retained batch
    // byte-for-byte; cursor and store are never touched.
    if req.client_sync_key == current_key.to_string() {
        if let Some(batch) = pending {
            return Ok(CollectionResponse {
                status: SyncStatus::Ok,
                sync_key: batch.response_sync_key.to_string(),
                batch: Some(batch),
            });
        }
    }

    // Case 3: ACK of the previous batch. Advance, then fall into the
    // fresh-batch path below.
    if req.client_sync_key == next_key.to_string() {
        {
            let mut s = state.lock().unwrap();
            s.current_key = s.next_key;
            s.pending_batch = None;
        }
        return fetch_fresh_batch(store, user_id, state, req).await;
    }

    // Case 4: first batch of a round (client_sync_key == current_key,
    // no pending_batch — e.g. the very first page after the prime).
    if req.client_sync_key == current_key.to_string() {
        return fetch_fresh_batch(store, user_id, state, req).await;
    }

    // Case 5: unexpected key. current_key is deliberately NOT rolled
    // back (spec.md §9) — only cursor/pending_batch reset — so the
    // client still advances instead of looping.
    {
        let mut s = state.lock().unwrap();
        s.pending_batch = None;
        s.cursor = 0;
    }
    fetch_fresh_batch(store, user_id, state, req).await
}

async fn apply_commands<S: Store>(
    store: &S,
    user_id: u64,
    commands: &[ClientCommand],
) -> Vec<CommandResponse> {
    let mut responses = Vec::with_capacity(commands.len());
    for cmd in commands {
        let (server_id, result) = match cmd {
            ClientCommand::Change { server_id, read } => {
                (server_id.clone(), store.set_read(user_id, server_id, *read).await)
            }
            ClientCommand::Delete { server_id } => {
                (server_id.clone(), store.delete_item(user_id, server_id).await)
            }
        };
        let status = match result {
            Ok(()) => CommandStatus::Ok,
            Err(crate::Error::StoreUnavailable(_)) => CommandStatus::NotFound,
            Err(_) => CommandStatus::ServerError,
        };
        responses.push(CommandResponse { server_id, status });
    }
    responses
}

async fn fetch_fresh_batch<S: Store>(
    store: &S,
    user_id: u64,
    state: &Arc<Mutex<CollectionState>>,
    req: &CollectionRequest<'_>,
) -> crate::Result<CollectionResponse> {
    let command_responses = apply_commands(store, user_id, &req.commands).await;

    let window = clamp_window_size(req.window_size);
    let (cursor, current_key) = {
        let s = state.lock().unwrap();
        (s.cursor, s.current_key)
    };

    let (items, total_available) = store.list_items(user_id, req.collection_id, cursor, window).await?;
    let more_available = cursor + items.len() < total_available;
    let response_sync_key = current_key.succ();

    let rendered: Vec<RenderedItem> = items
        .into_iter()
        .map(|item| {
            let body = render_body(&item, &req.body_preference);
            RenderedItem { item, body }
        })
        .collect();

    let batch = Batch {
        response_sync_key,
        sent_count: rendered.len(),
        total_available,
        more_available,
        items: rendered,
        command_responses,
    };

    let mut s = state.lock().unwrap();
    s.next_key = response_sync_key;
    s.cursor = if more_available { cursor + batch.items.len() } else { 0 };
    s.pending_batch = Some(batch.clone());

    Ok(CollectionResponse {
        status: SyncStatus::Ok,
        sync_key: response_sync_key.to_string(),
        batch: Some(batch),
    })
}
