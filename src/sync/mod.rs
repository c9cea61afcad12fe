//! Item sync state machine (C5) — the hard core.
//!
//! Implements the five-case per-collection algorithm of `spec.md`
//! §4.5: initial sync, idempotent resend, ACK + fresh batch, first
//! batch of a round, and unexpected-key recovery.

mod batch;
mod engine;
mod state;

pub use batch::{
    render_body, Batch, BodyData, BodyPreference, BodyType, ClientCommand, CommandResponse,
    CommandStatus, Item, RenderedBody, RenderedItem,
};
pub use engine::{sync_collection, CollectionRequest, CollectionResponse, SyncStatus};
pub use state::{
    clamp_window_size, CollectionState, CollectionStateTable, SyncKey, DEFAULT_WINDOW_SIZE,
    MAX_WINDOW_SIZE, MIN_WINDOW_SIZE,
};
