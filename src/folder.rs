//! Folder hierarchy engine (C4).
//!
//! The folder tree is static in this core (`spec.md` §4.4): a fixed
//! set of `Folder` entries with a single monotonic `SyncKey` shared by
//! every user. `FolderSync` with key `"0"` primes the tree; key `"1"`
//! is a no-op re-ack; any other key is `Status=9`.

use crate::sync::SyncStatus;

/// The EAS folder class code (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FolderType {
    Inbox = 2,
    Drafts = 3,
    Deleted = 4,
    Sent = 5,
    Outbox = 6,
    Calendar = 8,
    Contacts = 9,
}

impl FolderType {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// A folder in the fixed hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub server_id: &'static str,
    pub parent_id: &'static str,
    pub display_name: &'static str,
    pub kind: FolderType,
}

/// The static folder set this core serves.
#[must_use]
pub fn fixed_hierarchy() -> Vec<Folder> {
    vec![
        Folder {
            server_id: "1",
            parent_id: "0",
            display_name: "Inbox",
            kind: FolderType::Inbox,
        },
        Folder {
            server_id: "2",
            parent_id: "0",
            display_name: "Drafts",
            kind: FolderType::Drafts,
        },
        Folder {
            server_id: "3",
            parent_id: "0",
            display_name: "Deleted Items",
            kind: FolderType::Deleted,
        },
        Folder {
            server_id: "4",
            parent_id: "0",
            display_name: "Sent Items",
            kind: FolderType::Sent,
        },
        Folder {
            server_id: "5",
            parent_id: "0",
            display_name: "Outbox",
            kind: FolderType::Outbox,
        },
    ]
}

const CURRENT_KEY: &str = "1";

/// Result of a `FolderSync` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSyncResult {
    pub status: SyncStatus,
    pub sync_key: String,
    pub added: Vec<Folder>,
}

/// Serve one `FolderSync` request. Stateless beyond the fixed
/// hierarchy and the single well-known server key `"1"`.
#[must_use]
pub fn folder_sync(client_sync_key: &str) -> FolderSyncResult {
    match client_sync_key {
        "0" => FolderSyncResult {
            status: SyncStatus::Ok,
            sync_key: CURRENT_KEY.to_string(),
            added: fixed_hierarchy(),
        },
        CURRENT_KEY => FolderSyncResult {
            status: SyncStatus::Ok,
            sync_key: CURRENT_KEY.to_string(),
            added: Vec::new(),
        },
        _ => FolderSyncResult {
            status: SyncStatus::InvalidSyncKey,
            sync_key: client_sync_key.to_string(),
            added: Vec::new(),
        },
    }
}
