//! Items, body rendering, and the immutable `Batch` a round of Sync hands out.

use super::state::SyncKey;
use chrono::{DateTime, Utc};

/// An email as the store hands it to the sync engine (`spec.md` §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub server_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub received_at: DateTime<Utc>,
    pub read: bool,
    pub mime_bytes: Vec<u8>,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
    pub conversation_id: String,
}

/// `AirSyncBase.Body.Type` (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BodyType {
    Plain = 1,
    Html = 2,
    Mime = 4,
}

impl BodyType {
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Plain),
            2 => Some(Self::Html),
            4 => Some(Self::Mime),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// A client's requested body rendering for a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyPreference {
    pub body_type: Option<BodyType>,
    pub truncation_size: Option<usize>,
}

/// The rendered content of one item's body, ready to place under
/// `AirSyncBase.Body`.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyData {
    Text(String),
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBody {
    pub body_type: BodyType,
    pub estimated_data_size: usize,
    pub truncated: bool,
    pub data: BodyData,
}

fn truncate_str(s: &str, limit: usize) -> String {
    if limit >= s.len() {
        return s.to_string();
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn render_text(full: String, truncation_size: Option<usize>, body_type: BodyType) -> RenderedBody {
    let full_len = full.len();
    let (text, truncated) = match truncation_size {
        Some(limit) if full_len > limit => (truncate_str(&full, limit), true),
        _ => (full, false),
    };
    RenderedBody {
        body_type,
        estimated_data_size: full_len,
        truncated,
        data: BodyData::Text(text),
    }
}

/// Render `item`'s body according to `pref`, per `spec.md` §4.5.
///
/// `EstimatedDataSize` is always the untrimmed size; `Truncated` is
/// set whenever the declared truncation size clipped the payload.
#[must_use]
pub fn render_body(item: &Item, pref: &BodyPreference) -> RenderedBody {
    match pref.body_type.unwrap_or(BodyType::Plain) {
        BodyType::Plain => render_text(item.body_plain.clone().unwrap_or_default(), pref.truncation_size, BodyType::Plain),
        BodyType::Html => render_text(item.body_html.clone().unwrap_or_default(), pref.truncation_size, BodyType::Html),
        BodyType::Mime => {
            let full = item.mime_bytes.clone();
            let full_len = full.len();
            let (data, truncated) = match pref.truncation_size {
                Some(limit) if full_len > limit => (full[..limit].to_vec(), true),
                _ => (full, false),
            };
            RenderedBody {
                body_type: BodyType::Mime,
                estimated_data_size: full_len,
                truncated,
                data: BodyData::Opaque(data),
            }
        }
    }
}

/// One item plus its rendered body, frozen into a `Batch`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedItem {
    pub item: Item,
    pub body: RenderedBody,
}

/// A mutation a client's `Commands` section asked the server to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Change { server_id: String, read: bool },
    Delete { server_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    Ok = 1,
    ServerError = 3,
    NotFound = 8,
}

impl CommandStatus {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub server_id: String,
    pub status: CommandStatus,
}

/// A server-generated, immutable response for one round of Sync,
/// keyed by `response_sync_key`. Never mutated once constructed — the
/// same instance is what idempotent resend replays.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub response_sync_key: SyncKey,
    pub items: Vec<RenderedItem>,
    pub more_available: bool,
    pub sent_count: usize,
    pub total_available: usize,
    pub command_responses: Vec<CommandResponse>,
}
