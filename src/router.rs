//! EAS request router (C2).
//!
//! A single URL dispatches on the `Cmd` query parameter (`spec.md`
//! §4.2). Since HTTP transport itself is an external collaborator,
//! this module's surface is a pair of value types ([`EasRequest`],
//! [`EasResponse`]) an embedding HTTP front end decodes requests into
//! and encodes responses out of — the router never opens a socket.

use crate::device::{DeviceRegistry, ProvisionOutcome};
use crate::error::Error;
use crate::folder::folder_sync;
use crate::ping::{self, PingBus, PingOutcome, PingStatus};
use crate::store::Store;
use crate::sync::{
    self, BodyPreference, BodyType, ClientCommand, CollectionRequest, CollectionStateTable,
    SyncStatus,
};
use crate::wbxml::{decode_document, encode_document, CodePage, Document, Element};
use crate::ServerConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Per-`(user, device, cmd)` fixed-window token bucket (`spec.md` §4.2).
struct RateLimiter {
    limit_per_min: u32,
    buckets: Mutex<HashMap<(u64, String, String), (u32, Instant)>>,
}

impl RateLimiter {
    fn new(limit_per_min: u32) -> Self {
        Self {
            limit_per_min,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Err(retry_after_secs)` once the bucket for this key
    /// is exceeded within the current 60s window. `limit_per_min == 0`
    /// disables rate limiting entirely.
    fn check(&self, user_id: u64, device_id: &str, cmd: &str) -> Result<(), u32> {
        if self.limit_per_min == 0 {
            return Ok(());
        }
        let key = (user_id, device_id.to_string(), cmd.to_string());
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets.entry(key).or_insert((0, now));
        if now.duration_since(entry.1) >= Duration::from_secs(60) {
            *entry = (0, now);
        }
        entry.0 += 1;
        if entry.0 > self.limit_per_min {
            let elapsed = now.duration_since(entry.1).as_secs();
            return Err(u32::try_from(60u64.saturating_sub(elapsed)).unwrap_or(1).max(1));
        }
        Ok(())
    }
}

const PROTOCOL_VERSION: &str = "14.1";
const PROTOCOL_VERSIONS: &str = "2.5,12.0,12.1,14.0,14.1";
const PROTOCOL_COMMANDS: &str = "Sync,FolderSync,Provision,Ping,GetItemEstimate,Settings,SendMail";
const WBXML_CONTENT_TYPE: &str = "application/vnd.ms-sync.wbxml";

/// A decoded EAS request, independent of any particular HTTP server.
#[derive(Debug, Clone)]
pub struct EasRequest {
    pub cmd: String,
    pub device_id: String,
    pub device_type: String,
    pub login: String,
    pub password: String,
    pub policy_key: Option<u32>,
    pub body: Vec<u8>,
}

/// A response an embedding HTTP front end should serialize.
#[derive(Debug, Clone)]
pub struct EasResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EasResponse {
    fn empty(status: u16) -> Self {
        Self {
            status,
            headers: base_headers(None),
            body: Vec::new(),
        }
    }

    fn wbxml(status: u16, policy_key: Option<u32>, doc: &Document) -> Self {
        Self {
            status,
            headers: base_headers(policy_key),
            body: encode_document(doc),
        }
    }
}

impl From<Error> for EasResponse {
    /// Maps the HTTP-level error taxonomy (`spec.md` §7) to a response,
    /// attaching the headers a bare status code can't carry
    /// (`WWW-Authenticate` for auth failures, `Retry-After` for rate
    /// limiting).
    fn from(err: Error) -> Self {
        let mut resp = Self::empty(err.http_status());
        match &err {
            Error::AuthRequired | Error::AuthFailed => {
                resp.headers.push(("WWW-Authenticate".to_string(), "Basic".to_string()));
            }
            Error::RateLimited { retry_after_secs } => {
                resp.headers.push(("Retry-After".to_string(), retry_after_secs.to_string()));
            }
            _ => {}
        }
        resp
    }
}

fn base_headers(policy_key: Option<u32>) -> Vec<(String, String)> {
    let mut headers = vec![
        ("MS-Server-ActiveSync".to_string(), PROTOCOL_VERSION.to_string()),
        ("MS-ASProtocolVersions".to_string(), PROTOCOL_VERSIONS.to_string()),
        ("MS-ASProtocolCommands".to_string(), PROTOCOL_COMMANDS.to_string()),
        ("Content-Type".to_string(), WBXML_CONTENT_TYPE.to_string()),
        ("Cache-Control".to_string(), "private".to_string()),
    ];
    if let Some(key) = policy_key {
        headers.push(("X-MS-PolicyKey".to_string(), key.to_string()));
    }
    headers
}

/// The EAS request router, generic over the backing [`Store`]
/// implementation.
pub struct Router<S: Store> {
    store: Arc<S>,
    devices: DeviceRegistry,
    collections: CollectionStateTable,
    ping_bus: PingBus,
    rate_limiter: RateLimiter,
    config: ServerConfig,
}

impl<S: Store> Router<S> {
    #[must_use]
    pub fn new(store: Arc<S>, config: ServerConfig) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_per_min);
        Self {
            store,
            devices: DeviceRegistry::new(),
            collections: CollectionStateTable::new(),
            ping_bus: PingBus::new(),
            rate_limiter,
            config,
        }
    }

    #[must_use]
    pub const fn ping_bus(&self) -> &PingBus {
        &self.ping_bus
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle one EAS request end to end: auth, device lookup, rate
    /// limit, provisioning gate, then dispatch.
    pub async fn handle(&self, req: &EasRequest, cancel: &Notify) -> EasResponse {
        if req.cmd.eq_ignore_ascii_case("OPTIONS") {
            return self.handle_options();
        }

        let user = match self.store.get_user(&req.login).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(login = %req.login, "authentication failed");
                return Error::AuthFailed.into();
            }
            Err(e) => {
                warn!(error = %e, "store error during authentication");
                return Error::StoreUnavailable(e.to_string()).into();
            }
        };

        if req.device_id.is_empty() || req.device_type.is_empty() {
            return Error::MalformedWbxml("missing DeviceId or DeviceType".to_string()).into();
        }

        let device = self.devices.get_or_create(user.user_id, &req.device_id, &req.device_type);
        self.devices.touch(&device);

        if let Err(retry_after_secs) = self.rate_limiter.check(user.user_id, &req.device_id, &req.cmd) {
            return Error::RateLimited { retry_after_secs }.into();
        }

        let is_gated_command = !matches!(req.cmd.as_str(), "Provision" | "Settings");
        if is_gated_command {
            let provisioned = device.lock().unwrap().is_provisioned();
            if !provisioned {
                return Error::ProvisioningRequired.into();
            }
            let presented = req.policy_key.unwrap_or(0);
            if !self.devices.check_policy_key(&device, presented) {
                return Error::PolicyKeyMismatch.into();
            }
        }

        let current_policy_key = device.lock().unwrap().state.policy_key();

        match req.cmd.as_str() {
            "Provision" => self.handle_provision(req, &device),
            "FolderSync" => self.handle_folder_sync(req, current_policy_key),
            "Sync" => self.handle_sync(req, user.user_id, current_policy_key).await,
            "Ping" => self.handle_ping(req, user.user_id, current_policy_key, cancel).await,
            "GetItemEstimate" => self.handle_get_item_estimate(req, user.user_id, current_policy_key).await,
            "Settings" => self.handle_settings(req, current_policy_key),
            "SendMail" => self.handle_send_mail(req, current_policy_key),
            other => {
                info!(cmd = other, "unknown EAS command");
                Error::UnknownCommand(other.to_string()).into()
            }
        }
    }

    fn handle_options(&self) -> EasResponse {
        EasResponse {
            status: 200,
            headers: vec![
                ("Allow".to_string(), "OPTIONS, POST".to_string()),
                ("MS-Server-ActiveSync".to_string(), PROTOCOL_VERSION.to_string()),
                ("MS-ASProtocolVersions".to_string(), PROTOCOL_VERSIONS.to_string()),
                ("MS-ASProtocolCommands".to_string(), PROTOCOL_COMMANDS.to_string()),
            ],
            body: b"OK".to_vec(),
        }
    }

    fn handle_provision(&self, req: &EasRequest, device: &Arc<std::sync::Mutex<crate::device::Device>>) -> EasResponse {
        let echoed = decode_document(&req.body)
            .ok()
            .and_then(|doc| doc.root.child("PolicyKey").and_then(Element::text_value).and_then(|s| s.parse().ok()))
            .unwrap_or(0);

        let outcome = self.devices.provision(device, echoed);
        let (status, key) = match outcome {
            ProvisionOutcome::IssuedTemporary(p1) => ("1", p1),
            ProvisionOutcome::IssuedFinal(p2) => ("1", p2),
            ProvisionOutcome::Mismatch => ("2", 0),
        };

        let mut root = Element::empty(CodePage::Provision, "Provision");
        root.push(Element::text(CodePage::Provision, "Status", status));
        root.push(Element::text(CodePage::Provision, "PolicyKey", key.to_string()));
        EasResponse::wbxml(200, Some(key), &Document::new(root))
    }

    fn handle_folder_sync(&self, req: &EasRequest, policy_key: Option<u32>) -> EasResponse {
        let Some(sync_key) = decode_document(&req.body)
            .ok()
            .and_then(|doc| doc.root.child("SyncKey").and_then(Element::text_value).map(str::to_string))
        else {
            return Error::MalformedWbxml("FolderSync missing SyncKey".to_string()).into();
        };

        let result = folder_sync(&sync_key);

        let mut root = Element::empty(CodePage::FolderHierarchy, "FolderSync");
        root.push(Element::text(CodePage::FolderHierarchy, "Status", result.status.code().to_string()));
        root.push(Element::text(CodePage::FolderHierarchy, "SyncKey", result.sync_key));

        let mut changes = Element::empty(CodePage::FolderHierarchy, "Changes");
        changes.push(Element::text(CodePage::FolderHierarchy, "Count", result.added.len().to_string()));
        for folder in &result.added {
            let mut add = Element::empty(CodePage::FolderHierarchy, "Add");
            add.push(Element::text(CodePage::FolderHierarchy, "ServerId", folder.server_id));
            add.push(Element::text(CodePage::FolderHierarchy, "ParentId", folder.parent_id));
            add.push(Element::text(CodePage::FolderHierarchy, "DisplayName", folder.display_name));
            add.push(Element::text(CodePage::FolderHierarchy, "Type", folder.kind.code().to_string()));
            changes.push(add);
        }
        root.push(changes);

        EasResponse::wbxml(200, policy_key, &Document::new(root))
    }

    async fn handle_sync(&self, req: &EasRequest, user_id: u64, policy_key: Option<u32>) -> EasResponse {
        let Ok(doc) = decode_document(&req.body) else {
            return Error::MalformedWbxml("Sync body failed to decode".to_string()).into();
        };
        let Some(collections_el) = doc.root.child("Collections") else {
            return Error::MalformedWbxml("Sync missing Collections".to_string()).into();
        };

        let mut response_collections = Vec::new();
        for collection_el in collections_el.children_named("Collection") {
            let Some(collection_id) = collection_el.child("CollectionId").and_then(Element::text_value) else {
                continue;
            };
            let Some(client_sync_key) = collection_el.child("SyncKey").and_then(Element::text_value) else {
                continue;
            };

            let window_size = collection_el
                .child("WindowSize")
                .and_then(Element::text_value)
                .and_then(|s| s.parse::<usize>().ok());
            let body_preference = parse_body_preference(collection_el);
            let commands = parse_commands(collection_el);

            let state = self.collections.get_or_create(user_id, &req.device_id, collection_id);
            let req_inner = CollectionRequest {
                collection_id,
                client_sync_key,
                window_size,
                body_preference,
                commands,
            };

            match sync::sync_collection(self.store.as_ref(), user_id, &state, &req_inner).await {
                Ok(resp) => response_collections.push(render_collection_response(collection_id, &resp)),
                Err(e) => {
                    warn!(error = %e, collection_id, "sync store error");
                    response_collections.push(render_collection_error(collection_id, client_sync_key, SyncStatus::ServerError));
                }
            }
        }

        let mut collections = Element::empty(CodePage::AirSync, "Collections");
        for el in response_collections {
            collections.push(el);
        }
        let mut root = Element::empty(CodePage::AirSync, "Sync");
        root.push(collections);

        EasResponse::wbxml(200, policy_key, &Document::new(root))
    }

    async fn handle_ping(&self, req: &EasRequest, user_id: u64, policy_key: Option<u32>, cancel: &Notify) -> EasResponse {
        let Ok(doc) = decode_document(&req.body) else {
            return Error::MalformedWbxml("Ping body failed to decode".to_string()).into();
        };
        let Some(heartbeat) = doc
            .root
            .child("HeartbeatInterval")
            .and_then(Element::text_value)
            .and_then(|s| s.parse::<u64>().ok())
        else {
            return ping_response(PingStatus::MissingParameters, &[], policy_key);
        };

        let folders: Vec<String> = doc
            .root
            .child("Folders")
            .map(|f| {
                f.children_named("Folder")
                    .filter_map(|folder| folder.child("Id").and_then(Element::text_value).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if folders.is_empty() {
            return ping_response(PingStatus::MissingParameters, &[], policy_key);
        }

        match ping::ping(&self.ping_bus, user_id, folders, heartbeat, cancel).await {
            PingOutcome::Completed { status, folders } => ping_response(status, &folders, policy_key),
            PingOutcome::Cancelled => EasResponse {
                status: 0,
                headers: Vec::new(),
                body: Vec::new(),
            },
        }
    }

    /// Stub-compatible extension point (`spec.md` Non-goals): reports
    /// the store's live item count per requested collection, with no
    /// pending-change tracking beyond that count.
    async fn handle_get_item_estimate(&self, req: &EasRequest, user_id: u64, policy_key: Option<u32>) -> EasResponse {
        let Ok(doc) = decode_document(&req.body) else {
            return Error::MalformedWbxml("GetItemEstimate body failed to decode".to_string()).into();
        };
        let Some(collections_el) = doc.root.child("Collections") else {
            return Error::MalformedWbxml("GetItemEstimate missing Collections".to_string()).into();
        };

        let mut root = Element::empty(CodePage::GetItemEstimate, "GetItemEstimate");
        for collection_el in collections_el.children_named("Collection") {
            let Some(collection_id) = collection_el.child("CollectionId").and_then(Element::text_value) else {
                continue;
            };
            let total = match self.store.list_items(user_id, collection_id, 0, 0).await {
                Ok((_, total)) => total,
                Err(e) => {
                    warn!(error = %e, collection_id, "store error during GetItemEstimate");
                    continue;
                }
            };
            let mut response = Element::empty(CodePage::GetItemEstimate, "Response");
            response.push(Element::text(CodePage::GetItemEstimate, "Status", "1"));
            response.push(Element::text(CodePage::GetItemEstimate, "CollectionId", collection_id));
            response.push(Element::text(CodePage::GetItemEstimate, "Estimate", total.to_string()));
            root.push(response);
        }

        EasResponse::wbxml(200, policy_key, &Document::new(root))
    }

    /// Stub-compatible extension point (`spec.md` Non-goals): echoes
    /// `DeviceInformation`/`UserInformation` back rather than
    /// persisting any settings.
    fn handle_settings(&self, req: &EasRequest, policy_key: Option<u32>) -> EasResponse {
        let doc = decode_document(&req.body).ok();

        let mut root = Element::empty(CodePage::Settings, "Settings");
        root.push(Element::text(CodePage::Settings, "Status", "1"));

        if doc.as_ref().and_then(|d| d.root.child("DeviceInformation")).is_some() {
            let mut device_info = Element::empty(CodePage::Settings, "DeviceInformation");
            device_info.push(Element::text(CodePage::Settings, "Status", "1"));
            root.push(device_info);
        }

        if doc.as_ref().and_then(|d| d.root.child("UserInformation")).is_some() {
            let mut addresses = Element::empty(CodePage::Settings, "EmailAddresses");
            addresses.push(Element::text(CodePage::Settings, "SMTPAddress", req.login.clone()));
            let mut user_info = Element::empty(CodePage::Settings, "UserInformation");
            user_info.push(addresses);
            root.push(user_info);
        }

        EasResponse::wbxml(200, policy_key, &Document::new(root))
    }

    /// Stub-compatible extension point (`spec.md` Non-goals): validates
    /// that a MIME payload was sent but never actually hands it to an
    /// SMTP egress (out of scope).
    fn handle_send_mail(&self, req: &EasRequest, policy_key: Option<u32>) -> EasResponse {
        let has_mime = decode_document(&req.body)
            .ok()
            .and_then(|doc| {
                doc.root.child("Mime").map(|mime| {
                    mime.opaque_value().is_some_and(|b| !b.is_empty())
                        || mime.text_value().is_some_and(|s| !s.is_empty())
                })
            })
            .unwrap_or(false);

        if !has_mime {
            return Error::MalformedWbxml("SendMail missing Mime payload".to_string()).into();
        }

        let mut root = Element::empty(CodePage::ComposeMail, "SendMail");
        root.push(Element::text(CodePage::ComposeMail, "Status", "1"));
        EasResponse::wbxml(200, policy_key, &Document::new(root))
    }
}

fn ping_response(status: PingStatus, folders: &[String], policy_key: Option<u32>) -> EasResponse {
    let mut root = Element::empty(CodePage::Ping, "Ping");
    root.push(Element::text(CodePage::Ping, "Status", status.code().to_string()));
    if !folders.is_empty() {
        let mut folders_el = Element::empty(CodePage::Ping, "Folders");
        for id in folders {
            let folder = Element::text(CodePage::Ping, "Folder", id.clone());
            folders_el.push(folder);
        }
        root.push(folders_el);
    }
    EasResponse::wbxml(200, policy_key, &Document::new(root))
}

fn parse_body_preference(collection_el: &Element) -> BodyPreference {
    let Some(options) = collection_el.child("Options") else {
        return BodyPreference::default();
    };
    let Some(pref) = options.child("BodyPreference") else {
        return BodyPreference::default();
    };
    let body_type = pref
        .child("Type")
        .and_then(Element::text_value)
        .and_then(|s| s.parse::<u8>().ok())
        .and_then(BodyType::from_code);
    let truncation_size = pref
        .child("TruncationSize")
        .and_then(Element::text_value)
        .and_then(|s| s.parse::<usize>().ok());
    BodyPreference { body_type, truncation_size }
}

fn parse_commands(collection_el: &Element) -> Vec<ClientCommand> {
    let Some(commands_el) = collection_el.child("Commands") else {
        return Vec::new();
    };
    let mut commands = Vec::new();
    for change in commands_el.children_named("Change") {
        if let Some(server_id) = change.child("ServerId").and_then(Element::text_value) {
            let read = change
                .child("ApplicationData")
                .and_then(|data| data.child("Read"))
                .and_then(Element::text_value)
                == Some("1");
            commands.push(ClientCommand::Change { server_id: server_id.to_string(), read });
        }
    }
    for delete in commands_el.children_named("Delete") {
        if let Some(server_id) = delete.child("ServerId").and_then(Element::text_value) {
            commands.push(ClientCommand::Delete { server_id: server_id.to_string() });
        }
    }
    commands
}

fn render_collection_response(collection_id: &str, resp: &sync::CollectionResponse) -> Element {
    let mut collection = Element::empty(CodePage::AirSync, "Collection");
    collection.push(Element::text(CodePage::AirSync, "SyncKey", resp.sync_key.clone()));
    collection.push(Element::text(CodePage::AirSync, "CollectionId", collection_id));
    collection.push(Element::text(CodePage::AirSync, "Status", resp.status.code().to_string()));

    let Some(batch) = &resp.batch else {
        return collection;
    };

    if !batch.command_responses.is_empty() {
        let mut responses = Element::empty(CodePage::AirSync, "Responses");
        for cr in &batch.command_responses {
            let mut change = Element::empty(CodePage::AirSync, "Change");
            change.push(Element::text(CodePage::AirSync, "ServerId", cr.server_id.clone()));
            change.push(Element::text(CodePage::AirSync, "Status", cr.status.code().to_string()));
            responses.push(change);
        }
        collection.push(responses);
    }

    if !batch.items.is_empty() {
        let mut commands_el = Element::empty(CodePage::AirSync, "Commands");
        for rendered in &batch.items {
            let mut add = Element::empty(CodePage::AirSync, "Add");
            add.push(Element::text(CodePage::AirSync, "ServerId", rendered.item.server_id.clone()));
            add.push(render_application_data(rendered));
            commands_el.push(add);
        }
        collection.push(commands_el);
    }

    if batch.more_available {
        collection.push(Element::empty(CodePage::AirSync, "MoreAvailable"));
    }

    collection
}

fn render_application_data(rendered: &sync::RenderedItem) -> Element {
    let item = &rendered.item;
    let mut data = Element::empty(CodePage::AirSync, "ApplicationData");
    data.push(Element::text(CodePage::Email, "Subject", item.subject.clone()));
    data.push(Element::text(CodePage::Email, "From", item.from.clone()));
    data.push(Element::text(CodePage::Email, "To", item.to.clone()));
    data.push(Element::text(CodePage::Email, "Read", u8::from(item.read).to_string()));
    data.push(Element::text(CodePage::Email, "ConversationId", item.conversation_id.clone()));

    let mut body = Element::empty(CodePage::AirSyncBase, "Body");
    body.push(Element::text(CodePage::AirSyncBase, "Type", rendered.body.body_type.code().to_string()));
    body.push(Element::text(CodePage::AirSyncBase, "EstimatedDataSize", rendered.body.estimated_data_size.to_string()));
    body.push(Element::text(CodePage::AirSyncBase, "Truncated", u8::from(rendered.body.truncated).to_string()));
    match &rendered.body.data {
        sync::BodyData::Text(text) => body.push(Element::text(CodePage::AirSyncBase, "Data", text.clone())),
        sync::BodyData::Opaque(bytes) => body.push(Element::opaque(CodePage::AirSyncBase, "Data", bytes.clone())),
    };
    data.push(body);
    data
}

fn render_collection_error(collection_id: &str, client_sync_key: &str, status: SyncStatus) -> Element {
    let mut collection = Element::empty(CodePage::AirSync, "Collection");
    collection.push(Element::text(CodePage::AirSync, "SyncKey", client_sync_key.to_string()));
    collection.push(Element::text(CodePage::AirSync, "CollectionId", collection_id));
    collection.push(Element::text(CodePage::AirSync, "Status", status.code().to_string()));
    collection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::sync::Item;
    use chrono::Utc;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen_addr: "0.0.0.0:443".to_string(),
            store_url: "mem://".to_string(),
            log_dir: "logs".to_string(),
            debug: false,
            log_split: false,
            redact: false,
            rate_limit_per_min: 60,
        }
    }

    fn request(cmd: &str, body: Vec<u8>) -> EasRequest {
        EasRequest {
            cmd: cmd.to_string(),
            device_id: "dev-1".to_string(),
            device_type: "iPhone".to_string(),
            login: "alice@example.com".to_string(),
            password: "irrelevant".to_string(),
            policy_key: None,
            body,
        }
    }

    fn folder_sync_body(sync_key: &str) -> Vec<u8> {
        let mut root = Element::empty(CodePage::FolderHierarchy, "FolderSync");
        root.push(Element::text(CodePage::FolderHierarchy, "SyncKey", sync_key));
        encode_document(&Document::new(root))
    }

    fn provision_body(policy_key: &str) -> Vec<u8> {
        let mut root = Element::empty(CodePage::Provision, "Provision");
        root.push(Element::text(CodePage::Provision, "PolicyKey", policy_key));
        encode_document(&Document::new(root))
    }

    fn sync_body(collection_id: &str, sync_key: &str) -> Vec<u8> {
        let mut collection = Element::empty(CodePage::AirSync, "Collection");
        collection.push(Element::text(CodePage::AirSync, "CollectionId", collection_id));
        collection.push(Element::text(CodePage::AirSync, "SyncKey", sync_key));
        let mut collections = Element::empty(CodePage::AirSync, "Collections");
        collections.push(collection);
        let mut root = Element::empty(CodePage::AirSync, "Sync");
        root.push(collections);
        encode_document(&Document::new(root))
    }

    fn ping_body(heartbeat: u64, folder_ids: &[&str]) -> Vec<u8> {
        let mut folders = Element::empty(CodePage::Ping, "Folders");
        for id in folder_ids {
            let mut folder = Element::empty(CodePage::Ping, "Folder");
            folder.push(Element::text(CodePage::Ping, "Id", *id));
            folders.push(folder);
        }
        let mut root = Element::empty(CodePage::Ping, "Ping");
        root.push(Element::text(CodePage::Ping, "HeartbeatInterval", heartbeat.to_string()));
        root.push(folders);
        encode_document(&Document::new(root))
    }

    fn get_item_estimate_body(collection_id: &str) -> Vec<u8> {
        let mut collection = Element::empty(CodePage::GetItemEstimate, "Collection");
        collection.push(Element::text(CodePage::GetItemEstimate, "CollectionId", collection_id));
        let mut collections = Element::empty(CodePage::GetItemEstimate, "Collections");
        collections.push(collection);
        let mut root = Element::empty(CodePage::GetItemEstimate, "GetItemEstimate");
        root.push(collections);
        encode_document(&Document::new(root))
    }

    fn settings_body(device_information: bool, user_information: bool) -> Vec<u8> {
        let mut root = Element::empty(CodePage::Settings, "Settings");
        if device_information {
            root.push(Element::empty(CodePage::Settings, "DeviceInformation"));
        }
        if user_information {
            root.push(Element::empty(CodePage::Settings, "UserInformation"));
        }
        encode_document(&Document::new(root))
    }

    fn send_mail_body(mime: Option<&str>) -> Vec<u8> {
        let mut root = Element::empty(CodePage::ComposeMail, "SendMail");
        if let Some(mime) = mime {
            root.push(Element::text(CodePage::ComposeMail, "Mime", mime));
        }
        encode_document(&Document::new(root))
    }

    fn mail_item(subject: &str) -> Item {
        Item {
            server_id: String::new(),
            subject: subject.to_string(),
            from: "sender@example.com".to_string(),
            to: "alice@example.com".to_string(),
            received_at: Utc::now(),
            read: false,
            mime_bytes: format!("From: sender@example.com\r\nSubject: {subject}\r\n\r\nbody").into_bytes(),
            body_plain: Some("body".to_string()),
            body_html: None,
            conversation_id: format!("conv-{subject}"),
        }
    }

    #[tokio::test]
    async fn fresh_device_gets_449_before_provisioning() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Router::new(store, test_config());
        let cancel = Notify::new();

        let resp = router.handle(&request("FolderSync", folder_sync_body("0")), &cancel).await;
        assert_eq!(resp.status, 449);
    }

    #[tokio::test]
    async fn unknown_user_gets_401() {
        let store = Arc::new(MemStore::new());
        let router = Router::new(store, test_config());
        let cancel = Notify::new();

        let resp = router.handle(&request("FolderSync", folder_sync_body("0")), &cancel).await;
        assert_eq!(resp.status, 401);
        assert!(resp.headers.iter().any(|(k, v)| k == "WWW-Authenticate" && v == "Basic"));
    }

    #[tokio::test]
    async fn rate_limited_request_carries_retry_after() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let mut config = test_config();
        config.rate_limit_per_min = 1;
        let router = Router::new(store, config);
        let cancel = Notify::new();

        let first = router.handle(&request("Settings", Vec::new()), &cancel).await;
        assert_eq!(first.status, 200);

        let second = router.handle(&request("Settings", Vec::new()), &cancel).await;
        assert_eq!(second.status, 429);
        assert!(second.headers.iter().any(|(k, _)| k == "Retry-After"));
    }

    #[tokio::test]
    async fn options_bypasses_auth_and_provisioning() {
        let store = Arc::new(MemStore::new());
        let router = Router::new(store, test_config());
        let cancel = Notify::new();

        let resp = router.handle(&request("OPTIONS", Vec::new()), &cancel).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"OK");
    }

    async fn provision_device<S: Store>(router: &Router<S>, cancel: &Notify) -> u32 {
        let req = request("Provision", provision_body("0"));
        let r1 = router.handle(&req, cancel).await;
        assert_eq!(r1.status, 200);
        let doc = decode_document(&r1.body).unwrap();
        let p1: u32 = doc.root.child("PolicyKey").and_then(Element::text_value).unwrap().parse().unwrap();

        let req2 = request("Provision", provision_body(&p1.to_string()));
        let r2 = router.handle(&req2, cancel).await;
        assert_eq!(r2.status, 200);
        let doc2 = decode_document(&r2.body).unwrap();
        doc2.root.child("PolicyKey").and_then(Element::text_value).unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn provisioned_device_can_folder_sync() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Router::new(store, test_config());
        let cancel = Notify::new();

        let final_key = provision_device(&router, &cancel).await;

        let mut req = request("FolderSync", folder_sync_body("0"));
        req.policy_key = Some(final_key);
        let resp = router.handle(&req, &cancel).await;
        assert_eq!(resp.status, 200);

        let doc = decode_document(&resp.body).unwrap();
        assert_eq!(doc.root.child("SyncKey").and_then(Element::text_value), Some("1"));
        let inbox_count = doc.root.child("Changes").unwrap().child("Count").and_then(Element::text_value);
        assert!(inbox_count.is_some());
    }

    #[tokio::test]
    async fn provisioned_device_can_initial_sync() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Router::new(store, test_config());
        let cancel = Notify::new();

        let final_key = provision_device(&router, &cancel).await;

        let mut req = request("Sync", sync_body("1", "0"));
        req.policy_key = Some(final_key);
        let resp = router.handle(&req, &cancel).await;
        assert_eq!(resp.status, 200);

        let doc = decode_document(&resp.body).unwrap();
        let collection = doc.root.child("Collections").unwrap().child("Collection").unwrap();
        assert_eq!(collection.child("Status").and_then(Element::text_value), Some("1"));
        assert_eq!(collection.child("SyncKey").and_then(Element::text_value), Some("1"));
        assert!(collection.child("Commands").is_none());
    }

    #[tokio::test]
    async fn unprovisioned_sync_is_rejected_before_decoding_body() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Router::new(store, test_config());
        let cancel = Notify::new();

        let resp = router.handle(&request("Sync", sync_body("1", "0")), &cancel).await;
        assert_eq!(resp.status, 449);
    }

    #[tokio::test]
    async fn get_item_estimate_reports_live_store_count() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        store.seed_item(1, "1", mail_item("one"));
        store.seed_item(1, "1", mail_item("two"));
        let router = Router::new(store, test_config());
        let cancel = Notify::new();
        let final_key = provision_device(&router, &cancel).await;

        let mut req = request("GetItemEstimate", get_item_estimate_body("1"));
        req.policy_key = Some(final_key);
        let resp = router.handle(&req, &cancel).await;
        assert_eq!(resp.status, 200);

        let doc = decode_document(&resp.body).unwrap();
        let response = doc.root.child("Response").unwrap();
        assert_eq!(response.child("Status").and_then(Element::text_value), Some("1"));
        assert_eq!(response.child("Estimate").and_then(Element::text_value), Some("2"));
    }

    #[tokio::test]
    async fn settings_echoes_requested_sections_only() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Router::new(store, test_config());
        let cancel = Notify::new();

        let resp = router.handle(&request("Settings", settings_body(true, true)), &cancel).await;
        assert_eq!(resp.status, 200);
        let doc = decode_document(&resp.body).unwrap();
        assert!(doc.root.child("DeviceInformation").is_some());
        let addresses = doc.root.child("UserInformation").unwrap().child("EmailAddresses").unwrap();
        assert_eq!(addresses.child("SMTPAddress").and_then(Element::text_value), Some("alice@example.com"));

        let bare = router.handle(&request("Settings", settings_body(false, false)), &cancel).await;
        assert_eq!(bare.status, 200);
        let bare_doc = decode_document(&bare.body).unwrap();
        assert!(bare_doc.root.child("DeviceInformation").is_none());
        assert!(bare_doc.root.child("UserInformation").is_none());
    }

    #[tokio::test]
    async fn send_mail_requires_a_mime_payload() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Router::new(store, test_config());
        let cancel = Notify::new();
        let final_key = provision_device(&router, &cancel).await;

        let mut rejected_req = request("SendMail", send_mail_body(None));
        rejected_req.policy_key = Some(final_key);
        let rejected = router.handle(&rejected_req, &cancel).await;
        assert_eq!(rejected.status, 400);

        let mut accepted_req = request("SendMail", send_mail_body(Some("From: a@b.com\r\n\r\nhi")));
        accepted_req.policy_key = Some(final_key);
        let accepted = router.handle(&accepted_req, &cancel).await;
        assert_eq!(accepted.status, 200);
        let doc = decode_document(&accepted.body).unwrap();
        assert_eq!(doc.root.child("Status").and_then(Element::text_value), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn ping_wakes_on_matching_notify_and_reports_the_changed_folder() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Arc::new(Router::new(store, test_config()));
        let cancel = Arc::new(Notify::new());

        let final_key = provision_device(&router, &cancel).await;

        let router2 = router.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut req = request("Ping", ping_body(3540, &["1"]));
            req.policy_key = Some(final_key);
            router2.handle(&req, &cancel2).await
        });

        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        router.ping_bus().notify(1, "1");

        let resp = handle.await.unwrap();
        assert_eq!(resp.status, 200);
        let doc = decode_document(&resp.body).unwrap();
        assert_eq!(doc.root.child("Status").and_then(Element::text_value), Some("2"));
        let folder = doc.root.child("Folders").unwrap().child("Folder").unwrap();
        assert_eq!(folder.child("Id").and_then(Element::text_value), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn ping_without_event_expires_after_the_heartbeat() {
        let store = Arc::new(MemStore::new());
        store.seed_user(1, "alice@example.com");
        let router = Arc::new(Router::new(store, test_config()));
        let cancel = Arc::new(Notify::new());

        let final_key = provision_device(&router, &cancel).await;

        let router2 = router.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut req = request("Ping", ping_body(60, &["1"]));
            req.policy_key = Some(final_key);
            router2.handle(&req, &cancel2).await
        });

        tokio::time::advance(Duration::from_secs(61)).await;
        let resp = handle.await.unwrap();

        assert_eq!(resp.status, 200);
        let doc = decode_document(&resp.body).unwrap();
        assert_eq!(doc.root.child("Status").and_then(Element::text_value), Some("1"));
    }
}
