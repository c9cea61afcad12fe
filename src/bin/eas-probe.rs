#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for exercising the EAS core against an in-memory store.
//!
//! There is no network listener here: this binary decodes/encodes
//! WBXML locally and drives [`activesync_core::Router`] directly, the
//! way an integration test would, so the protocol core can be poked at
//! without standing up an embedding HTTP front end.

use activesync_core::wbxml::{decode_document, CodePage, Document, Element};
use activesync_core::{EasRequest, EasResponse, MemStore, ServerConfig};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

const DEMO_USER_ID: u64 = 1;
const DEMO_LOGIN: &str = "demo@example.com";

#[derive(Parser)]
#[command(name = "eas-probe")]
#[command(about = "Drive the ActiveSync core against an in-memory store")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Device identifier to act as
    #[arg(long, global = true, default_value = "probe-device")]
    device_id: String,

    /// Device type string reported to the server
    #[arg(long, global = true, default_value = "probe")]
    device_type: String,

    /// Policy key to present (obtained from a prior `provision` call)
    #[arg(long, global = true)]
    policy_key: Option<u32>,

    /// Print the raw decoded WBXML tree instead of a summary
    #[arg(long, global = true)]
    raw: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the two-step provisioning handshake and print the final policy key
    Provision,

    /// Fetch the folder hierarchy
    FolderSync {
        /// Client sync key; "0" starts a fresh hierarchy sync
        #[arg(long, default_value = "0")]
        sync_key: String,
    },

    /// Sync one collection
    Sync {
        /// Collection (folder) id to sync
        #[arg(long, default_value = "1")]
        collection_id: String,

        /// Client sync key; "0" primes the collection
        #[arg(long, default_value = "0")]
        sync_key: String,
    },

    /// Long-poll for changes on one collection
    Ping {
        /// Collection id to watch
        #[arg(long, default_value = "1")]
        collection_id: String,

        /// Heartbeat in seconds, clamped to [60, 3540]
        #[arg(long, default_value = "60")]
        heartbeat: u64,
    },

    /// Insert a demo message into a collection and wake parked pings
    Seed {
        #[arg(long, default_value = "1")]
        collection_id: String,

        #[arg(long, default_value = "hello from eas-probe")]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ServerConfig::from_env()?;
    let store = Arc::new(MemStore::new());
    store.seed_user(DEMO_USER_ID, DEMO_LOGIN);
    let server = activesync_core::EasServer::new(store.clone(), config);
    let cancel = Notify::new();

    match &args.command {
        Command::Provision => {
            let key = provision(&server, &args, &cancel).await?;
            println!("policy key: {key}");
        }
        Command::FolderSync { sync_key } => {
            let body = folder_sync_body(sync_key);
            let resp = send(&server, &args, "FolderSync", body, &cancel).await;
            print_response(&resp, args.raw);
        }
        Command::Sync { collection_id, sync_key } => {
            let body = sync_body(collection_id, sync_key);
            let resp = send(&server, &args, "Sync", body, &cancel).await;
            print_response(&resp, args.raw);
        }
        Command::Ping { collection_id, heartbeat } => {
            let body = ping_body(*heartbeat, collection_id);
            let resp = send(&server, &args, "Ping", body, &cancel).await;
            print_response(&resp, args.raw);
        }
        Command::Seed { collection_id, subject } => {
            let item = activesync_core::sync::Item {
                server_id: String::new(),
                subject: subject.clone(),
                from: "sender@example.com".to_string(),
                to: DEMO_LOGIN.to_string(),
                received_at: Utc::now(),
                read: false,
                mime_bytes: format!("Subject: {subject}\r\n\r\n{subject}").into_bytes(),
                body_plain: Some(subject.clone()),
                body_html: None,
                conversation_id: "probe-conversation".to_string(),
            };
            let server_id =
                activesync_core::deliver(&server, store.as_ref(), DEMO_USER_ID, collection_id, item)
                    .await?;
            println!("inserted {server_id}");
        }
    }

    Ok(())
}

async fn provision(
    server: &activesync_core::EasServer<MemStore>,
    args: &Args,
    cancel: &Notify,
) -> anyhow::Result<u32> {
    let r1 = send(server, args, "Provision", provision_body("0"), cancel).await;
    let p1 = policy_key_from(&r1).ok_or_else(|| anyhow::anyhow!("no PolicyKey in first response"))?;

    let r2 = send(server, args, "Provision", provision_body(&p1.to_string()), cancel).await;
    policy_key_from(&r2).ok_or_else(|| anyhow::anyhow!("no PolicyKey in second response"))
}

async fn send(
    server: &activesync_core::EasServer<MemStore>,
    args: &Args,
    cmd: &str,
    body: Vec<u8>,
    cancel: &Notify,
) -> EasResponse {
    let req = EasRequest {
        cmd: cmd.to_string(),
        device_id: args.device_id.clone(),
        device_type: args.device_type.clone(),
        login: DEMO_LOGIN.to_string(),
        password: String::new(),
        policy_key: args.policy_key,
        body,
    };
    server.handle(&req, cancel).await
}

fn policy_key_from(resp: &EasResponse) -> Option<u32> {
    let doc = decode_document(&resp.body).ok()?;
    doc.root.child("PolicyKey")?.text_value()?.parse().ok()
}

fn provision_body(policy_key: &str) -> Vec<u8> {
    let mut root = Element::empty(CodePage::Provision, "Provision");
    root.push(Element::text(CodePage::Provision, "PolicyKey", policy_key));
    activesync_core::wbxml::encode_document(&Document::new(root))
}

fn folder_sync_body(sync_key: &str) -> Vec<u8> {
    let mut root = Element::empty(CodePage::FolderHierarchy, "FolderSync");
    root.push(Element::text(CodePage::FolderHierarchy, "SyncKey", sync_key));
    activesync_core::wbxml::encode_document(&Document::new(root))
}

fn sync_body(collection_id: &str, sync_key: &str) -> Vec<u8> {
    let mut collection = Element::empty(CodePage::AirSync, "Collection");
    collection.push(Element::text(CodePage::AirSync, "CollectionId", collection_id));
    collection.push(Element::text(CodePage::AirSync, "SyncKey", sync_key));
    let mut collections = Element::empty(CodePage::AirSync, "Collections");
    collections.push(collection);
    let mut root = Element::empty(CodePage::AirSync, "Sync");
    root.push(collections);
    activesync_core::wbxml::encode_document(&Document::new(root))
}

fn ping_body(heartbeat: u64, collection_id: &str) -> Vec<u8> {
    let mut folder = Element::empty(CodePage::Ping, "Folder");
    folder.push(Element::text(CodePage::Ping, "Id", collection_id));
    let mut folders = Element::empty(CodePage::Ping, "Folders");
    folders.push(folder);
    let mut root = Element::empty(CodePage::Ping, "Ping");
    root.push(Element::text(CodePage::Ping, "HeartbeatInterval", heartbeat.to_string()));
    root.push(folders);
    activesync_core::wbxml::encode_document(&Document::new(root))
}

fn print_response(resp: &EasResponse, raw: bool) {
    println!("status: {}", resp.status);
    for (name, value) in &resp.headers {
        println!("{name}: {value}");
    }
    if resp.body.is_empty() {
        return;
    }
    match decode_document(&resp.body) {
        Ok(doc) if raw => println!("{:#?}", doc.root),
        Ok(doc) => println!("{}", summarize(&doc.root)),
        Err(e) => println!("<undecodable body: {e}>"),
    }
}

fn summarize(root: &Element) -> String {
    root.name().map_or_else(
        || "<unnamed root>".to_string(),
        |name| format!("{name} ({} children)", root.children.len()),
    )
}
