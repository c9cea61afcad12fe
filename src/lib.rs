#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Core sync engine for an Exchange ActiveSync compatible mail server.
//!
//! This crate implements the protocol core: a WBXML codec, the device
//! provisioning handshake, folder and item sync state machines, and
//! the long-poll `Ping` notifier. It has no opinion on HTTP transport
//! or mailbox storage beyond the [`Store`] trait — an embedder
//! supplies both.

mod config;
mod device;
mod error;
mod facade;
mod folder;
mod ping;
mod router;
mod store;
pub mod sync;
pub mod wbxml;

pub use config::ServerConfig;
pub use device::{Device, DeviceRegistry, ProvisionOutcome, ProvisionState};
pub use error::{Error, Result};
pub use facade::{deliver, EasServer};
pub use folder::{fixed_hierarchy, folder_sync, Folder, FolderSyncResult, FolderType};
pub use ping::{ping, PingBus, PingOutcome, PingStatus};
pub use router::{EasRequest, EasResponse, Router};
pub use store::{MemStore, Store, User};
