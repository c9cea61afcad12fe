//! The WBXML codec (component C1).
//!
//! A single typed AST ([`tree::Document`]/[`tree::Element`]) shared by
//! one encoder and one decoder, covering the EAS code pages named in
//! `spec.md` §4.1: `AirSync`, `Email`, `FolderHierarchy`,
//! `AirSyncBase`, `Provision`, `Ping`.

pub mod codepage;
pub mod decode;
pub mod encode;
pub mod mbuint;
pub mod tree;

pub use codepage::CodePage;
pub use decode::{decode_document, DecodeError};
pub use encode::encode_document;
pub use tree::{Document, Element, Node};
