//! WBXML encoder.
//!
//! Implements the encoder contract of `spec.md` §4.1: `SWITCH_PAGE`
//! only on an actual page change, `STR_I` for text, `OPAQUE` only for
//! `AirSyncBase.Data` MIME bodies, LIFO element closing, no WBXML
//! attributes.

use super::codepage::CodePage;
use super::mbuint;
use super::tree::{Document, Element, Node};

const VERSION: u8 = 0x03;
const PUBLIC_ID: u8 = 0x01;
const CHARSET_UTF8: u32 = 106;

const SWITCH_PAGE: u8 = 0x00;
const END: u8 = 0x01;
const STR_I: u8 = 0x03;
const OPAQUE: u8 = 0xC3;
const CONTENT_BIT: u8 = 0x40;

/// Encode a document to its WBXML wire form.
///
/// The initial code page is [`CodePage::AirSync`] (id `0x00`), matching
/// [`super::decode::decode_document`]'s assumption — this is why a
/// document whose root lives in `AirSync` never needs a leading
/// `SWITCH_PAGE`.
#[must_use]
pub fn encode_document(doc: &Document) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(VERSION);
    buf.push(PUBLIC_ID);
    buf.extend(mbuint::encode(CHARSET_UTF8));
    buf.extend(mbuint::encode(0)); // no string table

    let mut current_page = CodePage::AirSync;
    encode_element(&mut buf, &doc.root, &mut current_page);
    buf
}

fn encode_element(buf: &mut Vec<u8>, el: &Element, current_page: &mut CodePage) {
    if el.page.id() != current_page.id() {
        buf.push(SWITCH_PAGE);
        buf.push(el.page.id());
        *current_page = el.page;
    }

    let has_content = !el.children.is_empty();
    buf.push(if has_content { el.code | CONTENT_BIT } else { el.code });

    if has_content {
        for child in &el.children {
            match child {
                Node::Element(c) => encode_element(buf, c, current_page),
                Node::Text(s) => encode_str_i(buf, s),
                Node::Opaque(data) => encode_opaque(buf, data),
            }
        }
        buf.push(END);
    }
}

fn encode_str_i(buf: &mut Vec<u8>, s: &str) {
    buf.push(STR_I);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
}

fn encode_opaque(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(OPAQUE);
    buf.extend(mbuint::encode(u32::try_from(data.len()).unwrap_or(u32::MAX)));
    buf.extend_from_slice(data);
}
