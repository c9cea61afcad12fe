//! WBXML decoder.
//!
//! Implements the decoder contract of `spec.md` §4.1: reads the token
//! stream into the typed [`Document`]/[`Element`] tree, retaining
//! unknown tags (as a `code` with no resolvable name) instead of
//! rejecting the document, and failing with a specific [`DecodeError`]
//! variant for each malformed-input case the spec names.

use super::codepage::CodePage;
use super::mbuint;
use super::tree::{Document, Element, Node};
use thiserror::Error;

const SWITCH_PAGE: u8 = 0x00;
const END: u8 = 0x01;
const STR_I: u8 = 0x03;
const OPAQUE: u8 = 0xC3;
const CONTENT_BIT: u8 = 0x40;
const TAG_MASK: u8 = 0x3F;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated WBXML header")]
    TruncatedHeader,
    #[error("unexpected WBXML version byte: {0:#04x}")]
    UnexpectedVersion(u8),
    #[error("unexpected WBXML public id byte: {0:#04x}")]
    UnexpectedPublicId(u8),
    #[error("truncated mb_u_int32")]
    TruncatedVarint,
    #[error("unknown code page: {0:#04x}")]
    UnknownCodePage(u8),
    #[error("SWITCH_PAGE missing its page byte")]
    TruncatedSwitchPage,
    #[error("END token with no open element")]
    UnmatchedEnd,
    #[error("element opened but never closed")]
    UnterminatedElement,
    #[error("OPAQUE length exceeds remaining bytes")]
    OpaqueLengthExceedsRemaining,
    #[error("STR_I missing its NUL terminator")]
    MissingNulTerminator,
    #[error("STR_I is not valid UTF-8")]
    InvalidUtf8,
    #[error("document contains no root element")]
    EmptyDocument,
    #[error("trailing tokens after the root element closed")]
    TrailingTokensAfterRoot,
    #[error("text or opaque content with no enclosing element")]
    ContentWithoutElement,
}

impl From<DecodeError> for crate::Error {
    fn from(e: DecodeError) -> Self {
        Self::MalformedWbxml(e.to_string())
    }
}

/// Decode a complete WBXML document.
///
/// # Errors
///
/// Returns the specific [`DecodeError`] variant for the first
/// malformed-input condition encountered.
pub fn decode_document(input: &[u8]) -> Result<Document, DecodeError> {
    let mut pos = 0usize;

    let version = *input.first().ok_or(DecodeError::TruncatedHeader)?;
    if version != 0x03 {
        return Err(DecodeError::UnexpectedVersion(version));
    }
    pos += 1;

    let public_id = *input.get(pos).ok_or(DecodeError::TruncatedHeader)?;
    if public_id != 0x01 {
        return Err(DecodeError::UnexpectedPublicId(public_id));
    }
    pos += 1;

    let (_charset, n) = mbuint::decode(&input[pos..]).ok_or(DecodeError::TruncatedVarint)?;
    pos += n;

    let (string_table_len, n) =
        mbuint::decode(&input[pos..]).ok_or(DecodeError::TruncatedVarint)?;
    pos += n;
    pos = pos
        .checked_add(string_table_len as usize)
        .filter(|&p| p <= input.len())
        .ok_or(DecodeError::TruncatedHeader)?;

    decode_body(&input[pos..])
}

fn decode_body(body: &[u8]) -> Result<Document, DecodeError> {
    let mut pos = 0usize;
    let mut current_page = CodePage::AirSync;
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    while pos < body.len() {
        let byte = body[pos];
        match byte {
            SWITCH_PAGE => {
                pos += 1;
                let page_id = *body.get(pos).ok_or(DecodeError::TruncatedSwitchPage)?;
                current_page =
                    CodePage::from_id(page_id).ok_or(DecodeError::UnknownCodePage(page_id))?;
                pos += 1;
            }
            END => {
                pos += 1;
                let finished = stack.pop().ok_or(DecodeError::UnmatchedEnd)?;
                attach_element(&mut stack, &mut root, finished)?;
            }
            STR_I => {
                pos += 1;
                let (text, consumed) = decode_cstr(&body[pos..])?;
                pos += consumed;
                attach_node(&mut stack, Node::Text(text))?;
            }
            OPAQUE => {
                pos += 1;
                let (len, n) = mbuint::decode(&body[pos..]).ok_or(DecodeError::TruncatedVarint)?;
                pos += n;
                let len = len as usize;
                let end = pos
                    .checked_add(len)
                    .filter(|&e| e <= body.len())
                    .ok_or(DecodeError::OpaqueLengthExceedsRemaining)?;
                attach_node(&mut stack, Node::Opaque(body[pos..end].to_vec()))?;
                pos = end;
            }
            tag => {
                pos += 1;
                let has_content = tag & CONTENT_BIT != 0;
                let code = tag & TAG_MASK;
                let el = Element {
                    page: current_page,
                    code,
                    children: Vec::new(),
                };
                if has_content {
                    stack.push(el);
                } else {
                    attach_element(&mut stack, &mut root, el)?;
                }
            }
        }
    }

    if !stack.is_empty() {
        return Err(DecodeError::UnterminatedElement);
    }
    root.ok_or(DecodeError::EmptyDocument)
}

fn attach_element(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
) -> Result<(), DecodeError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(el));
    } else if root.is_none() {
        *root = Some(el);
    } else {
        return Err(DecodeError::TrailingTokensAfterRoot);
    }
    Ok(())
}

fn attach_node(stack: &mut [Element], node: Node) -> Result<(), DecodeError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => Err(DecodeError::ContentWithoutElement),
    }
}

fn decode_cstr(input: &[u8]) -> Result<(String, usize), DecodeError> {
    let nul_pos = input
        .iter()
        .position(|&b| b == 0x00)
        .ok_or(DecodeError::MissingNulTerminator)?;
    let text = std::str::from_utf8(&input[..nul_pos])
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_string();
    Ok((text, nul_pos + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wbxml::encode::encode_document;

    fn header() -> Vec<u8> {
        vec![0x03, 0x01, 0x6A, 0x00]
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(decode_document(&[0x03]), Err(DecodeError::TruncatedHeader));
        assert_eq!(decode_document(&[]), Err(DecodeError::TruncatedHeader));
    }

    #[test]
    fn rejects_unterminated_element() {
        let mut bytes = header();
        bytes.push(CodePage::AirSync.tag_code("Sync").unwrap() | CONTENT_BIT);
        assert_eq!(
            decode_document(&bytes),
            Err(DecodeError::UnterminatedElement)
        );
    }

    #[test]
    fn rejects_unmatched_end() {
        let mut bytes = header();
        bytes.push(END);
        assert_eq!(decode_document(&bytes), Err(DecodeError::UnmatchedEnd));
    }

    #[test]
    fn rejects_missing_nul_in_str_i() {
        let mut bytes = header();
        bytes.push(CodePage::AirSync.tag_code("SyncKey").unwrap() | CONTENT_BIT);
        bytes.push(STR_I);
        bytes.extend_from_slice(b"1"); // no NUL terminator
        assert_eq!(
            decode_document(&bytes),
            Err(DecodeError::MissingNulTerminator)
        );
    }

    #[test]
    fn rejects_opaque_length_exceeding_remaining_bytes() {
        let mut bytes = header();
        bytes.push(CodePage::AirSyncBase.tag_code("Data").unwrap() | CONTENT_BIT);
        bytes.push(OPAQUE);
        bytes.extend(mbuint::encode(100));
        bytes.extend_from_slice(b"short");
        assert_eq!(
            decode_document(&bytes),
            Err(DecodeError::OpaqueLengthExceedsRemaining)
        );
    }

    #[test]
    fn rejects_unknown_code_page() {
        let mut bytes = header();
        bytes.push(SWITCH_PAGE);
        bytes.push(0x09); // not one of the six recognized pages
        assert_eq!(
            decode_document(&bytes),
            Err(DecodeError::UnknownCodePage(0x09))
        );
    }

    #[test]
    fn retains_unknown_tag_in_known_page_as_opaque_named_node() {
        // 0x3A is not in our AirSync table but is a structurally valid
        // page-local tag code; the decoder must not reject it.
        let mut bytes = header();
        bytes.push(0x3A); // self-closing, unknown
        let doc = decode_document(&bytes).unwrap();
        assert_eq!(doc.root.name(), None);
        assert_eq!(doc.root.code, 0x3A);
    }

    #[test]
    fn decode_is_inverse_of_encode_for_nested_trees() {
        use crate::wbxml::tree::Document as Doc;

        let mut root = Element::empty(CodePage::FolderHierarchy, "FolderSync");
        root.push(Element::text(CodePage::FolderHierarchy, "Status", "1"));
        root.push(Element::text(CodePage::FolderHierarchy, "SyncKey", "1"));
        let mut changes = Element::empty(CodePage::FolderHierarchy, "Changes");
        changes.push(Element::text(CodePage::FolderHierarchy, "Count", "1"));
        let mut add = Element::empty(CodePage::FolderHierarchy, "Add");
        add.push(Element::text(CodePage::FolderHierarchy, "ServerId", "1"));
        add.push(Element::text(CodePage::FolderHierarchy, "ParentId", "0"));
        add.push(Element::text(CodePage::FolderHierarchy, "DisplayName", "Inbox"));
        add.push(Element::text(CodePage::FolderHierarchy, "Type", "2"));
        changes.push(add);
        root.push(changes);

        let doc = Doc::new(root);
        let bytes = encode_document(&doc);
        assert_eq!(decode_document(&bytes).unwrap(), doc);
    }
}
