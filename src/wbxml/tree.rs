//! A single typed AST shared by the encoder and decoder.
//!
//! Per `spec.md` §9, code-page switching is implicit in each
//! [`Element`]'s [`CodePage`], not a manually interleaved
//! `SWITCH_PAGE` token the caller has to remember to emit.

use super::codepage::CodePage;

/// One node inside an element's content.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A nested element.
    Element(Element),
    /// Inline text, carried on the wire as `STR_I`.
    Text(String),
    /// A binary payload, carried on the wire as `OPAQUE`. Used
    /// exclusively for `AirSyncBase.Body/Data` MIME bodies.
    Opaque(Vec<u8>),
}

/// A tagged element in a given code page.
///
/// An element with empty `children` encodes as a self-closing tag (no
/// `0x40` content bit, no `END`). An element that is known by name
/// carries `tag`; an element decoded from a code this crate doesn't
/// recognize in its page carries `tag = None` and `code` still holds
/// the raw page-local token, per the decoder contract in `spec.md`
/// §4.1 ("unknown tags ... retained as opaque-named nodes").
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub page: CodePage,
    pub code: u8,
    pub children: Vec<Node>,
}

impl Element {
    /// Construct a named, empty (self-closing) element.
    #[must_use]
    pub fn empty(page: CodePage, name: &str) -> Self {
        let code = page
            .tag_code(name)
            .unwrap_or_else(|| panic!("unknown tag `{name}` in page {page:?}"));
        Self {
            page,
            code,
            children: Vec::new(),
        }
    }

    /// Construct a named element carrying a single text child.
    #[must_use]
    pub fn text(page: CodePage, name: &str, value: impl Into<String>) -> Self {
        let mut el = Self::empty(page, name);
        el.children.push(Node::Text(value.into()));
        el
    }

    /// Construct a named element carrying a single opaque child.
    #[must_use]
    pub fn opaque(page: CodePage, name: &str, value: impl Into<Vec<u8>>) -> Self {
        let mut el = Self::empty(page, name);
        el.children.push(Node::Opaque(value.into()));
        el
    }

    /// Construct a named element with the given child elements.
    #[must_use]
    pub fn with_children(page: CodePage, name: &str, children: Vec<Element>) -> Self {
        let mut el = Self::empty(page, name);
        el.children = children.into_iter().map(Node::Element).collect();
        el
    }

    /// Append a child element.
    pub fn push(&mut self, child: Element) -> &mut Self {
        self.children.push(Node::Element(child));
        self
    }

    /// This element's tag name, if known in its page.
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        self.page.tag_name(self.code)
    }

    /// The text content of this element, if its sole child is `Text`.
    #[must_use]
    pub fn text_value(&self) -> Option<&str> {
        match self.children.first() {
            Some(Node::Text(s)) if self.children.len() == 1 => Some(s.as_str()),
            _ => None,
        }
    }

    /// The opaque content of this element, if its sole child is `Opaque`.
    #[must_use]
    pub fn opaque_value(&self) -> Option<&[u8]> {
        match self.children.first() {
            Some(Node::Opaque(b)) if self.children.len() == 1 => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Find the first direct child element with the given tag name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|n| match n {
            Node::Element(e) if e.name() == Some(name) => Some(e),
            _ => None,
        })
    }

    /// All direct child elements with the given tag name, in order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter_map(move |n| match n {
            Node::Element(e) if e.name() == Some(name) => Some(e),
            _ => None,
        })
    }
}

/// A complete WBXML document: the fixed header plus one root element.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    #[must_use]
    pub const fn new(root: Element) -> Self {
        Self { root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_element_has_no_children() {
        let el = Element::empty(CodePage::AirSync, "MoreAvailable");
        assert!(el.children.is_empty());
    }

    #[test]
    fn text_value_round_trips() {
        let el = Element::text(CodePage::AirSync, "SyncKey", "1");
        assert_eq!(el.text_value(), Some("1"));
    }

    #[test]
    fn child_lookup_by_name() {
        let mut root = Element::empty(CodePage::FolderHierarchy, "FolderSync");
        root.push(Element::text(CodePage::FolderHierarchy, "Status", "1"));
        root.push(Element::text(CodePage::FolderHierarchy, "SyncKey", "1"));
        assert_eq!(root.child("SyncKey").and_then(Element::text_value), Some("1"));
        assert!(root.child("Changes").is_none());
    }

    #[test]
    #[should_panic(expected = "unknown tag")]
    fn empty_panics_on_unknown_tag_name() {
        let _ = Element::empty(CodePage::AirSync, "NoSuchTag");
    }
}
