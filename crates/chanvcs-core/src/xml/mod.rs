//! Order-preserving XML tree for channel documents.
//!
//! The tree keeps raw escaped text, comments, CDATA sections and whitespace
//! so an unmodified document serializes back to the bytes it was parsed
//! from. Elements remember their original start tag until an attribute is
//! changed.

mod parse;
mod write;

use std::borrow::Cow;

use quick_xml::escape::{escape, partial_escape, unescape};

pub use parse::parse_document;
pub use write::write_document;

/// A node in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data exactly as it appeared in the source (still escaped).
    Text(String),
    /// Content of a `<![CDATA[...]]>` section.
    CData(String),
    /// Content of a `<!--...-->` comment.
    Comment(String),
    /// Processing instruction or doctype, stored verbatim.
    Raw(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text(t) if t.trim().is_empty())
    }
}

/// An element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// `(name, raw escaped value)` in source order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Written as `<name/>` in the source.
    pub self_closing: bool,
    /// Original start tag text, cleared when attributes change.
    pub(crate) raw_open: Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: false,
            raw_open: None,
        }
    }

    /// New element holding escaped `text`.
    pub fn with_text(name: impl Into<String>, text: &str) -> Self {
        let mut el = Self::new(name);
        el.set_text(text);
        el
    }

    /// Child elements in order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// First child element called `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|el| el.name == name)
    }

    /// Follow a `/`-separated chain of child names.
    pub fn descendant(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .try_fold(self, |el, name| el.child(name))
    }

    pub fn descendant_mut(&mut self, path: &str) -> Option<&mut Element> {
        let mut current = self;
        for name in path.split('/') {
            current = current.child_mut(name)?;
        }
        Some(current)
    }

    pub fn has_element_children(&self) -> bool {
        self.elements().next().is_some()
    }

    /// Unescaped text content of direct text and CDATA children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(raw) => match unescape(raw) {
                    Ok(text) => out.push_str(&text),
                    Err(_) => out.push_str(raw),
                },
                Node::CData(data) => out.push_str(data),
                _ => {}
            }
        }
        out
    }

    /// Text of the child called `name`, if the child exists.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(Element::text)
    }

    /// Replace the content with `value`. A CDATA-wrapped value stays CDATA.
    pub fn set_text(&mut self, value: &str) {
        let was_cdata = self.children.iter().any(|n| matches!(n, Node::CData(_)));
        self.children.clear();
        if value.is_empty() {
            return;
        }
        self.self_closing = false;
        if was_cdata && !value.contains("]]>") {
            self.children.push(Node::CData(value.to_string()));
        } else {
            self.children
                .push(Node::Text(partial_escape(value).into_owned()));
        }
    }

    /// Set the text of child `name`, appending the child if it is missing.
    pub fn set_child_text(&mut self, name: &str, value: &str) {
        match self.child_mut(name) {
            Some(child) => {
                if child.text() != value {
                    child.set_text(value);
                }
            }
            None => self.push_element(Element::with_text(name, value)),
        }
    }

    /// Unescaped value of attribute `name`.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, raw)| match unescape(raw) {
                Ok(value) => value.into_owned(),
                Err(_) => raw.clone(),
            })
    }

    /// Set or remove (`None`) an attribute. No-op when unchanged.
    pub fn set_attribute(&mut self, name: &str, value: Option<&str>) {
        if self.attribute(name).as_deref() == value {
            return;
        }
        self.raw_open = None;
        match value {
            Some(value) => {
                let raw: Cow<'_, str> = escape(value);
                match self.attributes.iter_mut().find(|(key, _)| key == name) {
                    Some(slot) => slot.1 = raw.into_owned(),
                    None => self.attributes.push((name.to_string(), raw.into_owned())),
                }
            }
            None => self.attributes.retain(|(key, _)| key != name),
        }
    }

    /// Whitespace text node preceding the last child element, used to
    /// indent appended siblings the same way.
    fn sibling_indent(&self) -> Option<String> {
        let last = self.children.iter().rposition(|n| n.as_element().is_some())?;
        match last.checked_sub(1).map(|i| &self.children[i]) {
            Some(Node::Text(ws)) if ws.trim().is_empty() => Some(ws.clone()),
            _ => None,
        }
    }

    /// Append a child element after the last existing one, copying the
    /// indentation of its siblings.
    pub fn push_element(&mut self, element: Element) {
        self.self_closing = false;
        let indent = self.sibling_indent();
        let at = match self.children.iter().rposition(|n| n.as_element().is_some()) {
            Some(last) => last + 1,
            None => self.children.len(),
        };
        let mut insert = Vec::with_capacity(2);
        if let Some(indent) = indent {
            insert.push(Node::Text(indent));
        }
        insert.push(Node::Element(element));
        self.children.splice(at..at, insert);
    }

    /// First child called `name`, appended empty when missing.
    pub fn child_or_insert(&mut self, name: &str) -> &mut Element {
        if self.child(name).is_none() {
            self.push_element(Element::new(name));
        }
        let index = self
            .children
            .iter()
            .position(|n| n.as_element().is_some_and(|el| el.name == name))
            .unwrap_or_default();
        match &mut self.children[index] {
            Node::Element(el) => el,
            _ => unreachable!("index points at the element named {name}"),
        }
    }

    /// Index among child elements of the `n`th child called `name`.
    pub fn nth_named(&self, name: &str, n: usize) -> Option<usize> {
        self.elements()
            .enumerate()
            .filter(|(_, el)| el.name == name)
            .nth(n)
            .map(|(i, _)| i)
    }

    pub fn element_mut(&mut self, nth: usize) -> Option<&mut Element> {
        self.elements_mut().nth(nth)
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.elements().filter(|el| el.name == name).count()
    }

    /// Remove the `nth` child element (by element index) together with the
    /// whitespace that introduced it.
    pub fn remove_element(&mut self, nth: usize) -> Option<Element> {
        let index = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, n)| n.as_element().is_some())
            .nth(nth)
            .map(|(i, _)| i)?;
        let removed = self.children.remove(index);
        if index > 0 && self.children[index - 1].is_whitespace() {
            self.children.remove(index - 1);
        }
        match removed {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Remove every child element called `name`.
    pub fn remove_children(&mut self, name: &str) {
        loop {
            let nth = self.elements().position(|el| el.name == name);
            match nth {
                Some(nth) => {
                    self.remove_element(nth);
                }
                None => break,
            }
        }
    }
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// `<?xml ...?>` declaration, only when the source had one.
    pub prolog: Option<String>,
    pub before_root: Vec<Node>,
    pub root: Element,
    pub after_root: Vec<Node>,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self {
            prolog: None,
            before_root: Vec::new(),
            root,
            after_root: Vec::new(),
        }
    }
}
