use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{Document, Element, Node};
use crate::domain::error::{ChanvcsError, Result};

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ChanvcsError::MalformedArtifact(format!("invalid utf-8: {e}")))
}

fn start_element(start: &BytesStart<'_>, self_closing: bool) -> Result<Element> {
    let mut element = Element::new(utf8(start.name().as_ref())?);
    for attr in start.attributes() {
        let attr = attr
            .map_err(|e| ChanvcsError::MalformedArtifact(format!("bad attribute: {e}")))?;
        element
            .attributes
            .push((utf8(attr.key.as_ref())?, utf8(&attr.value)?));
    }
    let content = utf8(start)?;
    element.raw_open = Some(if self_closing {
        format!("<{content}/>")
    } else {
        format!("<{content}>")
    });
    element.self_closing = self_closing;
    Ok(element)
}

struct TreeBuilder {
    prolog: Option<String>,
    before_root: Vec<Node>,
    after_root: Vec<Node>,
    root: Option<Element>,
    stack: Vec<Element>,
}

impl TreeBuilder {
    fn push_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None if self.root.is_none() => self.before_root.push(node),
            None => self.after_root.push(node),
        }
    }

    fn close(&mut self, element: Element) -> Result<()> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(Node::Element(element));
                Ok(())
            }
            None if self.root.is_none() => {
                self.root = Some(element);
                Ok(())
            }
            None => Err(ChanvcsError::MalformedArtifact(format!(
                "second root element <{}>",
                element.name
            ))),
        }
    }
}

/// Parse a document, keeping everything needed to write it back unchanged.
pub fn parse_document(xml: &str) -> Result<Document> {
    let mut reader = Reader::from_str(xml);
    let mut builder = TreeBuilder {
        prolog: None,
        before_root: Vec::new(),
        after_root: Vec::new(),
        root: None,
        stack: Vec::new(),
    };

    loop {
        let event = reader.read_event().map_err(|e| {
            ChanvcsError::MalformedArtifact(format!(
                "xml error at byte {}: {e}",
                reader.error_position()
            ))
        })?;
        match event {
            Event::Decl(decl) => {
                let content = utf8(&decl)?;
                if builder.root.is_none() && builder.stack.is_empty() && builder.prolog.is_none() {
                    builder.prolog = Some(format!("<?{content}?>"));
                } else {
                    builder.push_node(Node::Raw(format!("<?{content}?>")));
                }
            }
            Event::Start(start) => {
                let element = start_element(&start, false)?;
                builder.stack.push(element);
            }
            Event::Empty(start) => {
                let element = start_element(&start, true)?;
                builder.close(element)?;
            }
            Event::End(_) => {
                let element = builder.stack.pop().ok_or_else(|| {
                    ChanvcsError::MalformedArtifact("unbalanced end tag".to_string())
                })?;
                builder.close(element)?;
            }
            Event::Text(text) => builder.push_node(Node::Text(utf8(&text.into_inner())?)),
            Event::CData(data) => builder.push_node(Node::CData(utf8(&data.into_inner())?)),
            Event::Comment(comment) => {
                builder.push_node(Node::Comment(utf8(&comment.into_inner())?))
            }
            Event::PI(pi) => builder.push_node(Node::Raw(format!("<?{}?>", utf8(&pi)?))),
            Event::DocType(doctype) => builder.push_node(Node::Raw(format!(
                "<!DOCTYPE {}>",
                utf8(&doctype.into_inner())?
            ))),
            Event::Eof => break,
        }
    }

    if let Some(open) = builder.stack.last() {
        return Err(ChanvcsError::MalformedArtifact(format!(
            "document ends inside <{}>",
            open.name
        )));
    }
    let root = builder
        .root
        .ok_or_else(|| ChanvcsError::MalformedArtifact("document has no root element".to_string()))?;

    Ok(Document {
        prolog: builder.prolog,
        before_root: builder.before_root,
        root,
        after_root: builder.after_root,
    })
}
