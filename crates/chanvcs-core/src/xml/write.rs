use super::{Document, Element, Node};

/// Serialize a document. Raw text is written verbatim.
pub fn write_document(doc: &Document) -> String {
    let mut out = String::new();
    if let Some(prolog) = &doc.prolog {
        out.push_str(prolog);
    }
    for node in &doc.before_root {
        write_node(&mut out, node);
    }
    write_element(&mut out, &doc.root);
    for node in &doc.after_root {
        write_node(&mut out, node);
    }
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Element(el) => write_element(out, el),
        Node::Text(raw) => out.push_str(raw),
        Node::CData(data) => {
            out.push_str("<![CDATA[");
            out.push_str(data);
            out.push_str("]]>");
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Raw(raw) => out.push_str(raw),
    }
}

fn write_element(out: &mut String, el: &Element) {
    let self_closing = el.self_closing && el.children.is_empty();
    match &el.raw_open {
        Some(raw) if raw.ends_with("/>") == self_closing => out.push_str(raw),
        Some(raw) if !self_closing => {
            // Originally `<name .../>` but now has content.
            let open = raw.trim_end_matches("/>").trim_end();
            out.push_str(open);
            out.push('>');
        }
        _ => {
            out.push('<');
            out.push_str(&el.name);
            for (key, value) in &el.attributes {
                let quote = if value.contains('"') { '\'' } else { '"' };
                out.push(' ');
                out.push_str(key);
                out.push('=');
                out.push(quote);
                out.push_str(value);
                out.push(quote);
            }
            out.push_str(if self_closing { "/>" } else { ">" });
        }
    }
    if self_closing {
        return;
    }
    for child in &el.children {
        write_node(out, child);
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}
