//! Brace-depth-aware scanner for `${NAME}` / `${NAME:default}` tokens.

/// A piece of scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    /// A complete token. `raw` includes the `${` and `}`; `inner` does not.
    Token { raw: &'a str, inner: &'a str },
}

/// Split `text` into literals and tokens.
///
/// `${` opens a level and `}` closes one; the `}` that returns to depth 0
/// closes the token. An unterminated token is literal text.
pub fn scan(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != b'$' || bytes[i + 1] != b'{' {
            i += 1;
            continue;
        }
        let open = i;
        let mut depth = 1usize;
        let mut j = i + 2;
        while j < bytes.len() && depth > 0 {
            if bytes[j] == b'$' && j + 1 < bytes.len() && bytes[j + 1] == b'{' {
                depth += 1;
                j += 2;
                continue;
            }
            if bytes[j] == b'}' {
                depth -= 1;
            }
            j += 1;
        }
        if depth > 0 {
            break;
        }
        if literal_start < open {
            segments.push(Segment::Literal(&text[literal_start..open]));
        }
        segments.push(Segment::Token {
            raw: &text[open..j],
            inner: &text[open + 2..j - 1],
        });
        literal_start = j;
        i = j;
    }

    if literal_start < text.len() {
        segments.push(Segment::Literal(&text[literal_start..]));
    }
    segments
}

/// Split token contents on the first `:` into name and optional default.
pub fn split_inner(inner: &str) -> (&str, Option<&str>) {
    match inner.split_once(':') {
        Some((name, default)) => (name, Some(default)),
        None => (inner, None),
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Whether `text` contains at least one complete token.
pub fn contains_token(text: &str) -> bool {
    scan(text)
        .iter()
        .any(|s| matches!(s, Segment::Token { .. }))
}

/// Whether `text` is exactly one token and nothing else.
pub fn is_single_token(text: &str) -> bool {
    matches!(scan(text).as_slice(), [Segment::Token { .. }])
}
