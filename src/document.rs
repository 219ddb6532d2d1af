//! Pattern-based view of an nginx configuration document
//!
//! The document is never parsed into a tree. Structure is rediscovered by
//! pattern matching on every access, using a deliberately narrow grammar:
//!
//! - name token: `[A-Za-z0-9][A-Za-z0-9_.-]*` (the Docker container name alphabet)
//! - upstream block: `upstream <name> { ... }`
//! - location block: `location /<name> { ... }`
//! - server block: `server { ... }`, extent found by brace balancing with
//!   `#` comments ignored
//!
//! Upstream and location blocks must be flat. A nested brace inside one of
//! them is a precondition violation and extraction may under- or over-match.

use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

const NAME_TOKEN: &str = r"[A-Za-z0-9][A-Za-z0-9_.-]*";

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{NAME_TOKEN}$")).expect("valid name regex"));

static UPSTREAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\bupstream\s+({NAME_TOKEN})\s*\{{[^}}]*\}}"))
        .expect("valid upstream regex")
});

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\blocation\s+/({NAME_TOKEN})\s*\{{[^}}]*\}}"))
        .expect("valid location regex")
});

static SERVER_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bserver\s*\{").expect("valid server regex"));

/// Truncated `X-Forwarded-Proto` tail left behind a closing brace by older writers
static TRUNCATED_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\}\s*er\s*X-Forwarded-Proto\s*\$scheme;").expect("valid repair regex")
});

/// Kind of block recognized by the extraction grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Upstream,
    Location,
}

impl BlockKind {
    fn pattern(&self) -> &'static Regex {
        match self {
            BlockKind::Upstream => &*UPSTREAM_RE,
            BlockKind::Location => &*LOCATION_RE,
        }
    }
}

/// A block found in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Upstream name or location path (without the leading `/`)
    pub key: String,
    /// Byte range of the whole block, from keyword to closing brace inclusive
    pub span: Range<usize>,
}

/// Extract every block of the given kind, in document order
pub fn extract_blocks(kind: BlockKind, text: &str) -> Vec<Block> {
    kind.pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?;
            Some(Block {
                key: key.as_str().to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Byte range of the first `server { ... }` block, closing brace inclusive
///
/// Server blocks contain nested blocks, so the extent is found by counting
/// braces. Text from `#` to the end of the line is a comment and neither
/// opens a server block nor counts towards the balance. Returns `None` when
/// there is no server block or it never closes.
pub fn server_block(text: &str) -> Option<Range<usize>> {
    let live = blank_comments(text);
    let open = SERVER_OPEN_RE.find(&live)?;
    let mut depth = 0usize;

    for (offset, byte) in live.as_bytes()[open.end() - 1..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let close = open.end() - 1 + offset;
                    return Some(open.start()..close + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Copy of `text` with every comment replaced by spaces, byte offsets preserved
fn blank_comments(text: &str) -> Cow<'_, str> {
    if !text.contains('#') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut in_comment = false;

    for c in text.chars() {
        match c {
            '\n' => {
                in_comment = false;
                out.push(c);
            }
            '#' => {
                in_comment = true;
                out.push(' ');
            }
            _ if in_comment => out.extend(std::iter::repeat(' ').take(c.len_utf8())),
            _ => out.push(c),
        }
    }

    Cow::Owned(out)
}

/// Collapse every truncated forwarded-proto artifact into a plain closing brace
pub fn repair(text: &str) -> Cow<'_, str> {
    TRUNCATED_HEADER_RE.replace_all(text, "}")
}

/// Check whether a name can be used verbatim as upstream name and location path
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// In-memory view of the configuration text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    text: String,
}

impl ConfigDocument {
    /// Build a document from raw file content, repairing known malformations
    pub fn parse(raw: &str) -> Self {
        let text = repair(raw).into_owned();
        Self { text }
    }

    /// The repaired document text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names of all upstream blocks
    pub fn upstream_names(&self) -> BTreeSet<String> {
        self.keys(BlockKind::Upstream)
    }

    /// Paths of all named location blocks, without the leading `/`
    pub fn location_paths(&self) -> BTreeSet<String> {
        self.keys(BlockKind::Location)
    }

    /// True when both an upstream and a location exist for `name`
    pub fn contains_entry(&self, name: &str) -> bool {
        self.upstream_names().contains(name) && self.location_paths().contains(name)
    }

    fn keys(&self, kind: BlockKind) -> BTreeSet<String> {
        extract_blocks(kind, &self.text)
            .into_iter()
            .map(|block| block.key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"events {}

http {
    upstream web {
        server web:3000;
    }

    upstream my-api.v2 {
        server my-api.v2:8080;
    }

    server {
        listen 80;

        location /web {
            proxy_pass http://web/;
        }

        location / {
            root /usr/share/nginx/html;
        }
    }
}
"#;

    #[test]
    fn test_extract_upstream_blocks() {
        let blocks = extract_blocks(BlockKind::Upstream, SAMPLE);
        let keys: Vec<_> = blocks.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["web", "my-api.v2"]);

        let first = &SAMPLE[blocks[0].span.clone()];
        assert!(first.starts_with("upstream web {"));
        assert!(first.ends_with('}'));
    }

    #[test]
    fn test_extract_location_blocks_skips_root() {
        let blocks = extract_blocks(BlockKind::Location, SAMPLE);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].key, "web");
        assert!(SAMPLE[blocks[0].span.clone()].contains("proxy_pass http://web/;"));
    }

    #[test]
    fn test_upstream_keyword_needs_word_boundary() {
        let text = "proxy_upstream fake { x; }\n";
        assert!(extract_blocks(BlockKind::Upstream, text).is_empty());
    }

    #[test]
    fn test_location_with_nested_path_not_matched() {
        let text = "location /api/v1 {\n    proxy_pass http://api/;\n}\n";
        assert!(extract_blocks(BlockKind::Location, text).is_empty());
    }

    #[test]
    fn test_upstream_without_space_before_brace() {
        let text = "upstream api{ server api:80; }";
        let blocks = extract_blocks(BlockKind::Upstream, text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].key, "api");
        assert_eq!(blocks[0].span, 0..text.len());
    }

    #[test]
    fn test_server_block_balances_braces() {
        let span = server_block(SAMPLE).unwrap();
        let block = &SAMPLE[span.clone()];
        assert!(block.starts_with("server {"));
        assert!(block.contains("root /usr/share/nginx/html;"));
        // The enclosing http block's brace is outside the server block
        assert_eq!(SAMPLE[span.end..].trim(), "}");
    }

    #[test]
    fn test_server_directive_is_not_a_block() {
        let text = "upstream api {\n    server api:8080;\n}\n";
        assert_eq!(server_block(text), None);
    }

    #[test]
    fn test_unclosed_server_block() {
        assert_eq!(server_block("server {\n    listen 80;\n"), None);
    }

    #[test]
    fn test_server_block_skips_commented_open() {
        let text = "http {\n    # server {\n    server {\n        listen 80;\n    }\n}\n";
        let span = server_block(text).unwrap();
        assert_eq!(&text[span.clone()], "server {\n        listen 80;\n    }");
        assert_eq!(&text[span.end..], "\n}\n");
    }

    #[test]
    fn test_server_block_ignores_braces_in_comments() {
        let text = "server {\n    listen 80; # legacy }\n    # {\n    location / { root /srv; }\n}\n# }\n";
        let span = server_block(text).unwrap();
        assert_eq!(span, 0..text.len() - "\n# }\n".len());
    }

    #[test]
    fn test_server_block_commented_out_entirely() {
        assert_eq!(server_block("# server {\n#     listen 80;\n# }\n"), None);
    }

    #[test]
    fn test_blank_comments_keeps_offsets() {
        let text = "a; # é {\nb;";
        let live = blank_comments(text);
        assert_eq!(live.len(), text.len());
        assert_eq!(&live[..3], "a; ");
        assert!(!live.contains('{'));
        assert!(live.ends_with("\nb;"));
        assert!(matches!(blank_comments("a;\n"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_repair_truncated_header() {
        let broken = "location /a {\n    proxy_redirect off;\n}er X-Forwarded-Proto $scheme;\n\nlocation /b {\n}\n  er   X-Forwarded-Proto $scheme;";
        let repaired = repair(broken);
        assert_eq!(
            repaired,
            "location /a {\n    proxy_redirect off;\n}\n\nlocation /b {\n}"
        );
    }

    #[test]
    fn test_repair_leaves_valid_header_alone() {
        let text = "location /a {\n    proxy_set_header X-Forwarded-Proto $scheme;\n}\n";
        assert!(matches!(repair(text), Cow::Borrowed(_)));
    }

    #[test]
    fn test_document_sets() {
        let doc = ConfigDocument::parse(SAMPLE);
        assert_eq!(
            doc.upstream_names().into_iter().collect::<Vec<_>>(),
            vec!["my-api.v2".to_string(), "web".to_string()]
        );
        assert_eq!(
            doc.location_paths().into_iter().collect::<Vec<_>>(),
            vec!["web".to_string()]
        );
        assert!(doc.contains_entry("web"));
        assert!(!doc.contains_entry("my-api.v2"));
    }

    #[test]
    fn test_document_parse_repairs_before_extraction() {
        let doc = ConfigDocument::parse("upstream a {\n    server a:1;\n}er X-Forwarded-Proto $scheme;");
        assert_eq!(doc.text(), "upstream a {\n    server a:1;\n}");
        assert!(doc.upstream_names().contains("a"));
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("api"));
        assert!(is_valid_name("compose-web_1"));
        assert!(is_valid_name("svc.v2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("-leading"));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("semi;colon"));
        assert!(!is_valid_name("brace{"));
    }
}
