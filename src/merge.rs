//! Splices routing entries into a configuration document
//!
//! Only the missing pieces of an entry are inserted, at two well-defined
//! points. Every other byte of the document is left as it was. The upstream
//! insertion is decided first; the location insertion is then decided against
//! the text as it stands after the upstream went in.

use crate::document::{extract_blocks, server_block, BlockKind, ConfigDocument};
use crate::entry::RoutingEntry;

/// Result of merging one entry into a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The document already holds both blocks for the entry
    Unchanged,
    /// At least one block was inserted
    Updated {
        text: String,
        upstream_inserted: bool,
        location_inserted: bool,
    },
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, MergeOutcome::Unchanged)
    }
}

/// Merge `entry` into `document`
///
/// Never fails: a document without recognizable upstream, location or server
/// blocks gets the missing fragments prepended and appended. Inserted text
/// follows the document's line ending (`\r\n` when it has any).
pub fn merge(document: &ConfigDocument, entry: &RoutingEntry) -> MergeOutcome {
    let has_upstream = document.upstream_names().contains(&entry.name);
    let has_location = document.location_paths().contains(&entry.name);

    if has_upstream && has_location {
        return MergeOutcome::Unchanged;
    }

    let mut text = document.text().to_string();
    let eol = line_ending(&text);

    if !has_upstream {
        text = insert_upstream(&text, &entry.upstream_fragment(), eol);
    }

    if !has_location {
        text = insert_location(&text, &entry.location_fragment(), eol);
    }

    MergeOutcome::Updated {
        text,
        upstream_inserted: !has_upstream,
        location_inserted: !has_location,
    }
}

fn line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// After the last upstream block, or before the whole document
fn insert_upstream(text: &str, fragment: &str, eol: &str) -> String {
    let fragment = indent_lines(fragment, "", eol);
    match extract_blocks(BlockKind::Upstream, text).last() {
        Some(block) => splice(text, block.span.end, &format!("{eol}{eol}{fragment}")),
        None if text.is_empty() => format!("{fragment}{eol}"),
        None => format!("{fragment}{eol}{eol}{text}"),
    }
}

/// After the last location block, else inside the first server block, else at the end
fn insert_location(text: &str, fragment: &str, eol: &str) -> String {
    if let Some(block) = extract_blocks(BlockKind::Location, text).last() {
        let fragment = indent_lines(fragment, "", eol);
        return splice(text, block.span.end, &format!("{eol}{eol}{fragment}"));
    }

    if let Some(span) = server_block(text) {
        let close = span.end - 1;
        let line_start = text[..close].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let brace_indent = &text[line_start..close];

        // Closing brace on its own line: insert a full line above it
        if brace_indent.chars().all(|c| c == ' ' || c == '\t') && line_start > span.start {
            let indent = format!("{brace_indent}    ");
            let lines = indent_lines(fragment, &indent, eol);
            return splice(text, line_start, &format!("{lines}{eol}"));
        }

        let lines = indent_lines(fragment, "    ", eol);
        return splice(text, close, &format!("{eol}{lines}{eol}"));
    }

    append(text, &indent_lines(fragment, "", eol), eol)
}

fn append(text: &str, fragment: &str, eol: &str) -> String {
    if text.is_empty() {
        format!("{fragment}{eol}")
    } else if text.ends_with('\n') {
        format!("{text}{eol}{fragment}{eol}")
    } else {
        format!("{text}{eol}{eol}{fragment}{eol}")
    }
}

fn splice(text: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..at]);
    out.push_str(insert);
    out.push_str(&text[at..]);
    out
}

/// Prefix every line of `fragment` with `indent` and join with `eol`
fn indent_lines(fragment: &str, indent: &str, eol: &str) -> String {
    fragment
        .lines()
        .map(|line| format!("{indent}{line}"))
        .collect::<Vec<_>>()
        .join(eol)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updated_text(outcome: MergeOutcome) -> String {
        match outcome {
            MergeOutcome::Updated { text, .. } => text,
            MergeOutcome::Unchanged => panic!("expected an update"),
        }
    }

    fn api() -> RoutingEntry {
        RoutingEntry::new("api", "netA", 8080)
    }

    #[test]
    fn test_empty_document_end_to_end() {
        let entry = api();
        let doc = ConfigDocument::parse("");
        let text = updated_text(merge(&doc, &entry));

        assert_eq!(
            text,
            format!(
                "{}\n\n{}\n",
                entry.upstream_fragment(),
                entry.location_fragment()
            )
        );

        let merged = ConfigDocument::parse(&text);
        assert_eq!(merged.upstream_names().len(), 1);
        assert_eq!(merged.location_paths().len(), 1);
        assert!(text.contains("server api:8080;"));
        assert!(text.contains("proxy_pass http://api/;"));
        assert!(text.contains("proxy_redirect off;"));
        assert_eq!(text.matches("proxy_set_header").count(), 4);

        assert_eq!(merge(&merged, &entry), MergeOutcome::Unchanged);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let original = "http {\n    server {\n        listen 80;\n    }\n}\n";
        let entry = RoutingEntry::new("web", "netA", 3000);

        let first = updated_text(merge(&ConfigDocument::parse(original), &entry));
        let second = merge(&ConfigDocument::parse(&first), &entry);
        assert!(second.is_unchanged());
    }

    #[test]
    fn test_upstream_goes_after_last_upstream() {
        let original = "upstream u1 {\n    server u1:1;\n}\n\nupstream u2 {\n    server u2:2;\n}\n\nlocation /u1 {\n    proxy_pass http://u1/;\n}\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let u2_end = original.find("server u2:2;\n}").unwrap() + "server u2:2;\n}".len();
        let expected_prefix = format!("{}\n\n{}", &original[..u2_end], entry.upstream_fragment());
        assert!(text.starts_with(&expected_prefix));

        let keys: Vec<_> = extract_blocks(BlockKind::Upstream, &text)
            .into_iter()
            .map(|b| b.key)
            .collect();
        assert_eq!(keys, vec!["u1", "u2", "api"]);
    }

    #[test]
    fn test_location_goes_after_last_location() {
        let original = "server {\n    location /a {\n        proxy_pass http://a/;\n    }\n\n    location /b {\n        proxy_pass http://b/;\n    }\n}\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let keys: Vec<_> = extract_blocks(BlockKind::Location, &text)
            .into_iter()
            .map(|b| b.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "api"]);

        let b_end = original.find("http://b/;\n    }").unwrap() + "http://b/;\n    }".len();
        let after_upstream = text
            .strip_prefix(&format!("{}\n\n", entry.upstream_fragment()))
            .unwrap();
        assert!(after_upstream.starts_with(&original[..b_end]));
        assert!(after_upstream.ends_with(&original[b_end..]));
    }

    #[test]
    fn test_unrelated_blocks_untouched() {
        let original = "upstream b {\n    server b:1;\n}\n\n# keep me\nlocation /b {\n    proxy_pass http://b/;\n}\n\nlocation /c {\n    proxy_pass http://c/;\n}\ntrailer;\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let upstream_insert = format!("\n\n{}", entry.upstream_fragment());
        let location_insert = format!("\n\n{}", entry.location_fragment());
        let rebuilt = text.replacen(&upstream_insert, "", 1).replacen(&location_insert, "", 1);
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_append_fallback_without_server_or_locations() {
        let original = "events {\n    worker_connections 1024;\n}";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let expected = format!(
            "{}\n\n{}\n\n{}\n",
            entry.upstream_fragment(),
            original,
            entry.location_fragment()
        );
        assert_eq!(text, expected);
        assert!(text.trim_end().ends_with(&entry.location_fragment()));
    }

    #[test]
    fn test_location_inserted_inside_server_block() {
        let original = "http {\n    server {\n        listen 80;\n        location / {\n            root /srv;\n        }\n    }\n}\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let server = server_block(&text).unwrap();
        let server_text = &text[server];
        assert!(server_text.contains("        location /api {\n            proxy_pass http://api/;"));
        assert!(server_text.ends_with("        }\n    }"));
        assert_eq!(ConfigDocument::parse(&text).location_paths().len(), 1);
    }

    #[test]
    fn test_location_inserted_before_inline_server_brace() {
        let original = "server { listen 80; }";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let server = server_block(&text).unwrap();
        assert!(text[server].starts_with("server { listen 80; \n    location /api {"));
        assert!(text.ends_with("proxy_redirect off;\n    }\n}"));
    }

    #[test]
    fn test_location_skips_commented_server_block() {
        let original = "http {\n    # server {\n    server {\n        listen 80;\n    }\n}\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let server = server_block(&text).unwrap();
        let server_text = &text[server.clone()];
        assert!(server_text.starts_with("server {\n        listen 80;\n        location /api {"));
        assert!(server_text.ends_with("proxy_redirect off;\n        }\n    }"));
        assert_eq!(&text[server.end..], "\n}\n");
        assert!(text.contains("    # server {\n"));
    }

    #[test]
    fn test_location_ignores_commented_brace_in_server() {
        let original = "http {\n    server {\n        listen 80; # }\n    }\n}\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        let server = server_block(&text).unwrap();
        let server_text = &text[server.clone()];
        assert!(server_text.starts_with("server {\n        listen 80; # }\n        location /api {"));
        assert_eq!(&text[server.end..], "\n}\n");
    }

    #[test]
    fn test_crlf_document_keeps_line_endings() {
        let original = "upstream u {\r\n    server u:1;\r\n}\r\n\r\nhttp {\r\n    server {\r\n        listen 80;\r\n    }\r\n}\r\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        assert!(!text.replace("\r\n", "").contains('\n'));
        assert!(text.contains("}\r\n\r\nupstream api {\r\n    server api:8080;\r\n}"));
        assert!(text.contains("        location /api {\r\n            proxy_pass http://api/;\r\n"));
        assert!(merge(&ConfigDocument::parse(&text), &entry).is_unchanged());
    }

    #[test]
    fn test_only_missing_location_is_inserted() {
        let original = "upstream api {\n    server api:8080;\n}\n";
        let entry = api();
        let outcome = merge(&ConfigDocument::parse(original), &entry);

        match outcome {
            MergeOutcome::Updated {
                text,
                upstream_inserted,
                location_inserted,
            } => {
                assert!(!upstream_inserted);
                assert!(location_inserted);
                let doc = ConfigDocument::parse(&text);
                assert_eq!(extract_blocks(BlockKind::Upstream, doc.text()).len(), 1);
                assert!(doc.contains_entry("api"));
            }
            MergeOutcome::Unchanged => panic!("partial entry must be completed"),
        }
    }

    #[test]
    fn test_only_missing_upstream_is_inserted() {
        let original = "location /api {\n    proxy_pass http://api/;\n}\n";
        let entry = api();
        let outcome = merge(&ConfigDocument::parse(original), &entry);

        match outcome {
            MergeOutcome::Updated {
                text,
                upstream_inserted,
                location_inserted,
            } => {
                assert!(upstream_inserted);
                assert!(!location_inserted);
                assert_eq!(text, format!("{}\n\n{}", entry.upstream_fragment(), original));
            }
            MergeOutcome::Unchanged => panic!("partial entry must be completed"),
        }
    }

    #[test]
    fn test_merge_repairs_truncated_headers() {
        let original = "location /old {\n    proxy_redirect off;\n}er X-Forwarded-Proto $scheme;\n";
        let entry = api();
        let text = updated_text(merge(&ConfigDocument::parse(original), &entry));

        assert!(!text.contains("}er X-Forwarded-Proto"));
        assert!(text.contains("location /old {\n    proxy_redirect off;\n}\n\nlocation /api {"));
    }

    #[test]
    fn test_prefix_name_does_not_count_as_present() {
        let original = "upstream api2 {\n    server api2:1;\n}\n\nlocation /api2 {\n    proxy_pass http://api2/;\n}\n";
        let outcome = merge(&ConfigDocument::parse(original), &api());
        assert!(!outcome.is_unchanged());
    }
}
