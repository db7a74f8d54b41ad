use once_cell::sync::Lazy;
use regex::Regex;

/// A retrieved document reference embedded in a user turn by the backend.
/// Derived data: recomputed from the raw message on every render, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub const MAX_SNIPPET_LEN: usize = 100;

// Span between a "Search Results" line (optional qualifier tolerated) and the
// "\n\nUser Query:" sentinel.
static BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Search Results[^\n]*\n(.*?)\n\nUser Query:").unwrap());

// One entry: [<digits>] <title> (<url>): <snippet>
static ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\[(\d+)\]\s+(.*?)\s+\(([^)]+)\):\s+(.*)$").unwrap());

// Entries start at the beginning of a line.
static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\[\d+\]").unwrap());

/// Parse the embedded search-results block out of a raw user message.
///
/// Total: raw text without a block, or with malformed entries, yields fewer
/// records rather than an error. Entry order and duplicate ids are preserved.
pub fn extract_sources(raw: &str) -> Vec<Source> {
    let block = match BLOCK_RE.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(""),
        None => return Vec::new(),
    };

    let starts: Vec<usize> = MARKER_RE.find_iter(block).map(|m| m.start()).collect();

    let mut sources = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(block.len());
        let entry = block[start..end].trim();

        if let Some(caps) = ENTRY_RE.captures(entry) {
            sources.push(Source {
                id: caps[1].to_string(),
                title: caps[2].trim().to_string(),
                url: caps[3].trim().to_string(),
                snippet: truncate_snippet(caps[4].trim()),
            });
        }
    }
    sources
}

// The ellipsis is appended even when nothing was cut: the backend's own UI
// renders snippets that way and citation badges rely on the stable shape.
fn truncate_snippet(snippet: &str) -> String {
    let mut out: String = snippet.chars().take(MAX_SNIPPET_LEN).collect();
    out.push_str("...");
    out
}

/// The user-visible part of a user turn: everything after "User Query: " when
/// the backend embedded a results block, the raw content otherwise.
pub fn display_query(raw: &str) -> &str {
    const SENTINEL: &str = "User Query: ";
    match raw.find(SENTINEL) {
        Some(idx) => &raw[idx + SENTINEL.len()..],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sources_from_message_content() {
        let content = "\nSearch Results\n\
            [1] Example Source (https://example.com): This is a test snippet with some content\n\
            [2] Another Source (https://example2.com): Another test snippet with more information\n\
            \nUser Query: test query";

        let sources = extract_sources(content);

        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0],
            Source {
                id: "1".into(),
                title: "Example Source".into(),
                url: "https://example.com".into(),
                snippet: "This is a test snippet with some content...".into(),
            }
        );
        assert_eq!(sources[1].id, "2");
        assert_eq!(sources[1].url, "https://example2.com");
    }

    #[test]
    fn empty_when_no_block_present() {
        assert!(extract_sources("Just some regular text without sources").is_empty());
    }

    #[test]
    fn empty_when_sentinel_missing() {
        assert!(extract_sources("Search Results\n[1] Foo (http://a): bar").is_empty());
    }

    #[test]
    fn empty_when_search_results_line_missing() {
        assert!(extract_sources("User Query: test\nSome other content").is_empty());
    }

    #[test]
    fn tolerates_qualifier_before_colon() {
        let content = "Search Results (for query: 'rust'):\n\
            [1] Foo (http://a): bar text\n\
            \nUser Query: hi";
        let sources = extract_sources(content);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "Foo");
    }

    #[test]
    fn handles_special_characters_in_title() {
        let content = "Search Results\n\
            [1] Source with \"quotes\" & special chars (https://example.com): Test snippet here\n\
            \nUser Query: test";
        let sources = extract_sources(content);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "Source with \"quotes\" & special chars");
    }

    #[test]
    fn trims_whitespace_from_parsed_values() {
        let content = "Search Results\n\
            [1]   Spaced Title   (  https://example.com  ):   Spaced snippet content   \n\
            \nUser Query: test";
        let sources = extract_sources(content);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "Spaced Title");
        assert_eq!(sources[0].url, "https://example.com");
        assert!(sources[0].snippet.starts_with("Spaced snippet"));
    }

    #[test]
    fn truncates_long_snippets() {
        let long = "a".repeat(150);
        let content = format!(
            "Search Results\n[1] Test Source (https://example.com): {long}\n\nUser Query: test"
        );
        let sources = extract_sources(&content);
        assert_eq!(sources[0].snippet.chars().count(), MAX_SNIPPET_LEN + 3);
        assert!(sources[0].snippet.ends_with("..."));
    }

    #[test]
    fn snippet_never_exceeds_limit_plus_marker() {
        for len in [0usize, 1, 50, 99, 100, 101, 500] {
            let body = "x".repeat(len);
            let content =
                format!("Search Results\n[1] T (http://a): {body}\n\nUser Query: q");
            let sources = extract_sources(&content);
            assert!(sources[0].snippet.chars().count() <= MAX_SNIPPET_LEN + 3);
        }
    }

    #[test]
    fn preserves_order_across_multiple_sources() {
        let content = "Search Results\n\
            [1] First (https://first.com): First snippet\n\
            [2] Second (https://second.com): Second snippet\n\
            [3] Third (https://third.com): Third snippet\n\
            \nUser Query: test";
        let sources = extract_sources(content);
        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn keeps_duplicate_ids() {
        let content = "Search Results\n\
            [1] First (https://first.com): one\n\
            [1] Repeat (https://again.com): two\n\
            \nUser Query: test";
        let sources = extract_sources(content);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, sources[1].id);
        assert_ne!(sources[0].title, sources[1].title);
    }

    #[test]
    fn skips_malformed_entries() {
        // Missing closing paren on the second entry.
        let content = "Search Results\n\
            [1] Good (https://good.com): fine\n\
            [2] Broken (https://bad.com: no close\n\
            \nUser Query: test";
        let sources = extract_sources(content);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "1");
    }

    #[test]
    fn end_to_end_single_entry() {
        let sources =
            extract_sources("Search Results:\n[1] Foo (http://a): bar text\n\nUser Query: hi");
        assert_eq!(
            sources,
            vec![Source {
                id: "1".into(),
                title: "Foo".into(),
                url: "http://a".into(),
                snippet: "bar text...".into(),
            }]
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let content = "Search Results\n[1] Foo (http://a): bar\n\nUser Query: hi";
        assert_eq!(extract_sources(content), extract_sources(content));
    }

    #[test]
    fn display_query_strips_embedded_block() {
        let content = "Search Results\n[1] Foo (http://a): bar\n\nUser Query: what is rust?";
        assert_eq!(display_query(content), "what is rust?");
        assert_eq!(display_query("plain question"), "plain question");
    }
}
