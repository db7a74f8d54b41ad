use once_cell::sync::Lazy;
use regex::Regex;

use crate::sources::Source;

/// An inline `[n]` reference resolved (or not) against a message's sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    /// The raw digit string, shown as the badge label.
    pub label: String,
    pub url: String,
    /// Source title, used as the badge tooltip text.
    pub title: String,
    pub resolved: bool,
}

/// One piece of tokenized text: either a literal run or a citation badge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Citation(Citation),
}

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// Split `text` on `[n]` markers, resolving each against `sources` by string
/// equality on the id.
///
/// Pure function of its inputs, so it is safe to re-run on every render,
/// including over partially streamed text. Text without markers comes back as
/// a single literal segment; empty literals between adjacent markers are not
/// emitted.
pub fn tokenize(text: &str, sources: &[Source]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for m in MARKER_RE.find_iter(text) {
        if m.start() > last {
            segments.push(Segment::Text(text[last..m.start()].to_string()));
        }
        // Strip the surrounding brackets to get the digit label.
        let label = &text[m.start() + 1..m.end() - 1];
        segments.push(Segment::Citation(resolve(label, sources)));
        last = m.end();
    }

    if last < text.len() || segments.is_empty() {
        segments.push(Segment::Text(text[last..].to_string()));
    }
    segments
}

fn resolve(label: &str, sources: &[Source]) -> Citation {
    match sources.iter().find(|s| s.id == label) {
        Some(source) => Citation {
            label: label.to_string(),
            url: source.url.clone(),
            title: source.title.clone(),
            resolved: true,
        },
        None => Citation {
            label: label.to_string(),
            url: "#".to_string(),
            title: "Source not found".to_string(),
            resolved: false,
        },
    }
}
