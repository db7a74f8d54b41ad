use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

use crate::citations::{self, Citation, Segment};
use crate::sources::Source;

/// Inline fragment of a rendered block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    /// Compact in-flow code span.
    Code(String),
    Link {
        url: String,
        text: String,
    },
    Citation(Citation),
}

/// Block-level fragment of a rendered assistant message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    Heading { level: u8, content: Vec<Inline> },
    /// Full-width monospace container, content verbatim.
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    /// `ordinal` is the 1-based number for ordered lists, `None` for bullets.
    ListItem {
        ordinal: Option<u64>,
        content: Vec<Inline>,
    },
    Rule,
}

/// Walk the markdown event stream into typed fragments, substituting the
/// citation tokenizer for paragraph and list-item text. Link text, heading
/// text and code content pass through verbatim.
///
/// Pure function of its inputs; it is re-run over the live buffer on every
/// streaming chunk with the same source list, so citation numbers stay stable
/// as text arrives.
pub fn parse(text: &str, sources: &[Source]) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut inlines: Vec<Inline> = Vec::new();

    // Plain text is buffered here and tokenized only at flush points: the
    // markdown parser splits an unmatched "[1]" into separate text events, so
    // tokenizing per event would miss citation markers.
    let mut text_buf = String::new();

    // Active contexts. At most one of these is live at a time in well-formed
    // markdown; partial streamed text may leave one open at end of input.
    let mut heading: Option<u8> = None;
    let mut link: Option<(String, String)> = None;
    let mut code_block: Option<(Option<String>, String)> = None;
    let mut list_stack: Vec<Option<u64>> = Vec::new();
    let mut item_ordinal: Option<u64> = None;
    let mut in_item = false;

    for event in Parser::new_ext(text, Options::empty()) {
        match event {
            Event::Start(Tag::Heading(level, _, _)) => {
                heading = Some(heading_level(level));
            }
            Event::End(Tag::Heading(..)) => {
                flush_text(&mut inlines, &mut text_buf, heading.is_some(), sources);
                blocks.push(Block::Heading {
                    level: heading.take().unwrap_or(1),
                    content: std::mem::take(&mut inlines),
                });
            }
            Event::End(Tag::Paragraph) => {
                flush_text(&mut inlines, &mut text_buf, false, sources);
                blocks.push(Block::Paragraph(std::mem::take(&mut inlines)));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                };
                code_block = Some((language, String::new()));
            }
            Event::End(Tag::CodeBlock(_)) => {
                if let Some((language, code)) = code_block.take() {
                    blocks.push(Block::CodeBlock { language, code });
                }
            }
            Event::Start(Tag::List(start)) => {
                list_stack.push(start);
            }
            Event::End(Tag::List(_)) => {
                list_stack.pop();
            }
            Event::Start(Tag::Item) => {
                in_item = true;
                item_ordinal = match list_stack.last_mut() {
                    Some(Some(n)) => {
                        let current = *n;
                        *n += 1;
                        Some(current)
                    }
                    _ => None,
                };
            }
            Event::End(Tag::Item) => {
                in_item = false;
                flush_text(&mut inlines, &mut text_buf, false, sources);
                if !inlines.is_empty() {
                    blocks.push(Block::ListItem {
                        ordinal: item_ordinal.take(),
                        content: std::mem::take(&mut inlines),
                    });
                }
            }
            Event::Start(Tag::Link(_, dest, _)) => {
                flush_text(&mut inlines, &mut text_buf, heading.is_some(), sources);
                link = Some((dest.to_string(), String::new()));
            }
            Event::End(Tag::Link(..)) => {
                if let Some((url, text)) = link.take() {
                    inlines.push(Inline::Link { url, text });
                }
            }
            Event::Text(t) => {
                if let Some((_, code)) = code_block.as_mut() {
                    code.push_str(&t);
                } else if let Some((_, text)) = link.as_mut() {
                    text.push_str(&t);
                } else {
                    text_buf.push_str(&t);
                }
            }
            Event::Code(t) => {
                if let Some((_, text)) = link.as_mut() {
                    text.push_str(&t);
                } else {
                    flush_text(&mut inlines, &mut text_buf, heading.is_some(), sources);
                    inlines.push(Inline::Code(t.to_string()));
                }
            }
            Event::Html(t) => {
                if let Some((_, code)) = code_block.as_mut() {
                    code.push_str(&t);
                } else {
                    text_buf.push_str(&t);
                }
            }
            Event::SoftBreak => {
                if let Some((_, text)) = link.as_mut() {
                    text.push(' ');
                } else {
                    text_buf.push(' ');
                }
            }
            Event::HardBreak => text_buf.push('\n'),
            Event::Rule => blocks.push(Block::Rule),
            // Emphasis, strong, blockquote and the rest: contents flow through
            // as ordinary text.
            _ => {}
        }
    }

    // Streaming can cut the input mid-block; render what we have.
    if let Some((language, code)) = code_block.take() {
        blocks.push(Block::CodeBlock { language, code });
    }
    if let Some((url, text)) = link.take() {
        inlines.push(Inline::Link { url, text });
    }
    flush_text(&mut inlines, &mut text_buf, heading.is_some(), sources);
    if !inlines.is_empty() {
        let content = std::mem::take(&mut inlines);
        blocks.push(match heading {
            Some(level) => Block::Heading { level, content },
            None if in_item => Block::ListItem {
                ordinal: item_ordinal,
                content,
            },
            None => Block::Paragraph(content),
        });
    }

    blocks
}

// Headings keep their text verbatim; everything else goes through the
// citation tokenizer.
fn flush_text(inlines: &mut Vec<Inline>, buf: &mut String, verbatim: bool, sources: &[Source]) {
    if buf.is_empty() {
        return;
    }
    let text = std::mem::take(buf);
    if verbatim {
        push_text(inlines, &text);
    } else {
        push_tokenized(inlines, &text, sources);
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn push_text(inlines: &mut Vec<Inline>, text: &str) {
    if let Some(Inline::Text(last)) = inlines.last_mut() {
        last.push_str(text);
    } else {
        inlines.push(Inline::Text(text.to_string()));
    }
}

fn push_tokenized(inlines: &mut Vec<Inline>, text: &str, sources: &[Source]) {
    for segment in citations::tokenize(text, sources) {
        match segment {
            Segment::Text(t) => push_text(inlines, &t),
            Segment::Citation(c) => inlines.push(Inline::Citation(c)),
        }
    }
}
