//! HTML to stable plain-text normalization.
//!
//! The normalized form is what gets fingerprinted, persisted and diffed, so it has to be stable
//! across cosmetic markup changes: attribute order, indentation and line wrapping in the source
//! never reach the output. Block-level elements become separate lines; inside a line every
//! whitespace run collapses to one space.

use scraper::node::Node;
use scraper::{ElementRef, Html};
use thiserror::Error;

/// Elements dropped together with everything inside them.
const IGNORE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "object", "embed", "canvas",
];

/// Elements that start (and end) a line of normalized output.
const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "body",
    "br",
    "caption",
    "dd",
    "details",
    "dialog",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "head",
    "header",
    "hr",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "summary",
    "table",
    "td",
    "th",
    "title",
    "tr",
    "ul",
];

/// Errors surfaced while normalizing a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    /// The body contains NUL bytes and is not a markup document.
    #[error("body is not markup (NUL byte at offset {offset})")]
    BinaryContent {
        /// Byte offset of the first NUL.
        offset: usize,
    },
}

/// Reduces `markup` to its visible text, one block per line.
///
/// An empty body is an empty document and normalizes to `""`.
pub fn normalize(markup: &str) -> Result<String, NormalizationError> {
    if let Some(offset) = markup.find('\0') {
        return Err(NormalizationError::BinaryContent { offset });
    }

    let document = Html::parse_document(markup);
    let mut collector = LineCollector::default();
    collector.walk(document.root_element(), false);
    Ok(collector.finish())
}

#[derive(Default)]
struct LineCollector {
    lines: Vec<String>,
    current: String,
    pending_space: bool,
}

impl LineCollector {
    fn walk(&mut self, element: ElementRef<'_>, preformatted: bool) {
        let tag = element.value().name();
        if IGNORE_TAGS.contains(&tag) {
            return;
        }

        let block = BLOCK_TAGS.contains(&tag);
        if block {
            self.break_line();
        }
        let preformatted = preformatted || tag == "pre";

        for child in element.children() {
            match child.value() {
                Node::Text(text) if preformatted => self.push_preformatted(text),
                Node::Text(text) => self.push_text(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.walk(child, preformatted);
                    }
                }
                _ => {}
            }
        }

        if block {
            self.break_line();
        }
    }

    fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                self.pending_space = !self.current.is_empty();
            } else {
                if self.pending_space {
                    self.current.push(' ');
                    self.pending_space = false;
                }
                self.current.push(ch);
            }
        }
    }

    fn push_preformatted(&mut self, text: &str) {
        let mut pieces = text.split('\n').peekable();
        while let Some(piece) = pieces.next() {
            self.push_text(piece);
            if pieces.peek().is_some() {
                self.break_line();
            }
        }
    }

    fn break_line(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
        }
        self.pending_space = false;
    }

    fn finish(mut self) -> String {
        self.break_line();
        self.lines.join("\n")
    }
}
