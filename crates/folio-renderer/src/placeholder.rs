//! Deferred work recorded during synchronous rendering.
//!
//! The renderer writes an inert stub for anything that needs async
//! resolution and records where the stub sits in the output. Enrichment
//! swaps each span for its resolved markup.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// A fenced code block waiting for highlighting.
    Code {
        lang: Option<String>,
        meta: String,
        code: String,
    },
    /// A bare external link waiting for its preview card.
    RichLink { url: String, label: String },
    /// An encoded friend-link list waiting to be turned into cards.
    FriendLinks { payload: String },
}

impl PlaceholderKind {
    pub fn name(&self) -> &'static str {
        match self {
            PlaceholderKind::Code { .. } => "code",
            PlaceholderKind::RichLink { .. } => "rich-link",
            PlaceholderKind::FriendLinks { .. } => "friend-links",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub id: usize,
    pub kind: PlaceholderKind,
    /// Byte range of the stub in the rendered HTML.
    pub span: Range<usize>,
}

/// Replace each span with its resolved markup.
///
/// Spans must not overlap. Replacement runs back to front so earlier
/// offsets stay valid.
pub fn substitute(mut html: String, mut resolved: Vec<(Range<usize>, String)>) -> String {
    resolved.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for (span, markup) in resolved {
        if span.end <= html.len() && html.is_char_boundary(span.start) && html.is_char_boundary(span.end) {
            html.replace_range(span, &markup);
        } else {
            tracing::warn!(?span, len = html.len(), "placeholder span out of range");
        }
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_back_to_front() {
        let html = "<p>a</p>[X]<p>b</p>[YY]".to_string();
        let out = substitute(
            html,
            vec![(8..11, "first".into()), (19..23, "second".into())],
        );
        assert_eq!(out, "<p>a</p>first<p>b</p>second");
    }

    #[test]
    fn bad_spans_are_skipped() {
        let out = substitute("abc".into(), vec![(2..10, "x".into())]);
        assert_eq!(out, "abc");
    }
}
