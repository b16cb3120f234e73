use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::emoji::EmojiResolver;
use crate::grammar::Block;
use crate::refs::ReferenceTable;

/// Which grammar a render uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Full article grammar with containers, tabs, embeds and enrichment stubs.
    Article,
    /// Reduced grammar for untrusted comments: no raw HTML, no embeds.
    Comment,
}

/// Nested callouts, containers and tabs deeper than this render as plain text.
const MAX_DEPTH: usize = 16;

static RENDER_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct FootnoteDefinition {
    pub label: String,
    pub body: Vec<Block>,
}

/// State for one compile of one document.
///
/// Every recursive body compile (callout, container, tab, footnote) borrows
/// the same context, so the reference table, counters and footnote list are
/// shared across the whole document and never across documents.
pub struct RenderContext<'a> {
    pub dialect: Dialect,
    pub refs: &'a ReferenceTable,
    pub emoji: &'a dyn EmojiResolver,
    render_seq: u64,
    tab_groups: usize,
    depth: usize,
    footnotes: Vec<FootnoteDefinition>,
    footnote_index: HashMap<String, usize>,
}

impl<'a> RenderContext<'a> {
    pub fn new(dialect: Dialect, refs: &'a ReferenceTable, emoji: &'a dyn EmojiResolver) -> Self {
        Self {
            dialect,
            refs,
            emoji,
            render_seq: RENDER_SEQ.fetch_add(1, Ordering::Relaxed),
            tab_groups: 0,
            depth: 0,
            footnotes: Vec::new(),
            footnote_index: HashMap::new(),
        }
    }

    pub fn is_article(&self) -> bool {
        self.dialect == Dialect::Article
    }

    /// A tab group id unique to this render.
    pub fn next_tab_group(&mut self) -> String {
        self.tab_groups += 1;
        format!("tabs-{}-{}", self.render_seq, self.tab_groups)
    }

    /// Run `f` one nesting level deeper, or return `None` past the depth limit.
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Option<T> {
        if self.depth >= MAX_DEPTH {
            tracing::debug!(depth = self.depth, "nesting limit reached");
            return None;
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        Some(out)
    }

    /// Record a footnote. The first definition of a label wins.
    pub fn define_footnote(&mut self, label: &str, body: Vec<Block>) {
        let key = label.to_lowercase();
        if self.footnote_index.contains_key(&key) {
            return;
        }
        self.footnotes.push(FootnoteDefinition {
            label: label.to_owned(),
            body,
        });
        self.footnote_index.insert(key, self.footnotes.len());
    }

    pub fn is_footnote_label(&self, label: &str) -> bool {
        self.footnote_index.contains_key(&label.to_lowercase())
    }

    /// 1-based number in declaration order.
    pub fn footnote_number(&self, label: &str) -> Option<usize> {
        self.footnote_index.get(&label.to_lowercase()).copied()
    }

    pub fn footnotes(&self) -> &[FootnoteDefinition] {
        &self.footnotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emoji::NoEmoji;

    #[test]
    fn tab_groups_are_scoped_per_render() {
        let refs = ReferenceTable::default();
        let mut first = RenderContext::new(Dialect::Article, &refs, &NoEmoji);
        let mut second = RenderContext::new(Dialect::Article, &refs, &NoEmoji);
        let a = first.next_tab_group();
        let b = first.next_tab_group();
        let c = second.next_tab_group();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with("-1") && c.ends_with("-1"));
    }

    #[test]
    fn first_footnote_definition_wins() {
        let refs = ReferenceTable::default();
        let mut ctx = RenderContext::new(Dialect::Article, &refs, &NoEmoji);
        ctx.define_footnote("b", vec![]);
        ctx.define_footnote("a", vec![]);
        ctx.define_footnote("B", vec![Block::ThematicBreak]);
        assert_eq!(ctx.footnote_number("b"), Some(1));
        assert_eq!(ctx.footnote_number("a"), Some(2));
        assert!(ctx.footnotes()[0].body.is_empty());
        assert_eq!(ctx.footnote_number("missing"), None);
    }

    #[test]
    fn nesting_stops_at_limit() {
        let refs = ReferenceTable::default();
        let mut ctx = RenderContext::new(Dialect::Article, &refs, &NoEmoji);
        fn dive(ctx: &mut RenderContext<'_>) -> usize {
            ctx.nested(|ctx| 1 + dive(ctx)).unwrap_or(0)
        }
        assert_eq!(dive(&mut ctx), MAX_DEPTH);
    }
}
