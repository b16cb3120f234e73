//! Link reference definitions, collected before block parsing so forward
//! references resolve.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::grammar::block::FenceTracker;
use crate::utils::decode_entities;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDefinition {
    pub target: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    defs: HashMap<String, ReferenceDefinition>,
}

static DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^ {0,3}\[((?:[^\[\]\\]|\\.)+)\]:[ \t]*(?:<([^<>\n]*)>|(\S+))(?:[ \t]+(?:"([^"]*)"|'([^']*)'|\(([^()]*)\)))?[ \t]*$"#,
    )
    .unwrap()
});

/// Case-insensitive label key with whitespace runs collapsed.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse a single `[label]: target "title"` line.
pub(crate) fn parse_definition(line: &str) -> Option<(String, ReferenceDefinition)> {
    let caps = DEFINITION_RE.captures(line)?;
    let label = caps.get(1)?.as_str();
    if label.starts_with('^') || label.trim().is_empty() {
        return None;
    }
    let target = caps.get(2).or_else(|| caps.get(3))?.as_str();
    let title = caps
        .get(4)
        .or_else(|| caps.get(5))
        .or_else(|| caps.get(6))
        .map(|m| decode_entities(m.as_str()));
    Some((
        normalize_label(label),
        ReferenceDefinition {
            target: decode_entities(target),
            title,
        },
    ))
}

impl ReferenceTable {
    /// Scan `source` line by line, skipping fenced code.
    pub fn build(source: &str) -> Self {
        let mut table = Self::default();
        let mut fences = FenceTracker::default();
        for line in source.lines() {
            if fences.observe(line) {
                continue;
            }
            if let Some((label, def)) = parse_definition(line) {
                table.defs.entry(label).or_insert(def);
            }
        }
        tracing::trace!(count = table.defs.len(), "collected reference definitions");
        table
    }

    pub fn get(&self, label: &str) -> Option<&ReferenceDefinition> {
        self.defs.get(&normalize_label(label))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_all_title_styles() {
        let table = ReferenceTable::build(
            "[a]: https://a.example\n\
             [B  Label]: <https://b.example/x y> \"Bee\"\n\
             [c]: /c 'See'\n\
             [d]: /d (Dee)\n",
        );
        assert_eq!(table.len(), 4);
        assert_eq!(table.get("A").unwrap().target, "https://a.example");
        let b = table.get("b label").unwrap();
        assert_eq!(b.target, "https://b.example/x y");
        assert_eq!(b.title.as_deref(), Some("Bee"));
        assert_eq!(table.get("c").unwrap().title.as_deref(), Some("See"));
        assert_eq!(table.get("d").unwrap().title.as_deref(), Some("Dee"));
    }

    #[test]
    fn first_definition_wins() {
        let table = ReferenceTable::build("[x]: /first\n[X]: /second\n");
        assert_eq!(table.get("x").unwrap().target, "/first");
    }

    #[test]
    fn skips_footnotes_and_code() {
        let table = ReferenceTable::build(
            "[^note]: a footnote\n```\n[inside]: /code\n```\n    [indented]: /way-too-far\n",
        );
        assert!(table.is_empty());
    }
}
