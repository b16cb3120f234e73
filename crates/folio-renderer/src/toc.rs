//! Heading ids, anchors and the table of contents.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::utils::{slugify, strip_tags};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocItem {
    pub id: String,
    pub text: String,
    pub level: u8,
}

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<h([1-4])((?:\s(?:[^>"]|"[^"]*")*)?)>(.*?)</h([1-6])>"#).unwrap()
});
static ID_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s+id\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).unwrap());

/// Give every level 1-4 heading a generated id and an anchor link, and
/// collect the outline in document order.
///
/// Author ids are discarded. The id is the heading slug plus the heading's
/// 1-based position, so identical titles never collide.
pub fn build_toc(html: &str) -> (String, Vec<TocItem>) {
    let mut items = Vec::new();
    let out = HEADING_RE.replace_all(html, |caps: &Captures<'_>| {
        if caps[1] != caps[4] {
            return caps[0].to_owned();
        }
        let level = &caps[1];
        let attrs = ID_ATTR_RE.replace_all(&caps[2], "");
        let inner = &caps[3];
        let text = strip_tags(inner);
        let slug = slugify(&text);
        let slug = if slug.is_empty() { "section" } else { slug.as_str() };
        let id = format!("{slug}-{}", items.len() + 1);
        let html = format!(
            r##"<h{level}{attrs} id="{id}">{inner}<a class="heading-anchor" href="#{id}" aria-hidden="true" tabindex="-1">#</a></h{level}>"##
        );
        items.push(TocItem {
            id,
            text,
            level: level.parse().unwrap_or(1),
        });
        html
    });
    (out.into_owned(), items)
}
