//! Allow-list sanitizing of rendered HTML.
//!
//! Runs after enrichment over the finished markup and trusts nothing before
//! it. Anything not on a list is dropped. Two profiles exist: articles, and
//! the narrower one for reader comments.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use ammonia::Builder;
use regex::Regex;

use crate::embed::{IFRAME_SANDBOX, is_trusted_iframe_src};
use crate::utils::is_external;

const IFRAME_ALLOW: &str = "fullscreen; picture-in-picture; clipboard-write";
const LINK_REL: &str = "noopener noreferrer";

const TEXT_TAGS: &[&str] = &[
    "a", "abbr", "b", "blockquote", "br", "code", "dd", "del", "details", "div", "dl", "dt",
    "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "img", "input", "ins", "kbd", "li",
    "mark", "ol", "p", "pre", "s", "section", "small", "span", "strong", "sub", "summary", "sup",
    "table", "tbody", "td", "tfoot", "th", "thead", "tr", "u", "ul",
];

const MATH_TAGS: &[&str] = &[
    "math", "annotation", "semantics", "menclose", "merror", "mfrac", "mi", "mmultiscripts",
    "mn", "mo", "mover", "mpadded", "mphantom", "mprescripts", "mroot", "mrow", "ms", "mspace",
    "msqrt", "mstyle", "msub", "msubsup", "msup", "mtable", "mtd", "mtext", "mtr", "munder",
    "munderover", "none",
];

const MATH_ATTRIBUTES: &[&str] = &[
    "accent", "accentunder", "columnalign", "depth", "display", "displaystyle", "encoding",
    "fence", "form", "height", "largeop", "linethickness", "lspace", "mathvariant", "maxsize",
    "minsize", "movablelimits", "notation", "rspace", "scriptlevel", "separator", "stretchy",
    "symmetric", "width", "xmlns",
];

const SVG_TAGS: &[&str] = &[
    "svg", "g", "path", "circle", "ellipse", "line", "polygon", "polyline", "rect",
];

const SVG_ATTRIBUTES: &[&str] = &[
    "viewBox", "width", "height", "fill", "fill-rule", "clip-rule", "stroke", "stroke-width",
    "stroke-linecap", "stroke-linejoin", "opacity", "transform", "d", "cx", "cy", "r", "rx",
    "ry", "x", "y", "x1", "y1", "x2", "y2", "points", "xmlns",
];

/// `data-*` attributes a comment may keep.
const COMMENT_DATA_ATTRIBUTES: &[&str] = &[
    "data-src",
    "data-optimized-src",
    "data-spoiler",
    "data-callout",
    "data-footnote-ref",
    "data-footnotes",
];

static HL_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^--hl-light:#[0-9a-fA-F]{6};--hl-dark:#[0-9a-fA-F]{6};?$").unwrap()
});
static DATA_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^data:image/(?:png|jpeg|gif|webp|avif);base64,[a-z0-9+/=\s]+$").unwrap()
});
static START_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([A-Za-z][A-Za-z0-9-]*)((?:[^>"]|"[^"]*")*)>"#).unwrap()
});
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\shref="([^"]*)""#).unwrap());

fn set<'a>(items: &[&'a str]) -> HashSet<&'a str> {
    items.iter().copied().collect()
}

fn is_plain_location(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v.starts_with("http://")
        || v.starts_with("https://")
        || (v.starts_with('/') && !v.starts_with("//"))
        || (!v.contains(':') && !v.starts_with("//"))
}

fn is_data_url(value: &str) -> bool {
    value
        .trim_start()
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

/// Per-value checks on top of the name allow-lists.
fn filter_attribute<'u>(element: &str, attribute: &str, value: &'u str) -> Option<Cow<'u, str>> {
    let keep = match (element, attribute) {
        ("iframe", "src") => is_trusted_iframe_src(value),
        ("span", "style") => HL_STYLE_RE.is_match(value.trim()),
        ("input", "type") => value.eq_ignore_ascii_case("checkbox"),
        (_, "data-src" | "data-optimized-src") => is_plain_location(value),
        ("img", "src") if is_data_url(value) => DATA_IMAGE_RE.is_match(value.trim()),
        (_, "href" | "src" | "cite") => !is_data_url(value),
        _ => true,
    };
    keep.then_some(Cow::Borrowed(value))
}

fn base_builder(tags: HashSet<&'static str>) -> Builder<'static> {
    let mut builder = Builder::empty();
    builder
        .tags(tags)
        .url_schemes(set(&["http", "https", "mailto", "tel", "data"]))
        .link_rel(None)
        .clean_content_tags(set(&["script", "style"]))
        .strip_comments(true)
        .attribute_filter(filter_attribute)
        .set_tag_attribute_value("input", "disabled", "")
        .set_tag_attribute_value("input", "readonly", "");
    builder
}

fn common_tag_attributes() -> HashMap<&'static str, HashSet<&'static str>> {
    let mut attrs = HashMap::new();
    attrs.insert("a", set(&["href", "title", "hreflang"]));
    attrs.insert(
        "img",
        set(&["src", "alt", "title", "width", "height", "loading", "decoding"]),
    );
    attrs.insert("input", set(&["type", "checked"]));
    attrs.insert("ol", set(&["start"]));
    attrs.insert("th", set(&["align", "colspan", "rowspan"]));
    attrs.insert("td", set(&["align", "colspan", "rowspan"]));
    attrs.insert("abbr", set(&["title"]));
    attrs.insert("details", set(&["open"]));
    for tag in MATH_TAGS {
        attrs.insert(*tag, set(MATH_ATTRIBUTES));
    }
    attrs
}

static ARTICLE: LazyLock<Builder<'static>> = LazyLock::new(|| {
    let mut tags = set(TEXT_TAGS);
    tags.extend(MATH_TAGS);
    tags.extend(SVG_TAGS);
    tags.extend(["iframe", "button", "figure", "figcaption"]);

    let mut attrs = common_tag_attributes();
    attrs.insert("span", set(&["style"]));
    attrs.insert(
        "iframe",
        set(&["src", "title", "loading", "allowfullscreen", "width", "height"]),
    );
    for tag in SVG_TAGS {
        attrs.insert(*tag, set(SVG_ATTRIBUTES));
    }

    let mut builder = base_builder(tags);
    builder
        .tag_attributes(attrs)
        .generic_attributes(set(&[
            "class", "id", "role", "title", "hidden", "tabindex", "lang", "dir",
        ]))
        .generic_attribute_prefixes(set(&["data-", "aria-"]))
        .set_tag_attribute_value("iframe", "sandbox", IFRAME_SANDBOX)
        .set_tag_attribute_value("iframe", "allow", IFRAME_ALLOW)
        .set_tag_attribute_value("iframe", "referrerpolicy", "strict-origin-when-cross-origin")
        .set_tag_attribute_value("button", "type", "button");
    builder
});

static COMMENT: LazyLock<Builder<'static>> = LazyLock::new(|| {
    let mut tags = set(TEXT_TAGS);
    tags.extend(MATH_TAGS);

    let mut generic = set(&["class", "title", "lang", "dir"]);
    generic.extend(COMMENT_DATA_ATTRIBUTES);

    let mut builder = base_builder(tags);
    builder
        .tag_attributes(common_tag_attributes())
        .generic_attributes(generic)
        .generic_attribute_prefixes(set(&["aria-"]));
    builder
});

/// Append `rel` to every anchor and `target` to external ones.
///
/// Ammonia drops both attributes from input, so they are always written
/// here, in this order, and a second pass reproduces the same bytes. Start
/// tags are matched whole with their quoted values, so markup inside an
/// attribute value is never taken for a tag.
fn finish_anchors(html: &str) -> Cow<'_, str> {
    START_TAG_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        if &caps[1] != "a" {
            return caps[0].to_owned();
        }
        let attrs = &caps[2];
        let external = HREF_RE
            .captures(attrs)
            .is_some_and(|h| is_external(&h[1]));
        let target = if external { r#" target="_blank""# } else { "" };
        format!(r#"<a{attrs} rel="{LINK_REL}"{target}>"#)
    })
}

fn clean(builder: &Builder<'static>, html: &str) -> String {
    let cleaned = builder.clean(html).to_string();
    finish_anchors(&cleaned).into_owned()
}

/// Sanitize article HTML.
pub fn sanitize_article(html: &str) -> String {
    clean(&ARTICLE, html)
}

/// Sanitize comment HTML. No iframes, buttons, figures, ids or hydration markers.
pub fn sanitize_comment(html: &str) -> String {
    clean(&COMMENT, html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_and_handlers_are_dropped() {
        let out = sanitize_article(
            r#"<p onclick="x()">hi<script>alert(1)</script></p><img src="/a.png" onerror="alert(1)">"#,
        );
        assert!(!out.contains("script"));
        assert!(!out.contains("alert"));
        assert!(!out.contains("onclick"));
        assert!(!out.contains("onerror"));
        assert!(out.contains("<p>hi</p>"));
    }

    #[test]
    fn javascript_urls_are_dropped() {
        let out = sanitize_article(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!out.contains("javascript"));
        let out = sanitize_article(r#"<a href="data:text/html,hi">x</a>"#);
        assert!(!out.contains("data:"));
    }

    #[test]
    fn external_anchors_open_in_new_tab() {
        let out = sanitize_article(r#"<a href="https://example.com" rel="opener">x</a>"#);
        assert!(out.contains(r#"rel="noopener noreferrer""#));
        assert!(out.contains(r#"target="_blank""#));
        assert!(!out.contains("opener\""));
        let internal = sanitize_article(r##"<a href="#fn-1">1</a>"##);
        assert!(!internal.contains("target"));
    }

    #[test]
    fn iframes_are_revalidated() {
        let ok = sanitize_article(
            r#"<iframe src="https://www.youtube-nocookie.com/embed/abc" sandbox="allow-top-navigation"></iframe>"#,
        );
        assert!(ok.contains("youtube-nocookie.com"));
        assert!(ok.contains(&format!(r#"sandbox="{IFRAME_SANDBOX}""#)));
        assert!(!ok.contains("allow-top-navigation"));
        let bad = sanitize_article(r#"<iframe src="https://evil.example/"></iframe>"#);
        assert!(!bad.contains("evil.example"));
        let local = sanitize_article(r#"<iframe src="/api/x"></iframe><iframe src="/demos/a.html"></iframe>"#);
        assert!(!local.contains("/api/x"));
        assert!(local.contains(r#"src="/demos/a.html""#));
        assert!(!sanitize_comment(&ok).contains("iframe"));
    }

    #[test]
    fn checkboxes_are_inert() {
        let out = sanitize_article(r#"<input type="checkbox" checked="">"#);
        assert!(out.contains(r#"disabled="""#));
        assert!(out.contains(r#"readonly="""#));
        let text = sanitize_article(r#"<input type="text" value="x">"#);
        assert!(!text.contains("text"));
    }

    #[test]
    fn only_highlight_styles_survive() {
        let ok = r#"<span style="--hl-light:#112233;--hl-dark:#aabbcc">x</span>"#;
        assert_eq!(sanitize_article(ok), ok);
        let bad = sanitize_article(r#"<span style="position:fixed">x</span>"#);
        assert_eq!(bad, "<span>x</span>");
    }

    #[test]
    fn data_images_only() {
        let ok = sanitize_article(r#"<img src="data:image/png;base64,iVBORw0KGgo=">"#);
        assert!(ok.contains("data:image/png"));
        let bad = sanitize_article(r#"<img src="data:image/svg+xml;base64,PHN2Zz4=">"#);
        assert!(!bad.contains("data:"));
    }

    #[test]
    fn comments_lose_ids_and_hydration_markers() {
        let out = sanitize_comment(
            r#"<div class="tabs" data-tabs="" id="tabs-1-0"><button type="button">t</button></div><span data-spoiler="">s</span>"#,
        );
        assert!(!out.contains("id="));
        assert!(!out.contains("data-tabs"));
        assert!(!out.contains("button"));
        assert!(out.contains(r#"data-spoiler="""#));
    }

    #[test]
    fn sanitizing_twice_changes_nothing() {
        let input = r#"<h2 id="x">T</h2><p>a &amp; b 'q' <a href="https://e.com/?a=1&b=2" target="_blank">l</a></p>
<figure class="code-frame" data-code-frame=""><button type="button" data-copy-code="a<b">Copy</button></figure>
<input type="checkbox" disabled="" checked=""><iframe src="https://player.vimeo.com/video/1"></iframe>"#;
        let once = sanitize_article(input);
        assert_eq!(sanitize_article(&once), once);
        let comment = sanitize_comment(input);
        assert_eq!(sanitize_comment(&comment), comment);
    }

    #[test]
    fn bare_external_anchor_is_stable() {
        let once = sanitize_article(r#"<a href="https://e.com">x</a>"#);
        assert_eq!(
            once,
            r#"<a href="https://e.com" rel="noopener noreferrer" target="_blank">x</a>"#
        );
        assert_eq!(sanitize_article(&once), once);
        let comment = sanitize_comment(r#"<a href="https://e.com">x</a>"#);
        assert_eq!(sanitize_comment(&comment), comment);
    }

    #[test]
    fn markup_inside_attribute_values_is_left_alone() {
        let out = sanitize_article(
            r#"<button type="button" data-copy-code='<a href="https://e.com">y</a>'>Copy</button>"#,
        );
        assert_eq!(out.matches("rel=").count(), 0);
        assert_eq!(sanitize_article(&out), out);
    }

    const HOSTILE: &[&str] = &[
        r#"<a href="https://e.com">bare</a>"#,
        r#"<a href="https://e.com" target="_self" rel="opener">swapped</a>"#,
        r#"<A HREF="https://e.com/a?b=1&c=2" TITLE='say "hi"'>upper</A>"#,
        r#"<a href="/local">local</a> <a href="mailto:a@b.c">mail</a> <a>none</a>"#,
        r#"<a href="javascript:alert(1)">js</a><a href=" JaVaScRiPt:alert(1)">js2</a>"#,
        r#"<img src=x onerror=alert(1)><img src="data:image/svg+xml;base64,PHN2Zz4=">"#,
        r#"<p onclick="x()">hi<script>alert(1)</script><style>p{}</style></p>"#,
        r#"<iframe src="/api/x"></iframe><iframe src="https://www.youtube-nocookie.com/embed/a" sandbox="allow-top-navigation"></iframe>"#,
        r#"<svg><script>alert(1)</script><path d="M0 0" onload="x()"/></svg>"#,
        r#"<span style="position:fixed">s</span><div data-x='a>b' class="c">d</div>"#,
        r#"<button data-copy-code='<a href="https://e.com">y</a>'>Copy</button>"#,
        r#"<input type="text" value="x"><input type="checkbox" checked>"#,
        r#"<!-- note --><p>a &amp; b &lt; c &gt; d &quot;e&quot;</p>"#,
        r#"<table><tr><td align="right">1</td></tr></table>"#,
        r#"<ul><li>one<li>two</ul><p>unclosed <em>em <strong>both"#,
    ];

    #[test]
    fn sanitizing_hostile_markup_twice_changes_nothing() {
        for input in HOSTILE {
            let article = sanitize_article(input);
            assert_eq!(sanitize_article(&article), article, "article: {input}");
            let comment = sanitize_comment(input);
            assert_eq!(sanitize_comment(&comment), comment, "comment: {input}");
            for out in [&article, &comment] {
                assert!(!out.contains("<script"));
                assert!(!out.to_ascii_lowercase().contains("javascript:"));
                assert!(!out.contains("onerror"));
                assert!(!out.contains("onclick"));
            }
        }
    }
}
