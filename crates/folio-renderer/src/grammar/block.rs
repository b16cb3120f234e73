use std::sync::LazyLock;

use regex::Regex;

use super::inline::parse_inlines;
use super::{
    Alignment, Block, CalloutKind, CodeBlock, ContainerKind, Inline, LinkKind, List, ListItem,
    Tab, Table, plain_text,
};
use crate::context::{Dialect, RenderContext};
use crate::embed::match_embed_source;
use crate::refs;
use crate::utils::{decode_entities, is_http_url, is_root_relative};

/// Block-level rules, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRule {
    Alert,
    Container,
    Tabs,
    MathBlock,
    FriendLinks,
    FencedCode,
    FootnoteDefinition,
    ReferenceDefinition,
    IndentedCode,
    AtxHeading,
    ThematicBreak,
    BlockQuote,
    List,
    Table,
    HtmlBlock,
    Paragraph,
}

// Structural extensions first, then the base grammar, then paragraphs as the
// catch-all. Alerts sit above block quotes so `> [!NOTE]` never renders as a
// plain quote.
const ARTICLE_RULES: &[BlockRule] = &[
    BlockRule::Alert,
    BlockRule::Container,
    BlockRule::Tabs,
    BlockRule::MathBlock,
    BlockRule::FriendLinks,
    BlockRule::FencedCode,
    BlockRule::FootnoteDefinition,
    BlockRule::ReferenceDefinition,
    BlockRule::IndentedCode,
    BlockRule::AtxHeading,
    BlockRule::ThematicBreak,
    BlockRule::BlockQuote,
    BlockRule::List,
    BlockRule::Table,
    BlockRule::HtmlBlock,
    BlockRule::Paragraph,
];

const COMMENT_RULES: &[BlockRule] = &[
    BlockRule::Alert,
    BlockRule::MathBlock,
    BlockRule::FencedCode,
    BlockRule::FootnoteDefinition,
    BlockRule::ReferenceDefinition,
    BlockRule::IndentedCode,
    BlockRule::AtxHeading,
    BlockRule::ThematicBreak,
    BlockRule::BlockQuote,
    BlockRule::List,
    BlockRule::Table,
    BlockRule::Paragraph,
];

impl BlockRule {
    pub fn for_dialect(dialect: Dialect) -> &'static [BlockRule] {
        match dialect {
            Dialect::Article => ARTICLE_RULES,
            Dialect::Comment => COMMENT_RULES,
        }
    }

    fn apply(self, lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
        match self {
            BlockRule::Alert => alert(lines, i, ctx),
            BlockRule::Container => container(lines, i, ctx),
            BlockRule::Tabs => tabs(lines, i, ctx),
            BlockRule::MathBlock => math_block(lines, i),
            BlockRule::FriendLinks => friend_links(lines, i),
            BlockRule::FencedCode => fenced_code(lines, i, ctx),
            BlockRule::FootnoteDefinition => footnote_definition(lines, i, ctx),
            BlockRule::ReferenceDefinition => {
                refs::parse_definition(&lines[i]).map(|_| Step::skip(i + 1))
            }
            BlockRule::IndentedCode => indented_code(lines, i),
            BlockRule::AtxHeading => atx_heading(lines, i, ctx),
            BlockRule::ThematicBreak => THEMATIC_RE
                .is_match(&lines[i])
                .then(|| Step::block(Block::ThematicBreak, i + 1)),
            BlockRule::BlockQuote => block_quote(lines, i, ctx),
            BlockRule::List => list(lines, i, ctx),
            BlockRule::Table => table(lines, i, ctx),
            BlockRule::HtmlBlock => html_block(lines, i),
            BlockRule::Paragraph => Some(paragraph(lines, i, ctx)),
        }
    }
}

struct Step {
    block: Option<Block>,
    next: usize,
}

impl Step {
    fn block(block: Block, next: usize) -> Self {
        Self {
            block: Some(block),
            next,
        }
    }

    fn skip(next: usize) -> Self {
        Self { block: None, next }
    }
}

pub fn split_lines(source: &str) -> Vec<String> {
    source.lines().map(expand_leading_tabs).collect()
}

fn expand_leading_tabs(line: &str) -> String {
    if !line.starts_with([' ', '\t']) || !line.contains('\t') {
        return line.to_owned();
    }
    let mut out = String::with_capacity(line.len() + 8);
    let mut col = 0;
    let mut rest = line.len();
    for (idx, c) in line.char_indices() {
        match c {
            ' ' => {
                out.push(' ');
                col += 1;
            }
            '\t' => {
                let n = 4 - col % 4;
                out.extend(std::iter::repeat_n(' ', n));
                col += n;
            }
            _ => {
                rest = idx;
                break;
            }
        }
    }
    out.push_str(&line[rest..]);
    out
}

pub fn parse_blocks(lines: &[String], ctx: &mut RenderContext<'_>) -> Vec<Block> {
    let rules = BlockRule::for_dialect(ctx.dialect);
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if is_blank(&lines[i]) {
            i += 1;
            continue;
        }
        let step = rules
            .iter()
            .find_map(|rule| rule.apply(lines, i, ctx))
            .unwrap_or_else(|| Step::skip(i + 1));
        blocks.extend(step.block);
        i = step.next.max(i + 1);
    }
    blocks
}

/// Parse a nested body one level deeper, degrading to text at the depth limit.
fn parse_nested(lines: &[String], ctx: &mut RenderContext<'_>) -> Vec<Block> {
    ctx.nested(|ctx| parse_blocks(lines, ctx))
        .unwrap_or_else(|| vec![Block::Paragraph(vec![Inline::Text(lines.join("\n"))])])
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn indent(line: &str) -> usize {
    line.bytes().take_while(|b| *b == b' ').count()
}

/// Tracks whether a line-by-line scan is inside a fenced code block.
#[derive(Debug, Default)]
pub struct FenceTracker {
    open: Option<(u8, usize)>,
}

impl FenceTracker {
    /// Feed the next line. Returns true when it belongs to a fenced block,
    /// fences included.
    pub fn observe(&mut self, line: &str) -> bool {
        match self.open {
            Some((ch, len)) => {
                if is_closing_fence(line, ch, len) {
                    self.open = None;
                }
                true
            }
            None => match parse_fence_open(line) {
                Some(fence) => {
                    self.open = Some((fence.ch, fence.len));
                    true
                }
                None => false,
            },
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

struct FenceOpen<'a> {
    indent: usize,
    ch: u8,
    len: usize,
    info: &'a str,
}

fn parse_fence_open(line: &str) -> Option<FenceOpen<'_>> {
    let indent = indent(line);
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let ch = *rest.as_bytes().first()?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let len = rest.bytes().take_while(|b| *b == ch).count();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    if ch == b'`' && info.contains('`') {
        return None;
    }
    Some(FenceOpen {
        indent,
        ch,
        len,
        info,
    })
}

fn is_closing_fence(line: &str, ch: u8, len: usize) -> bool {
    let indent = indent(line);
    if indent > 3 {
        return false;
    }
    let rest = &line[indent..];
    let n = rest.bytes().take_while(|b| *b == ch).count();
    n >= len && rest[n..].trim().is_empty()
}

static ALERT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^ {0,3}>[ \t]*\[!(note|tip|important|warning|caution)\][ \t]*(.*)$").unwrap()
});
static CONTAINER_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}:::[ \t]*([A-Za-z][\w-]*)[ \t]*(.*?)[ \t]*$").unwrap());
static CONTAINER_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}:::[ \t]*$").unwrap());
static GRID_COLUMNS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:cols|columns)\s*[=:]\s*(\d{1,2})").unwrap());
static TABS_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<Tabs(?:\s[^>]*)?>\s*$").unwrap());
static TABS_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*</Tabs>\s*$").unwrap());
static TAB_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*<Tab\s+label\s*=\s*(?:"([^"]*)"|'([^']*)')\s*>(.*)$"#).unwrap()
});
static TAB_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*</Tab>\s*$").unwrap());
static MATH_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ {0,3}\$\$(.*)$").unwrap());
static FRIEND_LINKS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<div class="friend-links-placeholder" data-friend-links="([A-Za-z0-9+/=]*)"></div>$"#)
        .unwrap()
});
static FOOTNOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}\[\^([^\]\s]+)\]:[ \t]?(.*)$").unwrap());
static ATX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*?))?[ \t]*$").unwrap());
static HEADING_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*\{#[^}]*\}$").unwrap());
static THEMATIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}(?:(?:\*[ \t]*){3,}|(?:-[ \t]*){3,}|(?:_[ \t]*){3,})$").unwrap()
});
static SETEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(=+|-+)[ \t]*$").unwrap());
static TABLE_DELIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}\|?[ \t]*:?-+:?[ \t]*(?:\|[ \t]*:?-+:?[ \t]*)*\|?[ \t]*$").unwrap()
});
static HTML_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}<(?:!--|/?([A-Za-z][A-Za-z0-9-]*)(?:[\s/>]|$))").unwrap()
});

/// Tags that end a paragraph when they open a line.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "details", "dialog", "div", "dl", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "iframe", "main", "nav", "ol", "p", "pre", "section", "summary", "table", "ul", "video",
];

fn strip_quote_marker(line: &str) -> Option<&str> {
    let indent = indent(line);
    if indent > 3 {
        return None;
    }
    let rest = line[indent..].strip_prefix('>')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn alert(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    let caps = ALERT_RE.captures(&lines[i])?;
    let kind = CalloutKind::parse(&caps[1])?;
    let mut body = Vec::new();
    let first = caps[2].trim();
    if !first.is_empty() {
        body.push(first.to_owned());
    }
    let mut j = i + 1;
    while j < lines.len() && !is_blank(&lines[j]) {
        let line = &lines[j];
        body.push(strip_quote_marker(line).unwrap_or(line).to_owned());
        j += 1;
    }
    let body = parse_nested(&body, ctx);
    Some(Step::block(Block::Callout { kind, body }, j))
}

fn container_kind(name: &str, params: &str) -> ContainerKind {
    match name.to_ascii_lowercase().as_str() {
        "banner" => ContainerKind::Banner(
            params
                .split(|c: char| c.is_whitespace() || c == '=' || c == ',')
                .map(|p| p.trim_matches(['"', '\'']))
                .find_map(CalloutKind::parse)
                .unwrap_or(CalloutKind::Note),
        ),
        "carousel" => ContainerKind::Carousel,
        "grid" => ContainerKind::Grid {
            columns: GRID_COLUMNS_RE
                .captures(params)
                .and_then(|c| c[1].parse().ok())
                .filter(|n| (1..=12).contains(n)),
        },
        other => CalloutKind::parse(other)
            .map(ContainerKind::Callout)
            .unwrap_or_else(|| ContainerKind::Other(other.to_owned())),
    }
}

fn container(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    let caps = CONTAINER_OPEN_RE.captures(&lines[i])?;
    let params = caps[2].trim().trim_start_matches('{').trim_end_matches('}');
    let kind = container_kind(&caps[1], params);

    let mut depth = 1;
    let mut fences = FenceTracker::default();
    let mut end = None;
    for (j, line) in lines.iter().enumerate().skip(i + 1) {
        if fences.observe(line) {
            continue;
        }
        if CONTAINER_CLOSE_RE.is_match(line) {
            depth -= 1;
            if depth == 0 {
                end = Some(j);
                break;
            }
        } else if CONTAINER_OPEN_RE.is_match(line) {
            depth += 1;
        }
    }
    let (body_end, next) = match end {
        Some(e) => (e, e + 1),
        None => (lines.len(), lines.len()),
    };
    let body = parse_nested(&lines[i + 1..body_end], ctx);
    Some(Step::block(Block::Container { kind, body }, next))
}

fn tabs(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    if !TABS_OPEN_RE.is_match(&lines[i]) {
        return None;
    }
    let mut collected: Vec<(String, Vec<String>)> = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    let mut nested = 0usize;
    let mut fences = FenceTracker::default();
    let mut j = i + 1;

    while j < lines.len() {
        let line = &lines[j];
        j += 1;
        if fences.observe(line) {
            if let Some((_, body)) = current.as_mut() {
                body.push(line.clone());
            }
            continue;
        }
        if nested == 0 {
            if TABS_CLOSE_RE.is_match(line) {
                break;
            }
            if let Some(caps) = TAB_OPEN_RE.captures(line) {
                collected.extend(current.take());
                let label = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
                let mut body = Vec::new();
                let rest = caps[3].trim();
                let single_line = rest.strip_suffix("</Tab>");
                if let Some(inner) = single_line.or(Some(rest)).filter(|r| !r.is_empty()) {
                    body.push(inner.to_owned());
                }
                let tab = (decode_entities(label), body);
                if single_line.is_some() {
                    collected.push(tab);
                } else {
                    current = Some(tab);
                }
                continue;
            }
            if TAB_CLOSE_RE.is_match(line) {
                collected.extend(current.take());
                continue;
            }
        }
        if TABS_OPEN_RE.is_match(line) {
            nested += 1;
        } else if TABS_CLOSE_RE.is_match(line) {
            nested = nested.saturating_sub(1);
        }
        if let Some((_, body)) = current.as_mut() {
            body.push(line.clone());
        }
    }
    collected.extend(current.take());
    if collected.is_empty() {
        return None;
    }

    let id = ctx.next_tab_group();
    let tabs = collected
        .into_iter()
        .map(|(label, body)| Tab {
            label,
            body: parse_nested(&body, ctx),
        })
        .collect();
    Some(Step::block(Block::Tabs { id, tabs }, j))
}

fn math_block(lines: &[String], i: usize) -> Option<Step> {
    let caps = MATH_OPEN_RE.captures(&lines[i])?;
    let rest = caps[1].trim_end();
    if let Some(inner) = rest.strip_suffix("$$") {
        let inner = inner.trim();
        return (!inner.is_empty())
            .then(|| Step::block(Block::MathDisplay(inner.to_owned()), i + 1));
    }
    let mut body = Vec::new();
    if !rest.trim().is_empty() {
        body.push(rest.trim().to_owned());
    }
    for (j, line) in lines.iter().enumerate().skip(i + 1) {
        if let Some(last) = line.trim_end().strip_suffix("$$") {
            if !last.trim().is_empty() {
                body.push(last.to_owned());
            }
            let tex = body.join("\n");
            return (!tex.trim().is_empty())
                .then(|| Step::block(Block::MathDisplay(tex.trim().to_owned()), j + 1));
        }
        body.push(line.clone());
    }
    None
}

fn friend_links(lines: &[String], i: usize) -> Option<Step> {
    let caps = FRIEND_LINKS_RE.captures(lines[i].trim())?;
    Some(Step::block(
        Block::FriendLinks {
            payload: caps[1].to_owned(),
        },
        i + 1,
    ))
}

fn strip_indent(line: &str, n: usize) -> &str {
    let strip = indent(line).min(n);
    &line[strip..]
}

fn fenced_code(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    let open = parse_fence_open(&lines[i])?;
    let mut body: Vec<&str> = Vec::new();
    let mut next = lines.len();
    for (j, line) in lines.iter().enumerate().skip(i + 1) {
        if is_closing_fence(line, open.ch, open.len) {
            next = j + 1;
            break;
        }
        body.push(strip_indent(line, open.indent));
    }

    let mut info = open.info.splitn(2, char::is_whitespace);
    let lang = info
        .next()
        .filter(|l| !l.is_empty())
        .map(decode_entities);
    let meta = info.next().unwrap_or("").trim().to_owned();

    if ctx.is_article() {
        let first = body.iter().map(|l| l.trim()).find(|l| !l.is_empty());
        match (lang.as_deref(), first) {
            (Some("embed"), Some(target)) => {
                if let Some(embed) = match_embed_source(target) {
                    return Some(Step::block(Block::Embed(embed), next));
                }
            }
            (Some("excalidraw"), Some(src))
                if (is_http_url(src) || is_root_relative(src))
                    && !src.contains(['"', '\'', '<', '>', ' ']) =>
            {
                return Some(Step::block(
                    Block::Excalidraw {
                        src: src.to_owned(),
                    },
                    next,
                ));
            }
            _ => {}
        }
    }

    let mut code = body.join("\n");
    if !body.is_empty() {
        code.push('\n');
    }
    Some(Step::block(Block::Code(CodeBlock { lang, meta, code }), next))
}

fn footnote_definition(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    let caps = FOOTNOTE_RE.captures(&lines[i])?;
    let label = caps[1].to_owned();
    let mut body = vec![caps[2].to_owned()];
    let mut j = i + 1;
    while j < lines.len() {
        let line = &lines[j];
        if is_blank(line) {
            let resumes = lines[j + 1..]
                .iter()
                .find(|l| !is_blank(l))
                .is_some_and(|l| indent(l) >= 4);
            if !resumes {
                break;
            }
            body.push(String::new());
        } else if indent(line) >= 4 {
            body.push(line[4..].to_owned());
        } else if body.last().is_some_and(|l| !is_blank(l))
            && !interrupts_paragraph(lines, j, ctx.dialect)
        {
            body.push(line.trim_start().to_owned());
        } else {
            break;
        }
        j += 1;
    }
    let body = parse_nested(&body, ctx);
    ctx.define_footnote(&label, body);
    Some(Step::skip(j))
}

fn indented_code(lines: &[String], i: usize) -> Option<Step> {
    if indent(&lines[i]) < 4 {
        return None;
    }
    let mut body: Vec<&str> = Vec::new();
    let mut j = i;
    while j < lines.len() && (indent(&lines[j]) >= 4 || is_blank(&lines[j])) {
        body.push(if is_blank(&lines[j]) { "" } else { &lines[j][4..] });
        j += 1;
    }
    while body.last().is_some_and(|l| l.is_empty()) {
        body.pop();
    }
    let mut code = body.join("\n");
    code.push('\n');
    Some(Step::block(
        Block::Code(CodeBlock {
            lang: None,
            meta: String::new(),
            code,
        }),
        j,
    ))
}

fn atx_heading(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    let caps = ATX_RE.captures(&lines[i])?;
    let level = caps[1].len() as u8;
    let mut text = caps.get(2).map_or("", |m| m.as_str()).trim_end();
    // closing sequence
    let without_hashes = text.trim_end_matches('#');
    if without_hashes.is_empty() || without_hashes.ends_with([' ', '\t']) {
        text = without_hashes.trim_end();
    }
    let text = HEADING_ID_RE.replace(text, "");
    let content = parse_inlines(&text, ctx);
    Some(Step::block(Block::Heading { level, content }, i + 1))
}

fn block_quote(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    strip_quote_marker(&lines[i])?;
    let mut body: Vec<String> = Vec::new();
    let mut j = i;
    while j < lines.len() {
        let line = &lines[j];
        if let Some(rest) = strip_quote_marker(line) {
            body.push(rest.to_owned());
        } else if !is_blank(line)
            && body.last().is_some_and(|l| !is_blank(l))
            && !interrupts_paragraph(lines, j, ctx.dialect)
        {
            body.push(line.clone());
        } else {
            break;
        }
        j += 1;
    }
    let body = parse_nested(&body, ctx);
    Some(Step::block(Block::BlockQuote(body), j))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Bullet(u8),
    Ordered(u8),
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    kind: MarkerKind,
    start: u64,
    /// Column where item content begins.
    width: usize,
    empty: bool,
}

fn parse_marker(line: &str) -> Option<Marker> {
    let indent = indent(line);
    if indent > 3 {
        return None;
    }
    let rest = &line.as_bytes()[indent..];
    let (kind, start, marker_len) = match rest.first()? {
        b @ (b'-' | b'*' | b'+') => (MarkerKind::Bullet(*b), 0, 1),
        b'0'..=b'9' => {
            let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
            if digits > 9 {
                return None;
            }
            let delim = *rest.get(digits)?;
            if delim != b'.' && delim != b')' {
                return None;
            }
            let start = std::str::from_utf8(&rest[..digits]).ok()?.parse().ok()?;
            (MarkerKind::Ordered(delim), start, digits + 1)
        }
        _ => return None,
    };
    let after = &rest[marker_len..];
    if !after.is_empty() && after[0] != b' ' {
        return None;
    }
    let spaces = after.iter().take_while(|b| **b == b' ').count();
    let empty = spaces == after.len();
    let pad = if empty || spaces > 4 { 1 } else { spaces };
    Some(Marker {
        kind,
        start,
        width: indent + marker_len + pad,
        empty,
    })
}

fn task_marker(first: &str) -> Option<(bool, &str)> {
    let rest = first.strip_prefix('[')?;
    let (checked, rest) = match rest.as_bytes() {
        [b' ', b']', ..] => (false, &rest[2..]),
        [b'x' | b'X', b']', ..] => (true, &rest[2..]),
        _ => return None,
    };
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((checked, rest.trim_start()))
}

fn list(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    let first = parse_marker(&lines[i])?;
    let mut items = Vec::new();
    let mut tight = true;
    let mut j = i;

    loop {
        let Some(marker) = parse_marker(&lines[j]).filter(|m| m.kind == first.kind) else {
            break;
        };
        let line = &lines[j];
        let content = if marker.empty {
            ""
        } else {
            &line[marker.width.min(line.len())..]
        };
        let mut item_lines = vec![content.to_owned()];
        j += 1;
        while j < lines.len() {
            let line = &lines[j];
            if is_blank(line) {
                item_lines.push(String::new());
            } else if indent(line) >= marker.width {
                item_lines.push(line[marker.width..].to_owned());
            } else if item_lines.last().is_some_and(|l| !is_blank(l))
                && parse_marker(line).is_none()
                && !interrupts_paragraph(lines, j, ctx.dialect)
            {
                item_lines.push(line.trim_start().to_owned());
            } else {
                break;
            }
            j += 1;
        }

        let mut trailing = 0;
        while item_lines.last().is_some_and(|l| is_blank(l)) {
            item_lines.pop();
            trailing += 1;
        }
        if has_inner_blank(&item_lines) {
            tight = false;
        }

        let mut task = None;
        if let Some(first_line) = item_lines.first_mut()
            && let Some((checked, rest)) = task_marker(first_line.as_str())
        {
            task = Some(checked);
            *first_line = rest.to_owned();
        }
        let body = parse_nested(&item_lines, ctx);
        items.push(ListItem { task, body });

        let continues = j < lines.len()
            && parse_marker(&lines[j]).is_some_and(|m| m.kind == first.kind)
            && !THEMATIC_RE.is_match(&lines[j]);
        if !continues {
            // trailing blank lines belong to whatever follows
            j -= trailing.min(j - i);
            break;
        }
        if trailing > 0 {
            tight = false;
        }
    }

    let ordered = matches!(first.kind, MarkerKind::Ordered(_)).then_some(first.start);
    Some(Step::block(
        Block::List(List {
            ordered,
            tight,
            items,
        }),
        j,
    ))
}

/// A blank line between two non-blank lines outside fenced code.
fn has_inner_blank(lines: &[String]) -> bool {
    let mut fences = FenceTracker::default();
    let mut seen_content = false;
    let mut pending_blank = false;
    for line in lines {
        if fences.observe(line) {
            seen_content = true;
            continue;
        }
        if is_blank(line) {
            pending_blank = seen_content;
        } else {
            if pending_blank {
                return true;
            }
            seen_content = true;
        }
    }
    false
}

fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = match trimmed.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => trimmed,
    };
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_code = false;
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '`' => {
                in_code = !in_code;
                cell.push(c);
            }
            '|' if !in_code => cells.push(std::mem::take(&mut cell).trim().to_owned()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_owned());
    cells
}

fn is_table_start(lines: &[String], i: usize) -> bool {
    lines[i].contains('|')
        && lines
            .get(i + 1)
            .is_some_and(|next| TABLE_DELIM_RE.is_match(next) && next.contains(['|', ':']))
        && split_cells(&lines[i]).len() == split_cells(&lines[i + 1]).len()
}

fn table(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Option<Step> {
    if !is_table_start(lines, i) {
        return None;
    }
    let alignments: Vec<Alignment> = split_cells(&lines[i + 1])
        .iter()
        .map(|cell| match (cell.starts_with(':'), cell.ends_with(':')) {
            (true, true) => Alignment::Center,
            (true, false) => Alignment::Left,
            (false, true) => Alignment::Right,
            (false, false) => Alignment::None,
        })
        .collect();
    let width = alignments.len();
    let header = split_cells(&lines[i])
        .iter()
        .map(|c| parse_inlines(c, ctx))
        .collect();

    let mut rows = Vec::new();
    let mut j = i + 2;
    while j < lines.len() && !is_blank(&lines[j]) && !interrupts_paragraph(lines, j, ctx.dialect)
    {
        let mut cells = split_cells(&lines[j]);
        cells.resize(width, String::new());
        rows.push(cells.iter().map(|c| parse_inlines(c, ctx)).collect());
        j += 1;
    }
    Some(Step::block(
        Block::Table(Table {
            alignments,
            header,
            rows,
        }),
        j,
    ))
}

fn html_block(lines: &[String], i: usize) -> Option<Step> {
    if !HTML_BLOCK_RE.is_match(&lines[i]) {
        return None;
    }
    let mut j = i;
    while j < lines.len() && !is_blank(&lines[j]) {
        j += 1;
    }
    Some(Step::block(Block::Html(lines[i..j].join("\n")), j))
}

/// Whether `lines[j]` starts a block that ends a running paragraph.
fn interrupts_paragraph(lines: &[String], j: usize, dialect: Dialect) -> bool {
    let line = lines[j].as_str();
    let article = dialect == Dialect::Article;
    if ATX_RE.is_match(line)
        || THEMATIC_RE.is_match(line)
        || parse_fence_open(line).is_some()
        || strip_quote_marker(line).is_some()
        || MATH_OPEN_RE.is_match(line)
        || FOOTNOTE_RE.is_match(line)
        || refs::parse_definition(line).is_some()
        || is_table_start(lines, j)
    {
        return true;
    }
    if let Some(marker) = parse_marker(line)
        && !marker.empty
        && (matches!(marker.kind, MarkerKind::Bullet(_)) || marker.start == 1)
    {
        return true;
    }
    if !article {
        return false;
    }
    if CONTAINER_OPEN_RE.is_match(line)
        || CONTAINER_CLOSE_RE.is_match(line)
        || TABS_OPEN_RE.is_match(line)
        || FRIEND_LINKS_RE.is_match(line.trim())
    {
        return true;
    }
    HTML_BLOCK_RE
        .captures(line)
        .is_some_and(|caps| match caps.get(1) {
            Some(tag) => BLOCK_TAGS.contains(&tag.as_str().to_ascii_lowercase().as_str()),
            None => true,
        })
}

fn paragraph(lines: &[String], i: usize, ctx: &mut RenderContext<'_>) -> Step {
    let mut text: Vec<&str> = Vec::new();
    let mut j = i;
    while j < lines.len() {
        let line = lines[j].as_str();
        if is_blank(line) {
            break;
        }
        if j > i {
            if let Some(caps) = SETEXT_RE.captures(line) {
                let level = if caps[1].starts_with('=') { 1 } else { 2 };
                let content = parse_inlines(text.join("\n").trim(), ctx);
                return Step::block(Block::Heading { level, content }, j + 1);
            }
            if interrupts_paragraph(lines, j, ctx.dialect) {
                break;
            }
        }
        text.push(line.trim_start());
        j += 1;
    }

    let inlines = parse_inlines(text.join("\n").trim_end(), ctx);
    if inlines.is_empty() {
        return Step::skip(j);
    }
    if ctx.is_article()
        && let [
            Inline::Link {
                kind: LinkKind::Autolink,
                dest,
                children,
                ..
            },
        ] = inlines.as_slice()
        && is_http_url(dest)
    {
        return Step::block(
            Block::RichLink {
                url: dest.clone(),
                label: plain_text(children),
            },
            j,
        );
    }
    Step::block(Block::Paragraph(inlines), j)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emoji::NoEmoji;
    use crate::grammar::parse_document;
    use crate::refs::ReferenceTable;

    fn parse(src: &str) -> Vec<Block> {
        let refs = ReferenceTable::build(src);
        let mut ctx = RenderContext::new(Dialect::Article, &refs, &NoEmoji);
        parse_document(src, &mut ctx)
    }

    fn text(s: &str) -> Inline {
        Inline::Text(s.into())
    }

    #[test]
    fn headings_and_paragraphs() {
        let blocks = parse("# Title #\n\nBody line\nwraps\n\nSetext\n---\n");
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 1,
                    content: vec![text("Title")]
                },
                Block::Paragraph(vec![text("Body line"), Inline::SoftBreak, text("wraps")]),
                Block::Heading {
                    level: 2,
                    content: vec![text("Setext")]
                },
            ]
        );
    }

    #[test]
    fn alert_beats_block_quote() {
        let blocks = parse("> [!warning]\n> Mind the gap\n>\n> Really\n\nafter\n");
        let Block::Callout { kind, body } = &blocks[0] else {
            panic!("expected callout, got {:?}", blocks[0]);
        };
        assert_eq!(*kind, CalloutKind::Warning);
        assert_eq!(body.len(), 2);
        assert_eq!(blocks[1], Block::Paragraph(vec![text("after")]));
    }

    #[test]
    fn plain_quote_stays_a_quote() {
        let blocks = parse("> just a quote\nlazy\n");
        assert_eq!(
            blocks,
            vec![Block::BlockQuote(vec![Block::Paragraph(vec![
                text("just a quote"),
                Inline::SoftBreak,
                text("lazy"),
            ])])]
        );
    }

    #[test]
    fn containers_nest_and_map_kinds() {
        let blocks = parse(":::info\nouter\n:::grid {cols=3}\ninner\n:::\n:::\n\n:::sparkles\nx\n:::\n");
        let Block::Container { kind, body } = &blocks[0] else {
            panic!("expected container");
        };
        assert_eq!(*kind, ContainerKind::Callout(CalloutKind::Note));
        assert!(matches!(
            body[1],
            Block::Container {
                kind: ContainerKind::Grid { columns: Some(3) },
                ..
            }
        ));
        assert!(matches!(
            &blocks[1],
            Block::Container { kind: ContainerKind::Other(name), .. } if name == "sparkles"
        ));
    }

    #[test]
    fn banner_kind_comes_from_params() {
        let blocks = parse(":::banner {type=\"danger\"}\nheads up\n:::\n");
        assert!(matches!(
            blocks[0],
            Block::Container {
                kind: ContainerKind::Banner(CalloutKind::Caution),
                ..
            }
        ));
    }

    #[test]
    fn container_close_inside_code_is_ignored() {
        let blocks = parse(":::note\n```\n:::\n```\n:::\n");
        let Block::Container { body, .. } = &blocks[0] else {
            panic!("expected container");
        };
        assert!(matches!(&body[0], Block::Code(c) if c.code == ":::\n"));
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn tabs_collect_labels_and_bodies() {
        let blocks = parse("<Tabs>\n<Tab label=\"npm\">\n\n`npm i`\n\n</Tab>\n<Tab label='yarn'>yarn add</Tab>\n</Tabs>\n");
        let Block::Tabs { id, tabs } = &blocks[0] else {
            panic!("expected tabs, got {blocks:?}");
        };
        assert!(id.starts_with("tabs-"));
        let labels: Vec<_> = tabs.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, ["npm", "yarn"]);
        assert_eq!(
            tabs[1].body,
            vec![Block::Paragraph(vec![text("yarn add")])]
        );
    }

    #[test]
    fn fenced_code_keeps_lang_and_meta() {
        let blocks = parse("```ts title=\"a.ts\" {2}\nlet a = 1;\n  let b;\n```\n");
        assert_eq!(
            blocks,
            vec![Block::Code(CodeBlock {
                lang: Some("ts".into()),
                meta: "title=\"a.ts\" {2}".into(),
                code: "let a = 1;\n  let b;\n".into(),
            })]
        );
    }

    #[test]
    fn embed_blocks_need_trusted_targets() {
        let blocks = parse("```embed\nhttps://youtu.be/abc123\n```\n\n```embed\nhttps://evil.example/\n```\n");
        assert!(matches!(blocks[0], Block::Embed(_)));
        assert!(matches!(&blocks[1], Block::Code(c) if c.lang.as_deref() == Some("embed")));
    }

    #[test]
    fn excalidraw_blocks_become_markers() {
        let blocks = parse("```excalidraw\n/drawings/flow.excalidraw\n```\n");
        assert_eq!(
            blocks,
            vec![Block::Excalidraw {
                src: "/drawings/flow.excalidraw".into()
            }]
        );
    }

    #[test]
    fn display_math_blocks() {
        assert_eq!(
            parse("$$\nx^2\n$$\n"),
            vec![Block::MathDisplay("x^2".into())]
        );
        assert_eq!(parse("$$ a+b $$"), vec![Block::MathDisplay("a+b".into())]);
    }

    #[test]
    fn lists_tight_loose_and_tasks() {
        let blocks = parse("- [x] done\n- [ ] todo\n\n1. one\n\n2. two\n");
        let Block::List(bullets) = &blocks[0] else {
            panic!("expected list");
        };
        assert!(bullets.tight);
        assert_eq!(bullets.ordered, None);
        assert_eq!(bullets.items[0].task, Some(true));
        assert_eq!(bullets.items[1].task, Some(false));
        let Block::List(ordered) = &blocks[1] else {
            panic!("expected ordered list");
        };
        assert!(!ordered.tight);
        assert_eq!(ordered.ordered, Some(1));
        assert_eq!(ordered.items.len(), 2);
    }

    #[test]
    fn nested_lists() {
        let blocks = parse("- a\n  - b\n- c\n");
        let Block::List(list) = &blocks[0] else {
            panic!("expected list");
        };
        assert_eq!(list.items.len(), 2);
        assert!(matches!(list.items[0].body[1], Block::List(_)));
    }

    #[test]
    fn tables_with_alignment() {
        let blocks = parse("| a | b | c |\n|:--|:-:|--:|\n| 1 | 2 |\n");
        let Block::Table(table) = &blocks[0] else {
            panic!("expected table");
        };
        assert_eq!(
            table.alignments,
            [Alignment::Left, Alignment::Center, Alignment::Right]
        );
        assert_eq!(table.rows[0].len(), 3);
        assert!(table.rows[0][2].is_empty());
    }

    #[test]
    fn definitions_produce_no_blocks() {
        let blocks = parse("[x]: https://example.com\n\n[^n]: note body\n\ntext\n");
        assert_eq!(blocks, vec![Block::Paragraph(vec![text("text")])]);
    }

    #[test]
    fn lone_bare_link_becomes_rich_link() {
        let blocks = parse("https://example.com/post\n\nsee https://example.com/post\n");
        assert_eq!(
            blocks[0],
            Block::RichLink {
                url: "https://example.com/post".into(),
                label: "https://example.com/post".into()
            }
        );
        assert!(matches!(blocks[1], Block::Paragraph(_)));
    }

    #[test]
    fn friend_link_placeholder_is_recognised() {
        let blocks = parse("<div class=\"friend-links-placeholder\" data-friend-links=\"W10=\"></div>\n");
        assert_eq!(
            blocks,
            vec![Block::FriendLinks {
                payload: "W10=".into()
            }]
        );
    }

    #[test]
    fn comment_dialect_has_no_html_blocks() {
        let refs = ReferenceTable::default();
        let mut ctx = RenderContext::new(Dialect::Comment, &refs, &NoEmoji);
        let blocks = parse_document("<div>hi</div>\n", &mut ctx);
        assert!(matches!(blocks[0], Block::Paragraph(_)));
    }

    #[test]
    fn leading_tabs_expand_to_code() {
        assert!(matches!(parse("\tcode\n")[0], Block::Code(_)));
    }
}
