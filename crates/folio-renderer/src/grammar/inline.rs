use std::sync::LazyLock;

use regex::Regex;

use super::{Inline, LinkKind, MentionProvider, plain_text};
use crate::context::{Dialect, RenderContext};
use crate::utils::decode_entity;

/// Inline rules, in the order they are tried at each position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineRule {
    Escape,
    Entity,
    CodeSpan,
    Autolink,
    InlineHtml,
    FootnoteRef,
    Image,
    Link,
    Math,
    Emphasis,
    Strikethrough,
    Mark,
    Insert,
    Spoiler,
    Mention,
    Emoji,
    BareUrl,
}

const ARTICLE_RULES: &[InlineRule] = &[
    InlineRule::Escape,
    InlineRule::Entity,
    InlineRule::CodeSpan,
    InlineRule::Autolink,
    InlineRule::InlineHtml,
    InlineRule::FootnoteRef,
    InlineRule::Image,
    InlineRule::Link,
    InlineRule::Math,
    InlineRule::Emphasis,
    InlineRule::Strikethrough,
    InlineRule::Mark,
    InlineRule::Insert,
    InlineRule::Spoiler,
    InlineRule::Mention,
    InlineRule::Emoji,
    InlineRule::BareUrl,
];

const COMMENT_RULES: &[InlineRule] = &[
    InlineRule::Escape,
    InlineRule::Entity,
    InlineRule::CodeSpan,
    InlineRule::Autolink,
    InlineRule::FootnoteRef,
    InlineRule::Image,
    InlineRule::Link,
    InlineRule::Math,
    InlineRule::Emphasis,
    InlineRule::Strikethrough,
    InlineRule::Mark,
    InlineRule::Insert,
    InlineRule::Spoiler,
    InlineRule::Mention,
    InlineRule::Emoji,
    InlineRule::BareUrl,
];

impl InlineRule {
    pub fn for_dialect(dialect: Dialect) -> &'static [InlineRule] {
        match dialect {
            Dialect::Article => ARTICLE_RULES,
            Dialect::Comment => COMMENT_RULES,
        }
    }

    /// Rules that would nest an anchor inside link text.
    fn makes_link(self) -> bool {
        matches!(
            self,
            InlineRule::Autolink | InlineRule::Link | InlineRule::Mention | InlineRule::BareUrl
        )
    }

    fn apply(self, p: &InlineParser<'_, '_, '_>, pos: usize) -> Option<(Emit, usize)> {
        match self {
            InlineRule::Escape => p.escape(pos),
            InlineRule::Entity => p.entity(pos),
            InlineRule::CodeSpan => p.code_span(pos),
            InlineRule::Autolink => p.autolink(pos),
            InlineRule::InlineHtml => p.inline_html(pos),
            InlineRule::FootnoteRef => p.footnote_ref(pos),
            InlineRule::Image => p.image(pos),
            InlineRule::Link => p.link(pos),
            InlineRule::Math => p.math(pos),
            InlineRule::Emphasis => p.emphasis(pos),
            InlineRule::Strikethrough => p.paired(pos, "~~", Inline::Strikethrough),
            InlineRule::Mark => p.paired(pos, "==", Inline::Mark),
            InlineRule::Insert => p.paired(pos, "++", Inline::Insert),
            InlineRule::Spoiler => p.paired(pos, "||", Inline::Spoiler),
            InlineRule::Mention => p.mention(pos),
            InlineRule::Emoji => p.emoji(pos),
            InlineRule::BareUrl => p.bare_url(pos),
        }
    }
}

enum Emit {
    Node(Inline),
    Text(String),
    /// Consumed without output.
    Nothing,
}

static AUTOLINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<([A-Za-z][A-Za-z0-9+.\-]{1,31}:[^<>\s\x00-\x1f]*)>").unwrap()
});
static EMAIL_AUTOLINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^<([A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*)>",
    )
    .unwrap()
});
static INLINE_HTML_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?s:<!--.*?-->|</[A-Za-z][A-Za-z0-9-]*\s*>|<[A-Za-z][A-Za-z0-9-]*(?:\s+[A-Za-z_:][\w:.\-]*(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*\s*/?>)"#,
    )
    .unwrap()
});
static FOOTNOTE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\^([^\]\s]+)\]").unwrap());
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[([^\]\n]+)\])?\{([A-Za-z]{2})@([^}\s]*)\}").unwrap()
});
static MENTION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]{0,63}$").unwrap());
static EMOJI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^::([A-Za-z0-9_-]+):([A-Za-z0-9_+-]+)::").unwrap());
static BARE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?://|www\.)[^\s<>]+").unwrap());

/// Parse inline content of one block.
pub fn parse_inlines(text: &str, ctx: &RenderContext<'_>) -> Vec<Inline> {
    InlineParser::new(text, ctx, false).run()
}

struct InlineParser<'s, 'c, 'r> {
    src: &'s str,
    ctx: &'c RenderContext<'r>,
    in_link: bool,
}

impl<'s, 'c, 'r> InlineParser<'s, 'c, 'r> {
    fn new(src: &'s str, ctx: &'c RenderContext<'r>, in_link: bool) -> Self {
        Self { src, ctx, in_link }
    }

    fn nested(&self, text: &str, in_link: bool) -> Vec<Inline> {
        InlineParser::new(text, self.ctx, self.in_link || in_link).run()
    }

    fn run(&self) -> Vec<Inline> {
        let rules = InlineRule::for_dialect(self.ctx.dialect);
        let mut out = Vec::new();
        let mut buf = String::new();
        let mut pos = 0;

        while let Some(c) = self.src[pos..].chars().next() {
            if c == '\n' {
                let trimmed = buf.trim_end_matches([' ', '\t']);
                let hard = buf.len() - trimmed.len() >= 2;
                buf.truncate(trimmed.len());
                flush(&mut buf, &mut out);
                out.push(if hard {
                    Inline::HardBreak
                } else {
                    Inline::SoftBreak
                });
                pos += 1;
                while self.src[pos..].starts_with([' ', '\t']) {
                    pos += 1;
                }
                continue;
            }

            let matched = rules
                .iter()
                .filter(|rule| !(self.in_link && rule.makes_link()))
                .find_map(|rule| rule.apply(self, pos));
            match matched {
                Some((emit, end)) => {
                    pos = end.max(pos + 1);
                    match emit {
                        Emit::Text(text) => buf.push_str(&text),
                        Emit::Node(Inline::HardBreak) => {
                            buf.truncate(buf.trim_end_matches([' ', '\t']).len());
                            flush(&mut buf, &mut out);
                            out.push(Inline::HardBreak);
                            while self.src[pos..].starts_with([' ', '\t']) {
                                pos += 1;
                            }
                        }
                        Emit::Node(node) => {
                            flush(&mut buf, &mut out);
                            out.push(node);
                        }
                        Emit::Nothing => {}
                    }
                }
                None => {
                    buf.push(c);
                    pos += c.len_utf8();
                }
            }
        }
        flush(&mut buf, &mut out);
        out
    }

    fn rest(&self, pos: usize) -> &'s str {
        &self.src[pos..]
    }

    fn prev_char(&self, pos: usize) -> Option<char> {
        self.src[..pos].chars().next_back()
    }

    fn escape(&self, pos: usize) -> Option<(Emit, usize)> {
        let mut chars = self.rest(pos).chars();
        if chars.next()? != '\\' {
            return None;
        }
        match chars.next()? {
            '\n' => Some((Emit::Node(Inline::HardBreak), pos + 2)),
            c if c.is_ascii_punctuation() => Some((Emit::Text(c.to_string()), pos + 2)),
            _ => None,
        }
    }

    fn entity(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with('&') {
            return None;
        }
        let (text, used) = decode_entity(rest)?;
        Some((Emit::Text(text), pos + used))
    }

    fn code_span(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        let run = rest.bytes().take_while(|b| *b == b'`').count();
        if run == 0 {
            return None;
        }
        match find_backtick_close(self.src, pos + run, run) {
            Some(close) => {
                let mut code = self.src[pos + run..close].replace('\n', " ");
                if code.len() >= 2
                    && code.starts_with(' ')
                    && code.ends_with(' ')
                    && !code.trim().is_empty()
                {
                    code = code[1..code.len() - 1].to_owned();
                }
                Some((Emit::Node(Inline::Code(code)), close + run))
            }
            None => Some((Emit::Text("`".repeat(run)), pos + run)),
        }
    }

    fn autolink(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with('<') {
            return None;
        }
        if let Some(caps) = AUTOLINK_RE.captures(rest) {
            let url = caps[1].to_owned();
            let end = pos + caps[0].len();
            return Some((Emit::Node(autolink(url.clone(), url)), end));
        }
        let caps = EMAIL_AUTOLINK_RE.captures(rest)?;
        let email = caps[1].to_owned();
        Some((
            Emit::Node(autolink(format!("mailto:{email}"), email)),
            pos + caps[0].len(),
        ))
    }

    fn inline_html(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with('<') {
            return None;
        }
        let m = INLINE_HTML_RE.find(rest)?;
        Some((Emit::Node(Inline::Html(m.as_str().to_owned())), pos + m.end()))
    }

    fn footnote_ref(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with("[^") {
            return None;
        }
        let caps = FOOTNOTE_REF_RE.captures(rest)?;
        Some((
            Emit::Node(Inline::FootnoteRef(caps[1].to_owned())),
            pos + caps[0].len(),
        ))
    }

    fn image(&self, pos: usize) -> Option<(Emit, usize)> {
        if !self.rest(pos).starts_with("![") {
            return None;
        }
        let parts = self.link_parts(pos + 1)?;
        let alt = plain_text(&self.nested(parts.text, true));
        Some((
            Emit::Node(Inline::Image {
                src: parts.dest,
                alt,
                title: parts.title,
            }),
            parts.end,
        ))
    }

    fn link(&self, pos: usize) -> Option<(Emit, usize)> {
        if !self.rest(pos).starts_with('[') {
            return None;
        }
        let parts = self.link_parts(pos)?;
        Some((
            Emit::Node(Inline::Link {
                kind: parts.kind,
                dest: parts.dest,
                title: parts.title,
                children: self.nested(parts.text, true),
            }),
            parts.end,
        ))
    }

    /// Inline, full, collapsed and shortcut link forms starting at the `[`.
    fn link_parts(&self, open: usize) -> Option<LinkParts<'s>> {
        let close = find_bracket_close(self.src, open)?;
        let text = &self.src[open + 1..close];
        let after = &self.src[close + 1..];

        if let Some(inner) = after.strip_prefix('(')
            && let Some((dest, title, used)) = parse_destination(inner)
        {
            return Some(LinkParts {
                text,
                dest,
                title,
                kind: LinkKind::Inline,
                end: close + 2 + used,
            });
        }

        let (label, end) = match after.strip_prefix('[') {
            Some(inner) => {
                let label_end = inner.find(']')?;
                let label = &inner[..label_end];
                let label = if label.trim().is_empty() { text } else { label };
                (label, close + 2 + label_end + 1)
            }
            None => (text, close + 1),
        };
        let def = self.ctx.refs.get(label)?;
        Some(LinkParts {
            text,
            dest: def.target.clone(),
            title: def.title.clone(),
            kind: LinkKind::Reference,
            end,
        })
    }

    fn math(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with('$') || rest.starts_with("$$") {
            return None;
        }
        let first = rest[1..].chars().next()?;
        if first.is_whitespace() {
            return None;
        }
        let bytes = self.src.as_bytes();
        let mut i = pos + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'$' => {
                    let before = self.prev_char(i).is_some_and(|c| !c.is_whitespace());
                    let digit_after = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
                    if before && !digit_after && i > pos + 1 {
                        let tex = self.src[pos + 1..i].to_owned();
                        return Some((Emit::Node(Inline::Math(tex)), i + 1));
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        None
    }

    fn emphasis(&self, pos: usize) -> Option<(Emit, usize)> {
        let bytes = self.src.as_bytes();
        let d = *bytes.get(pos)?;
        if d != b'*' && d != b'_' {
            return None;
        }
        let run = bytes[pos..].iter().take_while(|b| **b == d).count();
        let next = self.src[pos + run..].chars().next();
        if next.is_none_or(char::is_whitespace) {
            return None;
        }
        if d == b'_' && self.prev_char(pos).is_some_and(char::is_alphanumeric) {
            return None;
        }
        if run > 3 {
            return Some((Emit::Text(self.src[pos..pos + run].to_owned()), pos + run));
        }
        let Some(close) = self.find_delim_close(pos + run, d, run) else {
            // retry with a shorter opener one character on
            return Some((Emit::Text((d as char).to_string()), pos + 1));
        };
        let children = self.nested(&self.src[pos + run..close], false);
        let node = match run {
            1 => Inline::Emphasis(children),
            2 => Inline::Strong(children),
            _ => Inline::Emphasis(vec![Inline::Strong(children)]),
        };
        Some((Emit::Node(node), close + run))
    }

    /// A closing run of exactly `len` delimiters, right-flanking.
    fn find_delim_close(&self, from: usize, d: u8, len: usize) -> Option<usize> {
        let bytes = self.src.as_bytes();
        let mut i = from;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'`' => i = skip_code_span(self.src, i),
                c if c == d => {
                    let run = bytes[i..].iter().take_while(|b| **b == d).count();
                    let right_flanking = self.prev_char(i).is_some_and(|c| !c.is_whitespace());
                    let after = self.src[i + run..].chars().next();
                    let intraword = d == b'_' && after.is_some_and(char::is_alphanumeric);
                    if run == len && i > from && right_flanking && !intraword {
                        return Some(i);
                    }
                    i += run;
                }
                _ => i += 1,
            }
        }
        None
    }

    /// Two-character symmetric delimiters: `~~`, `==`, `++`, `||`.
    fn paired(
        &self,
        pos: usize,
        token: &str,
        wrap: fn(Vec<Inline>) -> Inline,
    ) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with(token) {
            return None;
        }
        let repeat = token.as_bytes()[0];
        let next = rest[token.len()..].chars().next();
        if next.is_none_or(|c| c.is_whitespace() || c as u32 == repeat as u32) {
            return None;
        }
        let bytes = self.src.as_bytes();
        let mut i = pos + token.len();
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'`' => i = skip_code_span(self.src, i),
                _ if bytes[i..].starts_with(token.as_bytes()) => {
                    if self.prev_char(i).is_some_and(|c| !c.is_whitespace()) {
                        let children = self.nested(&self.src[pos + token.len()..i], false);
                        return Some((Emit::Node(wrap(children)), i + token.len()));
                    }
                    i += token.len();
                }
                _ => i += 1,
            }
        }
        None
    }

    fn mention(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with(['[', '{']) {
            return None;
        }
        let caps = MENTION_RE.captures(rest)?;
        let end = pos + caps[0].len();
        let name = &caps[3];
        let Some(provider) = MentionProvider::parse(&caps[2]) else {
            tracing::debug!(prefix = &caps[2], "unknown mention provider");
            return Some((Emit::Nothing, end));
        };
        if !MENTION_NAME_RE.is_match(name) {
            return Some((Emit::Nothing, end));
        }
        Some((
            Emit::Node(Inline::Mention {
                provider,
                name: name.to_owned(),
                label: caps.get(1).map(|m| m.as_str().trim().to_owned()),
            }),
            end,
        ))
    }

    fn emoji(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with("::") {
            return None;
        }
        let caps = EMOJI_RE.captures(rest)?;
        let src = self.ctx.emoji.resolve(&caps[1], &caps[2])?;
        Some((
            Emit::Node(Inline::Emoji {
                src,
                alt: format!(":{}:", &caps[2]),
            }),
            pos + caps[0].len(),
        ))
    }

    fn bare_url(&self, pos: usize) -> Option<(Emit, usize)> {
        let rest = self.rest(pos);
        if !rest.starts_with(['h', 'w']) {
            return None;
        }
        if self
            .prev_char(pos)
            .is_some_and(|c| !c.is_whitespace() && !matches!(c, '(' | '*' | '_' | '~' | '"' | '\''))
        {
            return None;
        }
        let m = BARE_URL_RE.find(rest)?;
        let url = trim_url_tail(m.as_str());
        if url.len() <= "https://".len() || (url.starts_with("www.") && !url[4..].contains('.')) {
            return None;
        }
        let dest = if url.starts_with("www.") {
            format!("http://{url}")
        } else {
            url.to_owned()
        };
        Some((
            Emit::Node(autolink(dest, url.to_owned())),
            pos + url.len(),
        ))
    }
}

struct LinkParts<'s> {
    text: &'s str,
    dest: String,
    title: Option<String>,
    kind: LinkKind,
    end: usize,
}

fn autolink(dest: String, text: String) -> Inline {
    Inline::Link {
        kind: LinkKind::Autolink,
        dest,
        title: None,
        children: vec![Inline::Text(text)],
    }
}

fn flush(buf: &mut String, out: &mut Vec<Inline>) {
    if buf.is_empty() {
        return;
    }
    let text = std::mem::take(buf);
    if let Some(Inline::Text(prev)) = out.last_mut() {
        prev.push_str(&text);
    } else {
        out.push(Inline::Text(text));
    }
}

/// Drop trailing punctuation and unbalanced closing parens from a bare URL.
fn trim_url_tail(url: &str) -> &str {
    let mut end = url.len();
    loop {
        let tail = &url[..end];
        match tail.chars().next_back() {
            Some('?' | '!' | '.' | ',' | ':' | ';' | '*' | '_' | '~' | '\'' | '"') => end -= 1,
            Some(')') if tail.matches(')').count() > tail.matches('(').count() => end -= 1,
            _ => return tail,
        }
    }
}

fn find_backtick_close(src: &str, from: usize, run: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            let n = bytes[i..].iter().take_while(|b| **b == b'`').count();
            if n == run {
                return Some(i);
            }
            i += n;
        } else {
            i += 1;
        }
    }
    None
}

/// Index just past the code span starting at `i`, or past the backtick run
/// when it has no closer.
fn skip_code_span(src: &str, i: usize) -> usize {
    let run = src.as_bytes()[i..].iter().take_while(|b| **b == b'`').count();
    match find_backtick_close(src, i + run, run) {
        Some(close) => close + run,
        None => i + run,
    }
}

fn find_bracket_close(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => i = skip_code_span(src, i),
            b'[' => {
                depth += 1;
                i += 1;
            }
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(&next) = chars.peek()
            && next.is_ascii_punctuation()
        {
            out.push(next);
            chars.next();
            continue;
        }
        out.push(c);
    }
    crate::utils::decode_entities(&out)
}

/// Parse `dest "title")` after an opening paren. Returns the destination,
/// title and bytes consumed including the closing paren.
fn parse_destination(s: &str) -> Option<(String, Option<String>, usize)> {
    let bytes = s.as_bytes();
    let skip_ws = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };
    let mut i = skip_ws(0);

    let dest = if bytes.get(i) == Some(&b'<') {
        let end = s[i + 1..].find(['>', '\n', '<'])? + i + 1;
        if bytes[end] != b'>' {
            return None;
        }
        let dest = &s[i + 1..end];
        i = end + 1;
        dest
    } else {
        let start = i;
        let mut depth = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'(' => {
                    depth += 1;
                    i += 1;
                }
                b')' if depth == 0 => break,
                b')' => {
                    depth -= 1;
                    i += 1;
                }
                b if b.is_ascii_whitespace() || b.is_ascii_control() => break,
                _ => i += 1,
            }
        }
        i = i.min(bytes.len());
        &s[start..i]
    };

    let after_dest = i;
    i = skip_ws(i);
    let mut title = None;
    if i > after_dest || dest.is_empty() {
        let close = match bytes.get(i) {
            Some(b'"') => Some(b'"'),
            Some(b'\'') => Some(b'\''),
            Some(b'(') => Some(b')'),
            _ => None,
        };
        if let Some(close) = close {
            let end = s[i + 1..].find(close as char)? + i + 1;
            title = Some(unescape(&s[i + 1..end]));
            i = skip_ws(end + 1);
        }
    }
    if bytes.get(i) != Some(&b')') {
        return None;
    }
    Some((unescape(dest), title, i + 1))
}
