//! Syntax highlighting for code placeholders.
//!
//! Each token carries both theme colours as CSS custom properties
//! (`--hl-light`, `--hl-dark`), so one parse serves both colour schemes and
//! the page switches with [`theme_css`] alone.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use syntect::highlighting::{Color, Highlighter, Theme, ThemeSet};
use syntect::parsing::{ParseState, ScopeStack, SyntaxReference, SyntaxSet};

use crate::utils::{escape, escape_into};

pub const LIGHT_THEME: &str = "InspiredGitHub";
pub const DARK_THEME: &str = "base16-ocean.dark";

static SYNTAXES: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);

static THEMES: LazyLock<(Theme, Theme)> = LazyLock::new(|| {
    let mut set = ThemeSet::load_defaults();
    let light = set.themes.remove(LIGHT_THEME).unwrap_or_default();
    let dark = set.themes.remove(DARK_THEME).unwrap_or_default();
    (light, dark)
});

/// Canonical language name for a fence tag. Unknown tags are plain text.
pub fn normalize_language(tag: Option<&str>) -> &'static str {
    let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) else {
        return "text";
    };
    match tag.to_ascii_lowercase().as_str() {
        "js" | "javascript" | "mjs" | "cjs" | "jsx" | "node" => "javascript",
        "ts" | "typescript" | "tsx" | "mts" => "typescript",
        "rs" | "rust" => "rust",
        "py" | "python" | "python3" => "python",
        "sh" | "bash" | "shell" | "zsh" | "console" | "shellsession" => "bash",
        "yml" | "yaml" => "yaml",
        "md" | "markdown" | "mdx" => "markdown",
        "rb" | "ruby" => "ruby",
        "c++" | "cpp" | "cxx" | "hpp" => "cpp",
        "c" | "h" => "c",
        "cs" | "csharp" | "c#" => "csharp",
        "go" | "golang" => "go",
        "json" | "jsonc" | "json5" => "json",
        "html" | "htm" | "xhtml" | "vue" | "svelte" => "html",
        "xml" | "svg" => "xml",
        "css" | "scss" | "less" => "css",
        "toml" => "toml",
        "sql" | "postgres" | "mysql" => "sql",
        "java" => "java",
        "kt" | "kotlin" => "kotlin",
        "swift" => "swift",
        "php" => "php",
        "lua" => "lua",
        "hs" | "haskell" => "haskell",
        "diff" | "patch" => "diff",
        "dockerfile" | "docker" => "dockerfile",
        "makefile" | "make" => "makefile",
        _ => "text",
    }
}

/// Syntax for a canonical language, falling back to plain text.
fn syntax_for(language: &str) -> &'static SyntaxReference {
    let token = match language {
        // The bundled syntaxes have no TypeScript grammar.
        "javascript" | "typescript" => "js",
        "python" => "py",
        "rust" => "rs",
        "bash" => "sh",
        "markdown" => "md",
        "ruby" => "rb",
        "csharp" => "cs",
        "haskell" => "hs",
        other => other,
    };
    SYNTAXES
        .find_syntax_by_token(token)
        .unwrap_or_else(|| SYNTAXES.find_syntax_plain_text())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CodeMeta {
    pub title: Option<String>,
    /// 1-based line numbers to emphasise.
    pub lines: BTreeSet<usize>,
    pub words: Vec<String>,
    pub diff: bool,
}

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:title|filename)=(?:"([^"]*)"|'([^']*)'|(\S+))"#).unwrap()
});
static RANGES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([\d,\s-]+)\}").unwrap());
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/([^/\s][^/]*)/").unwrap());
static NOTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(?://|#|--|/\*|<!--|;)?\s*\[!code (\+\+|--|highlight|hl)\]\s*(?:\*/|-->)?\s*$")
        .unwrap()
});

/// Parse the text after the language tag of a fence.
///
/// Understands `title="…"`/`filename="…"`, `{1,3-5}` line ranges, `/word/`
/// highlights and a bare `diff` flag.
pub fn parse_meta(meta: &str) -> CodeMeta {
    let mut out = CodeMeta::default();
    let mut rest = meta.to_owned();
    if let Some(cap) = TITLE_RE.captures(meta) {
        out.title = cap
            .get(1)
            .or(cap.get(2))
            .or(cap.get(3))
            .map(|m| m.as_str().to_owned())
            .filter(|t| !t.is_empty());
        rest = rest.replace(&cap[0], " ");
    }
    for cap in RANGES_RE.captures_iter(&rest) {
        for part in cap[1].split(',') {
            let part = part.trim();
            let (start, end) = match part.split_once('-') {
                Some((a, b)) => (a.trim().parse::<usize>(), b.trim().parse::<usize>()),
                None => (part.parse::<usize>(), part.parse::<usize>()),
            };
            if let (Ok(start), Ok(end)) = (start, end)
                && start >= 1
                && start <= end
                && end - start < 10_000
            {
                out.lines.extend(start..=end);
            }
        }
    }
    let rest = RANGES_RE.replace_all(&rest, " ");
    out.words = WORD_RE
        .captures_iter(&rest)
        .map(|c| c[1].to_owned())
        .collect();
    let rest = WORD_RE.replace_all(&rest, " ");
    out.diff = rest.split_whitespace().any(|w| w == "diff");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Add,
    Remove,
    Highlight,
}

struct Line {
    text: String,
    marks: Vec<Mark>,
}

/// Strip inline notations and diff prefixes, returning the clean lines.
fn prepare_lines(code: &str, language: &str, meta: &CodeMeta) -> Vec<Line> {
    let code = code.strip_suffix('\n').unwrap_or(code);
    code.split('\n')
        .enumerate()
        .map(|(idx, raw)| {
            let raw = raw.strip_suffix('\r').unwrap_or(raw);
            let mut marks = Vec::new();
            let mut text = raw.to_owned();
            if let Some(cap) = NOTATION_RE.captures(raw) {
                marks.push(match &cap[1] {
                    "++" => Mark::Add,
                    "--" => Mark::Remove,
                    _ => Mark::Highlight,
                });
                text.truncate(cap.get(0).map_or(raw.len(), |m| m.start()));
            }
            if language == "diff" {
                if raw.starts_with('+') && !raw.starts_with("+++") {
                    marks.push(Mark::Add);
                } else if raw.starts_with('-') && !raw.starts_with("---") {
                    marks.push(Mark::Remove);
                }
            } else if meta.diff {
                if let Some(stripped) = text.strip_prefix('+') {
                    marks.push(Mark::Add);
                    text = stripped.to_owned();
                } else if let Some(stripped) = text.strip_prefix('-') {
                    marks.push(Mark::Remove);
                    text = stripped.to_owned();
                }
            }
            if meta.lines.contains(&(idx + 1)) {
                marks.push(Mark::Highlight);
            }
            Line { text, marks }
        })
        .collect()
}

fn hex(c: Color) -> String {
    format!("#{:02x}{:02x}{:02x}", c.r, c.g, c.b)
}

/// Escape `text`, wrapping every occurrence of a highlighted word.
fn push_text(out: &mut String, text: &str, words: &[String]) {
    let next = words
        .iter()
        .filter_map(|w| text.find(w.as_str()).map(|i| (i, w.len())))
        .min_by_key(|(i, len)| (*i, usize::MAX - len));
    match next {
        Some((idx, len)) => {
            escape_into(out, &text[..idx]);
            out.push_str(r#"<mark class="code-word">"#);
            escape_into(out, &text[idx..idx + len]);
            out.push_str("</mark>");
            push_text(out, &text[idx + len..], words);
        }
        None => escape_into(out, text),
    }
}

struct LineHighlighter<'a> {
    state: ParseState,
    stack: ScopeStack,
    light: Highlighter<'a>,
    dark: Highlighter<'a>,
}

impl<'a> LineHighlighter<'a> {
    fn new(syntax: &SyntaxReference, themes: &'a (Theme, Theme)) -> Self {
        Self {
            state: ParseState::new(syntax),
            stack: ScopeStack::new(),
            light: Highlighter::new(&themes.0),
            dark: Highlighter::new(&themes.1),
        }
    }

    fn style(&self) -> String {
        let scopes = self.stack.as_slice();
        format!(
            "--hl-light:{};--hl-dark:{}",
            hex(self.light.style_for_stack(scopes).foreground),
            hex(self.dark.style_for_stack(scopes).foreground)
        )
    }

    fn flush(out: &mut String, style: &str, text: &str, words: &[String]) {
        if text.is_empty() {
            return;
        }
        if text.trim().is_empty() {
            escape_into(out, text);
            return;
        }
        out.push_str(r#"<span style=""#);
        out.push_str(style);
        out.push_str(r#"">"#);
        push_text(out, text, words);
        out.push_str("</span>");
    }

    /// Highlight one line (given with its trailing newline) into `out`.
    fn line(&mut self, line: &str, words: &[String], out: &mut String) -> Result<(), String> {
        let ops = self
            .state
            .parse_line(line, &SYNTAXES)
            .map_err(|e| e.to_string())?;
        let visible = line.trim_end_matches(['\n', '\r']);
        let mut pos = 0;
        let mut style = self.style();
        let mut run = String::new();
        for (idx, op) in ops {
            let idx = idx.min(visible.len());
            if idx > pos {
                run.push_str(&visible[pos..idx]);
                pos = idx;
            }
            self.stack.apply(&op).map_err(|e| format!("{e:?}"))?;
            let next = self.style();
            if next != style {
                Self::flush(out, &style, &run, words);
                run.clear();
                style = next;
            }
        }
        run.push_str(&visible[pos..]);
        Self::flush(out, &style, &run, words);
        Ok(())
    }
}

fn highlight_lines(lines: &[Line], language: &str, words: &[String]) -> Result<Vec<String>, String> {
    let mut highlighter = LineHighlighter::new(syntax_for(language), &THEMES);
    let mut rendered = Vec::with_capacity(lines.len());
    for line in lines {
        let mut out = String::new();
        highlighter.line(&format!("{}\n", line.text), words, &mut out)?;
        rendered.push(out);
    }
    Ok(rendered)
}

fn plain_lines(lines: &[Line], words: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            let mut out = String::new();
            push_text(&mut out, &line.text, words);
            out
        })
        .collect()
}

/// Highlighted code inside its frame: caption, language label and copy button.
pub fn highlight_code(lang: Option<&str>, meta: &str, code: &str) -> String {
    let language = normalize_language(lang);
    let meta = parse_meta(meta);
    let lines = prepare_lines(code, language, &meta);

    let rendered = if language == "text" {
        plain_lines(&lines, &meta.words)
    } else {
        highlight_lines(&lines, language, &meta.words).unwrap_or_else(|err| {
            tracing::debug!(%err, language, "highlighting failed, using plain text");
            plain_lines(&lines, &meta.words)
        })
    };
    // The copy button carries the author's source untouched.
    let copy = code.trim_end_matches(['\n', '\r']);

    let mut out = String::with_capacity(code.len() * 4);
    out.push_str(r#"<figure class="code-frame" data-code-frame="" data-language=""#);
    out.push_str(language);
    out.push_str(r#""><figcaption class="code-frame-header">"#);
    if let Some(title) = &meta.title {
        out.push_str(r#"<span class="code-frame-title">"#);
        out.push_str(&escape(title));
        out.push_str("</span>");
    }
    out.push_str(r#"<span class="code-frame-language">"#);
    out.push_str(language);
    out.push_str(r#"</span><button type="button" class="code-copy" data-copy-code=""#);
    out.push_str(&escape(copy));
    out.push_str(r#"" aria-label="Copy code">Copy</button></figcaption><pre class="code-block"><code>"#);
    for (idx, (line, html)) in lines.iter().zip(&rendered).enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(r#"<span class="line"#);
        for mark in &line.marks {
            out.push_str(match mark {
                Mark::Add => " diff add",
                Mark::Remove => " diff remove",
                Mark::Highlight => " highlighted",
            });
        }
        out.push_str(r#"">"#);
        out.push_str(html);
        out.push_str("</span>");
    }
    out.push_str("</code></pre></figure>");
    out
}

/// Stylesheet pairing the token colour properties with the page's colour scheme.
pub fn theme_css() -> String {
    let (light, dark) = &*THEMES;
    let bg = |t: &Theme, fallback: &str| t.settings.background.map(hex).unwrap_or(fallback.into());
    let fg = |t: &Theme, fallback: &str| t.settings.foreground.map(hex).unwrap_or(fallback.into());
    format!(
        r#"/* Code frames - light (default) */
.code-frame pre {{ background: {light_bg}; color: {light_fg}; }}
.code-frame span[style] {{ color: var(--hl-light); }}
.code-frame .line.highlighted {{ background: rgba(127, 127, 127, 0.15); }}
.code-frame .line.diff.add {{ background: rgba(46, 160, 67, 0.15); }}
.code-frame .line.diff.remove {{ background: rgba(248, 81, 73, 0.15); }}
.code-frame mark.code-word {{ background: rgba(127, 127, 127, 0.25); color: inherit; }}

/* Code frames - dark */
@media (prefers-color-scheme: dark) {{
  .code-frame pre {{ background: {dark_bg}; color: {dark_fg}; }}
  .code-frame span[style] {{ color: var(--hl-dark); }}
}}
"#,
        light_bg = bg(light, "#ffffff"),
        light_fg = fg(light, "#24292e"),
        dark_bg = bg(dark, "#2b303b"),
        dark_fg = fg(dark, "#c0c5ce"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_are_aliased() {
        assert_eq!(normalize_language(Some("JS")), "javascript");
        assert_eq!(normalize_language(Some("rs")), "rust");
        assert_eq!(normalize_language(Some("brainfudge")), "text");
        assert_eq!(normalize_language(None), "text");
    }

    #[test]
    fn meta_strings() {
        let meta = parse_meta(r#"title="src/main.rs" {1,3-4} /greet/ diff"#);
        assert_eq!(meta.title.as_deref(), Some("src/main.rs"));
        assert_eq!(meta.lines.iter().copied().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(meta.words, vec!["greet".to_string()]);
        assert!(meta.diff);
        assert_eq!(parse_meta(""), CodeMeta::default());
    }

    #[test]
    fn frames_code_with_copy_payload() {
        let html = highlight_code(Some("js"), "", "const x = \"<1>\";\n");
        assert!(html.starts_with(r#"<figure class="code-frame" data-code-frame="" data-language="javascript">"#));
        assert!(html.contains(r#"data-copy-code="const x = &quot;&lt;1&gt;&quot;;""#));
        assert!(html.contains("--hl-light:#"));
        assert!(html.contains("--hl-dark:#"));
        assert!(!html.contains("<1>"));
    }

    #[test]
    fn notations_mark_lines_and_disappear() {
        let html = highlight_code(
            Some("rust"),
            "{3}",
            "let a = 1; // [!code ++]\nlet b = 2; // [!code --]\nlet c = 3;\n",
        );
        let (copy, body) = html.split_once("</figcaption>").unwrap();
        assert!(copy.contains("let a = 1; // [!code ++]\nlet b = 2; // [!code --]\nlet c = 3;\""));
        assert!(!body.contains("[!code"));
        assert!(html.contains(r#"<span class="line diff add">"#));
        assert!(html.contains(r#"<span class="line diff remove">"#));
        assert!(html.contains(r#"<span class="line highlighted">"#));
    }

    #[test]
    fn diff_flag_strips_prefixes() {
        let html = highlight_code(Some("text"), "diff", "-old\n+new\n same\n");
        assert!(html.contains("data-copy-code=\"-old\n+new\n same\""));
        assert!(html.contains(r#"<span class="line diff remove">old</span>"#));
        assert!(html.contains(r#"<span class="line diff add">new</span>"#));
    }

    #[test]
    fn word_highlights_wrap_matches() {
        let html = highlight_code(None, "/needle/", "hay needle hay");
        assert!(html.contains(r#"<mark class="code-word">needle</mark>"#));
    }

    #[test]
    fn css_switches_on_colour_scheme() {
        let css = theme_css();
        assert!(css.contains("var(--hl-light)"));
        assert!(css.contains("prefers-color-scheme: dark"));
    }
}
