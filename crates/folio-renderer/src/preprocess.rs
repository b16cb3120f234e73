//! Source rewriting that runs before block parsing.
//!
//! Friend-link lines are grouped into runs and replaced by a single
//! placeholder element carrying the encoded list. Code is shielded first so
//! nothing inside a code block is ever rewritten.

use std::sync::LazyLock;

use regex::Regex;

use crate::enrich::friends::{FriendLink, encode_payload};
use crate::grammar::block::FenceTracker;

const TOKEN_MARK: char = '\u{FFFC}';

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{FFFC}folio-code-(\\d+)\u{FFFC}").unwrap());

static FRIEND_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*\[([^\]]+)\]\(\s*([^)\s]+)\s*\)\s*\+\(\s*([^)\s]+)\s*\)(?:\s*\+\((.*)\))?\s*$",
    )
    .unwrap()
});

/// Source with code blocks swapped out for opaque tokens.
struct Shielded {
    text: String,
    blocks: Vec<String>,
}

fn shield_code(source: &str) -> Shielded {
    let mut text = String::with_capacity(source.len());
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    let mut fences = FenceTracker::default();
    let mut prev_blank = true;

    let flush = |current: &mut Option<String>, text: &mut String, blocks: &mut Vec<String>| {
        if let Some(block) = current.take() {
            text.push_str(&format!("{TOKEN_MARK}folio-code-{}{TOKEN_MARK}\n", blocks.len()));
            blocks.push(block);
        }
    };

    for line in source.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let in_fence = fences.observe(trimmed);
        let indented = !in_fence
            && (current.is_some() || prev_blank)
            && (trimmed.starts_with("    ") || trimmed.starts_with('\t'));
        let continues_indented = current.is_some() && trimmed.trim().is_empty() && !in_fence;

        if in_fence || indented || continues_indented {
            current.get_or_insert_with(String::new).push_str(line);
            if in_fence && !fences.is_open() {
                // closing fence line
                flush(&mut current, &mut text, &mut blocks);
            }
        } else {
            flush(&mut current, &mut text, &mut blocks);
            stash_marks(line, &mut text, &mut blocks);
        }
        prev_blank = trimmed.trim().is_empty();
    }
    flush(&mut current, &mut text, &mut blocks);
    if !source.ends_with('\n') && text.ends_with('\n') && !blocks.is_empty() {
        text.pop();
    }
    Shielded { text, blocks }
}

/// Copies a prose line, stashing any literal token mark as its own block so
/// author text can never spell out a token.
fn stash_marks(line: &str, text: &mut String, blocks: &mut Vec<String>) {
    let mut parts = line.split(TOKEN_MARK);
    text.push_str(parts.next().unwrap_or_default());
    for part in parts {
        text.push_str(&format!("{TOKEN_MARK}folio-code-{}{TOKEN_MARK}", blocks.len()));
        blocks.push(TOKEN_MARK.to_string());
        text.push_str(part);
    }
}

fn restore_code(text: &str, blocks: &[String]) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let block = caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| blocks.get(i))
                .map(String::as_str)
                .unwrap_or_default();
            block.strip_suffix('\n').unwrap_or(block).to_owned()
        })
        .into_owned()
}

fn parse_friend_line(line: &str) -> Option<FriendLink> {
    let caps = FRIEND_LINE_RE.captures(line)?;
    Some(FriendLink {
        name: caps[1].trim().to_owned(),
        url: caps[2].to_owned(),
        avatar: caps[3].to_owned(),
        description: caps
            .get(4)
            .map(|m| m.as_str().trim().to_owned())
            .filter(|d| !d.is_empty()),
    })
}

/// A line that looks like it wants to be a friend link.
fn is_candidate(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('[') && t.contains("](") && t.contains("+(")
}

/// Replace runs of friend-link lines with placeholder elements.
///
/// A run opens on a fully valid line and continues across blank lines and
/// further candidate lines. Candidates that fail to parse are dropped from
/// the run. Any other non-blank line ends it.
pub fn extract_friend_links(source: &str) -> String {
    let shielded = shield_code(source);
    let lines: Vec<&str> = shielded.text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    let mut runs = 0usize;

    while i < lines.len() {
        let Some(first) = parse_friend_line(lines[i]) else {
            out.push(lines[i].to_owned());
            i += 1;
            continue;
        };
        let mut items = vec![first];
        let mut j = i + 1;
        let mut end = j;
        while j < lines.len() {
            let line = lines[j];
            if line.trim().is_empty() {
                j += 1;
                continue;
            }
            if !is_candidate(line) {
                break;
            }
            if let Some(item) = parse_friend_line(line) {
                items.push(item);
            } else {
                tracing::debug!(line, "dropping malformed friend link");
            }
            j += 1;
            end = j;
        }
        runs += 1;
        out.push(String::new());
        out.push(format!(
            r#"<div class="friend-links-placeholder" data-friend-links="{}"></div>"#,
            encode_payload(&items)
        ));
        out.push(String::new());
        i = end;
    }

    if runs > 0 {
        tracing::debug!(runs, "extracted friend link runs");
    }
    let mut joined = out.join("\n");
    if source.ends_with('\n') {
        joined.push('\n');
    }
    restore_code(&joined, &shielded.blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::friends::decode_payload;

    fn payloads(out: &str) -> Vec<Vec<FriendLink>> {
        let re = Regex::new(r#"data-friend-links="([^"]*)""#).unwrap();
        re.captures_iter(out)
            .map(|c| decode_payload(&c[1]).unwrap())
            .collect()
    }

    #[test]
    fn groups_a_run_across_blank_lines() {
        let src = "Intro\n\n[Ann](https://ann.dev) +(https://ann.dev/a.png) +(Writes code)\n\n[Bob](https://bob.dev) +(https://bob.dev/b.png)\n\nOutro\n";
        let out = extract_friend_links(src);
        let found = payloads(&out);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].len(), 2);
        assert_eq!(found[0][0].description.as_deref(), Some("Writes code"));
        assert_eq!(found[0][1].description, None);
        assert!(out.starts_with("Intro\n"));
        assert!(out.trim_end().ends_with("Outro"));
    }

    #[test]
    fn malformed_candidates_are_dropped_from_the_run() {
        let src = "[Ann](https://ann.dev) +(https://ann.dev/a.png)\n[Broken](https://x.dev) +(\n[Cat](https://cat.dev) +(https://cat.dev/c.png)\n";
        let found = payloads(&extract_friend_links(src));
        assert_eq!(found.len(), 1);
        let names: Vec<_> = found[0].iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Ann", "Cat"]);
    }

    #[test]
    fn ordinary_line_splits_runs() {
        let src = "[A](https://a.dev) +(https://a.dev/a.png)\nplain text\n[B](https://b.dev) +(https://b.dev/b.png)\n";
        assert_eq!(payloads(&extract_friend_links(src)).len(), 2);
    }

    #[test]
    fn code_blocks_are_left_alone() {
        let src = "```md\n[A](https://a.dev) +(https://a.dev/a.png)\n```\n\n    [B](https://b.dev) +(https://b.dev/b.png)\n";
        let out = extract_friend_links(src);
        assert_eq!(out, src);
    }

    #[test]
    fn plain_documents_round_trip() {
        let src = "# Title\n\nSome [link](https://example.com) here.\n";
        assert_eq!(extract_friend_links(src), src);
    }

    #[test]
    fn author_text_cannot_forge_a_code_token() {
        let fake = "\u{FFFC}folio-code-0\u{FFFC}";
        let src = format!("See {fake} here.\n\n```rust\nlet x = 1;\n```\n\n[A](https://a.dev) +(https://a.dev/a.png)\n");
        let out = extract_friend_links(&src);
        assert!(out.starts_with(&format!("See {fake} here.\n")));
        assert_eq!(out.matches("let x = 1;").count(), 1);
        assert!(out.contains("```rust\nlet x = 1;\n```\n"));
        assert_eq!(payloads(&out).len(), 1);
    }

    #[test]
    fn stray_marks_survive_unchanged() {
        let src = "a \u{FFFC} b \u{FFFC}\u{FFFC}\n";
        assert_eq!(extract_friend_links(src), src);
    }
}
