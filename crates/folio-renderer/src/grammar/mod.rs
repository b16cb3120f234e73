//! The markdown dialect as an ordered set of block and inline rules.
//!
//! Parsing produces a small tree of [`Block`]s and [`Inline`]s. Rules are
//! tried in a fixed priority order at each position, the first match wins,
//! and nested bodies (callouts, containers, tabs, footnotes) are parsed by
//! recursing with the same [`RenderContext`].

pub mod block;
pub mod inline;

use crate::context::RenderContext;
use crate::embed::Embed;

pub use block::BlockRule;
pub use inline::InlineRule;

/// The five callout kinds, shared by alerts, containers and banners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalloutKind {
    Note,
    Tip,
    Important,
    Warning,
    Caution,
}

impl CalloutKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "note" | "info" => CalloutKind::Note,
            "tip" | "success" => CalloutKind::Tip,
            "important" => CalloutKind::Important,
            "warning" | "warn" => CalloutKind::Warning,
            "caution" | "error" | "danger" => CalloutKind::Caution,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalloutKind::Note => "note",
            CalloutKind::Tip => "tip",
            CalloutKind::Important => "important",
            CalloutKind::Warning => "warning",
            CalloutKind::Caution => "caution",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            CalloutKind::Note => "Note",
            CalloutKind::Tip => "Tip",
            CalloutKind::Important => "Important",
            CalloutKind::Warning => "Warning",
            CalloutKind::Caution => "Caution",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKind {
    /// Full-width notice; kind comes from the params, defaulting to note.
    Banner(CalloutKind),
    Carousel,
    Grid { columns: Option<u8> },
    /// `:::warn`, `:::info` and friends.
    Callout(CalloutKind),
    /// Anything else, carried through as a tag.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    None,
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub lang: Option<String>,
    pub meta: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub task: Option<bool>,
    pub body: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct List {
    /// Start number for ordered lists.
    pub ordered: Option<u64>,
    pub tight: bool,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub alignments: Vec<Alignment>,
    pub header: Vec<Vec<Inline>>,
    pub rows: Vec<Vec<Vec<Inline>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tab {
    pub label: String,
    pub body: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    Heading {
        level: u8,
        content: Vec<Inline>,
    },
    Code(CodeBlock),
    Embed(Embed),
    Excalidraw {
        src: String,
    },
    /// A paragraph holding nothing but a bare external link.
    RichLink {
        url: String,
        label: String,
    },
    FriendLinks {
        payload: String,
    },
    ThematicBreak,
    BlockQuote(Vec<Block>),
    Callout {
        kind: CalloutKind,
        body: Vec<Block>,
    },
    Container {
        kind: ContainerKind,
        body: Vec<Block>,
    },
    Tabs {
        id: String,
        tabs: Vec<Tab>,
    },
    List(List),
    Table(Table),
    MathDisplay(String),
    Html(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Inline,
    Reference,
    Autolink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionProvider {
    GitHub,
    Twitter,
    Telegram,
}

impl MentionProvider {
    pub fn parse(prefix: &str) -> Option<Self> {
        match prefix {
            "GH" => Some(MentionProvider::GitHub),
            "TW" => Some(MentionProvider::Twitter),
            "TG" => Some(MentionProvider::Telegram),
            _ => None,
        }
    }

    pub fn profile_url(self, name: &str) -> String {
        match self {
            MentionProvider::GitHub => format!("https://github.com/{name}"),
            MentionProvider::Twitter => format!("https://twitter.com/{name}"),
            MentionProvider::Telegram => format!("https://t.me/{name}"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MentionProvider::GitHub => "github",
            MentionProvider::Twitter => "twitter",
            MentionProvider::Telegram => "telegram",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text(String),
    Code(String),
    Emphasis(Vec<Inline>),
    Strong(Vec<Inline>),
    Strikethrough(Vec<Inline>),
    Mark(Vec<Inline>),
    Insert(Vec<Inline>),
    Spoiler(Vec<Inline>),
    Link {
        kind: LinkKind,
        dest: String,
        title: Option<String>,
        children: Vec<Inline>,
    },
    Image {
        src: String,
        alt: String,
        title: Option<String>,
    },
    Math(String),
    FootnoteRef(String),
    Mention {
        provider: MentionProvider,
        name: String,
        label: Option<String>,
    },
    Emoji {
        src: String,
        alt: String,
    },
    Html(String),
    SoftBreak,
    HardBreak,
}

/// Concatenated text content, used for image alt text and link labels.
pub fn plain_text(inlines: &[Inline]) -> String {
    let mut out = String::new();
    collect_text(inlines, &mut out);
    out
}

fn collect_text(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Text(t) | Inline::Code(t) | Inline::Math(t) => out.push_str(t),
            Inline::Emphasis(c)
            | Inline::Strong(c)
            | Inline::Strikethrough(c)
            | Inline::Mark(c)
            | Inline::Insert(c)
            | Inline::Spoiler(c)
            | Inline::Link { children: c, .. } => collect_text(c, out),
            Inline::Image { alt, .. } => out.push_str(alt),
            Inline::Mention { name, label, .. } => {
                out.push_str(label.as_deref().unwrap_or(name));
            }
            Inline::Emoji { alt, .. } => out.push_str(alt),
            Inline::SoftBreak | Inline::HardBreak => out.push(' '),
            Inline::FootnoteRef(_) | Inline::Html(_) => {}
        }
    }
}

/// Parse a whole document into blocks.
pub fn parse_document(source: &str, ctx: &mut RenderContext<'_>) -> Vec<Block> {
    let lines = block::split_lines(source);
    block::parse_blocks(&lines, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callout_aliases() {
        assert_eq!(CalloutKind::parse("INFO"), Some(CalloutKind::Note));
        assert_eq!(CalloutKind::parse("success"), Some(CalloutKind::Tip));
        assert_eq!(CalloutKind::parse("warn"), Some(CalloutKind::Warning));
        assert_eq!(CalloutKind::parse("danger"), Some(CalloutKind::Caution));
        assert_eq!(CalloutKind::parse("error"), Some(CalloutKind::Caution));
        assert_eq!(CalloutKind::parse("carousel"), None);
    }

    #[test]
    fn plain_text_flattens_markup() {
        let inlines = vec![
            Inline::Text("a ".into()),
            Inline::Strong(vec![Inline::Text("b".into())]),
            Inline::SoftBreak,
            Inline::Code("c".into()),
        ];
        assert_eq!(plain_text(&inlines), "a b c");
    }
}
