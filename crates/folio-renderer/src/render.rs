//! Parse tree to HTML.

use std::collections::HashMap;

use crate::context::{Dialect, RenderContext};
use crate::grammar::{
    Alignment, Block, CalloutKind, CodeBlock, ContainerKind, Inline, List, MentionProvider,
    Table, Tab,
};
use crate::image::ImageTransform;
use crate::math::render_or_nothing;
use crate::placeholder::{Placeholder, PlaceholderKind};
use crate::utils::{escape, escape_into, escape_url_into, is_external};

/// HTML plus the stubs that still need async resolution.
#[derive(Debug, Default)]
pub struct Rendered {
    pub html: String,
    pub placeholders: Vec<Placeholder>,
}

pub fn render_document(
    blocks: &[Block],
    ctx: &RenderContext<'_>,
    images: &dyn ImageTransform,
) -> Rendered {
    let mut writer = HtmlWriter::new(ctx, images);
    writer.blocks(blocks, false);
    writer.footnotes();
    Rendered {
        html: writer.out,
        placeholders: writer.placeholders,
    }
}

struct HtmlWriter<'a, 'r> {
    ctx: &'a RenderContext<'r>,
    images: &'a dyn ImageTransform,
    out: String,
    /// Whether or not the last write wrote a newline.
    end_newline: bool,
    placeholders: Vec<Placeholder>,
    /// How many times each footnote has been referenced so far.
    footnote_refs: HashMap<usize, usize>,
}

impl<'a, 'r> HtmlWriter<'a, 'r> {
    fn new(ctx: &'a RenderContext<'r>, images: &'a dyn ImageTransform) -> Self {
        Self {
            ctx,
            images,
            out: String::new(),
            end_newline: true,
            placeholders: Vec::new(),
            footnote_refs: HashMap::new(),
        }
    }

    /// Writes a new line.
    #[inline]
    fn write_newline(&mut self) {
        self.end_newline = true;
        self.out.push('\n');
    }

    /// Writes a buffer, and tracks whether or not a newline was written.
    #[inline]
    fn write(&mut self, s: &str) {
        self.out.push_str(s);
        if !s.is_empty() {
            self.end_newline = s.ends_with('\n');
        }
    }

    /// Starts a block-level tag on a fresh line.
    fn open_block(&mut self, s: &str) {
        if !self.end_newline {
            self.write_newline();
        }
        self.write(s);
    }

    fn text(&mut self, s: &str) {
        escape_into(&mut self.out, s);
        if !s.is_empty() {
            self.end_newline = s.ends_with('\n');
        }
    }

    fn url(&mut self, url: &str) {
        escape_url_into(&mut self.out, url);
        self.end_newline = false;
    }

    fn placeholder(&mut self, kind: PlaceholderKind, stub: &str) {
        if !self.end_newline {
            self.write_newline();
        }
        let start = self.out.len();
        self.write(stub);
        let span = start..self.out.len();
        let id = self.placeholders.len();
        tracing::trace!(id, kind = kind.name(), "recorded placeholder");
        self.placeholders.push(Placeholder { id, kind, span });
        self.write_newline();
    }

    fn blocks(&mut self, blocks: &[Block], tight: bool) {
        for block in blocks {
            self.block(block, tight);
        }
    }

    fn block(&mut self, block: &Block, tight: bool) {
        match block {
            Block::Paragraph(inlines) if tight => self.inlines(inlines),
            Block::Paragraph(inlines) => {
                self.open_block("<p>");
                self.inlines(inlines);
                self.write("</p>\n");
            }
            Block::Heading { level, content } => {
                self.open_block(&format!("<h{level}>"));
                self.inlines(content);
                self.write(&format!("</h{level}>\n"));
            }
            Block::Code(code) => self.code_block(code),
            Block::Embed(embed) => {
                self.open_block(&embed.to_html());
                self.write_newline();
            }
            Block::Excalidraw { src } => {
                self.open_block(r#"<div class="excalidraw" data-excalidraw=""#);
                self.text(src);
                self.write(r#""><a href=""#);
                self.url(src);
                self.write("\">Open drawing</a></div>\n");
            }
            Block::RichLink { url, label } => {
                let mut stub = String::from(
                    r#"<p class="rich-link-placeholder" data-placeholder="rich-link"><a href=""#,
                );
                escape_url_into(&mut stub, url);
                stub.push_str(r#"" target="_blank" rel="noopener noreferrer">"#);
                escape_into(&mut stub, label);
                stub.push_str("</a></p>");
                self.placeholder(
                    PlaceholderKind::RichLink {
                        url: url.clone(),
                        label: label.clone(),
                    },
                    &stub,
                );
            }
            Block::FriendLinks { payload } => {
                let stub = format!(
                    r#"<div class="friend-links-placeholder" data-placeholder="friend-links" data-friend-links="{}"></div>"#,
                    escape(payload)
                );
                self.placeholder(
                    PlaceholderKind::FriendLinks {
                        payload: payload.clone(),
                    },
                    &stub,
                );
            }
            Block::ThematicBreak => self.open_block("<hr />\n"),
            Block::BlockQuote(body) => {
                self.open_block("<blockquote>\n");
                self.blocks(body, false);
                self.open_block("</blockquote>\n");
            }
            Block::Callout { kind, body } => self.callout(*kind, body),
            Block::Container { kind, body } => self.container(kind, body),
            Block::Tabs { id, tabs } => self.tabs(id, tabs),
            Block::List(list) => self.list(list),
            Block::Table(table) => self.table(table),
            Block::MathDisplay(tex) => {
                let html = render_or_nothing(tex, true);
                if !html.is_empty() {
                    self.open_block(&html);
                    self.write_newline();
                }
            }
            Block::Html(html) => {
                self.open_block(html);
                self.write_newline();
            }
        }
    }

    fn code_block(&mut self, code: &CodeBlock) {
        let lang = code.lang.as_deref().unwrap_or("");
        match self.ctx.dialect {
            Dialect::Article => {
                let mut stub =
                    String::from(r#"<pre class="code-placeholder" data-placeholder="code""#);
                if !lang.is_empty() {
                    stub.push_str(r#" data-lang=""#);
                    escape_into(&mut stub, lang);
                    stub.push('"');
                }
                stub.push_str("><code>");
                escape_into(&mut stub, &code.code);
                stub.push_str("</code></pre>");
                self.placeholder(
                    PlaceholderKind::Code {
                        lang: code.lang.clone(),
                        meta: code.meta.clone(),
                        code: code.code.clone(),
                    },
                    &stub,
                );
            }
            Dialect::Comment => {
                if lang.is_empty() {
                    self.open_block("<pre><code>");
                } else {
                    self.open_block(r#"<pre><code class="language-"#);
                    self.text(lang);
                    self.write("\">");
                }
                self.text(&code.code);
                self.write("</code></pre>\n");
            }
        }
    }

    fn callout_open(&mut self, kind: CalloutKind, extra_class: &str) {
        self.open_block(&format!(
            r#"<div class="{extra_class}callout callout-{k}" data-callout="{k}">"#,
            k = kind.as_str()
        ));
        self.write_newline();
        self.write(&format!(
            "<p class=\"callout-title\">{}</p>\n",
            kind.title()
        ));
    }

    fn callout(&mut self, kind: CalloutKind, body: &[Block]) {
        self.callout_open(kind, "");
        self.blocks(body, false);
        self.open_block("</div>\n");
    }

    fn container(&mut self, kind: &ContainerKind, body: &[Block]) {
        match kind {
            ContainerKind::Callout(kind) => return self.callout(*kind, body),
            ContainerKind::Banner(kind) => {
                self.callout_open(*kind, "container container-banner ");
            }
            ContainerKind::Carousel => {
                self.open_block(
                    r#"<div class="container container-carousel" data-container="carousel">"#,
                );
                self.write_newline();
            }
            ContainerKind::Grid { columns } => {
                self.open_block(r#"<div class="container container-grid" data-container="grid""#);
                if let Some(n) = columns {
                    self.write(&format!(r#" data-columns="{n}""#));
                }
                self.write(">\n");
            }
            ContainerKind::Other(name) => {
                self.open_block(r#"<div class="container" data-container-type=""#);
                self.text(name);
                self.write("\">\n");
            }
        }
        self.blocks(body, false);
        self.open_block("</div>\n");
    }

    fn tabs(&mut self, id: &str, tabs: &[Tab]) {
        self.open_block(&format!(r#"<div class="tabs" data-tabs="" id="{id}">"#));
        self.write_newline();
        self.write(r#"<div class="tabs-list" role="tablist">"#);
        for (n, tab) in tabs.iter().enumerate() {
            let selected = n == 0;
            self.write(&format!(
                r#"<button type="button" class="tabs-trigger" role="tab" id="{id}-tab-{n}" aria-controls="{id}-panel-{n}" aria-selected="{selected}" tabindex="{}" data-tab-index="{n}">"#,
                if selected { 0 } else { -1 }
            ));
            self.text(&tab.label);
            self.write("</button>");
        }
        self.write("</div>\n");
        for (n, tab) in tabs.iter().enumerate() {
            self.write(&format!(
                r#"<div class="tabs-panel" role="tabpanel" id="{id}-panel-{n}" aria-labelledby="{id}-tab-{n}" tabindex="0"{}>"#,
                if n == 0 { "" } else { r#" hidden="""# }
            ));
            self.write_newline();
            self.blocks(&tab.body, false);
            self.open_block("</div>\n");
        }
        self.write("</div>\n");
    }

    fn list(&mut self, list: &List) {
        match list.ordered {
            Some(1) => self.open_block("<ol>\n"),
            Some(start) => self.open_block(&format!("<ol start=\"{start}\">\n")),
            None => self.open_block("<ul>\n"),
        }
        for item in &list.items {
            match item.task {
                Some(checked) => {
                    self.write(r#"<li class="task-list-item"><input type="checkbox" disabled="""#);
                    if checked {
                        self.write(r#" checked="""#);
                    }
                    self.write(" /> ");
                }
                None => self.write("<li>"),
            }
            self.blocks(&item.body, list.tight);
            if !list.tight {
                self.open_block("");
            }
            self.write("</li>\n");
        }
        self.write(if list.ordered.is_some() {
            "</ol>\n"
        } else {
            "</ul>\n"
        });
    }

    fn table(&mut self, table: &Table) {
        let align = |a: Alignment| match a {
            Alignment::None => "",
            Alignment::Left => r#" align="left""#,
            Alignment::Center => r#" align="center""#,
            Alignment::Right => r#" align="right""#,
        };
        self.open_block("<table>\n<thead>\n<tr>\n");
        for (cell, a) in table.header.iter().zip(&table.alignments) {
            self.write(&format!("<th{}>", align(*a)));
            self.inlines(cell);
            self.write("</th>\n");
        }
        self.write("</tr>\n</thead>\n");
        if !table.rows.is_empty() {
            self.write("<tbody>\n");
            for row in &table.rows {
                self.write("<tr>\n");
                for (cell, a) in row.iter().zip(&table.alignments) {
                    self.write(&format!("<td{}>", align(*a)));
                    self.inlines(cell);
                    self.write("</td>\n");
                }
                self.write("</tr>\n");
            }
            self.write("</tbody>\n");
        }
        self.write("</table>\n");
    }

    fn footnotes(&mut self) {
        let notes = self.ctx.footnotes();
        if notes.is_empty() {
            return;
        }
        self.open_block("<section class=\"footnotes\" data-footnotes=\"\">\n<ol>\n");
        for (idx, note) in notes.iter().enumerate() {
            let n = idx + 1;
            self.write(&format!("<li id=\"fn-{n}\">\n"));
            self.blocks(&note.body, false);
            self.open_block(&format!(
                r##"<a href="#fnref-{n}" class="footnote-backref" aria-label="Back to reference {n}">↩</a>"##
            ));
            self.write("\n</li>\n");
        }
        self.write("</ol>\n</section>\n");
    }

    fn inlines(&mut self, inlines: &[Inline]) {
        for inline in inlines {
            self.inline(inline);
        }
    }

    fn inline(&mut self, inline: &Inline) {
        match inline {
            Inline::Text(t) => self.text(t),
            Inline::Code(c) => {
                self.write("<code>");
                self.text(c);
                self.write("</code>");
            }
            Inline::Emphasis(c) => self.wrap("<em>", c, "</em>"),
            Inline::Strong(c) => self.wrap("<strong>", c, "</strong>"),
            Inline::Strikethrough(c) => self.wrap("<del>", c, "</del>"),
            Inline::Mark(c) => self.wrap("<mark>", c, "</mark>"),
            Inline::Insert(c) => self.wrap("<ins>", c, "</ins>"),
            Inline::Spoiler(c) => {
                self.wrap(r#"<span class="spoiler" data-spoiler="">"#, c, "</span>")
            }
            Inline::Link {
                dest,
                title,
                children,
                ..
            } => {
                self.write("<a href=\"");
                self.url(dest);
                self.write("\"");
                if let Some(title) = title {
                    self.write(" title=\"");
                    self.text(title);
                    self.write("\"");
                }
                if is_external(dest) {
                    self.write(r#" target="_blank" rel="noopener noreferrer""#);
                }
                self.write(">");
                self.inlines(children);
                self.write("</a>");
            }
            Inline::Image { src, alt, title } => self.image(src, alt, title.as_deref()),
            Inline::Math(tex) => {
                let html = render_or_nothing(tex, false);
                self.write(&html);
            }
            Inline::FootnoteRef(label) => self.footnote_ref(label),
            Inline::Mention {
                provider,
                name,
                label,
            } => self.mention(*provider, name, label.as_deref()),
            Inline::Emoji { src, alt } => {
                self.write(r#"<img class="emoji" src=""#);
                self.url(src);
                self.write(r#"" alt=""#);
                self.text(alt);
                self.write(r#"" loading="lazy" />"#);
            }
            Inline::Html(html) => self.write(html),
            Inline::SoftBreak => self.write_newline(),
            Inline::HardBreak => self.write("<br />\n"),
        }
    }

    fn wrap(&mut self, open: &str, children: &[Inline], close: &str) {
        self.write(open);
        self.inlines(children);
        self.write(close);
    }

    fn image(&mut self, src: &str, alt: &str, title: Option<&str>) {
        let placeholder = self.images.placeholder_url(src);
        let optimized = self.images.optimized_url(src);
        self.write("<img src=\"");
        self.url(&placeholder);
        self.write("\" data-src=\"");
        self.url(src);
        self.write("\" data-optimized-src=\"");
        self.url(&optimized);
        self.write("\" alt=\"");
        self.text(alt);
        self.write("\"");
        if let Some(title) = title {
            self.write(" title=\"");
            self.text(title);
            self.write("\"");
        }
        self.write(r#" loading="lazy" decoding="async" />"#);
    }

    fn footnote_ref(&mut self, label: &str) {
        let Some(n) = self.ctx.footnote_number(label) else {
            self.text(&format!("[^{label}]"));
            return;
        };
        let seen = self.footnote_refs.entry(n).or_insert(0);
        *seen += 1;
        let id = if *seen == 1 {
            format!("fnref-{n}")
        } else {
            format!("fnref-{n}-{seen}")
        };
        self.write(&format!(
            r##"<sup class="footnote-ref"><a href="#fn-{n}" id="{id}" data-footnote-ref="">{n}</a></sup>"##
        ));
    }

    fn mention(&mut self, provider: MentionProvider, name: &str, label: Option<&str>) {
        self.write(&format!(
            r#"<a class="mention mention-{}" href=""#,
            provider.as_str()
        ));
        self.url(&provider.profile_url(name));
        self.write(r#"" target="_blank" rel="noopener noreferrer">"#);
        match label {
            Some(label) => self.text(label),
            None => self.text(&format!("@{name}")),
        }
        self.write("</a>");
    }
}
