//! Folio renderer
//!
//! Turns folio-flavoured Markdown into sanitized, hydration-ready HTML plus a
//! table of contents. Articles run the full pipeline:
//!
//! preprocess → reference table → grammar → HTML with placeholders →
//! async enrichment → sanitizer → heading ids and TOC
//!
//! Comments reuse the grammar and writer with a reduced dialect, no
//! enrichment and a stricter sanitizer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bitflags::bitflags;
use folio_common::{ConfigError, RenderConfig};
use serde::{Deserialize, Serialize};

pub mod comment;
pub mod context;
pub mod embed;
pub mod emoji;
pub mod enrich;
pub mod grammar;
pub mod image;
pub mod math;
pub mod placeholder;
pub mod preprocess;
pub mod refs;
pub mod render;
pub mod sanitize;
pub mod toc;
pub mod utils;

use crate::context::{Dialect, RenderContext};
use crate::emoji::{AssetEmojiResolver, EmojiResolver};
use crate::enrich::{EnrichOptions, Enricher, Fetcher, HttpFetcher};
use crate::image::{EndpointImageTransform, ImageTransform};
use crate::refs::ReferenceTable;
use crate::render::Rendered;

pub use crate::toc::TocItem;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct RenderOptions: u32 {
        const HIGHLIGHT_CODE = 1 << 0;
        const LINK_PREVIEWS = 1 << 1;
        const FRIEND_LINKS = 1 << 2;
        const SANITIZE = 1 << 3;
        const TOC = 1 << 4;
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedDocument {
    pub html: String,
    pub toc_items: Vec<TocItem>,
}

/// Entry point for both articles and comments.
///
/// Cheap to share: hold one per process and render from many tasks.
pub struct Renderer {
    options: RenderOptions,
    enricher: Enricher,
    images: Arc<dyn ImageTransform>,
    emoji: Arc<dyn EmojiResolver>,
}

impl Renderer {
    /// Build a renderer that fetches over HTTP.
    pub fn new(config: RenderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Self::build(&config, fetcher)
    }

    /// Build a renderer around a caller-supplied [`Fetcher`].
    pub fn with_fetcher(config: RenderConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::build(&config, fetcher)
    }

    fn build(config: &RenderConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        let placeholder = config
            .image_placeholder_endpoint
            .clone()
            .ok_or(ConfigError::Missing {
                key: "image_placeholder_endpoint",
            })?;
        Ok(Self {
            options: RenderOptions::default(),
            enricher: Enricher::new(config, fetcher)?,
            images: Arc::new(EndpointImageTransform::new(
                placeholder,
                config.image_optimize_endpoint.clone(),
            )),
            emoji: Arc::new(AssetEmojiResolver::new(config.emoji_asset_base.clone())),
        })
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_image_transform(mut self, images: Arc<dyn ImageTransform>) -> Self {
        self.images = images;
        self
    }

    pub fn with_emoji_resolver(mut self, emoji: Arc<dyn EmojiResolver>) -> Self {
        self.emoji = emoji;
        self
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    /// Render an article. Never fails: every stage degrades locally.
    #[tracing::instrument(skip_all, fields(len = source.len()))]
    pub async fn render_article(&self, source: &str) -> RenderedDocument {
        if source.trim().is_empty() {
            return RenderedDocument::default();
        }
        let source = if self.options.contains(RenderOptions::FRIEND_LINKS) {
            preprocess::extract_friend_links(source)
        } else {
            source.to_owned()
        };
        let refs = ReferenceTable::build(&source);
        let rendered = compile(&source, Dialect::Article, &refs, &*self.emoji, &*self.images);
        tracing::debug!(
            bytes = rendered.html.len(),
            placeholders = rendered.placeholders.len(),
            references = refs.len(),
            "compiled"
        );

        let enrich = EnrichOptions {
            highlight_code: self.options.contains(RenderOptions::HIGHLIGHT_CODE),
            link_previews: self.options.contains(RenderOptions::LINK_PREVIEWS),
            friend_links: self.options.contains(RenderOptions::FRIEND_LINKS),
        };
        let html = self
            .enricher
            .enrich(rendered.html, rendered.placeholders, enrich)
            .await;
        let html = if self.options.contains(RenderOptions::SANITIZE) {
            sanitize::sanitize_article(&html)
        } else {
            html
        };
        if self.options.contains(RenderOptions::TOC) {
            let (html, toc_items) = toc::build_toc(&html);
            RenderedDocument { html, toc_items }
        } else {
            RenderedDocument {
                html,
                toc_items: Vec::new(),
            }
        }
    }

    /// Render a reader comment. Synchronous: comments never touch the network.
    pub fn render_comment(&self, source: &str) -> String {
        comment::render_comment(source, &*self.images, &*self.emoji)
    }
}

/// Parse and write one document, falling back to escaped text if the grammar
/// panics.
pub(crate) fn compile(
    source: &str,
    dialect: Dialect,
    refs: &ReferenceTable,
    emoji: &dyn EmojiResolver,
    images: &dyn ImageTransform,
) -> Rendered {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = RenderContext::new(dialect, refs, emoji);
        let blocks = grammar::parse_document(source, &mut ctx);
        render::render_document(&blocks, &ctx, images)
    }));
    result.unwrap_or_else(|_| {
        tracing::error!("document compile panicked, rendering as plain text");
        Rendered {
            html: plain_paragraphs(source),
            placeholders: Vec::new(),
        }
    })
}

fn plain_paragraphs(source: &str) -> String {
    let mut out = String::new();
    for para in source.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        out.push_str("<p>");
        utils::escape_into(&mut out, para);
        out.push_str("</p>\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_requires_placeholder_endpoint() {
        let err = Renderer::new(RenderConfig::default()).err().unwrap();
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "image_placeholder_endpoint"
            }
        );
        assert_eq!(err.status().as_u16(), 500);
    }

    #[test]
    fn default_options_enable_everything() {
        let options = RenderOptions::default();
        assert!(options.contains(RenderOptions::SANITIZE | RenderOptions::TOC));
        assert!(options.contains(RenderOptions::LINK_PREVIEWS));
    }

    #[test]
    fn plain_fallback_escapes() {
        assert_eq!(
            plain_paragraphs("a <b>\n\n\nc"),
            "<p>a &lt;b&gt;</p>\n<p>c</p>\n"
        );
    }

    #[test]
    fn rendered_document_uses_camel_case() {
        let doc = RenderedDocument {
            html: "<p>x</p>".into(),
            toc_items: vec![],
        };
        assert_eq!(
            serde_json::to_string(&doc).unwrap(),
            r#"{"html":"<p>x</p>","tocItems":[]}"#
        );
    }
}
