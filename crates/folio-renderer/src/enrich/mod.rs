//! Async resolution of placeholders left by the renderer.
//!
//! Each placeholder kind has its own resolver. Within a kind every
//! occurrence resolves concurrently, and the kinds run alongside each other.
//! A resolver always produces markup, so one bad item never affects the rest.

pub mod fetch;
pub mod friends;
pub mod forge;
pub mod highlight;
pub mod preview;

use std::ops::Range;
use std::sync::Arc;

use folio_common::{ConfigError, RenderConfig};
use n0_future::join_all;

use crate::placeholder::{self, Placeholder, PlaceholderKind};

pub use fetch::{FetchError, FetchedPage, Fetcher, HttpFetcher};
pub use preview::{LinkPreview, LinkPreviewer};

/// Which resolvers run. Disabled kinds keep their inert stub, except rich
/// links, which get their URL-only fallback card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOptions {
    pub highlight_code: bool,
    pub link_previews: bool,
    pub friend_links: bool,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            highlight_code: true,
            link_previews: true,
            friend_links: true,
        }
    }
}

pub struct Enricher {
    previewer: LinkPreviewer,
}

type Resolved = (Range<usize>, String);

impl Enricher {
    pub fn new(config: &RenderConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        Ok(Self {
            previewer: LinkPreviewer::new(config, fetcher)?,
        })
    }

    #[tracing::instrument(level = "debug", skip_all, fields(placeholders = placeholders.len()))]
    pub async fn enrich(
        &self,
        html: String,
        placeholders: Vec<Placeholder>,
        options: EnrichOptions,
    ) -> String {
        if placeholders.is_empty() {
            return html;
        }
        let mut code = Vec::new();
        let mut links = Vec::new();
        let mut friends = Vec::new();
        for p in placeholders {
            match p.kind {
                PlaceholderKind::Code { lang, meta, code: source } if options.highlight_code => {
                    code.push((p.span, lang, meta, source))
                }
                PlaceholderKind::RichLink { url, label } => links.push((p.span, url, label)),
                PlaceholderKind::FriendLinks { payload } if options.friend_links => {
                    friends.push((p.span, payload))
                }
                _ => {}
            }
        }

        let (code, links, friends) = tokio::join!(
            resolve_code(code),
            self.resolve_links(links, options.link_previews),
            resolve_friends(friends),
        );
        let resolved: Vec<Resolved> = code.into_iter().chain(links).chain(friends).collect();
        tracing::debug!(resolved = resolved.len(), "placeholders resolved");
        placeholder::substitute(html, resolved)
    }

    async fn resolve_links(
        &self,
        items: Vec<(Range<usize>, String, String)>,
        network: bool,
    ) -> Vec<Resolved> {
        join_all(items.into_iter().map(|(span, url, label)| async move {
            let html = self.previewer.resolve_with(&url, &label, network).await;
            (span, html)
        }))
        .await
    }
}

async fn resolve_code(items: Vec<(Range<usize>, Option<String>, String, String)>) -> Vec<Resolved> {
    join_all(items.into_iter().map(|(span, lang, meta, code)| async move {
        let html = tokio::task::spawn_blocking(move || {
            highlight::highlight_code(lang.as_deref(), &meta, &code)
        })
        .await;
        match html {
            Ok(html) => Some((span, html)),
            Err(err) => {
                // The stub stays in place.
                tracing::warn!(%err, ?span, "highlighting task failed");
                None
            }
        }
    }))
    .await
    .into_iter()
    .flatten()
    .collect()
}

async fn resolve_friends(items: Vec<(Range<usize>, String)>) -> Vec<Resolved> {
    items
        .into_iter()
        .map(|(span, payload)| (span, friends::render_friend_links(&payload)))
        .collect()
}
