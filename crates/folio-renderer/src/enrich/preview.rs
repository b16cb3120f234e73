//! Link preview cards for bare links.
//!
//! Provider pages short-circuit to an iframe. Anything else is fetched once,
//! its `<head>` metadata scraped into a [`LinkPreview`], and the result cached
//! by URL. Every failure falls back to a card derived from the URL alone.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use folio_common::cache::{self, Cache};
use folio_common::{ConfigError, RenderConfig};
use regex::Regex;
use url::Url;

use super::fetch::{FetchError, Fetcher};
use super::forge::{self, DiffStats, Forge, ForgeStats};
use crate::embed::match_embed;
use crate::utils::{
    decode_entities, escape, escape_url_into, is_private_host, strip_tags, truncate_chars,
};

const MAX_DESCRIPTION_CHARS: usize = 200;
const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPreview {
    pub final_url: Url,
    pub domain: String,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub icon: String,
    pub stars: Option<u64>,
    pub diff: Option<DiffStats>,
}

/// Metadata scraped from a page head. URLs are already absolute.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub icon: Option<String>,
}

static META_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").unwrap());
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").unwrap());
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([a-zA-Z][a-zA-Z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .unwrap()
});

fn attr(tag: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(tag).find_map(|cap| {
        if !cap[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let value = cap.get(2).or(cap.get(3)).or(cap.get(4))?.as_str();
        Some(decode_entities(value).trim().to_owned())
    })
}

fn resolve_http(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Scrape Open Graph, Twitter card, `<title>` and icon data from `html`.
///
/// Only the head is looked at. Relative URLs resolve against `base`, which
/// should be the location after redirects.
pub fn parse_metadata(html: &str, base: &Url) -> PageMeta {
    let head_end = html
        .to_ascii_lowercase()
        .find("</head>")
        .unwrap_or(html.len());
    let head = &html[..head_end];

    let mut og_title = None;
    let mut twitter_title = None;
    let mut og_description = None;
    let mut twitter_description = None;
    let mut description = None;
    let mut og_image = None;
    let mut twitter_image = None;
    for m in META_RE.find_iter(head) {
        let tag = m.as_str();
        let Some(key) = attr(tag, "property").or_else(|| attr(tag, "name")) else {
            continue;
        };
        let Some(content) = attr(tag, "content").filter(|c| !c.is_empty()) else {
            continue;
        };
        let slot = match key.to_ascii_lowercase().as_str() {
            "og:title" => &mut og_title,
            "twitter:title" => &mut twitter_title,
            "og:description" => &mut og_description,
            "twitter:description" => &mut twitter_description,
            "description" => &mut description,
            "og:image" | "og:image:url" | "og:image:secure_url" => &mut og_image,
            "twitter:image" | "twitter:image:src" => &mut twitter_image,
            _ => continue,
        };
        slot.get_or_insert(content);
    }

    let mut icon = None;
    for m in LINK_RE.find_iter(head) {
        let tag = m.as_str();
        let rel = attr(tag, "rel").unwrap_or_default().to_ascii_lowercase();
        if rel.split_whitespace().any(|r| r == "icon" || r == "apple-touch-icon")
            && let Some(href) = attr(tag, "href")
            && let Some(resolved) = resolve_http(base, &href)
        {
            icon = Some(resolved);
            break;
        }
    }

    let page_title = TITLE_RE.captures(head).map(|c| strip_tags(&c[1]));
    PageMeta {
        title: og_title
            .or(twitter_title)
            .map(|t| strip_tags(&t))
            .or(page_title)
            .filter(|t| !t.is_empty()),
        description: og_description
            .or(twitter_description)
            .or(description)
            .map(|d| truncate_chars(&strip_tags(&d), MAX_DESCRIPTION_CHARS))
            .filter(|d| !d.is_empty()),
        image: og_image
            .or(twitter_image)
            .and_then(|src| resolve_http(base, &src)),
        icon,
    }
}

fn domain_of(url: &Url) -> String {
    url.host_str()
        .map(|h| h.trim_start_matches("www.").to_owned())
        .unwrap_or_default()
}

fn favicon_of(url: &Url) -> String {
    format!("{}/favicon.ico", url.origin().ascii_serialization())
}

/// A readable title from the last path segment, or the domain.
fn title_from_path(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|segs| segs.filter(|s| !s.is_empty()).last())
        .map(|seg| {
            let decoded = percent_decode(seg);
            let stem = match decoded.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() && ext.len() <= 5 => stem.to_owned(),
                _ => decoded,
            };
            stem.replace(['-', '_', '+'], " ").trim().to_owned()
        })
        .filter(|s| !s.is_empty());
    last.unwrap_or_else(|| domain_of(url))
}

fn percent_decode(s: &str) -> String {
    url::form_urlencoded::parse(format!("x={s}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| s.to_owned())
}

fn canonical(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

fn card_open(out: &mut String, kind: &str, href: &Url) {
    out.push_str(r#"<div class="rich-link" data-rich-link=""><a class="link-card" data-link-card=""#);
    out.push_str(kind);
    out.push_str(r#"" href=""#);
    escape_url_into(out, href.as_str());
    out.push_str(r#"" target="_blank" rel="noopener noreferrer"><span class="link-card-body">"#);
}

fn card_meta(out: &mut String, icon: &str, domain: &str) {
    out.push_str(r#"<span class="link-card-meta"><img class="link-card-icon" src=""#);
    escape_url_into(out, icon);
    out.push_str(r#"" alt="" loading="lazy" width="16" height="16" /><span class="link-card-domain">"#);
    out.push_str(&escape(domain));
    out.push_str("</span>");
}

/// Card built from the URL alone.
pub fn fallback_card(url: &Url) -> String {
    let mut out = String::new();
    card_open(&mut out, "fallback", url);
    out.push_str(r#"<span class="link-card-title">"#);
    out.push_str(&escape(&truncate_chars(&title_from_path(url), MAX_TITLE_CHARS)));
    out.push_str("</span>");
    card_meta(&mut out, &favicon_of(url), &domain_of(url));
    out.push_str("</span></span></a></div>");
    out
}

pub fn preview_card(preview: &LinkPreview) -> String {
    let mut out = String::new();
    card_open(&mut out, "preview", &preview.final_url);
    out.push_str(r#"<span class="link-card-title">"#);
    out.push_str(&escape(&preview.title));
    out.push_str("</span>");
    if let Some(description) = &preview.description {
        out.push_str(r#"<span class="link-card-description">"#);
        out.push_str(&escape(description));
        out.push_str("</span>");
    }
    card_meta(&mut out, &preview.icon, &preview.domain);
    if let Some(stars) = preview.stars {
        out.push_str(&format!(
            r#"<span class="link-card-stars" data-stars="{stars}">★ {}</span>"#,
            forge::format_count(stars)
        ));
    }
    if let Some(diff) = preview.diff {
        out.push_str(&format!(
            r#"<span class="link-card-diff"><span class="diff-add">+{}</span> <span class="diff-del">−{}</span></span>"#,
            diff.additions, diff.deletions
        ));
    }
    out.push_str("</span></span>");
    if let Some(image) = &preview.image {
        out.push_str(r#"<span class="link-card-image"><img src=""#);
        escape_url_into(&mut out, image);
        out.push_str(r#"" alt="" loading="lazy" decoding="async" /></span>"#);
    }
    out.push_str("</a></div>");
    out
}

/// Resolves rich-link placeholders into cards.
pub struct LinkPreviewer {
    fetcher: Arc<dyn Fetcher>,
    forge: ForgeStats,
    cache: Cache<String, LinkPreview>,
    timeout: Duration,
    max_bytes: usize,
    network: bool,
}

impl LinkPreviewer {
    pub fn new(config: &RenderConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        Ok(Self {
            forge: ForgeStats::new(config, fetcher.clone())?,
            fetcher,
            cache: cache::new_cache(config.preview_cache_capacity, config.preview_cache_ttl()),
            timeout: config.fetch_timeout(),
            max_bytes: config.max_preview_bytes,
            network: true,
        })
    }

    /// With the network off every non-embed link gets its fallback card.
    pub fn with_network(mut self, network: bool) -> Self {
        self.network = network;
        self
    }

    /// Markup for one bare link. Never fails.
    pub async fn resolve(&self, raw: &str, label: &str) -> String {
        self.resolve_with(raw, label, self.network).await
    }

    /// Like [`resolve`](Self::resolve), with the network switch given per call.
    pub async fn resolve_with(&self, raw: &str, label: &str, network: bool) -> String {
        if let Some(embed) = match_embed(raw) {
            return embed.to_html();
        }
        let url = match Url::parse(raw.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                tracing::debug!(url = raw, "not a fetchable link");
                let mut out = String::from("<p><a href=\"");
                escape_url_into(&mut out, raw);
                out.push_str("\">");
                out.push_str(&escape(label));
                out.push_str("</a></p>");
                return out;
            }
        };
        if !network || is_private_host(&url) {
            return fallback_card(&url);
        }
        match self.preview(&url, label).await {
            Ok(preview) => preview_card(&preview),
            Err(err) => {
                tracing::debug!(%err, url = %url, "link preview fell back");
                fallback_card(&url)
            }
        }
    }

    async fn preview(&self, url: &Url, label: &str) -> Result<LinkPreview, FetchError> {
        let key = canonical(url);
        if let Some(hit) = cache::get(&self.cache, &key) {
            return Ok(hit);
        }
        let page = tokio::time::timeout(self.timeout, self.fetcher.fetch_page(url, self.max_bytes))
            .await
            .map_err(|_| FetchError::Timeout)??;
        if !(200..300).contains(&page.status) {
            return Err(FetchError::Status(page.status));
        }
        if !page.is_html() {
            return Err(FetchError::NotHtml(page.content_type.unwrap_or_default()));
        }
        if is_private_host(&page.final_url) {
            return Err(FetchError::Blocked(page.final_url.to_string()));
        }

        let meta = parse_metadata(&page.body, &page.final_url);
        let final_url = page.final_url;
        let mut title = meta
            .title
            .filter(|t| !t.is_empty())
            .or_else(|| Some(label.trim().to_owned()).filter(|l| !l.is_empty() && l != url.as_str()))
            .unwrap_or_else(|| title_from_path(&final_url));
        let mut stars = None;
        let mut diff = None;
        if Forge::from_url(&final_url).is_some() {
            title = forge::normalize_title(&title);
            if let Some(target) = forge::classify(&final_url) {
                let (s, d) = tokio::join!(
                    self.forge.stars(&target),
                    self.forge.diff_stats(&target)
                );
                stars = s;
                diff = d;
            }
        }

        let preview = LinkPreview {
            domain: domain_of(&final_url),
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            description: meta.description,
            image: meta.image,
            icon: meta.icon.unwrap_or_else(|| favicon_of(&final_url)),
            stars,
            diff,
            final_url,
        };
        cache::insert(&self.cache, canonical(&preview.final_url), preview.clone());
        cache::insert(&self.cache, key, preview.clone());
        Ok(preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::fetch::FetchedPage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAGE: &str = r#"<!doctype html><html><head>
        <title>Fallback &amp; title</title>
        <meta property="og:title" content="Example &amp; Co">
        <meta name="description" content="A   plain description">
        <meta property="og:image" content="/img/card.png">
        <link rel="shortcut icon" href="/static/icon.png">
        </head><body><meta property="og:title" content="ignored"></body></html>"#;

    #[test]
    fn scrapes_head_metadata() {
        let base = Url::parse("https://example.com/blog/post").unwrap();
        let meta = parse_metadata(PAGE, &base);
        assert_eq!(meta.title.as_deref(), Some("Example & Co"));
        assert_eq!(meta.description.as_deref(), Some("A plain description"));
        assert_eq!(meta.image.as_deref(), Some("https://example.com/img/card.png"));
        assert_eq!(meta.icon.as_deref(), Some("https://example.com/static/icon.png"));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let html = format!(r#"<meta name="description" content="{}">"#, "word ".repeat(100));
        let meta = parse_metadata(&html, &Url::parse("https://a.example/").unwrap());
        assert!(meta.description.unwrap().chars().count() <= MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn fallback_card_uses_domain_and_path() {
        let url = Url::parse("https://www.example.com/posts/hello-world.html").unwrap();
        let card = fallback_card(&url);
        assert!(card.contains(r#"data-link-card="fallback""#));
        assert!(card.contains(r#"<span class="link-card-title">hello world</span>"#));
        assert!(card.contains(r#"<span class="link-card-domain">example.com</span>"#));
        assert!(card.contains("https://www.example.com/favicon.ico"));
    }

    struct Pages {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Fetcher for Pages {
        async fn fetch_page(&self, url: &Url, _: usize) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let (content_type, body) = match url.path() {
                "/pdf" => ("application/pdf", String::new()),
                _ => ("text/html; charset=utf-8", PAGE.to_owned()),
            };
            Ok(FetchedPage {
                final_url: url.clone(),
                status: 200,
                content_type: Some(content_type.into()),
                body,
            })
        }

        async fn fetch_json(
            &self,
            url: &Url,
            _: Option<&str>,
        ) -> Result<serde_json::Value, FetchError> {
            match url.path() {
                "/api/v4/projects/g%2Fp/merge_requests/12/diffs" => {
                    Ok(serde_json::json!([{ "diff": "@@ -1 +1,2 @@\n-a\n+b\n+c\n" }]))
                }
                _ => Err(FetchError::Status(404)),
            }
        }
    }

    fn previewer(delay: Duration, timeout_ms: u64) -> (LinkPreviewer, Arc<Pages>) {
        let pages = Arc::new(Pages {
            calls: AtomicUsize::new(0),
            delay,
        });
        let config = RenderConfig {
            fetch_timeout_ms: timeout_ms,
            ..Default::default()
        };
        (LinkPreviewer::new(&config, pages.clone()).unwrap(), pages)
    }

    #[tokio::test]
    async fn html_pages_become_preview_cards_and_are_cached() {
        let (previewer, pages) = previewer(Duration::ZERO, 1_000);
        let card = previewer.resolve("https://example.com/a", "https://example.com/a").await;
        assert!(card.contains(r#"data-link-card="preview""#));
        assert!(card.contains("Example &amp; Co"));
        previewer.resolve("https://example.com/a#top", "x").await;
        assert_eq!(pages.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_html_falls_back() {
        let (previewer, _) = previewer(Duration::ZERO, 1_000);
        let card = previewer.resolve("https://example.com/pdf", "doc").await;
        assert!(card.contains(r#"data-link-card="fallback""#));
        assert!(card.contains("example.com"));
    }

    #[tokio::test]
    async fn embeds_and_private_hosts_never_fetch() {
        let (previewer, pages) = previewer(Duration::ZERO, 1_000);
        let embed = previewer.resolve("https://youtu.be/dQw4w9WgXcQ", "video").await;
        assert!(embed.contains("<iframe"));
        let local = previewer.resolve("http://192.168.1.1/admin", "router").await;
        assert!(local.contains(r#"data-link-card="fallback""#));
        assert_eq!(pages.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_pages_time_out_to_fallback() {
        let (previewer, _) = previewer(Duration::from_millis(500), 20);
        let card = previewer.resolve("https://slow.example/", "slow").await;
        assert!(card.contains(r#"data-link-card="fallback""#));
    }

    #[tokio::test]
    async fn offline_previewer_only_builds_fallbacks() {
        let (previewer, pages) = previewer(Duration::ZERO, 1_000);
        let previewer = previewer.with_network(false);
        let card = previewer.resolve("https://example.com/", "x").await;
        assert!(card.contains(r#"data-link-card="fallback""#));
        assert_eq!(pages.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn merge_request_cards_show_line_counts() {
        let (previewer, _) = previewer(Duration::ZERO, 1_000);
        let card = previewer
            .resolve("https://gitlab.com/g/p/-/merge_requests/12", "mr")
            .await;
        assert!(card.contains(r#"data-link-card="preview""#));
        assert!(card.contains(r#"<span class="diff-add">+2</span>"#));
        assert!(card.contains(r#"<span class="diff-del">−1</span>"#));
        assert!(!card.contains("link-card-stars"));
    }
}
