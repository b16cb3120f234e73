//! Trusted embed providers.
//!
//! The same host list decides which links become iframes and which iframe
//! sources survive sanitizing.

use url::Url;

use crate::utils::{escape, is_root_relative};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    YouTube,
    Bilibili,
    Vimeo,
    CodeSandbox,
    CodePen,
    StackBlitz,
    Figma,
    /// A same-origin page referenced by a root-relative path.
    Local,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::YouTube => "youtube",
            Provider::Bilibili => "bilibili",
            Provider::Vimeo => "vimeo",
            Provider::CodeSandbox => "codesandbox",
            Provider::CodePen => "codepen",
            Provider::StackBlitz => "stackblitz",
            Provider::Figma => "figma",
            Provider::Local => "local",
        }
    }

    fn is_video(self) -> bool {
        matches!(self, Provider::YouTube | Provider::Bilibili | Provider::Vimeo)
    }
}

/// Hosts allowed as iframe sources.
pub const TRUSTED_IFRAME_HOSTS: &[&str] = &[
    "www.youtube-nocookie.com",
    "www.youtube.com",
    "player.bilibili.com",
    "player.vimeo.com",
    "codesandbox.io",
    "codepen.io",
    "stackblitz.com",
    "www.figma.com",
];

/// Same-origin path prefixes an iframe may load.
pub const LOCAL_EMBED_PREFIXES: &[&str] = &["/demos/", "/embeds/", "/playground/"];

/// Value forced onto every iframe.
pub const IFRAME_SANDBOX: &str =
    "allow-scripts allow-same-origin allow-popups allow-presentation allow-forms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub provider: Provider,
    pub src: String,
}

impl Embed {
    pub fn to_html(&self) -> String {
        let kind = if self.provider.is_video() {
            "video"
        } else {
            "app"
        };
        format!(
            r#"<div class="embed embed-{kind}" data-embed="{provider}"><iframe src="{src}" title="{provider} embed" loading="lazy" sandbox="{IFRAME_SANDBOX}" allow="fullscreen; picture-in-picture; clipboard-write" allowfullscreen referrerpolicy="strict-origin-when-cross-origin"></iframe></div>"#,
            provider = self.provider.as_str(),
            src = escape(&self.src),
        )
    }
}

fn host_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
}

fn segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default()
}

fn is_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Recognise a provider page and return its embeddable form.
pub fn match_embed(raw: &str) -> Option<Embed> {
    let url = Url::parse(raw.trim()).ok()?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return None;
    }
    let host = host_of(&url)?;
    let segs = segments(&url);
    let embed = |provider, src: String| Some(Embed { provider, src });

    match host.as_str() {
        "youtube.com" | "m.youtube.com" => {
            let id = match segs.as_slice() {
                ["watch"] => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned())?,
                ["embed" | "shorts" | "live", id] => (*id).to_owned(),
                _ => return None,
            };
            is_id(&id).then_some(())?;
            embed(
                Provider::YouTube,
                format!("https://www.youtube-nocookie.com/embed/{id}"),
            )
        }
        "youtu.be" => match segs.as_slice() {
            [id] if is_id(id) => embed(
                Provider::YouTube,
                format!("https://www.youtube-nocookie.com/embed/{id}"),
            ),
            _ => None,
        },
        "bilibili.com" | "m.bilibili.com" => match segs.as_slice() {
            ["video", id, ..] if id.starts_with("BV") && is_id(id) => embed(
                Provider::Bilibili,
                format!("https://player.bilibili.com/player.html?bvid={id}&autoplay=0"),
            ),
            _ => None,
        },
        "vimeo.com" => match segs.as_slice() {
            [id] if id.bytes().all(|b| b.is_ascii_digit()) && !id.is_empty() => embed(
                Provider::Vimeo,
                format!("https://player.vimeo.com/video/{id}"),
            ),
            _ => None,
        },
        "codesandbox.io" => match segs.as_slice() {
            ["s", id] | ["p", "sandbox", id] | ["embed", id] if is_id(id) => embed(
                Provider::CodeSandbox,
                format!("https://codesandbox.io/embed/{id}"),
            ),
            _ => None,
        },
        "codepen.io" => match segs.as_slice() {
            [user, "pen" | "embed", id] if is_id(user) && is_id(id) => embed(
                Provider::CodePen,
                format!("https://codepen.io/{user}/embed/{id}?default-tab=result"),
            ),
            _ => None,
        },
        "stackblitz.com" => match segs.as_slice() {
            ["edit", id] if is_id(id) => embed(
                Provider::StackBlitz,
                format!("https://stackblitz.com/edit/{id}?embed=1"),
            ),
            _ => None,
        },
        "figma.com" => match segs.as_slice() {
            ["file" | "design" | "proto", ..] => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(url.as_str().as_bytes()).collect();
                embed(
                    Provider::Figma,
                    format!("https://www.figma.com/embed?embed_host=share&url={encoded}"),
                )
            }
            _ => None,
        },
        _ => None,
    }
}

/// The target of an `embed` code block: a provider page or a same-origin path.
pub fn match_embed_source(raw: &str) -> Option<Embed> {
    let raw = raw.trim();
    if is_local_embed_path(raw) {
        return Some(Embed {
            provider: Provider::Local,
            src: raw.to_owned(),
        });
    }
    if let Some(embed) = match_embed(raw) {
        return Some(embed);
    }
    // Already an embeddable URL on a trusted host.
    is_trusted_iframe_src(raw).then(|| Embed {
        provider: Provider::Local,
        src: raw.to_owned(),
    })
}

/// A same-origin path under one of [`LOCAL_EMBED_PREFIXES`].
pub fn is_local_embed_path(path: &str) -> bool {
    is_root_relative(path)
        && LOCAL_EMBED_PREFIXES.iter().any(|p| path.starts_with(p))
        && !path.contains(['"', '\'', '<', '>', ' ', '\\', '%'])
        && !path.split(['/', '?', '#']).any(|seg| seg == "..")
}

/// Whether an iframe may load `src`.
pub fn is_trusted_iframe_src(src: &str) -> bool {
    let src = src.trim();
    if is_root_relative(src) {
        return is_local_embed_path(src);
    }
    match Url::parse(src) {
        Ok(url) => {
            url.scheme() == "https"
                && url
                    .host_str()
                    .is_some_and(|h| TRUSTED_IFRAME_HOSTS.contains(&h.to_ascii_lowercase().as_str()))
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_variants_use_nocookie_host() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtube.com/embed/dQw4w9WgXcQ",
        ] {
            let embed = match_embed(url).unwrap();
            assert_eq!(embed.provider, Provider::YouTube);
            assert_eq!(embed.src, "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ");
        }
    }

    #[test]
    fn non_provider_pages_are_not_embeds() {
        assert_eq!(match_embed("https://example.com/watch?v=abc"), None);
        assert_eq!(match_embed("https://www.youtube.com/feed/trending"), None);
        assert_eq!(match_embed("javascript:alert(1)"), None);
    }

    #[test]
    fn embed_code_block_sources() {
        assert_eq!(
            match_embed_source("/demos/canvas.html").unwrap().provider,
            Provider::Local
        );
        assert_eq!(match_embed_source("//evil.example/x"), None);
        assert_eq!(match_embed_source("/api/session"), None);
        assert_eq!(match_embed_source("https://evil.example/x"), None);
        assert_eq!(
            match_embed_source("https://codepen.io/someone/pen/abcDEF")
                .unwrap()
                .src,
            "https://codepen.io/someone/embed/abcDEF?default-tab=result"
        );
    }

    #[test]
    fn iframe_sources_are_checked_against_trusted_hosts() {
        assert!(is_trusted_iframe_src("https://player.vimeo.com/video/1"));
        assert!(is_trusted_iframe_src("/demos/x.html"));
        assert!(!is_trusted_iframe_src("/api/x"));
        assert!(!is_trusted_iframe_src("/demos/../api/x"));
        assert!(!is_trusted_iframe_src("/demos/%2e%2e/api"));
        assert!(!is_trusted_iframe_src("http://player.vimeo.com/video/1"));
        assert!(!is_trusted_iframe_src("https://evil.example/"));
        assert!(!is_trusted_iframe_src("//player.vimeo.com/video/1"));
    }

    #[test]
    fn markup_is_sandboxed() {
        let html = match_embed("https://vimeo.com/42").unwrap().to_html();
        assert!(html.contains(r#"sandbox="allow-scripts"#));
        assert!(html.contains(r#"data-embed="vimeo""#));
    }
}
