//! Friend-link cards.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::utils::{escape, escape_url_into, is_http_url, is_root_relative};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendLink {
    pub name: String,
    pub url: String,
    pub avatar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub fn encode_payload(items: &[FriendLink]) -> String {
    // Serializing plain strings can't fail
    let json = serde_json::to_vec(items).unwrap_or_default();
    STANDARD.encode(json)
}

pub fn decode_payload(payload: &str) -> Option<Vec<FriendLink>> {
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn valid_target(url: &str) -> bool {
    is_http_url(url) && Url::parse(url).is_ok()
}

fn valid_avatar(src: &str) -> bool {
    valid_target(src) || is_root_relative(src)
}

/// Card grid for an encoded friend-link list.
///
/// Entries with an unusable URL are dropped. A payload that doesn't decode
/// renders as an empty grid.
pub fn render_friend_links(payload: &str) -> String {
    let Some(items) = decode_payload(payload) else {
        tracing::debug!("undecodable friend link payload");
        return r#"<div class="friend-links" data-friend-links=""></div>"#.to_owned();
    };
    let mut out = String::from(r#"<div class="friend-links" data-friend-links="">"#);
    for item in items.iter().filter(|i| valid_target(&i.url)) {
        out.push_str(r#"<a class="friend-link" href=""#);
        escape_url_into(&mut out, &item.url);
        out.push_str(r#"" target="_blank" rel="noopener noreferrer">"#);
        if valid_avatar(&item.avatar) {
            out.push_str(r#"<img class="friend-link-avatar" src=""#);
            escape_url_into(&mut out, &item.avatar);
            out.push_str(&format!(
                r#"" alt="{}" loading="lazy" width="64" height="64" />"#,
                escape(&item.name)
            ));
        }
        out.push_str(r#"<span class="friend-link-body"><span class="friend-link-name">"#);
        out.push_str(&escape(&item.name));
        out.push_str("</span>");
        if let Some(description) = &item.description {
            out.push_str(r#"<span class="friend-link-description">"#);
            out.push_str(&escape(description));
            out.push_str("</span>");
        }
        out.push_str("</span></a>");
    }
    out.push_str("</div>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(name: &str, url: &str) -> FriendLink {
        FriendLink {
            name: name.into(),
            url: url.into(),
            avatar: "https://img.example/a.png".into(),
            description: Some("<b>hi</b>".into()),
        }
    }

    #[test]
    fn payload_survives_encoding() {
        let items = vec![link("Ann", "https://ann.dev")];
        assert_eq!(decode_payload(&encode_payload(&items)), Some(items));
        assert_eq!(decode_payload("not base64!"), None);
    }

    #[test]
    fn invalid_urls_are_dropped() {
        let payload = encode_payload(&[
            link("Ann", "https://ann.dev"),
            link("Evil", "javascript:alert(1)"),
        ]);
        let html = render_friend_links(&payload);
        assert!(html.contains("Ann"));
        assert!(!html.contains("Evil"));
        assert!(html.contains("&lt;b&gt;hi&lt;/b&gt;"));
    }

    #[test]
    fn garbage_payload_renders_empty_grid() {
        assert_eq!(
            render_friend_links("%%%"),
            r#"<div class="friend-links" data-friend-links=""></div>"#
        );
    }
}
