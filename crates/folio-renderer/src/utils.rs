use std::net::IpAddr;
use std::sync::LazyLock;

use markdown_weaver_escape::{escape_href, escape_html};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Escape `s` for use in text or a double-quoted attribute.
///
/// Covers `& < > " '`. Input is always raw text: the grammar decodes entity
/// references up front, so nothing here is ever escaped twice.
pub fn escape_into(out: &mut String, s: &str) {
    let mut rest = s;
    while let Some(idx) = rest.find('\'') {
        // String writes can't fail
        let _ = escape_html(&mut *out, &rest[..idx]);
        out.push_str("&#39;");
        rest = &rest[idx + 1..];
    }
    let _ = escape_html(&mut *out, rest);
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 8);
    escape_into(&mut out, s);
    out
}

/// Percent-encode a URL for an `href`/`src` attribute. The output is
/// already safe inside double quotes.
pub fn escape_url_into(out: &mut String, url: &str) {
    let _ = escape_href(&mut *out, url);
}

/// Schemes that open in a new browsing context.
pub fn is_external(href: &str) -> bool {
    let lower = href.trim_start().to_ascii_lowercase();
    ["http://", "https://", "mailto:", "tel:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

pub fn is_http_url(href: &str) -> bool {
    let lower = href.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// `/path` but not the scheme-relative `//host/path`.
pub fn is_root_relative(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//")
}

/// Hostnames that must never be fetched server-side.
pub fn is_private_host(url: &Url) -> bool {
    use url::Host;
    match url.host() {
        None => true,
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
                || !domain.contains('.')
        }
        Some(Host::Ipv4(ip)) => is_private_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_private_ip(IpAddr::V6(ip)),
    }
}

/// Addresses outbound fetches must never reach.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => {
            ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
                || ip.octets()[0] == 0
                || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(ip) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || ip
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

/// Turn heading text into an id fragment.
///
/// Letters and digits of any script survive (after NFKC), whitespace and
/// separators become single dashes, everything else is dropped.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.nfkc().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' || c == '.' || c == '/' {
            pending_dash = true;
        }
    }
    slug
}

/// Decode one entity reference at the start of `s` (which begins with `&`).
///
/// Returns the decoded text and the number of bytes consumed.
pub fn decode_entity(s: &str) -> Option<(String, usize)> {
    let end = s[1..].find(';')? + 1;
    if end > 32 {
        return None;
    }
    let name = &s[1..end];
    let decoded = if let Some(num) = name.strip_prefix('#') {
        let code = if let Some(hex) = num.strip_prefix(['x', 'X']) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            num.parse::<u32>().ok()?
        };
        let c = char::from_u32(code).filter(|c| *c != '\0').unwrap_or('\u{FFFD}');
        c.to_string()
    } else {
        let c = match name {
            "amp" => "&",
            "lt" => "<",
            "gt" => ">",
            "quot" => "\"",
            "apos" => "'",
            "nbsp" => "\u{a0}",
            "ndash" => "\u{2013}",
            "mdash" => "\u{2014}",
            "hellip" => "\u{2026}",
            "copy" => "\u{a9}",
            "reg" => "\u{ae}",
            "trade" => "\u{2122}",
            "middot" => "\u{b7}",
            "laquo" => "\u{ab}",
            "raquo" => "\u{bb}",
            "lsquo" => "\u{2018}",
            "rsquo" => "\u{2019}",
            "ldquo" => "\u{201c}",
            "rdquo" => "\u{201d}",
            _ => return None,
        };
        c.to_string()
    };
    Some((decoded, end + 1))
}

/// Decode every recognised entity reference in `s`; unknown ones stay as written.
pub fn decode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        match decode_entity(rest) {
            Some((decoded, used)) => {
                out.push_str(&decoded);
                rest = &rest[used..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Plain text of an HTML fragment, whitespace collapsed.
pub fn strip_tags(html: &str) -> String {
    let text = decode_entities(&TAG_RE.replace_all(html, ""));
    collapse_whitespace(&text)
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `s` to at most `max` chars, adding an ellipsis when shortened.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.truncate(out.trim_end().len());
    out.push('\u{2026}');
    out
}
