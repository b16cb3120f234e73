//! Custom emoji tokens of the form `::group:name::`.

/// Maps an emoji token to an image source.
pub trait EmojiResolver: Send + Sync {
    /// `None` leaves the token as literal text.
    fn resolve(&self, group: &str, name: &str) -> Option<String>;
}

/// Resolves every well-formed token to `{base}/{group}/{name}.png`.
#[derive(Debug, Clone)]
pub struct AssetEmojiResolver {
    base: String,
}

impl AssetEmojiResolver {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }
}

impl EmojiResolver for AssetEmojiResolver {
    fn resolve(&self, group: &str, name: &str) -> Option<String> {
        if !is_identifier(group) || !is_identifier(name) {
            return None;
        }
        Some(format!("{}/{group}/{name}.png", self.base))
    }
}

/// Resolves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmoji;

impl EmojiResolver for NoEmoji {
    fn resolve(&self, _group: &str, _name: &str) -> Option<String> {
        None
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && !s.starts_with('.')
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'+'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_well_formed_tokens() {
        let resolver = AssetEmojiResolver::new("/emoji/");
        assert_eq!(
            resolver.resolve("blobs", "blob_happy").as_deref(),
            Some("/emoji/blobs/blob_happy.png")
        );
    }

    #[test]
    fn rejects_traversal_and_separators() {
        let resolver = AssetEmojiResolver::new("/emoji");
        assert_eq!(resolver.resolve("..", "x"), None);
        assert_eq!(resolver.resolve("a/b", "x"), None);
        assert_eq!(resolver.resolve("a", "x\"onload"), None);
        assert_eq!(resolver.resolve("", "x"), None);
    }
}
