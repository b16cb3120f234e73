//! Reader comments.
//!
//! Comments share the grammar and the HTML writer with articles but use the
//! reduced dialect, skip enrichment entirely and go through the narrower
//! sanitizer profile. Nothing in a comment can cause an outbound request.

use crate::context::Dialect;
use crate::emoji::EmojiResolver;
use crate::image::ImageTransform;
use crate::refs::ReferenceTable;
use crate::sanitize::sanitize_comment;

#[tracing::instrument(level = "debug", skip_all, fields(len = source.len()))]
pub fn render_comment(
    source: &str,
    images: &dyn ImageTransform,
    emoji: &dyn EmojiResolver,
) -> String {
    if source.trim().is_empty() {
        return String::new();
    }
    let refs = ReferenceTable::build(source);
    let rendered = crate::compile(source, Dialect::Comment, &refs, emoji, images);
    if !rendered.placeholders.is_empty() {
        tracing::warn!(
            count = rendered.placeholders.len(),
            "comment produced placeholders; leaving stubs"
        );
    }
    sanitize_comment(&rendered.html)
}
