//! Share links derived from reply text.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left unescaped: alphanumerics plus `-_.~/`, the same set a
/// URL path component keeps.
const PATH_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Default intent endpoint.
pub const TWITTER_INTENT_URL: &str = "https://twitter.com/intent/tweet";

/// Appends a markdown link that pre-fills a post with the reply text.
#[derive(Debug, Clone)]
pub struct ShareLink {
    base_url: String,
    label: String,
}

impl Default for ShareLink {
    fn default() -> Self {
        Self::new(TWITTER_INTENT_URL, "Post to Twitter")
    }
}

impl ShareLink {
    /// A link to `base_url?text=...` shown as `label`.
    pub fn new(base_url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            label: label.into(),
        }
    }

    /// The intent URL for `text`.
    pub fn url(&self, text: &str) -> String {
        format!(
            "{}?text={}",
            self.base_url,
            utf8_percent_encode(text, PATH_COMPONENT)
        )
    }

    /// `text` followed by the markdown link.
    pub fn annotate(&self, text: &str) -> String {
        format!("{text}\n\n[{}]({})", self.label, self.url(text))
    }
}
