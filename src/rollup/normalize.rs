//! Normalize and Replace stages.

use url::Url;

use crate::fact::Fact;

/// A URL the normalizer cannot rebuild. The record carrying it is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedUrl {
    #[error("Unparsable URL {input:?}: {reason}")]
    Unparsable { input: String, reason: String },

    #[error("URL has no host: {0:?}")]
    MissingHost(String),
}

/// Rebuild `raw` from scheme, host and path only.
///
/// Query, fragment, port and user info are discarded. The host is in the
/// parser's canonical form (lowercase for web schemes) and an empty path on
/// a web URL becomes `/`.
pub fn normalize_url(raw: &str) -> Result<String, MalformedUrl> {
    let url = Url::parse(raw).map_err(|e| MalformedUrl::Unparsable {
        input: raw.to_string(),
        reason: e.to_string(),
    })?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MalformedUrl::MissingHost(raw.to_string()))?;

    Ok(format!("{}://{}{}", url.scheme(), host, url.path()))
}

/// The fact with its page URL replaced by `normalized`.
pub fn replace_url(fact: Fact, normalized: impl Into<String>) -> Fact {
    fact.with_page_url(normalized)
}
