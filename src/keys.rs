//! Key path and form body encoding

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::form_urlencoded;
use url::Url;

use crate::error::{Error, Result};

/// Prefix of the v2 keys API, relative to the base URL.
pub const KEYS_PREFIX: &str = "v2/keys";

/// Characters left unescaped in a key segment: the RFC 3986 unreserved set.
/// `/` is escaped too, so a segment can never introduce another level.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a single key segment.
fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, KEY_SEGMENT).to_string()
}

/// Normalize a base URL so that relative paths resolve below it.
pub fn normalize_base(endpoint: &str) -> Result<Url> {
    let mut endpoint = endpoint.trim().to_string();
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }
    let url = Url::parse(&endpoint)
        .map_err(|e| Error::InvalidUrl(format!("Invalid endpoint URL '{}': {}", endpoint, e)))?;
    if url.cannot_be_a_base() {
        return Err(Error::InvalidUrl(format!(
            "Endpoint URL '{}' cannot be used as a base",
            endpoint
        )));
    }
    Ok(url)
}

/// Build the relative path for `key` below `prefix`.
///
/// One leading `/` is stripped, the rest is split on `/` and every token is
/// escaped on its own. `suffix` is appended verbatim.
pub fn key_path(prefix: &str, key: &str, suffix: &str) -> String {
    let key = key.strip_prefix('/').unwrap_or(key);

    let mut path = String::with_capacity(prefix.len() + key.len() + suffix.len() + 1);
    path.push_str(prefix);
    for token in key.split('/') {
        path.push('/');
        path.push_str(&encode_segment(token));
    }
    path.push_str(suffix);
    path
}

/// Resolve the path for `key` against `base`.
pub fn build_key_uri(base: &Url, prefix: &str, key: &str, suffix: &str) -> Result<Url> {
    let path = key_path(prefix, key, suffix);
    base.join(&path)
        .map_err(|e| Error::InvalidUrl(format!("Invalid request path '{}': {}", path, e)))
}

/// Encode fields as an `application/x-www-form-urlencoded` body, keeping order.
pub fn encode_form<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
