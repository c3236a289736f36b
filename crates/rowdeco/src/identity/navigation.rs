//! Thread ids from navigation URLs.

use percent_encoding::percent_decode_str;
use url::form_urlencoded;

/// `th` query parameter of `url`. Draft URLs carry it inside the fragment, encoded twice.
pub fn thread_id_from_url(url: &str) -> Option<String> {
    if let Some(thread_id) = query_param(url, "th") {
        return Some(thread_id);
    }
    let (_, fragment) = url.split_once('#')?;
    let once = percent_decode_str(fragment).decode_utf8_lossy();
    let decoded = percent_decode_str(&once).decode_utf8_lossy();
    query_param(&decoded, "th")
}

/// Looks for `name` in whatever follows the first `?` (the whole text when there is
/// none), up to a `#`.
fn query_param(text: &str, name: &str) -> Option<String> {
    let query = text.split_once('?').map_or(text, |(_, query)| query);
    let query = query.split('#').next().unwrap_or_default();
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
