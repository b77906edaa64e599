//! View and download URL construction.

use filegate_core::{AccessToken, CanonicalPath};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped within a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encodes each segment of `path` and joins them with `/`.
pub fn encode_path(path: &CanonicalPath) -> String {
    path.segments()
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// `<base>/storage/<path>?token=<token>`
pub fn view_url(base: &str, path: &CanonicalPath, token: &AccessToken) -> String {
    format!("{}/storage/{}?token={}", base, encode_path(path), token)
}

/// `<base>/download/<path>?token=<token>`
pub fn download_url(base: &str, path: &CanonicalPath, token: &AccessToken) -> String {
    format!("{}/download/{}?token={}", base, encode_path(path), token)
}
