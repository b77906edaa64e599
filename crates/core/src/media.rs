//! Media type resolution for uploads.
//!
//! A media type declared by the client is authoritative; its parameters (`; charset=...`) are
//! dropped and it is compared case-insensitively. When nothing is declared the leading bytes of
//! the content are sniffed with [`infer`].

/// Lowercases a media type and strips any parameters.
pub fn normalise_media_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Guesses a media type from magic bytes.
pub fn sniff_media_type(content: &[u8]) -> Option<&'static str> {
    infer::get(content).map(|kind| kind.mime_type())
}

/// Picks the media type an upload is judged by, or `None` if it cannot be determined.
pub fn effective_media_type(declared: Option<&str>, content: &[u8]) -> Option<String> {
    match declared.map(normalise_media_type) {
        Some(declared) if !declared.is_empty() => Some(declared),
        _ => sniff_media_type(content).map(str::to_owned),
    }
}
