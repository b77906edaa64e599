//! Constants used throughout the Filegate core crate.

/// Environment variable naming the HTTP bind address.
pub const ENV_ADDR: &str = "FILEGATE_ADDR";
/// Environment variable naming the storage root.
pub const ENV_STORAGE_ROOT: &str = "FILEGATE_STORAGE_ROOT";
/// Environment variable naming the SQLite token index file.
pub const ENV_INDEX_PATH: &str = "FILEGATE_INDEX_PATH";
/// Environment variable holding the request body limit in bytes.
pub const ENV_MAX_BODY_BYTES: &str = "FILEGATE_MAX_BODY_BYTES";
/// Environment variable holding the origin prepended to generated URLs.
pub const ENV_PUBLIC_BASE_URL: &str = "FILEGATE_PUBLIC_BASE_URL";
/// Environment variable holding a comma-separated media type allow-list.
pub const ENV_ALLOWED_MEDIA_TYPES: &str = "FILEGATE_ALLOWED_MEDIA_TYPES";

/// Default storage root when no explicit directory is configured.
pub const DEFAULT_STORAGE_ROOT: &str = "uploads";

/// Default location of the SQLite token index.
pub const DEFAULT_INDEX_PATH: &str = "filegate.sqlite3";

/// Default bind address for the HTTP server.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4000";

/// Default upper bound on a request body (500 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 500 * 1024 * 1024;

/// Attempts at minting a token that is not already in the index.
pub const MAX_TOKEN_ATTEMPTS: usize = 5;

/// Longest display name accepted on upload, in bytes.
pub const MAX_DISPLAY_NAME_BYTES: usize = 255;

/// Number of idle per-scope locks tolerated before the lock table is swept.
pub(crate) const LOCK_SWEEP_THRESHOLD: usize = 64;

/// Media types accepted for upload unless overridden by configuration.
pub const DEFAULT_ALLOWED_MEDIA_TYPES: &[&str] = &[
    // Images
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/bmp",
    "image/tiff",
    // Documents
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    "application/rtf",
    "text/plain",
    "application/vnd.ms-access",
    // Audio
    "audio/mpeg",
    "audio/wav",
    "audio/ogg",
    "audio/aac",
    "audio/midi",
    // Video
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/avi",
    "video/quicktime",
    "video/x-matroska",
    // Archives
    "application/zip",
    "application/x-tar",
    "application/gzip",
    "application/x-7z-compressed",
    // Structured text and web assets
    "application/json",
    "application/jwk+json",
    "application/xml",
    "text/csv",
    "text/html",
    "text/css",
    "application/javascript",
    // Fonts
    "font/woff",
    "font/woff2",
];
