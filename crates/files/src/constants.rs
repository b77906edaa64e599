//! Limits applied to paths and stored names.

/// Maximum number of segments in a canonical path.
pub const MAX_PATH_DEPTH: usize = 64;

/// Maximum length in bytes of a single path segment (common filesystem limit).
pub const MAX_SEGMENT_BYTES: usize = 255;

/// Number of percent-decoding rounds applied when looking for hidden traversal.
pub(crate) const MAX_DECODE_ROUNDS: usize = 4;

/// Longest file extension carried over from a display name to a stored name.
pub(crate) const MAX_EXTENSION_LEN: usize = 16;

/// Attempts at finding an unused stored name before giving up.
pub(crate) const MAX_PLACE_ATTEMPTS: usize = 5;
