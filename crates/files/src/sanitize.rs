//! Client path sanitisation.
//!
//! Every path that arrives from outside the process (upload target directory, `/storage/*`
//! wildcard, JSON `path` fields, CLI arguments) goes through [`sanitize`] before it is used as a
//! filesystem location or an index key.

use crate::constants::{MAX_DECODE_ROUNDS, MAX_PATH_DEPTH, MAX_SEGMENT_BYTES};
use crate::FilesError;
use percent_encoding::percent_decode_str;
use std::fmt;

/// A storage-root-relative path that has passed [`sanitize`].
///
/// - Segments are separated by a single `/`, with no leading or trailing separator.
/// - No segment is empty, `.` or `..`.
/// - The empty path denotes the storage root itself.
///
/// Because the same logical path always sanitises to the same string, a `CanonicalPath` is used
/// verbatim as the token index key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    /// The storage root.
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the path's segments, root first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// First segment, or `None` for the root.
    pub fn first_segment(&self) -> Option<&str> {
        self.segments().next()
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<CanonicalPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Some(Self(parent.to_owned())),
            None => Some(Self::root()),
        }
    }

    /// Appends a single name read back from the filesystem.
    ///
    /// Callers only pass names obtained from directory listings or generated internally, which
    /// can never contain a separator or be `.`/`..`.
    pub(crate) fn child(&self, name: &str) -> CanonicalPath {
        debug_assert!(!name.is_empty() && !name.contains('/') && name != "." && name != "..");
        if self.is_root() {
            Self(name.to_owned())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for CanonicalPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// Normalises and validates a client-supplied relative path.
///
/// - `\` is treated as a separator and rewritten to `/`.
/// - Repeated separators, leading/trailing separators and `.` segments are dropped.
/// - A segment that is `..`, or that percent-decodes (repeatedly) to `..`, `.` or to anything
///   containing a separator or NUL, is rejected.
/// - Segment length and path depth are bounded.
///
/// An empty or separator-only input yields [`CanonicalPath::root`].
///
/// # Errors
///
/// Returns [`FilesError::InvalidPath`] if any rule above is violated.
pub fn sanitize(raw: &str) -> Result<CanonicalPath, FilesError> {
    if raw.contains('\0') {
        return Err(FilesError::InvalidPath("path contains a NUL byte".into()));
    }

    let normalised = raw.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in normalised.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }

        if segment.len() > MAX_SEGMENT_BYTES {
            return Err(FilesError::InvalidPath(format!(
                "path segment exceeds {} bytes",
                MAX_SEGMENT_BYTES
            )));
        }

        let decoded = fully_decode(segment);
        if decoded == ".." {
            return Err(FilesError::InvalidPath(format!(
                "parent traversal is not allowed: '{}'",
                raw
            )));
        }
        if decoded == "." || decoded.contains(['/', '\\', '\0']) {
            return Err(FilesError::InvalidPath(format!(
                "encoded path segment is not allowed: '{}'",
                segment
            )));
        }

        segments.push(segment);
    }

    if segments.len() > MAX_PATH_DEPTH {
        return Err(FilesError::InvalidPath(format!(
            "path exceeds maximum depth of {}",
            MAX_PATH_DEPTH
        )));
    }

    Ok(CanonicalPath(segments.join("/")))
}

fn fully_decode(segment: &str) -> String {
    let mut current = segment.to_owned();
    for _ in 0..MAX_DECODE_ROUNDS {
        let next = percent_decode_str(&current).decode_utf8_lossy().into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(raw: &str) -> String {
        sanitize(raw).unwrap().as_str().to_owned()
    }

    #[test]
    fn test_sanitize_plain_paths() {
        assert_eq!(ok("users"), "users");
        assert_eq!(ok("users/reports/2024"), "users/reports/2024");
        assert_eq!(ok("report.pdf"), "report.pdf");
    }

    #[test]
    fn test_sanitize_normalises_separators() {
        assert_eq!(ok("users\\reports"), "users/reports");
        assert_eq!(ok("/users//reports/"), "users/reports");
        assert_eq!(ok("./users/./reports/."), "users/reports");
        assert_eq!(ok("users\\/\\reports"), "users/reports");
    }

    #[test]
    fn test_sanitize_same_logical_path_same_key() {
        let variants = ["a/b/c", "/a/b/c", "a\\b\\c", "a//b/./c/", "\\a\\b\\c\\"];
        for v in variants {
            assert_eq!(ok(v), "a/b/c", "variant {}", v);
        }
    }

    #[test]
    fn test_sanitize_empty_is_root() {
        assert!(sanitize("").unwrap().is_root());
        assert!(sanitize("/").unwrap().is_root());
        assert!(sanitize("\\//./").unwrap().is_root());
    }

    #[test]
    fn test_sanitize_rejects_parent_traversal() {
        let attempts = [
            "..",
            "../etc/passwd",
            "users/../../etc",
            "users/..",
            "..\\..\\windows",
            "a/b/../../../c",
            "....//../x",
        ];
        for a in attempts {
            assert!(
                matches!(sanitize(a), Err(FilesError::InvalidPath(_))),
                "should reject {}",
                a
            );
        }
    }

    #[test]
    fn test_sanitize_rejects_encoded_traversal() {
        let attempts = [
            "%2e%2e/secret",
            "%2E%2E/secret",
            "users/%2e%2e",
            ".%2e/x",
            "%252e%252e/x",
            "%25252e%25252e/x",
            "users%2f..%2fetc",
            "users%5c..",
            "a/%2e/b",
        ];
        for a in attempts {
            assert!(
                matches!(sanitize(a), Err(FilesError::InvalidPath(_))),
                "should reject {}",
                a
            );
        }
    }

    #[test]
    fn test_sanitize_allows_dots_inside_names() {
        assert_eq!(ok("archive.tar.gz"), "archive.tar.gz");
        assert_eq!(ok("...hidden"), "...hidden");
        assert_eq!(ok("a..b/c"), "a..b/c");
        assert_eq!(ok(".config/x"), ".config/x");
    }

    #[test]
    fn test_sanitize_keeps_literal_percent() {
        assert_eq!(ok("100%/done"), "100%/done");
        assert_eq!(ok("a%20b"), "a%20b");
    }

    #[test]
    fn test_sanitize_rejects_nul() {
        assert!(sanitize("users/\0/x").is_err());
        assert!(sanitize("users/%00").is_err());
    }

    #[test]
    fn test_sanitize_bounds_depth_and_segment() {
        let deep = vec!["d"; MAX_PATH_DEPTH + 1].join("/");
        assert!(sanitize(&deep).is_err());

        let ok_deep = vec!["d"; MAX_PATH_DEPTH].join("/");
        assert!(sanitize(&ok_deep).is_ok());

        let long = "x".repeat(MAX_SEGMENT_BYTES + 1);
        assert!(sanitize(&long).is_err());
    }

    #[test]
    fn test_canonical_path_navigation() {
        let path = sanitize("a/b/c.txt").unwrap();

        assert_eq!(path.first_segment(), Some("a"));
        assert_eq!(path.file_name(), Some("c.txt"));
        assert_eq!(path.segments().collect::<Vec<_>>(), vec!["a", "b", "c.txt"]);

        let parent = path.parent().unwrap();
        assert_eq!(parent.as_str(), "a/b");
        let grandparent = parent.parent().unwrap();
        assert_eq!(grandparent.as_str(), "a");
        let root = grandparent.parent().unwrap();
        assert!(root.is_root());
        assert!(root.parent().is_none());
        assert_eq!(root.file_name(), None);
    }

    #[test]
    fn test_canonical_path_child() {
        assert_eq!(CanonicalPath::root().child("a").as_str(), "a");
        assert_eq!(sanitize("a/b").unwrap().child("c").as_str(), "a/b/c");
    }

    #[test]
    fn test_canonical_path_serialises_as_string() {
        let path = sanitize("users/x.pdf").unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"users/x.pdf\"");
    }
}
