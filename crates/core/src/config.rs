//! Storage runtime configuration.
//!
//! Configuration is resolved once at process startup (see the `*_from_env_value` helpers) and
//! then passed into [`crate::StorageService`]. Request handling never reads environment
//! variables.

use crate::constants::{
    DEFAULT_ALLOWED_MEDIA_TYPES, DEFAULT_INDEX_PATH, DEFAULT_MAX_BODY_BYTES, DEFAULT_STORAGE_ROOT,
};
use crate::media::normalise_media_type;
use crate::{StorageError, StorageResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Storage configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    storage_root: PathBuf,
    index_path: PathBuf,
    allowed_media_types: BTreeSet<String>,
    max_body_bytes: usize,
    public_base_url: String,
}

impl StorageConfig {
    /// Create a new `StorageConfig`.
    ///
    /// `storage_root` must already exist. The index file must live outside of it, otherwise it
    /// would show up in listings and could be deleted through the API.
    pub fn new(
        storage_root: PathBuf,
        index_path: PathBuf,
        allowed_media_types: Vec<String>,
        max_body_bytes: usize,
        public_base_url: String,
    ) -> StorageResult<Self> {
        if !storage_root.is_dir() {
            return Err(StorageError::InvalidConfig(format!(
                "storage root is not a directory: {}",
                storage_root.display()
            )));
        }

        if max_body_bytes == 0 {
            return Err(StorageError::InvalidConfig(
                "max_body_bytes must be greater than zero".into(),
            ));
        }

        let allowed_media_types: BTreeSet<String> = allowed_media_types
            .iter()
            .map(|m| normalise_media_type(m))
            .filter(|m| !m.is_empty())
            .collect();
        if allowed_media_types.is_empty() {
            return Err(StorageError::InvalidConfig(
                "at least one media type must be allowed".into(),
            ));
        }

        if is_inside(&storage_root, &index_path) {
            return Err(StorageError::InvalidConfig(format!(
                "token index {} must not live inside the storage root",
                index_path.display()
            )));
        }

        Ok(Self {
            storage_root,
            index_path,
            allowed_media_types,
            max_body_bytes,
            public_base_url: public_base_url.trim().trim_end_matches('/').to_owned(),
        })
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Absolute origin prepended to generated URLs; empty for root-relative URLs.
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub fn allowed_media_types(&self) -> impl Iterator<Item = &str> {
        self.allowed_media_types.iter().map(String::as_str)
    }

    /// Checks an already-normalised media type against the allow-list.
    pub fn allows_media_type(&self, media_type: &str) -> bool {
        self.allowed_media_types.contains(media_type)
    }
}

fn is_inside(root: &Path, candidate: &Path) -> bool {
    let Ok(root) = root.canonicalize() else {
        return false;
    };

    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(candidate),
            Err(_) => return false,
        }
    };

    // The index file may not exist yet; judge by its closest existing ancestor.
    absolute
        .ancestors()
        .skip(1)
        .find(|ancestor| ancestor.exists())
        .and_then(|ancestor| ancestor.canonicalize().ok())
        .is_some_and(|ancestor| ancestor.starts_with(&root))
}

/// The built-in media type allow-list.
pub fn default_allowed_media_types() -> Vec<String> {
    DEFAULT_ALLOWED_MEDIA_TYPES
        .iter()
        .map(|m| (*m).to_owned())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Storage root from an optional string value, falling back to [`DEFAULT_STORAGE_ROOT`].
pub fn storage_root_from_env_value(value: Option<String>) -> PathBuf {
    PathBuf::from(non_empty(value).unwrap_or_else(|| DEFAULT_STORAGE_ROOT.into()))
}

/// Index path from an optional string value, falling back to [`DEFAULT_INDEX_PATH`].
pub fn index_path_from_env_value(value: Option<String>) -> PathBuf {
    PathBuf::from(non_empty(value).unwrap_or_else(|| DEFAULT_INDEX_PATH.into()))
}

/// Parse the request body limit from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_MAX_BODY_BYTES`].
pub fn max_body_bytes_from_env_value(value: Option<String>) -> StorageResult<usize> {
    match non_empty(value) {
        None => Ok(DEFAULT_MAX_BODY_BYTES),
        Some(v) => match v.parse::<usize>() {
            Ok(0) => Err(StorageError::InvalidConfig(
                "max body size must be greater than zero".into(),
            )),
            Ok(n) => Ok(n),
            Err(e) => Err(StorageError::InvalidConfig(format!(
                "invalid max body size '{}': {}",
                v, e
            ))),
        },
    }
}

/// Parse a comma-separated media type allow-list.
///
/// If `value` is `None` or empty/whitespace, returns [`default_allowed_media_types`].
pub fn allowed_media_types_from_env_value(value: Option<String>) -> Vec<String> {
    match non_empty(value) {
        None => default_allowed_media_types(),
        Some(v) => v
            .split(',')
            .map(normalise_media_type)
            .filter(|m| !m.is_empty())
            .collect(),
    }
}
