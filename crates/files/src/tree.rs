//! Root-confined directory tree
//!
//! [`DirectoryTree`] is the only type in Filegate that performs filesystem I/O on the storage
//! root. Every method takes a [`CanonicalPath`] and resolves it through
//! [`DirectoryTree::resolve_absolute`], which re-checks confinement independently of the
//! sanitiser.
//!
//! # Directory lifecycle
//!
//! Directories have no identity of their own. They are created explicitly with
//! [`DirectoryTree::ensure_directory`] right before a file is placed in them, and removed by
//! [`DirectoryTree::prune_empty_ancestors`] as soon as a deletion leaves them empty. The storage
//! root itself is never removed.
//!
//! # Symlinks
//!
//! Entries are classified with `symlink_metadata`, so symlinks are never followed: they are left
//! out of listings and subtree walks and are never served as files. A path that runs through a
//! symlink is rejected.

use crate::constants::{MAX_EXTENSION_LEN, MAX_PLACE_ATTEMPTS};
use crate::{CanonicalPath, FilesError};
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Classification of an entry in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a single-level directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// On-disk name of the entry
    pub name: String,
    pub kind: EntryKind,
    /// Path of the entry relative to the storage root
    pub path: CanonicalPath,
}

/// Filesystem operations confined to a storage root.
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    /// Canonicalised storage root
    root: PathBuf,
}

impl DirectoryTree {
    /// Opens the tree rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidRootDirectory`] if `root` does not exist, is not a directory
    /// or cannot be canonicalised.
    pub fn new(root: &Path) -> Result<Self, FilesError> {
        if !root.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }

        if !root.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let root = root.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    /// Returns the canonicalised storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a canonical path to an absolute path under the root.
    ///
    /// The joined path is checked lexically (only normal components, prefix is the root). Then
    /// every component that already exists is inspected with `symlink_metadata`, and a path that
    /// runs through a symlink is rejected, whether or not the final target exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidPath`] if the result would leave the root or passes through
    /// a symlink.
    pub fn resolve_absolute(&self, path: &CanonicalPath) -> Result<PathBuf, FilesError> {
        let relative = Path::new(path.as_str());
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(FilesError::InvalidPath(format!(
                "path escapes storage root: '{}'",
                path
            )));
        }

        let absolute = self.root.join(relative);
        if !absolute.starts_with(&self.root) {
            return Err(FilesError::InvalidPath(format!(
                "path escapes storage root: '{}'",
                path
            )));
        }

        if let Some(link) = first_symlink(&self.root, path) {
            return Err(FilesError::InvalidPath(format!(
                "path runs through symlink '{}': '{}'",
                link, path
            )));
        }

        Ok(absolute)
    }

    /// Returns the kind of entry at `path`, or `None` if nothing (or only a symlink or special
    /// file) is there.
    pub fn entry_kind(&self, path: &CanonicalPath) -> Result<Option<EntryKind>, FilesError> {
        let absolute = self.resolve_absolute(path)?;
        Ok(kind_of(&absolute))
    }

    /// Creates `dir` and any missing ancestors.
    ///
    /// Idempotent, including when several callers race to create the same directory.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::NotADirectory`] if some component already exists as a file, or
    /// [`FilesError::Io`] for other creation failures.
    pub fn ensure_directory(&self, dir: &CanonicalPath) -> Result<PathBuf, FilesError> {
        let absolute = self.resolve_absolute(dir)?;

        match fs::create_dir_all(&absolute) {
            Ok(()) => Ok(absolute),
            Err(e) => {
                if let Some(blocker) = first_non_directory(&self.root, dir) {
                    return Err(FilesError::NotADirectory(blocker.to_string()));
                }
                Err(FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory {}: {}", absolute.display(), e),
                )))
            }
        }
    }

    /// Writes `content` into `dir` under a freshly generated name and returns its path.
    ///
    /// The stored name is `<unix millis>-<uuid v4><.ext>`, where the extension is taken from
    /// `display_name` if it is short and alphanumeric. Files are created with `create_new`, so
    /// an existing file is never overwritten; on a name collision a new name is drawn.
    ///
    /// `dir` must already exist (see [`Self::ensure_directory`]).
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::Io`] if the file cannot be created or written. A partially written
    /// file is removed before returning.
    pub fn place_file(
        &self,
        dir: &CanonicalPath,
        display_name: &str,
        content: &[u8],
    ) -> Result<CanonicalPath, FilesError> {
        let dir_absolute = self.resolve_absolute(dir)?;
        let extension = stored_extension(display_name);

        for _attempt in 0..MAX_PLACE_ATTEMPTS {
            let name = generate_stored_name(extension.as_deref());
            let target = dir_absolute.join(&name);

            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(FilesError::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to create file {}: {}", target.display(), e),
                    )))
                }
            };

            if let Err(e) = file.write_all(content).and_then(|()| file.sync_all()) {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&target) {
                    tracing::error!(
                        "failed to remove partially written file {}: {}",
                        target.display(),
                        cleanup
                    );
                }
                return Err(FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to write file {}: {}", target.display(), e),
                )));
            }

            return Ok(dir.child(&name));
        }

        Err(FilesError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!(
                "failed to allocate a unique stored name after {} attempts",
                MAX_PLACE_ATTEMPTS
            ),
        )))
    }

    /// Lists the immediate children of `dir`, sorted by name.
    ///
    /// Regular files and directories are returned; symlinks, special files and names that are
    /// not valid UTF-8 are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::DirectoryNotFound`] if `dir` does not exist or is not a directory.
    pub fn list(&self, dir: &CanonicalPath) -> Result<Vec<DirEntry>, FilesError> {
        let absolute = self.resolve_absolute(dir)?;

        if kind_of(&absolute) != Some(EntryKind::Directory) {
            return Err(FilesError::DirectoryNotFound(dir.to_string()));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&absolute)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!("skipping non UTF-8 entry in {}", absolute.display());
                continue;
            };

            // The entry may vanish between read_dir and file_type under concurrent deletes.
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                continue;
            };

            entries.push(DirEntry {
                path: dir.child(&name),
                name,
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Returns every regular file at or below `path`.
    ///
    /// For a file this is just `path`; for a directory it is the whole subtree, depth first.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::NotFound`] if nothing exists at `path`.
    pub fn walk_files(&self, path: &CanonicalPath) -> Result<Vec<CanonicalPath>, FilesError> {
        let absolute = self.resolve_absolute(path)?;

        match kind_of(&absolute) {
            None => Err(FilesError::NotFound(path.to_string())),
            Some(EntryKind::File) => Ok(vec![path.clone()]),
            Some(EntryKind::Directory) => {
                let mut files = Vec::new();
                let mut pending = vec![path.clone()];

                while let Some(dir) = pending.pop() {
                    for entry in self.list(&dir)? {
                        match entry.kind {
                            EntryKind::File => files.push(entry.path),
                            EntryKind::Directory => pending.push(entry.path),
                        }
                    }
                }

                files.sort();
                Ok(files)
            }
        }
    }

    /// Removes the file or directory subtree at `path` without pruning ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidPath`] for the root, [`FilesError::NotFound`] if nothing
    /// exists at `path`, or [`FilesError::Io`] if removal fails.
    pub fn remove_entry(&self, path: &CanonicalPath) -> Result<(), FilesError> {
        if path.is_root() {
            return Err(FilesError::InvalidPath(
                "the storage root cannot be removed".into(),
            ));
        }

        let absolute = self.resolve_absolute(path)?;
        let result = match fs::symlink_metadata(&absolute) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FilesError::NotFound(path.to_string()))
            }
            Err(e) => Err(e),
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&absolute),
            Ok(_) => fs::remove_file(&absolute),
        };

        result.map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to remove {}: {}", absolute.display(), e),
            ))
        })
    }

    /// Removes the entry at `path`, then prunes any ancestors it left empty.
    ///
    /// Returns the number of ancestor directories removed.
    pub fn delete_recursive(&self, path: &CanonicalPath) -> Result<usize, FilesError> {
        self.remove_entry(path)?;
        Ok(self.prune_empty_ancestors(path))
    }

    /// Walks upward from the parent of `path`, removing directories that are empty.
    ///
    /// Stops at the first non-empty (or unreadable) ancestor and never removes the storage root.
    /// Failures are logged, not returned. Returns the number of directories removed.
    pub fn prune_empty_ancestors(&self, path: &CanonicalPath) -> usize {
        match path.parent() {
            Some(parent) => self.prune_empty_from(&parent),
            None => 0,
        }
    }

    /// Like [`Self::prune_empty_ancestors`], but starts with `dir` itself.
    pub fn prune_empty_from(&self, dir: &CanonicalPath) -> usize {
        let mut removed = 0usize;
        let mut current = Some(dir.clone());

        while let Some(dir) = current {
            if dir.is_root() {
                break;
            }

            let Ok(absolute) = self.resolve_absolute(&dir) else {
                break;
            };

            let is_empty = match fs::read_dir(&absolute) {
                Ok(mut it) => it.next().is_none(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Already gone (for example a concurrent prune); keep walking up.
                    current = dir.parent();
                    continue;
                }
                Err(e) => {
                    tracing::warn!("cannot inspect {} while pruning: {}", absolute.display(), e);
                    break;
                }
            };

            if !is_empty {
                break;
            }

            match fs::remove_dir(&absolute) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    // Typically a file arrived between the emptiness check and the removal.
                    tracing::warn!("stopped pruning at {}: {}", absolute.display(), e);
                    break;
                }
            }

            current = dir.parent();
        }

        removed
    }
}

fn kind_of(absolute: &Path) -> Option<EntryKind> {
    let meta = fs::symlink_metadata(absolute).ok()?;
    if meta.is_dir() {
        Some(EntryKind::Directory)
    } else if meta.is_file() {
        Some(EntryKind::File)
    } else {
        None
    }
}

/// First existing component of `path` that is a symlink. Components below the first missing
/// one cannot exist, so the walk stops there.
fn first_symlink(root: &Path, path: &CanonicalPath) -> Option<CanonicalPath> {
    let mut current = CanonicalPath::root();
    for segment in path.segments() {
        current = current.child(segment);
        match fs::symlink_metadata(root.join(current.as_str())) {
            Ok(meta) if meta.file_type().is_symlink() => return Some(current),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

fn first_non_directory(root: &Path, dir: &CanonicalPath) -> Option<CanonicalPath> {
    let mut current = CanonicalPath::root();
    for segment in dir.segments() {
        current = current.child(segment);
        match fs::symlink_metadata(root.join(current.as_str())) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => return Some(current),
            Err(_) => return None,
        }
    }
    None
}

fn stored_extension(display_name: &str) -> Option<String> {
    let ext = Path::new(display_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_owned())
}

fn generate_stored_name(extension: Option<&str>) -> String {
    let millis = Utc::now().timestamp_millis();
    match extension {
        Some(ext) => format!("{}-{}.{}", millis, Uuid::new_v4(), ext),
        None => format!("{}-{}", millis, Uuid::new_v4()),
    }
}
