//! Filegate file tree
//!
//! This crate owns everything that touches the storage root on disk:
//!
//! - [`sanitize`] turns a client-supplied relative path into a [`CanonicalPath`], rejecting
//!   parent traversal in any encoding.
//! - [`DirectoryTree`] performs the filesystem operations (directory creation, file placement,
//!   listing, recursive deletion and empty-ancestor pruning), each confined to the storage root.
//!
//! ## Storage layout
//!
//! ```text
//! <storage_root>/
//! └── users/                                                  # client-chosen directories
//!     └── reports/
//!         └── 1736606122045-0b6f2e9c-....-8c2d.pdf            # generated stored name
//! ```
//!
//! Stored names never reuse the client's file name: two uploads of `report.pdf` into the same
//! directory land in two distinct files. The original name lives in the token index.
//!
//! ## Example Usage
//!
//! ```no_run
//! use filegate_files::{sanitize, DirectoryTree};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = DirectoryTree::new(Path::new("uploads"))?;
//! let dir = sanitize("users/reports")?;
//!
//! tree.ensure_directory(&dir)?;
//! let stored = tree.place_file(&dir, "report.pdf", b"%PDF-1.7")?;
//! println!("stored at {}", stored);
//! # Ok(())
//! # }
//! ```

mod constants;
mod sanitize;
mod tree;

pub use constants::{MAX_PATH_DEPTH, MAX_SEGMENT_BYTES};
pub use sanitize::{sanitize, CanonicalPath};
pub use tree::{DirEntry, DirectoryTree, EntryKind};

/// Errors that can occur during file tree operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Storage root does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Path validation failed (traversal attempt or malformed input)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Directory to list does not exist
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    /// A path component that must be a directory is something else
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// File or directory does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
