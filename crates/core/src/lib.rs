//! # Filegate Core
//!
//! Core business logic for the Filegate file storage service.
//!
//! This crate binds stored files to access tokens:
//! - Uploads into client-chosen directories under a single storage root
//! - A persistent token index (SQLite) mapping each token to exactly one file
//! - Token-checked resolution, listing, token re-issue and recursive deletion
//!
//! **No API concerns**: HTTP routing, multipart parsing and URL construction belong in
//! `api-rest`; argument parsing belongs in `cli`.

pub mod config;
pub mod constants;
pub mod error;
pub mod index;
pub mod locks;
pub mod media;
pub mod service;

pub use config::StorageConfig;
pub use error::{IndexError, IndexResult, StorageError, StorageResult};
pub use index::{FileRecord, SqliteTokenIndex, TokenIndex};
pub use service::{DeleteOutcome, ListEntry, ResolvedFile, StorageService, UploadReceipt};

pub use filegate_files::{sanitize, CanonicalPath, EntryKind};
pub use filegate_token::AccessToken;
