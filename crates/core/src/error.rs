use filegate_files::{CanonicalPath, FilesError};

/// Errors raised by a [`crate::TokenIndex`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("token already exists: {0}")]
    DuplicateToken(String),
    #[error("path already has a token: {0}")]
    DuplicatePath(String),
    #[error("corrupt index record: {0}")]
    CorruptRecord(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("failed to write to storage: {0}")]
    StorageWrite(FilesError),
    #[error("failed to read from storage: {0}")]
    StorageRead(FilesError),
    #[error("failed to delete from storage: {0}")]
    StorageDelete(FilesError),
    #[error("failed to write token index: {0}")]
    IndexWrite(IndexError),
    #[error("failed to read token index: {0}")]
    IndexRead(IndexError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("directory is empty: {0}")]
    EmptyDirectory(String),
    #[error("token does not grant access to this path")]
    Forbidden,
    #[error(
        "upload failed and cleanup also failed (path: {path}): upload={upload_error}; cleanup={cleanup_error}"
    )]
    CleanupAfterUploadFailed {
        path: CanonicalPath,
        #[source]
        upload_error: Box<StorageError>,
        cleanup_error: FilesError,
    },
    #[error(
        "delete failed and the token index could not be restored (path: {path}): delete={delete_error}; restore={restore_error}"
    )]
    DeleteDiverged {
        path: CanonicalPath,
        #[source]
        delete_error: Box<StorageError>,
        restore_error: IndexError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
