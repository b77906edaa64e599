//! Storage service
//!
//! [`StorageService`] composes the path sanitiser, the [`DirectoryTree`] and a [`TokenIndex`]
//! into the operations exposed over HTTP and the admin CLI. It owns the cross-cutting rules:
//!
//! - a file is only reachable with the token issued for exactly its path;
//! - a stored file and its index record are created and removed together, with compensation
//!   when one half fails;
//! - directories left empty by a removal are pruned up to, but excluding, the storage root.
//!
//! All methods are blocking. Async callers should run them on a blocking thread.

use crate::config::StorageConfig;
use crate::constants::{MAX_DISPLAY_NAME_BYTES, MAX_TOKEN_ATTEMPTS};
use crate::error::{IndexError, StorageError, StorageResult};
use crate::index::{FileRecord, TokenIndex};
use crate::locks::PathLocks;
use crate::media::effective_media_type;
use filegate_files::{sanitize, CanonicalPath, DirEntry, DirectoryTree, EntryKind, FilesError};
use filegate_token::AccessToken;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a successful upload.
#[derive(Clone, Debug)]
pub struct UploadReceipt {
    pub token: AccessToken,
    pub canonical_path: CanonicalPath,
    pub display_name: String,
    pub media_type: String,
}

/// A file that may be served to the holder of its token.
#[derive(Clone, Debug)]
pub struct ResolvedFile {
    pub absolute_path: PathBuf,
    pub record: FileRecord,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    /// Display name for indexed files, on-disk name otherwise
    pub name: String,
    pub kind: EntryKind,
    pub path: CanonicalPath,
    /// Set for files that exist on disk but have no index record
    pub missing_metadata: bool,
}

/// Result of a successful delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub path: CanonicalPath,
    pub kind: EntryKind,
    pub removed_files: usize,
    pub pruned_directories: usize,
}

/// Token-gated file storage.
pub struct StorageService {
    cfg: Arc<StorageConfig>,
    tree: DirectoryTree,
    index: Arc<dyn TokenIndex>,
    locks: PathLocks,
}

impl StorageService {
    /// Creates a service over the configured storage root.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if the storage root cannot be opened.
    pub fn new(cfg: Arc<StorageConfig>, index: Arc<dyn TokenIndex>) -> StorageResult<Self> {
        let tree = DirectoryTree::new(cfg.storage_root())
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            cfg,
            tree,
            index,
            locks: PathLocks::new(),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.cfg
    }

    /// Stores `content` under `directory` and issues a token for it.
    ///
    /// `directory` is created if missing. The file is stored under a generated name, so
    /// uploading the same `display_name` twice yields two distinct files and tokens.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidPath`] if `directory` fails sanitisation or runs through a file
    /// - [`StorageError::InvalidInput`] if `display_name` is empty or unusable
    /// - [`StorageError::UnsupportedMediaType`] if the media type is not allowed or unknown
    /// - [`StorageError::StorageWrite`] / [`StorageError::IndexWrite`] on infrastructure failure
    /// - [`StorageError::CleanupAfterUploadFailed`] if compensation also failed
    ///
    /// # Safety & Rollback
    ///
    /// If the index record cannot be written, the stored file is removed again and any
    /// directories created for it are pruned. If that removal fails too, a
    /// [`StorageError::CleanupAfterUploadFailed`] is returned with details of both errors.
    pub fn upload(
        &self,
        directory: &str,
        display_name: &str,
        declared_media_type: Option<&str>,
        content: &[u8],
    ) -> StorageResult<UploadReceipt> {
        let dir = sanitize_path(directory)?;
        let display_name = display_name_from(display_name)?;

        let media_type = effective_media_type(declared_media_type, content)
            .ok_or_else(|| StorageError::UnsupportedMediaType("unknown".into()))?;
        if !self.cfg.allows_media_type(&media_type) {
            return Err(StorageError::UnsupportedMediaType(media_type));
        }

        let _scope = self.locks.acquire(&dir);

        self.tree.ensure_directory(&dir).map_err(|e| match e {
            FilesError::NotADirectory(blocker) => StorageError::InvalidPath(format!(
                "'{}' is a file, not a directory",
                blocker
            )),
            FilesError::InvalidPath(msg) => StorageError::InvalidPath(msg),
            other => StorageError::StorageWrite(other),
        })?;

        let stored = match self.tree.place_file(&dir, &display_name, content) {
            Ok(stored) => stored,
            Err(e) => {
                self.tree.prune_empty_from(&dir);
                return Err(StorageError::StorageWrite(e));
            }
        };

        let token = match self.record_new_file(&stored, &display_name) {
            Ok(token) => token,
            Err(upload_error) => {
                if let Err(cleanup_error) = self.tree.remove_entry(&stored) {
                    tracing::error!(
                        "failed to remove {} after index write failure: {}",
                        stored,
                        cleanup_error
                    );
                    return Err(StorageError::CleanupAfterUploadFailed {
                        path: stored,
                        upload_error: Box::new(upload_error),
                        cleanup_error,
                    });
                }
                self.tree.prune_empty_ancestors(&stored);
                return Err(upload_error);
            }
        };

        tracing::info!(
            path = %stored,
            media_type = %media_type,
            bytes = content.len(),
            "stored upload"
        );

        Ok(UploadReceipt {
            token,
            canonical_path: stored,
            display_name,
            media_type,
        })
    }

    fn record_new_file(
        &self,
        path: &CanonicalPath,
        display_name: &str,
    ) -> StorageResult<AccessToken> {
        let mut previous: Option<AccessToken> = None;

        for _attempt in 0..MAX_TOKEN_ATTEMPTS {
            let record = FileRecord {
                token: AccessToken::generate(previous.as_ref()),
                display_name: display_name.to_owned(),
                canonical_path: path.clone(),
            };

            match self.index.put(&record) {
                Ok(()) => return Ok(record.token),
                Err(IndexError::DuplicateToken(token)) => {
                    tracing::warn!("token collision on {}, minting another", token);
                    previous = Some(record.token);
                }
                Err(e) => return Err(StorageError::IndexWrite(e)),
            }
        }

        Err(StorageError::IndexWrite(IndexError::DuplicateToken(format!(
            "no unused token after {} attempts",
            MAX_TOKEN_ATTEMPTS
        ))))
    }

    /// Checks that `token` grants access to `path` and returns where the file lives.
    ///
    /// The token is checked before the path, so a malformed or unknown token is `Forbidden`
    /// whatever path accompanies it.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Forbidden`] if the token is malformed, unknown or bound to another path
    /// - [`StorageError::InvalidPath`] if the token is known but `path` fails sanitisation
    /// - [`StorageError::NotFound`] if the token is valid but the file is gone from disk
    pub fn resolve(&self, path: &str, token: &str) -> StorageResult<ResolvedFile> {
        let token = AccessToken::parse(token).map_err(|_| StorageError::Forbidden)?;

        let record = self
            .index
            .find_by_token(&token)
            .map_err(StorageError::IndexRead)?
            .ok_or(StorageError::Forbidden)?;

        let path = sanitize_path(path)?;

        if record.canonical_path != path {
            tracing::warn!(
                "token for {} presented for {}",
                record.canonical_path,
                path
            );
            return Err(StorageError::Forbidden);
        }

        let absolute_path = self.tree.resolve_absolute(&path).map_err(into_path_error)?;
        if self.tree.entry_kind(&path).map_err(into_path_error)? != Some(EntryKind::File) {
            tracing::error!("indexed file {} is missing from disk", path);
            return Err(StorageError::NotFound(path.to_string()));
        }

        Ok(ResolvedFile {
            absolute_path,
            record,
        })
    }

    /// Lists the direct children of `directory`.
    ///
    /// Files carry their display name. Files with no index record are still listed, under
    /// their on-disk name and flagged with `missing_metadata`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidPath`] if `directory` fails sanitisation
    /// - [`StorageError::DirectoryNotFound`] if it does not exist or is not a directory
    /// - [`StorageError::EmptyDirectory`] if it has no children
    pub fn list(&self, directory: &str) -> StorageResult<Vec<ListEntry>> {
        let dir = sanitize_path(directory)?;

        let entries = self.tree.list(&dir).map_err(|e| match e {
            FilesError::DirectoryNotFound(msg) => StorageError::DirectoryNotFound(msg),
            FilesError::InvalidPath(msg) => StorageError::InvalidPath(msg),
            other => StorageError::StorageRead(other),
        })?;

        if entries.is_empty() {
            return Err(StorageError::EmptyDirectory(dir.to_string()));
        }

        entries
            .into_iter()
            .map(|entry| self.describe(entry))
            .collect()
    }

    fn describe(&self, entry: DirEntry) -> StorageResult<ListEntry> {
        if entry.kind == EntryKind::Directory {
            return Ok(ListEntry {
                name: entry.name,
                kind: entry.kind,
                path: entry.path,
                missing_metadata: false,
            });
        }

        match self
            .index
            .find_by_path(&entry.path)
            .map_err(StorageError::IndexRead)?
        {
            Some(record) => Ok(ListEntry {
                name: record.display_name,
                kind: entry.kind,
                path: entry.path,
                missing_metadata: false,
            }),
            None => {
                tracing::warn!("file {} has no index record", entry.path);
                Ok(ListEntry {
                    name: entry.name,
                    kind: entry.kind,
                    path: entry.path,
                    missing_metadata: true,
                })
            }
        }
    }

    /// Returns the record (and so the token) of the file at `path`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidPath`] if `path` fails sanitisation or is the storage root
    /// - [`StorageError::NotFound`] if there is no record, or the file is gone from disk
    pub fn issue_token(&self, path: &str) -> StorageResult<FileRecord> {
        let path = sanitize_path(path)?;
        if path.is_root() {
            return Err(StorageError::InvalidPath("a file path is required".into()));
        }

        let record = self
            .index
            .find_by_path(&path)
            .map_err(StorageError::IndexRead)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;

        if self.tree.entry_kind(&path).map_err(into_path_error)? != Some(EntryKind::File) {
            tracing::error!("indexed file {} is missing from disk", path);
            return Err(StorageError::NotFound(path.to_string()));
        }

        Ok(record)
    }

    /// Deletes the file or directory at `path` along with every index record beneath it.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidPath`] if `path` fails sanitisation or is the storage root
    /// - [`StorageError::NotFound`] if nothing exists at `path`
    /// - [`StorageError::IndexWrite`] / [`StorageError::StorageDelete`] on infrastructure failure
    /// - [`StorageError::DeleteDiverged`] if the index could not be restored after a failure
    ///
    /// # Safety & Rollback
    ///
    /// Index records are removed first. If that or the filesystem removal fails, records of
    /// files that still exist on disk are put back, so no surviving file loses its token. If
    /// restoring fails as well, a [`StorageError::DeleteDiverged`] is returned.
    pub fn delete(&self, path: &str) -> StorageResult<DeleteOutcome> {
        let path = sanitize_path(path)?;
        if path.is_root() {
            return Err(StorageError::InvalidPath(
                "the storage root cannot be deleted".into(),
            ));
        }

        let _scope = self.locks.acquire(&path);

        let kind = self
            .tree
            .entry_kind(&path)
            .map_err(into_path_error)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;

        let files = self.tree.walk_files(&path).map_err(|e| match e {
            FilesError::NotFound(msg) => StorageError::NotFound(msg),
            other => StorageError::StorageDelete(other),
        })?;

        let mut removed_records = Vec::with_capacity(files.len());
        for file in &files {
            match self.index.delete_by_path(file) {
                Ok(Some(record)) => removed_records.push(record),
                Ok(None) => tracing::warn!("deleting {} which has no index record", file),
                Err(e) => {
                    return Err(self.restore_records(
                        &path,
                        removed_records,
                        StorageError::IndexWrite(e),
                    ));
                }
            }
        }

        if let Err(e) = self.tree.remove_entry(&path) {
            let survivors = removed_records
                .into_iter()
                .filter(|record| {
                    matches!(
                        self.tree.entry_kind(&record.canonical_path),
                        Ok(Some(EntryKind::File))
                    )
                })
                .collect();
            return Err(self.restore_records(&path, survivors, StorageError::StorageDelete(e)));
        }

        let pruned_directories = self.tree.prune_empty_ancestors(&path);

        tracing::info!(
            path = %path,
            removed_files = files.len(),
            pruned_directories,
            "deleted"
        );

        Ok(DeleteOutcome {
            path,
            kind,
            removed_files: files.len(),
            pruned_directories,
        })
    }

    fn restore_records(
        &self,
        path: &CanonicalPath,
        records: Vec<FileRecord>,
        delete_error: StorageError,
    ) -> StorageError {
        for record in records {
            if let Err(restore_error) = self.index.put(&record) {
                tracing::error!(
                    "could not restore index record for {}: {}",
                    record.canonical_path,
                    restore_error
                );
                return StorageError::DeleteDiverged {
                    path: path.clone(),
                    delete_error: Box::new(delete_error),
                    restore_error,
                };
            }
        }
        delete_error
    }
}

fn sanitize_path(raw: &str) -> StorageResult<CanonicalPath> {
    sanitize(raw).map_err(into_path_error)
}

fn into_path_error(e: FilesError) -> StorageError {
    match e {
        FilesError::InvalidPath(msg) => StorageError::InvalidPath(msg),
        other => StorageError::StorageRead(other),
    }
}

/// Reduces a client-supplied file name to its last component.
///
/// Browsers on some platforms send a full local path (`C:\fakepath\report.pdf`).
fn display_name_from(raw: &str) -> StorageResult<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(StorageError::InvalidInput("a file name is required".into()));
    }
    if name.chars().any(char::is_control) {
        return Err(StorageError::InvalidInput(
            "file name contains control characters".into(),
        ));
    }
    if name.len() > MAX_DISPLAY_NAME_BYTES {
        return Err(StorageError::InvalidInput(format!(
            "file name exceeds {} bytes",
            MAX_DISPLAY_NAME_BYTES
        )));
    }

    Ok(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_allowed_media_types;
    use crate::constants::DEFAULT_MAX_BODY_BYTES;
    use crate::error::IndexResult;
    use crate::index::SqliteTokenIndex;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use tempfile::TempDir;

    const PDF: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n";

    /// Wraps the SQLite index and fails selected operations on demand.
    struct FlakyIndex {
        inner: SqliteTokenIndex,
        fail_puts: AtomicBool,
        duplicate_tokens: AtomicUsize,
        deletes_allowed: AtomicUsize,
    }

    impl FlakyIndex {
        fn new() -> Self {
            Self {
                inner: SqliteTokenIndex::open_in_memory().unwrap(),
                fail_puts: AtomicBool::new(false),
                duplicate_tokens: AtomicUsize::new(0),
                deletes_allowed: AtomicUsize::new(usize::MAX),
            }
        }

        fn injected() -> IndexError {
            IndexError::Sqlite(rusqlite::Error::InvalidQuery)
        }
    }

    impl TokenIndex for FlakyIndex {
        fn put(&self, record: &FileRecord) -> IndexResult<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(Self::injected());
            }
            let pending = self.duplicate_tokens.load(Ordering::SeqCst);
            if pending > 0 {
                self.duplicate_tokens.store(pending - 1, Ordering::SeqCst);
                return Err(IndexError::DuplicateToken(record.token.to_string()));
            }
            self.inner.put(record)
        }

        fn find_by_token(&self, token: &AccessToken) -> IndexResult<Option<FileRecord>> {
            self.inner.find_by_token(token)
        }

        fn find_by_path(&self, path: &CanonicalPath) -> IndexResult<Option<FileRecord>> {
            self.inner.find_by_path(path)
        }

        fn delete_by_path(&self, path: &CanonicalPath) -> IndexResult<Option<FileRecord>> {
            let allowed = self.deletes_allowed.load(Ordering::SeqCst);
            if allowed == 0 {
                return Err(Self::injected());
            }
            if allowed != usize::MAX {
                self.deletes_allowed.store(allowed - 1, Ordering::SeqCst);
            }
            self.inner.delete_by_path(path)
        }
    }

    fn config(temp: &TempDir) -> Arc<StorageConfig> {
        let root = temp.path().join("uploads");
        fs::create_dir_all(&root).unwrap();
        Arc::new(
            StorageConfig::new(
                root,
                temp.path().join("index.sqlite3"),
                default_allowed_media_types(),
                DEFAULT_MAX_BODY_BYTES,
                String::new(),
            )
            .unwrap(),
        )
    }

    fn setup() -> (TempDir, StorageService) {
        let temp = TempDir::new().unwrap();
        let index = Arc::new(SqliteTokenIndex::open_in_memory().unwrap());
        let service = StorageService::new(config(&temp), index).unwrap();
        (temp, service)
    }

    fn setup_flaky() -> (TempDir, StorageService, Arc<FlakyIndex>) {
        let temp = TempDir::new().unwrap();
        let index = Arc::new(FlakyIndex::new());
        let service = StorageService::new(config(&temp), Arc::clone(&index) as Arc<dyn TokenIndex>)
            .unwrap();
        (temp, service, index)
    }

    fn upload_pdf(service: &StorageService, dir: &str, name: &str) -> UploadReceipt {
        service
            .upload(dir, name, Some("application/pdf"), PDF)
            .unwrap()
    }

    #[test]
    fn test_upload_then_resolve() {
        let (_temp, service) = setup();

        let receipt = upload_pdf(&service, "users/reports", "report.pdf");
        assert!(receipt.canonical_path.as_str().starts_with("users/reports/"));
        assert!(receipt.canonical_path.as_str().ends_with(".pdf"));
        assert_eq!(receipt.display_name, "report.pdf");

        let resolved = service
            .resolve(receipt.canonical_path.as_str(), &receipt.token.to_string())
            .unwrap();
        assert_eq!(fs::read(&resolved.absolute_path).unwrap(), PDF);
        assert_eq!(resolved.record.display_name, "report.pdf");
        assert_eq!(resolved.record.token, receipt.token);
    }

    #[test]
    fn test_upload_same_name_twice_yields_distinct_files() {
        let (_temp, service) = setup();

        let a = upload_pdf(&service, "users", "report.pdf");
        let b = upload_pdf(&service, "users", "report.pdf");

        assert_ne!(a.canonical_path, b.canonical_path);
        assert_ne!(a.token, b.token);
        assert_eq!(service.list("users").unwrap().len(), 2);
    }

    #[test]
    fn test_upload_into_root() {
        let (_temp, service) = setup();

        let receipt = upload_pdf(&service, "", "root.pdf");

        assert_eq!(receipt.canonical_path.segments().count(), 1);
        assert!(service
            .resolve(receipt.canonical_path.as_str(), &receipt.token.to_string())
            .is_ok());
    }

    #[test]
    fn test_upload_rejects_disallowed_media_type() {
        let (temp, service) = setup();

        let result = service.upload("bin", "tool.exe", Some("application/x-msdownload"), b"MZ");

        assert!(matches!(result, Err(StorageError::UnsupportedMediaType(m)) if m == "application/x-msdownload"));
        assert!(!temp.path().join("uploads/bin").exists());
    }

    #[test]
    fn test_upload_sniffs_undeclared_media_type() {
        let (_temp, service) = setup();

        let receipt = service.upload("docs", "scan", None, PDF).unwrap();
        assert_eq!(receipt.media_type, "application/pdf");

        let unknown = service.upload("docs", "notes", None, b"plain words");
        assert!(matches!(unknown, Err(StorageError::UnsupportedMediaType(_))));
    }

    #[test]
    fn test_upload_declared_type_is_normalised() {
        let (_temp, service) = setup();

        let receipt = service
            .upload("docs", "a.txt", Some("Text/Plain; charset=utf-8"), b"hello")
            .unwrap();

        assert_eq!(receipt.media_type, "text/plain");
    }

    #[test]
    fn test_upload_rejects_traversal() {
        let (temp, service) = setup();

        for dir in ["../outside", "users/../../x", "%2e%2e/x"] {
            let result = service.upload(dir, "r.pdf", Some("application/pdf"), PDF);
            assert!(
                matches!(result, Err(StorageError::InvalidPath(_))),
                "should reject {}",
                dir
            );
        }
        assert!(!temp.path().join("outside").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_upload_below_symlinked_directory_is_rejected() {
        let (temp, service) = setup();
        let outside = temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, temp.path().join("uploads/link")).unwrap();

        let result = service.upload("link/inbox", "r.pdf", Some("application/pdf"), PDF);

        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert_eq!(fs::read_dir(&outside).unwrap().count(), 0);
    }

    #[test]
    fn test_upload_through_a_file_is_invalid_path() {
        let (_temp, service) = setup();
        let receipt = upload_pdf(&service, "a", "r.pdf");

        let nested = format!("{}/deeper", receipt.canonical_path);
        let result = service.upload(&nested, "x.pdf", Some("application/pdf"), PDF);

        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn test_upload_display_name_rules() {
        let (_temp, service) = setup();

        let receipt = upload_pdf(&service, "u", "C:\\fakepath\\report.pdf");
        assert_eq!(receipt.display_name, "report.pdf");

        for bad in ["", "   ", "dir/", "..", "bad\nname.pdf"] {
            let result = service.upload("u", bad, Some("application/pdf"), PDF);
            assert!(
                matches!(result, Err(StorageError::InvalidInput(_))),
                "should reject {:?}",
                bad
            );
        }

        let long = "x".repeat(MAX_DISPLAY_NAME_BYTES + 1);
        assert!(service
            .upload("u", &long, Some("application/pdf"), PDF)
            .is_err());
    }

    #[test]
    fn test_resolve_requires_matching_token() {
        let (_temp, service) = setup();
        let a = upload_pdf(&service, "x", "a.pdf");
        let b = upload_pdf(&service, "y", "b.pdf");

        let replayed = service.resolve(b.canonical_path.as_str(), &a.token.to_string());
        assert!(matches!(replayed, Err(StorageError::Forbidden)));

        let malformed = service.resolve(a.canonical_path.as_str(), "wrong");
        assert!(matches!(malformed, Err(StorageError::Forbidden)));

        let unknown = service.resolve(
            a.canonical_path.as_str(),
            &AccessToken::generate(None).to_string(),
        );
        assert!(matches!(unknown, Err(StorageError::Forbidden)));
    }

    #[test]
    fn test_resolve_accepts_equivalent_spelling() {
        let (_temp, service) = setup();
        let receipt = upload_pdf(&service, "a/b", "r.pdf");

        let spelled = format!("/{}", receipt.canonical_path.as_str().replace('/', "\\"));
        assert!(service
            .resolve(&spelled, &receipt.token.to_string())
            .is_ok());
    }

    #[test]
    fn test_resolve_checks_token_before_path() {
        let (_temp, service) = setup();
        let receipt = upload_pdf(&service, "a", "r.pdf");

        for bad_token in ["wrong".to_string(), AccessToken::generate(None).to_string()] {
            for path in ["../etc/passwd", "%2e%2e/x", "a/missing.pdf"] {
                assert!(
                    matches!(service.resolve(path, &bad_token), Err(StorageError::Forbidden)),
                    "path {}",
                    path
                );
            }
        }

        let result = service.resolve("../etc/passwd", &receipt.token.to_string());
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn test_resolve_missing_on_disk_is_not_found() {
        let (temp, service) = setup();
        let receipt = upload_pdf(&service, "a", "r.pdf");
        fs::remove_file(temp.path().join("uploads").join(receipt.canonical_path.as_str()))
            .unwrap();

        let result = service.resolve(receipt.canonical_path.as_str(), &receipt.token.to_string());
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_list_root_and_directories() {
        let (_temp, service) = setup();
        let receipt = upload_pdf(&service, "users/reports", "report.pdf");
        upload_pdf(&service, "archive", "old.pdf");

        let root = service.list("").unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["archive", "users"]);
        assert!(root.iter().all(|e| e.kind == EntryKind::Directory));

        let reports = service.list("users/reports").unwrap();
        assert_eq!(
            reports,
            vec![ListEntry {
                name: "report.pdf".into(),
                kind: EntryKind::File,
                path: receipt.canonical_path,
                missing_metadata: false,
            }]
        );
    }

    #[test]
    fn test_list_missing_and_empty() {
        let (temp, service) = setup();

        assert!(matches!(
            service.list("nope"),
            Err(StorageError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            service.list(""),
            Err(StorageError::EmptyDirectory(_))
        ));

        fs::create_dir(temp.path().join("uploads/hollow")).unwrap();
        assert!(matches!(
            service.list("hollow"),
            Err(StorageError::EmptyDirectory(_))
        ));
    }

    #[test]
    fn test_list_file_path_is_directory_not_found() {
        let (_temp, service) = setup();
        let receipt = upload_pdf(&service, "a", "r.pdf");

        assert!(matches!(
            service.list(receipt.canonical_path.as_str()),
            Err(StorageError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_list_flags_files_without_records() {
        let (temp, service) = setup();
        upload_pdf(&service, "mixed", "indexed.pdf");
        fs::write(temp.path().join("uploads/mixed/stray.bin"), b"?").unwrap();

        let entries = service.list("mixed").unwrap();
        let stray = entries.iter().find(|e| e.name == "stray.bin").unwrap();
        assert!(stray.missing_metadata);
        assert_eq!(stray.path.as_str(), "mixed/stray.bin");

        let indexed = entries.iter().find(|e| e.name == "indexed.pdf").unwrap();
        assert!(!indexed.missing_metadata);
    }

    #[test]
    fn test_issue_token_returns_upload_token() {
        let (_temp, service) = setup();
        let receipt = upload_pdf(&service, "a", "r.pdf");

        let record = service.issue_token(receipt.canonical_path.as_str()).unwrap();

        assert_eq!(record.token, receipt.token);
        assert_eq!(record.display_name, "r.pdf");
    }

    #[test]
    fn test_issue_token_errors() {
        let (temp, service) = setup();

        assert!(matches!(
            service.issue_token(""),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            service.issue_token("../x"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            service.issue_token("a/unknown.pdf"),
            Err(StorageError::NotFound(_))
        ));

        let receipt = upload_pdf(&service, "a", "r.pdf");
        fs::remove_file(temp.path().join("uploads").join(receipt.canonical_path.as_str()))
            .unwrap();
        assert!(matches!(
            service.issue_token(receipt.canonical_path.as_str()),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_file_prunes_empty_ancestors() {
        let (temp, service) = setup();
        let receipt = upload_pdf(&service, "a/b/c", "r.pdf");

        let outcome = service.delete(receipt.canonical_path.as_str()).unwrap();

        assert_eq!(outcome.kind, EntryKind::File);
        assert_eq!(outcome.removed_files, 1);
        assert_eq!(outcome.pruned_directories, 3);
        assert!(!temp.path().join("uploads/a").exists());
        assert!(temp.path().join("uploads").is_dir());

        let after = service.resolve(receipt.canonical_path.as_str(), &receipt.token.to_string());
        assert!(matches!(after, Err(StorageError::Forbidden)));
    }

    #[test]
    fn test_delete_keeps_non_empty_ancestors() {
        let (_temp, service) = setup();
        let gone = upload_pdf(&service, "a/b", "gone.pdf");
        let kept = upload_pdf(&service, "a", "kept.pdf");

        let outcome = service.delete(gone.canonical_path.as_str()).unwrap();

        assert_eq!(outcome.pruned_directories, 1);
        assert!(service
            .resolve(kept.canonical_path.as_str(), &kept.token.to_string())
            .is_ok());
    }

    #[test]
    fn test_delete_directory_removes_all_records() {
        let (_temp, service) = setup();
        let one = upload_pdf(&service, "team/x", "1.pdf");
        let two = upload_pdf(&service, "team/x/y", "2.pdf");
        let other = upload_pdf(&service, "team/z", "3.pdf");

        let outcome = service.delete("team/x").unwrap();

        assert_eq!(outcome.kind, EntryKind::Directory);
        assert_eq!(outcome.removed_files, 2);
        for receipt in [&one, &two] {
            assert!(matches!(
                service.issue_token(receipt.canonical_path.as_str()),
                Err(StorageError::NotFound(_))
            ));
        }
        assert!(service.issue_token(other.canonical_path.as_str()).is_ok());
    }

    #[test]
    fn test_delete_errors() {
        let (_temp, service) = setup();

        assert!(matches!(
            service.delete(""),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            service.delete("/"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            service.delete("../x"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            service.delete("missing/file.pdf"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_upload_index_failure_removes_file_and_directories() {
        let (temp, service, index) = setup_flaky();
        index.fail_puts.store(true, Ordering::SeqCst);

        let result = service.upload("fresh/dir", "r.pdf", Some("application/pdf"), PDF);

        assert!(matches!(result, Err(StorageError::IndexWrite(_))));
        assert!(!temp.path().join("uploads/fresh").exists());
    }

    #[test]
    fn test_upload_retries_token_collisions() {
        let (_temp, service, index) = setup_flaky();
        index.duplicate_tokens.store(2, Ordering::SeqCst);

        let receipt = upload_pdf(&service, "a", "r.pdf");
        assert!(service.issue_token(receipt.canonical_path.as_str()).is_ok());
    }

    #[test]
    fn test_upload_gives_up_after_repeated_collisions() {
        let (temp, service, index) = setup_flaky();
        index
            .duplicate_tokens
            .store(MAX_TOKEN_ATTEMPTS, Ordering::SeqCst);

        let result = service.upload("a", "r.pdf", Some("application/pdf"), PDF);

        assert!(matches!(
            result,
            Err(StorageError::IndexWrite(IndexError::DuplicateToken(_)))
        ));
        assert!(!temp.path().join("uploads/a").exists());
    }

    #[test]
    fn test_delete_index_failure_restores_records() {
        let (temp, service, index) = setup_flaky();
        let one = upload_pdf(&service, "d", "1.pdf");
        let two = upload_pdf(&service, "d", "2.pdf");
        index.deletes_allowed.store(1, Ordering::SeqCst);

        let result = service.delete("d");

        assert!(matches!(result, Err(StorageError::IndexWrite(_))));
        index.deletes_allowed.store(usize::MAX, Ordering::SeqCst);
        for receipt in [&one, &two] {
            assert!(temp
                .path()
                .join("uploads")
                .join(receipt.canonical_path.as_str())
                .is_file());
            assert_eq!(
                service
                    .issue_token(receipt.canonical_path.as_str())
                    .unwrap()
                    .token,
                receipt.token
            );
        }
    }

    #[test]
    fn test_delete_reports_divergence_when_restore_fails() {
        let (_temp, service, index) = setup_flaky();
        upload_pdf(&service, "d", "1.pdf");
        upload_pdf(&service, "d", "2.pdf");
        index.deletes_allowed.store(1, Ordering::SeqCst);
        index.fail_puts.store(true, Ordering::SeqCst);

        let result = service.delete("d");

        match result {
            Err(StorageError::DeleteDiverged { path, .. }) => assert_eq!(path.as_str(), "d"),
            other => panic!("Expected DeleteDiverged, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_uploads_same_directory() {
        let (_temp, service) = setup();
        let service = Arc::new(service);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    service
                        .upload("shared/inbox", &format!("{}.pdf", i), Some("application/pdf"), PDF)
                        .unwrap()
                })
            })
            .collect();

        let receipts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(service.list("shared/inbox").unwrap().len(), 8);
        for receipt in receipts {
            assert!(service
                .resolve(receipt.canonical_path.as_str(), &receipt.token.to_string())
                .is_ok());
        }
    }

    #[test]
    fn test_concurrent_upload_and_delete_keep_uploads_intact() {
        let (_temp, service) = setup();
        let service = Arc::new(service);

        for round in 0..10 {
            let victim = upload_pdf(&service, "scope/old", "victim.pdf");

            let uploader = {
                let service = Arc::clone(&service);
                thread::spawn(move || upload_pdf(&service, "scope/new", &format!("{}.pdf", round)))
            };
            let deleter = {
                let service = Arc::clone(&service);
                let path = victim.canonical_path.to_string();
                thread::spawn(move || service.delete(&path).unwrap())
            };

            let uploaded = uploader.join().unwrap();
            deleter.join().unwrap();

            assert!(service
                .resolve(uploaded.canonical_path.as_str(), &uploaded.token.to_string())
                .is_ok());
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let (temp, service) = setup();

        let receipt = upload_pdf(&service, "users/reports", "report.pdf");
        let listed = service.list("users/reports").unwrap();
        assert_eq!(listed[0].name, "report.pdf");

        let record = service.issue_token(listed[0].path.as_str()).unwrap();
        let resolved = service
            .resolve(listed[0].path.as_str(), &record.token.to_string())
            .unwrap();
        assert_eq!(resolved.record.canonical_path, receipt.canonical_path);

        service.delete("users").unwrap();
        assert!(matches!(
            service.list(""),
            Err(StorageError::EmptyDirectory(_))
        ));
        assert_eq!(fs::read_dir(temp.path().join("uploads")).unwrap().count(), 0);
    }
}
