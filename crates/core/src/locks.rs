//! Per-scope mutation locks.
//!
//! Uploads and deletes that touch the same top-level directory are serialised, so a delete can
//! never prune a directory that a concurrent upload has just created. Operations on different
//! top-level directories run in parallel. Reads take no lock.

use crate::constants::LOCK_SWEEP_THRESHOLD;
use filegate_files::CanonicalPath;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::sync::Arc;

/// Held for the duration of a mutation; releases the scope on drop.
pub struct ScopeGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

#[derive(Default)]
pub struct PathLocks {
    scopes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope key for `path`: its first segment, or the empty string for the root.
    pub fn scope_of(path: &CanonicalPath) -> &str {
        path.first_segment().unwrap_or_default()
    }

    /// Blocks until the scope containing `path` is free.
    pub fn acquire(&self, path: &CanonicalPath) -> ScopeGuard {
        let lock = {
            let mut scopes = self.scopes.lock();
            if scopes.len() >= LOCK_SWEEP_THRESHOLD {
                // Only the table itself holds idle locks.
                scopes.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(scopes.entry(Self::scope_of(path).to_owned()).or_default())
        };

        ScopeGuard {
            _guard: lock.lock_arc(),
        }
    }

    /// Number of scopes currently tracked.
    pub fn tracked_scopes(&self) -> usize {
        self.scopes.lock().len()
    }
}
