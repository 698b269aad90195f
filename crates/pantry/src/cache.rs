//! AssetCache: a capacity-bounded, append-only set of AssetRecords.
//!
//! There is no eviction. Once a record is admitted it stays for the life of
//! the process; candidates that would push the total past capacity are
//! turned away and served straight from disk instead.
//!
//! The running total is an admission gate, not a hard ceiling: a cached
//! record may grow on revalidation, and [`AssetCache::recompute_size`] then
//! brings the accounting back in line with the records.

use std::path::{Component, Path};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::record::AssetRecord;

/// Outcome of offering a record to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Larger than the per-file limit.
    TooLarge,
    /// Would take the cache past its capacity.
    CacheFull,
    /// A record with the same relative path is already cached.
    AlreadyCached,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Counters from an initial population walk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopulateReport {
    pub admitted: usize,
    pub too_large: usize,
    pub rejected_full: usize,
    pub failed: usize,
    /// The walk ended at the first capacity rejection.
    pub stopped_early: bool,
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Arc<AssetRecord>>,
    current_size: u64,
}

#[derive(Debug)]
pub struct AssetCache {
    capacity_bytes: u64,
    per_file_limit_bytes: u64,
    inner: RwLock<Inner>,
}

impl AssetCache {
    pub fn new(capacity_bytes: u64, per_file_limit_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            per_file_limit_bytes,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// A cache that never admits anything.
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Capacity 0 turns caching off: no population, lookups or admissions.
    pub fn is_enabled(&self) -> bool {
        self.capacity_bytes > 0
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn per_file_limit_bytes(&self) -> u64 {
        self.per_file_limit_bytes
    }

    /// Bytes currently accounted for.
    pub fn current_size(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).current_size
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer a record for admission.
    ///
    /// The size check and the append happen under one write lock, so
    /// concurrent admissions cannot overshoot capacity together.
    pub fn push(&self, record: Arc<AssetRecord>) -> Admission {
        if !self.is_enabled() {
            return Admission::CacheFull;
        }

        let size = record.len() as u64;
        if size > self.per_file_limit_bytes {
            return Admission::TooLarge;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner
            .records
            .iter()
            .any(|r| r.relative_path() == record.relative_path())
        {
            return Admission::AlreadyCached;
        }
        if inner.current_size + size > self.capacity_bytes {
            return Admission::CacheFull;
        }

        inner.current_size += size;
        inner.records.push(record);
        Admission::Admitted
    }

    /// Linear scan for a record by its relative path.
    pub fn find_by_relative_path(&self, relative_path: &str) -> Option<Arc<AssetRecord>> {
        if !self.is_enabled() {
            return None;
        }
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .records
            .iter()
            .find(|r| r.relative_path() == relative_path)
            .cloned()
    }

    /// Re-sum the lengths of all records and store the result.
    ///
    /// Call after a revalidation reported a change.
    pub fn recompute_size(&self) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let total = inner.records.iter().map(|r| r.len() as u64).sum();
        inner.current_size = total;
        total
    }

    /// Relative paths of all cached records, in admission order.
    pub fn relative_paths(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .records
            .iter()
            .map(|r| r.relative_path().to_string())
            .collect()
    }

    /// Walk `root` and admit every regular file that fits.
    ///
    /// Entries are visited in file-name order. Sizes are checked from
    /// metadata before any read, so files that cannot be admitted are never
    /// read. Unreadable files are logged and skipped. With `stop_when_full`,
    /// the first capacity rejection ends the walk; a per-file-limit rejection
    /// never does.
    pub fn populate(&self, root: &Path, stop_when_full: bool) -> PopulateReport {
        let mut report = PopulateReport::default();
        if !self.is_enabled() {
            return report;
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_key(root, entry.path()) else {
                continue;
            };

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!("Skipping {}: {}", relative, e);
                    report.failed += 1;
                    continue;
                }
            };

            if size > self.per_file_limit_bytes {
                debug!("Not caching {} ({} bytes over per-file limit)", relative, size);
                report.too_large += 1;
                continue;
            }
            if self.current_size() + size > self.capacity_bytes {
                report.rejected_full += 1;
                if stop_when_full {
                    debug!("Cache full at {}, stopping walk", relative);
                    report.stopped_early = true;
                    break;
                }
                continue;
            }

            let record = match AssetRecord::load(entry.path(), relative.clone()) {
                Ok(record) => Arc::new(record),
                Err(e) => {
                    warn!("Skipping {}: {}", relative, e);
                    report.failed += 1;
                    continue;
                }
            };

            // The file may have changed size between stat and read.
            match self.push(record) {
                Admission::Admitted => report.admitted += 1,
                Admission::TooLarge => report.too_large += 1,
                Admission::AlreadyCached => {}
                Admission::CacheFull => {
                    report.rejected_full += 1;
                    if stop_when_full {
                        report.stopped_early = true;
                        break;
                    }
                }
            }
        }

        report
    }
}

/// The `/`-separated path of `path` relative to `root`.
///
/// Returns `None` when `path` is not under `root` or is `root` itself.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
