//! In-memory static asset cache for larder.
//!
//! pantry holds the files a static server hands out, keyed by their path
//! relative to the served root:
//! - **identity**: content-type sniffing refined by extension
//! - **hash**: the content fingerprint used as the ETag
//! - **record**: one cached file, revalidated against disk by mtime
//! - **cache**: capacity-bounded admission and the startup walk
//!
//! Everything here is synchronous. Callers on an async runtime should run
//! loads and revalidations on a blocking thread.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use pantry::{AssetCache, AssetRecord};
//!
//! let cache = AssetCache::new(100 * 1024 * 1024, 10 * 1024 * 1024);
//! let report = cache.populate(Path::new("./public"), false);
//! println!("cached {} files, {} bytes", report.admitted, cache.current_size());
//!
//! if let Some(record) = cache.find_by_relative_path("index.html") {
//!     if record.revalidate().unwrap() {
//!         cache.recompute_size();
//!     }
//!     let content = record.content();
//!     println!("{} {}", content.content_type, content.fingerprint.entity_tag());
//! }
//!
//! let fresh = Arc::new(AssetRecord::load("./public/late.css", "late.css").unwrap());
//! let _ = cache.push(fresh);
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod cache;
pub mod hash;
pub mod identity;
pub mod record;

pub use cache::{relative_key, Admission, AssetCache, PopulateReport};
pub use hash::Fingerprint;
pub use identity::detect_content_type;
pub use record::{AssetContent, AssetRecord};

/// Failures reading an asset from disk.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("no file at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    /// Wrap an I/O error. A missing file, or a path that runs through a
    /// regular file (`ENOTDIR`), becomes [`AssetError::NotFound`].
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        if matches!(
            source.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
        ) {
            AssetError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            AssetError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AssetError::NotFound { .. })
    }
}
