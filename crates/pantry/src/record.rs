//! AssetRecord: one file held in memory.
//!
//! The bytes and everything derived from them live in an immutable
//! [`AssetContent`]. Revalidation builds a fresh `AssetContent` and swaps the
//! pointer, so a response that already holds an `Arc<AssetContent>` keeps
//! reading the old buffer in full while new requests see the new one.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use bytes::Bytes;
use tracing::debug;

use crate::hash::Fingerprint;
use crate::identity::detect_content_type;
use crate::AssetError;

/// The bytes of a file plus the metadata derived from them.
///
/// Fields are only ever produced together by [`AssetContent::new`], which
/// keeps the content type, fingerprint and timestamps consistent with
/// `bytes`.
#[derive(Debug, Clone)]
pub struct AssetContent {
    pub bytes: Bytes,
    pub content_type: String,
    pub fingerprint: Fingerprint,
    pub last_modified: SystemTime,
    /// `last_modified` as an IMF-fixdate, ready for the `Last-Modified` header.
    pub last_modified_http: String,
}

impl AssetContent {
    pub fn new(path: &Path, bytes: impl Into<Bytes>, last_modified: SystemTime) -> Self {
        let bytes = bytes.into();
        Self {
            content_type: detect_content_type(path, &bytes),
            fingerprint: Fingerprint::from_data(&bytes),
            last_modified_http: httpdate::fmt_http_date(last_modified),
            last_modified,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A cached file, addressed by its path relative to the served root.
#[derive(Debug)]
pub struct AssetRecord {
    path: PathBuf,
    relative_path: String,
    content: ArcSwap<AssetContent>,
}

impl AssetRecord {
    /// Read `path` from disk and build a record for it.
    pub fn load(
        path: impl Into<PathBuf>,
        relative_path: impl Into<String>,
    ) -> Result<Self, AssetError> {
        let path = path.into();
        let (bytes, modified) = read_file(&path)?;
        let content = AssetContent::new(&path, bytes, modified);
        Ok(Self {
            path,
            relative_path: relative_path.into(),
            content: ArcSwap::from_pointee(content),
        })
    }

    /// Absolute location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key used to match request paths.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Snapshot of the current content.
    pub fn content(&self) -> Arc<AssetContent> {
        self.content.load_full()
    }

    /// Current content length in bytes.
    pub fn len(&self) -> usize {
        self.content.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the file on disk and reload it if its modification time moved.
    ///
    /// Any difference in the timestamp counts as a change, including one that
    /// goes backwards. Returns `Ok(true)` when the content was replaced; the
    /// caller is then responsible for recomputing the cache size. On error the
    /// current content stays in place.
    pub fn revalidate(&self) -> Result<bool, AssetError> {
        let metadata = std::fs::metadata(&self.path).map_err(|e| AssetError::io(&self.path, e))?;
        let modified = metadata
            .modified()
            .map_err(|e| AssetError::io(&self.path, e))?;

        if modified == self.content.load().last_modified {
            return Ok(false);
        }

        let (bytes, modified) = read_file(&self.path)?;
        let content = AssetContent::new(&self.path, bytes, modified);
        debug!(
            "Revalidated {} ({} bytes, {})",
            self.relative_path,
            content.len(),
            content.fingerprint
        );
        self.content.store(Arc::new(content));
        Ok(true)
    }
}

/// Read a whole regular file and its modification time.
///
/// The timestamp comes from the same open handle the bytes are read from.
pub fn read_file(path: &Path) -> Result<(Vec<u8>, SystemTime), AssetError> {
    let mut file = File::open(path).map_err(|e| AssetError::io(path, e))?;
    let metadata = file.metadata().map_err(|e| AssetError::io(path, e))?;
    if !metadata.is_file() {
        return Err(AssetError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let modified = metadata.modified().map_err(|e| AssetError::io(path, e))?;

    let mut buf = Vec::with_capacity(metadata.len() as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| AssetError::io(path, e))?;
    Ok((buf, modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn test_load_populates_derived_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("style.css");
        fs::write(&path, "body { color: red }").unwrap();

        let record = AssetRecord::load(&path, "style.css").unwrap();
        let content = record.content();

        assert_eq!(record.relative_path(), "style.css");
        assert_eq!(record.path(), path.as_path());
        assert_eq!(&content.bytes[..], b"body { color: red }");
        assert_eq!(content.content_type, "text/css; charset=utf-8");
        assert_eq!(content.fingerprint, Fingerprint::from_data(b"body { color: red }"));
        assert_eq!(content.last_modified, fs::metadata(&path).unwrap().modified().unwrap());
        assert_eq!(
            content.last_modified_http,
            httpdate::fmt_http_date(content.last_modified)
        );
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = AssetRecord::load(dir.path().join("nope.txt"), "nope.txt").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let err = AssetRecord::load(dir.path().join("sub"), "sub").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_through_regular_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        let err = AssetRecord::load(dir.path().join("hello.txt/x"), "hello.txt/x").unwrap_err();
        assert!(err.is_not_found(), "got {:?}", err);

        let err = AssetRecord::load(dir.path().join("hello.txt/index.html"), "hello.txt/index.html")
            .unwrap_err();
        assert!(err.is_not_found(), "got {:?}", err);
    }

    #[test]
    fn test_revalidate_unchanged_returns_false() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "one").unwrap();

        let record = AssetRecord::load(&path, "a.txt").unwrap();
        let before = record.content();

        assert!(!record.revalidate().unwrap());
        assert!(Arc::ptr_eq(&before, &record.content()));
    }

    #[test]
    fn test_revalidate_picks_up_new_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "<p>old</p>").unwrap();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_mtime(&path, t0);

        let record = AssetRecord::load(&path, "page.html").unwrap();
        let old = record.content();

        fs::write(&path, "<p>new, longer</p>").unwrap();
        let t1 = t0 + Duration::from_secs(60);
        set_mtime(&path, t1);

        assert!(record.revalidate().unwrap());
        let new = record.content();
        assert_eq!(&new.bytes[..], b"<p>new, longer</p>");
        assert_ne!(new.fingerprint, old.fingerprint);
        assert_eq!(new.last_modified, t1);
        assert_eq!(new.last_modified_http, httpdate::fmt_http_date(t1));

        // a reader holding the old snapshot still sees the old bytes in full
        assert_eq!(&old.bytes[..], b"<p>old</p>");
    }

    #[test]
    fn test_revalidate_treats_older_timestamp_as_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "v1").unwrap();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_mtime(&path, t0);

        let record = AssetRecord::load(&path, "a.txt").unwrap();

        fs::write(&path, "v0").unwrap();
        set_mtime(&path, t0 - Duration::from_secs(3600));

        assert!(record.revalidate().unwrap());
        assert_eq!(&record.content().bytes[..], b"v0");
    }

    #[test]
    fn test_revalidate_error_keeps_stale_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        fs::write(&path, "still here").unwrap();

        let record = AssetRecord::load(&path, "gone.txt").unwrap();
        fs::remove_file(&path).unwrap();

        assert!(record.revalidate().is_err());
        assert_eq!(&record.content().bytes[..], b"still here");
    }
}
