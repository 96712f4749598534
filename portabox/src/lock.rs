//! Mutual exclusion of concurrent fetches of the same logical URL across
//! processes, using an advisory lock file keyed by the hashed URL.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::io;

use sha1::{Digest, Sha1};


/// An acquired exclusive lock over a logical URL. The lock is scoped: it is
/// released, and its file removed, when this guard is dropped, whatever the
/// exit path.
pub struct UrlLock {
    path: PathBuf,
    file: Option<fslock::LockFile>,
}

impl UrlLock {

    /// Derive the lock file path for the given canonical URL:
    /// `<tmp_dir>/box<sha1-hex-of-url>.lock`. Identical URLs always derive
    /// the same path and distinct URLs distinct paths.
    pub fn path_for(tmp_dir: &Path, url: &str) -> PathBuf {
        tmp_dir.join(format!("box{}.lock", url_digest(url)))
    }

    /// Attempt a non-blocking exclusive acquisition of the lock for the given
    /// URL. Returns none when the lock is already held by another party; this
    /// never waits.
    pub fn acquire(tmp_dir: &Path, url: &str) -> io::Result<Option<UrlLock>> {

        let path = Self::path_for(tmp_dir, url);
        let mut file = fslock::LockFile::open(&path)?;

        if !file.try_lock()? {
            return Ok(None);
        }

        Ok(Some(UrlLock {
            path,
            file: Some(file),
        }))

    }

    /// The path of the underlying lock file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

}

impl Drop for UrlLock {
    fn drop(&mut self) {
        drop(self.file.take());
        // If another acquirer wins the race and recreates the file between
        // the unlock and the removal, the removal is simply ignored.
        let _ = std::fs::remove_file(&self.path);
    }
}

impl fmt::Debug for UrlLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlLock")
            .field("path", &self.path)
            .finish()
    }
}

/// The 40-hex SHA-1 digest of a URL, shared with the temporary download file
/// naming so that both stay keyed the same way.
pub(crate) fn url_digest(url: &str) -> String {

    let mut digest = Sha1::new();
    digest.update(url.as_bytes());

    let mut buf = String::with_capacity(40);
    for byte in digest.finalize() {
        write!(buf, "{byte:02x}").unwrap();
    }
    buf

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn path_derivation() {

        let tmp = Path::new("/tmp");
        let a = UrlLock::path_for(tmp, "http://host/a.box");
        let b = UrlLock::path_for(tmp, "http://host/b.box");

        assert_ne!(a, b);
        assert_eq!(a, UrlLock::path_for(tmp, "http://host/a.box"));

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("box"));
        assert!(name.ends_with(".lock"));
        assert_eq!(name.len(), "box".len() + 40 + ".lock".len());
        assert!(name["box".len()..name.len() - ".lock".len()]
            .bytes()
            .all(|b| b.is_ascii_hexdigit()));

    }

    #[test]
    fn contention() {

        let dir = tempfile::tempdir().unwrap();
        let url = "http://host/contended.box";

        let first = UrlLock::acquire(dir.path(), url).unwrap().unwrap();
        assert!(first.path().exists());

        // Second acquisition of the same URL fails fast.
        assert!(UrlLock::acquire(dir.path(), url).unwrap().is_none());

        // A different URL is unrelated.
        let other = UrlLock::acquire(dir.path(), "http://host/other.box").unwrap();
        assert!(other.is_some());

        // Releasing makes the URL acquirable again, and removes the file.
        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(UrlLock::acquire(dir.path(), url).unwrap().is_some());

    }

}
