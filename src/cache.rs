//! Deterministic mapping from a remote image URL to local cache file paths.
//!
//! Pure path arithmetic, no I/O. Two URLs that differ in any byte digest to
//! different names; the same URL resolves identically across restarts.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

fn url_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Path the original download for `url` is cached at. Presence of this file
/// means the download is already satisfied.
pub fn resolved_path(cache_dir: &Path, url: &str) -> PathBuf {
    cache_dir.join(format!("{}.orig", url_digest(url)))
}

/// Path the converted RGB JPEG for `url` is written to.
pub fn converted_path(cache_dir: &Path, url: &str) -> PathBuf {
    cache_dir.join(format!("{}.jpg", url_digest(url)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://cdn.example/avatars/1/abc.png";

    #[test]
    fn same_url_same_path() {
        let root = Path::new("/tmp/cache");
        assert_eq!(resolved_path(root, URL), resolved_path(root, URL));
        assert_eq!(converted_path(root, URL), converted_path(root, URL));
    }

    #[test]
    fn different_urls_diverge() {
        let root = Path::new("/tmp/cache");
        let other = "https://cdn.example/avatars/1/abd.png";
        assert_ne!(resolved_path(root, URL), resolved_path(root, other));
    }

    #[test]
    fn converted_output_is_jpeg_named() {
        let root = Path::new("/tmp/cache");
        let converted = converted_path(root, URL);
        assert_eq!(converted.extension().unwrap(), "jpg");
        assert_ne!(converted, resolved_path(root, URL));
        assert!(converted.starts_with(root));
    }
}
