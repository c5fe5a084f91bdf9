//! Avatar sync engine.
//!
//! Each request walks `Checking -> Downloading -> Converting -> Applying`,
//! short-circuiting the download when the resolved cache file already
//! exists. A conversion or apply failure discards the cached original so the
//! next request starts from a fresh download. Requests arrive over an mpsc
//! queue so message ingestion never waits on the network; the worker spawns
//! one task per request. At most one download runs per resolved path: a
//! request that finds its path already in flight waits for that download
//! and reuses the cached result. Downloads are staged and renamed into
//! place, so the resolved path only ever holds complete bytes.

use crate::cache;
use crate::platform::ChatApi;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("cache i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("profile update failed: {0}")]
    Apply(#[source] anyhow::Error),
}

/// Phases of one sync request. [`AvatarSync::sync`] returns the state the
/// request terminated in: `Done` on success, `Failed` after a conversion or
/// apply error, or the phase an abandoned request last reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Checking,
    Downloading,
    Converting,
    Applying,
    Done,
    Failed,
}

/// One unit of work handed from ingestion to the sync worker.
pub struct SyncRequest {
    pub target: u64,
    pub api: Arc<dyn ChatApi>,
}

/// Seam over the actual byte fetch so tests can count downloads.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError>;
}

pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::Download(e.to_string()))?;
        if !res.status().is_success() {
            return Err(SyncError::Download(format!(
                "status {} from {}",
                res.status(),
                url
            )));
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| SyncError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

pub struct AvatarSync {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl AvatarSync {
    pub fn new(cache_dir: PathBuf, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache_dir,
            fetcher,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Drain the request queue. One task per request, so a slow download
    /// never delays the next sync or the caller.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<SyncRequest>) {
        while let Some(req) = rx.recv().await {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.sync(req.api.as_ref(), req.target).await;
            });
        }
    }

    /// Run one sync to completion. Failures are logged and cleaned up here;
    /// nothing propagates to the caller.
    #[instrument(skip_all, fields(sync_target = target))]
    pub async fn sync(&self, api: &dyn ChatApi, target: u64) -> SyncState {
        let profile = match api.fetch_user(target).await {
            Ok(profile) => profile,
            Err(err) => {
                info!(%err, "could not look up sync target");
                return SyncState::Checking;
            }
        };
        let Some(url) = profile.avatar_url else {
            info!("sync target has no avatar to mirror");
            return SyncState::Checking;
        };

        let original = cache::resolved_path(&self.cache_dir, &url);
        let converted = cache::converted_path(&self.cache_dir, &url);

        if fs::try_exists(&original).await.unwrap_or(false) {
            debug!(path = %original.display(), "same avatar; reusing cached download");
        } else if self.in_flight.lock().await.insert(original.clone()) {
            let downloaded = self.download(&url, &original).await;
            self.in_flight.lock().await.remove(&original);
            if let Err(err) = downloaded {
                error!(%err, url = %url, "avatar download failed");
                let _ = fs::remove_file(&original).await;
                return SyncState::Failed;
            }
        } else {
            // Another request is already fetching this path; wait for it
            // and reuse its download.
            debug!(path = %original.display(), "download already in flight; waiting");
            while self.in_flight.lock().await.contains(&original) {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            if !fs::try_exists(&original).await.unwrap_or(false) {
                info!(path = %original.display(), "in-flight download did not complete");
                return SyncState::Checking;
            }
        }

        match self.convert_and_apply(api, &original, &converted).await {
            Ok(()) => SyncState::Done,
            Err(err) => {
                // Treat the cached original as corrupt; the next request
                // will download it again.
                error!(%err, path = %original.display(), "avatar sync failed; discarding cached file");
                let _ = fs::remove_file(&original).await;
                SyncState::Failed
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), SyncError> {
        debug!(url, "downloading avatar");
        let bytes = self.fetcher.fetch(url).await?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Stage to a sibling and rename into place so the resolved path
        // only ever holds a complete download.
        let staging = dest.with_extension("part");
        if let Err(err) = fs::write(&staging, &bytes).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        fs::rename(&staging, dest).await?;
        Ok(())
    }

    async fn convert_and_apply(
        &self,
        api: &dyn ChatApi,
        original: &Path,
        converted: &Path,
    ) -> Result<(), SyncError> {
        let bytes = fs::read(original).await?;
        let decoded = image::io::Reader::new(Cursor::new(&bytes))
            .with_guessed_format()?
            .decode()?;

        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(decoded.to_rgb8())
            .write_to(&mut out, image::ImageFormat::Jpeg)?;
        let jpeg = out.into_inner();
        fs::write(converted, &jpeg).await?;

        info!(path = %converted.display(), "applying converted avatar");
        api.set_own_avatar(jpeg).await.map_err(SyncError::Apply)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ChannelProfile, MemberProfile, UserProfile};
    use anyhow::Result;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const AVATAR_URL: &str = "https://cdn.example/avatars/9/head.png";

    struct StubApi {
        avatar_url: Option<String>,
        applied: AtomicUsize,
    }

    impl StubApi {
        fn new(avatar_url: Option<&str>) -> Self {
            Self {
                avatar_url: avatar_url.map(str::to_string),
                applied: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatApi for StubApi {
        async fn fetch_user(&self, id: u64) -> Result<UserProfile> {
            Ok(UserProfile {
                id,
                avatar_url: self.avatar_url.clone(),
                is_bot: false,
                created_at: Utc::now(),
                name: "satoshi".into(),
                display_name: "Satoshi".into(),
                discriminator: 1,
            })
        }

        async fn list_members(&self) -> Result<Vec<MemberProfile>> {
            Ok(Vec::new())
        }

        async fn list_channels(&self) -> Result<Vec<ChannelProfile>> {
            Ok(Vec::new())
        }

        async fn set_activity(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn set_own_avatar(&self, _image: Vec<u8>) -> Result<()> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingFetcher {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(bytes: Vec<u8>) -> Self {
            Self {
                bytes,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    struct GatedFetcher {
        bytes: Vec<u8>,
        calls: AtomicUsize,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.unwrap();
            Ok(self.bytes.clone())
        }
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_download() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let fetcher = Arc::new(GatedFetcher {
            bytes: tiny_png(),
            calls: AtomicUsize::new(0),
            gate: gate.clone(),
        });
        let engine = Arc::new(AvatarSync::new(dir.path().to_path_buf(), fetcher.clone()));
        let api = Arc::new(StubApi::new(Some(AVATAR_URL)));

        let first = tokio::spawn({
            let engine = engine.clone();
            let api = api.clone();
            async move { engine.sync(api.as_ref(), 9).await }
        });
        while fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // The download is parked inside the fetch; the resolved path must
        // stay absent until the complete bytes are renamed into place.
        assert!(!cache::resolved_path(dir.path(), AVATAR_URL).exists());

        let second = tokio::spawn({
            let engine = engine.clone();
            let api = api.clone();
            async move { engine.sync(api.as_ref(), 9).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        gate.add_permits(1);
        assert_eq!(first.await.unwrap(), SyncState::Done);
        assert_eq!(second.await.unwrap(), SyncState::Done);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.applied.load(Ordering::SeqCst), 2);
        assert!(cache::resolved_path(dir.path(), AVATAR_URL).exists());
        assert!(!cache::resolved_path(dir.path(), AVATAR_URL)
            .with_extension("part")
            .exists());
    }

    #[tokio::test]
    async fn downloads_once_then_reuses_cache() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(tiny_png()));
        let engine = AvatarSync::new(dir.path().to_path_buf(), fetcher.clone());
        let api = StubApi::new(Some(AVATAR_URL));

        assert_eq!(engine.sync(&api, 9).await, SyncState::Done);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(cache::resolved_path(dir.path(), AVATAR_URL).exists());
        assert!(cache::converted_path(dir.path(), AVATAR_URL).exists());

        // Cache hit: no second download, avatar applied again.
        assert_eq!(engine.sync(&api, 9).await, SyncState::Done);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deleting_cache_forces_one_new_download() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(tiny_png()));
        let engine = AvatarSync::new(dir.path().to_path_buf(), fetcher.clone());
        let api = StubApi::new(Some(AVATAR_URL));

        assert_eq!(engine.sync(&api, 9).await, SyncState::Done);
        std::fs::remove_file(cache::resolved_path(dir.path(), AVATAR_URL)).unwrap();

        assert_eq!(engine.sync(&api, 9).await, SyncState::Done);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn corrupt_cache_is_removed_and_sync_fails_quietly() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Vec::new()));
        let engine = AvatarSync::new(dir.path().to_path_buf(), fetcher);
        let api = StubApi::new(Some(AVATAR_URL));

        let original = cache::resolved_path(dir.path(), AVATAR_URL);
        std::fs::write(&original, b"not an image").unwrap();

        assert_eq!(engine.sync(&api, 9).await, SyncState::Failed);
        assert!(!original.exists());
        assert_eq!(api.applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_avatar_url_abandons_during_checking() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(tiny_png()));
        let engine = AvatarSync::new(dir.path().to_path_buf(), fetcher.clone());
        let api = StubApi::new(None);

        assert_eq!(engine.sync(&api, 9).await, SyncState::Checking);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(api.applied.load(Ordering::SeqCst), 0);
    }
}
