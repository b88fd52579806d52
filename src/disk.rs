//! On-disk cache storage that survives process restarts.
//!
//! Each bucket is a directory under the storage root named by the
//! base64url-encoded bucket name. Every entry is a pair of files named by the
//! SHA-256 of its request URL: `<hash>.json` holds the response metadata and
//! `<hash>.body` the raw body.
//!
//! Writes never modify a live bucket in place: [`DiskCacheStorage::put_all`]
//! assembles the next version of the bucket in a staging directory and swaps
//! it in with renames. Readers wait while a swap is in progress, and a started
//! write runs to completion on its own task even if the caller goes away.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::message::{AssetRequest, AssetResponse};
use crate::storage::CacheStorage;

const META_EXT: &str = "json";
const BODY_EXT: &str = "body";
const STAGING: &str = "staging";
const RETIRED: &str = "retired";

/// Metadata persisted next to each body file.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    request_url: String,
    response_url: String,
    status: u16,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
}

/// Cache storage backed by a directory tree.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    /// Serializes writers, including the scratch sweep in `open`.
    write_lock: Arc<Mutex<()>>,
    /// Held for writing only across the two renames of a swap.
    swap_lock: Arc<RwLock<()>>,
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
            swap_lock: Arc::new(RwLock::new(())),
        }
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(encode_name(name)?))
    }

    /// Removes scratch directories left behind by an interrupted process.
    ///
    /// A retired bucket whose live directory is missing was caught between
    /// the two renames of a swap and is moved back into place. Callers must
    /// hold `write_lock`.
    async fn sweep_scratch(&self) -> Result<()> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some((kind, encoded)) = file_name.to_str().and_then(parse_scratch_name) else {
                continue;
            };
            let path = entry.path();
            let live = self.root.join(encoded);
            if kind == RETIRED && !is_dir(&live).await {
                log::warn!("Restoring bucket {encoded} from interrupted swap");
                tokio::fs::rename(&path, &live).await?;
                continue;
            }
            log::debug!("Removing stale scratch directory {}", path.display());
            tokio::fs::remove_dir_all(&path).await?;
        }
        Ok(())
    }
}

/// Bucket directory name: base64url of the cache name.
fn encode_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::Storage("cache name must not be empty".to_string()));
    }
    Ok(URL_SAFE_NO_PAD.encode(name))
}

/// `.<kind>-<uuid>.<encoded bucket>`; the base64url alphabet has no dots.
fn scratch_dir(root: &Path, kind: &str, encoded: &str) -> PathBuf {
    root.join(format!(".{kind}-{}.{encoded}", uuid::Uuid::new_v4()))
}

fn parse_scratch_name(file_name: &str) -> Option<(&'static str, &str)> {
    let rest = file_name.strip_prefix('.')?;
    let (head, encoded) = rest.rsplit_once('.')?;
    let kind = if head.starts_with(STAGING) {
        STAGING
    } else if head.starts_with(RETIRED) {
        RETIRED
    } else {
        return None;
    };
    (!encoded.is_empty()).then_some((kind, encoded))
}

/// Builds the next bucket version in a staging directory.
async fn stage(
    staging: &Path,
    live: &Path,
    entries: &[(AssetRequest, AssetResponse)],
) -> Result<()> {
    tokio::fs::create_dir_all(staging).await?;

    if is_dir(live).await {
        let mut dir = tokio::fs::read_dir(live).await?;
        while let Some(entry) = dir.next_entry().await? {
            tokio::fs::copy(entry.path(), staging.join(entry.file_name())).await?;
        }
    }

    let stored_at = Utc::now();
    for (request, response) in entries {
        let stem = entry_stem(request.cache_key());
        let meta = EntryMeta {
            request_url: request.cache_key().to_string(),
            response_url: response.url.to_string(),
            status: response.status.as_u16(),
            headers: response.headers.clone(),
            stored_at,
        };
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| Error::Storage(format!("encode entry: {e}")))?;
        tokio::fs::write(staging.join(format!("{stem}.{BODY_EXT}")), &response.body).await?;
        tokio::fs::write(staging.join(format!("{stem}.{META_EXT}")), json).await?;
    }
    Ok(())
}

/// Replaces `live` with `staging`, restoring the old bucket if the swap fails.
async fn swap_in(
    swap_lock: &RwLock<()>,
    root: &Path,
    encoded: &str,
    staging: &Path,
    live: &Path,
) -> Result<()> {
    let retired = scratch_dir(root, RETIRED, encoded);
    {
        let _swap = swap_lock.write().await;
        if is_dir(live).await {
            tokio::fs::rename(live, &retired).await?;
            if let Err(e) = tokio::fs::rename(staging, live).await {
                let _ = tokio::fs::rename(&retired, live).await;
                return Err(e.into());
            }
        } else {
            tokio::fs::rename(staging, live).await?;
            return Ok(());
        }
    }
    if let Err(e) = tokio::fs::remove_dir_all(&retired).await {
        log::warn!("Could not remove retired bucket {}: {e}", retired.display());
    }
    Ok(())
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let dir = self.bucket_dir(name)?;
        let _guard = self.write_lock.lock().await;
        self.sweep_scratch().await?;
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let dir = self.bucket_dir(name)?;
        let _swap = self.swap_lock.read().await;
        Ok(is_dir(&dir).await)
    }

    async fn match_request(
        &self,
        name: &str,
        request: &AssetRequest,
    ) -> Result<Option<AssetResponse>> {
        if !request.is_cacheable() {
            return Ok(None);
        }
        let stem = entry_stem(request.cache_key());
        let dir = self.bucket_dir(name)?;
        let _swap = self.swap_lock.read().await;

        let json = match tokio::fs::read(dir.join(format!("{stem}.{META_EXT}"))).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta = serde_json::from_slice(&json)
            .map_err(|e| Error::Storage(format!("decode entry for {}: {e}", request.url())))?;
        let body = tokio::fs::read(dir.join(format!("{stem}.{BODY_EXT}"))).await?;

        Ok(Some(decode_response(meta, body)?))
    }

    async fn put_all(&self, name: &str, entries: Vec<(AssetRequest, AssetResponse)>) -> Result<()> {
        let encoded = encode_name(name)?;
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let root = self.root.clone();
        let swap_lock = Arc::clone(&self.swap_lock);
        let count = entries.len();

        // Once started, the write finishes even if this future is dropped.
        let task = tokio::spawn(async move {
            let _guard = guard;
            let live = root.join(&encoded);
            let staging = scratch_dir(&root, STAGING, &encoded);
            let result = match stage(&staging, &live, &entries).await {
                Ok(()) => swap_in(&swap_lock, &root, &encoded, &staging, &live).await,
                Err(e) => Err(e),
            };
            if result.is_err() {
                let _ = tokio::fs::remove_dir_all(&staging).await;
            }
            result
        });
        task.await
            .map_err(|e| Error::Storage(format!("store task for cache {name}: {e}")))??;

        log::debug!("Stored {count} entries in cache {name}");
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.bucket_dir(name)?;
        let _swap = self.swap_lock.read().await;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == META_EXT) {
                let json = tokio::fs::read(&path).await?;
                let meta: EntryMeta = serde_json::from_slice(&json)
                    .map_err(|e| Error::Storage(format!("decode {}: {e}", path.display())))?;
                keys.push(meta.request_url);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn cache_names(&self) -> Result<Vec<String>> {
        let _swap = self.swap_lock.read().await;
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(encoded) = file_name.to_str() else {
                continue;
            };
            if encoded.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            match URL_SAFE_NO_PAD
                .decode(encoded)
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok())
            {
                Some(name) => names.push(name),
                None => log::debug!("Skipping foreign directory {encoded}"),
            }
        }
        names.sort();
        Ok(names)
    }
}

/// File stem for an entry: hex SHA-256 of the request URL.
fn entry_stem(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

fn decode_response(meta: EntryMeta, body: Vec<u8>) -> Result<AssetResponse> {
    let url = Url::parse(&meta.response_url)
        .map_err(|e| Error::Storage(format!("stored URL {}: {e}", meta.response_url)))?;
    let status = StatusCode::from_u16(meta.status)
        .map_err(|e| Error::Storage(format!("stored status {}: {e}", meta.status)))?;
    Ok(AssetResponse {
        url,
        status,
        headers: meta.headers,
        body: body.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, body: &'static str) -> (AssetRequest, AssetResponse) {
        let url = Url::parse("https://app.test/").unwrap().join(path).unwrap();
        (
            AssetRequest::get(url.clone()),
            AssetResponse::new(url, StatusCode::OK, body)
                .with_header("content-type", "text/plain"),
        )
    }

    #[tokio::test]
    async fn stored_response_reads_back() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        let (req, resp) = entry("index.html", "<html>");

        storage.put_all("v1", vec![(req.clone(), resp.clone())]).await.unwrap();
        let hit = storage.match_request("v1", &req).await.unwrap();
        assert_eq!(hit, Some(resp));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (req, resp) = entry("app.wasm", "\0asm");
        DiskCacheStorage::new(dir.path())
            .put_all("v1", vec![(req.clone(), resp.clone())])
            .await
            .unwrap();

        let reopened = DiskCacheStorage::new(dir.path());
        assert!(reopened.has("v1").await.unwrap());
        assert_eq!(reopened.match_request("v1", &req).await.unwrap(), Some(resp));
    }

    #[tokio::test]
    async fn miss_on_unknown_url_or_bucket() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put_all("v1", vec![entry("a.js", "a")]).await.unwrap();

        let (other, _) = entry("b.js", "");
        assert_eq!(storage.match_request("v1", &other).await.unwrap(), None);
        assert_eq!(storage.match_request("nope", &other).await.unwrap(), None);
        assert!(storage.keys("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reput_keeps_one_entry_per_url() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage
            .put_all("v1", vec![entry("a.js", "a"), entry("b.js", "b")])
            .await
            .unwrap();
        storage
            .put_all("v1", vec![entry("a.js", "a2"), entry("b.js", "b2")])
            .await
            .unwrap();

        assert_eq!(
            storage.keys("v1").await.unwrap(),
            ["https://app.test/a.js", "https://app.test/b.js"]
        );
        let (a, _) = entry("a.js", "");
        let hit = storage.match_request("v1", &a).await.unwrap().unwrap();
        assert_eq!(hit.body.as_ref(), b"a2");
    }

    #[tokio::test]
    async fn put_merges_with_existing_entries() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put_all("v1", vec![entry("a.js", "a")]).await.unwrap();
        storage.put_all("v1", vec![entry("b.js", "b")]).await.unwrap();

        assert_eq!(storage.keys("v1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn no_scratch_directories_left_behind() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put_all("v1", vec![entry("a.js", "a")]).await.unwrap();
        storage.put_all("v1", vec![entry("a.js", "b")]).await.unwrap();

        assert_eq!(scratch_entries(dir.path()), 0);
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count()
    }

    fn app_entries() -> Vec<(AssetRequest, AssetResponse)> {
        vec![
            entry("", "<shell>"),
            entry("index.html", "<html>"),
            entry("app.js", "js"),
            entry("app.wasm", "\0asm"),
        ]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_a_missing_bucket_during_rewrite() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(DiskCacheStorage::new(dir.path()));
        storage.put_all("v1", app_entries()).await.unwrap();

        let writer = {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move {
                for _ in 0..50 {
                    storage.put_all("v1", app_entries()).await.unwrap();
                }
            })
        };

        let (index, _) = entry("index.html", "");
        loop {
            let hit = storage.match_request("v1", &index).await.unwrap();
            assert_eq!(hit.map(|r| r.body.to_vec()), Some(b"<html>".to_vec()));
            assert_eq!(storage.keys("v1").await.unwrap().len(), 4);
            if writer.is_finished() {
                break;
            }
        }
        writer.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_write_still_completes() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put_all("v1", app_entries()).await.unwrap();

        for i in 0..50 {
            let deadline = std::time::Duration::from_micros(i * 20);
            let _ = tokio::time::timeout(deadline, storage.put_all("v1", app_entries())).await;

            // `open` queues behind any write still running.
            storage.open("v1").await.unwrap();
            assert_eq!(storage.keys("v1").await.unwrap().len(), 4, "run {i}");
            assert_eq!(scratch_entries(dir.path()), 0, "run {i}");
        }
    }

    #[tokio::test]
    async fn open_sweeps_scratch_and_restores_interrupted_swap() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put_all("v1", vec![entry("a.js", "a")]).await.unwrap();

        // Simulate a crash between the two renames of a swap.
        let encoded = encode_name("v1").unwrap();
        let live = dir.path().join(&encoded);
        std::fs::rename(&live, scratch_dir(dir.path(), RETIRED, &encoded)).unwrap();
        std::fs::create_dir(scratch_dir(dir.path(), STAGING, &encoded)).unwrap();
        assert!(!storage.has("v1").await.unwrap());

        storage.open("other").await.unwrap();
        assert_eq!(scratch_entries(dir.path()), 0);
        assert_eq!(storage.keys("v1").await.unwrap(), ["https://app.test/a.js"]);
    }

    #[test]
    fn scratch_names_round_trip() {
        let encoded = encode_name("spells/v1").unwrap();
        let path = scratch_dir(Path::new("/tmp"), RETIRED, &encoded);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_scratch_name(name), Some((RETIRED, encoded.as_str())));
        assert_eq!(parse_scratch_name(&encoded), None);
        assert_eq!(parse_scratch_name(".DS_Store"), None);
    }

    #[tokio::test]
    async fn cache_names_decode_directory_names() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.open("pf1-spell-search-pwa").await.unwrap();
        storage.open("v2/with slash").await.unwrap();

        assert_eq!(
            storage.cache_names().await.unwrap(),
            ["pf1-spell-search-pwa", "v2/with slash"]
        );
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        assert!(matches!(storage.open("").await, Err(Error::Storage(_))));
    }
}
