//! Durable content-addressed response cache.
//!
//! One JSON file per entry, grouped by category:
//!
//! ```text
//! <root>/
//!   transcripts/<16 hex>.json    {"video_path": …, "cached_at": …, "transcript": …}
//!   ai_responses/<16 hex>.json   {"prompt_key": …, "cached_at": …, "response": …}
//!   pipeline/<16 hex>.json       {"video_path": …, "cached_at": …, "result": …}
//! ```
//!
//! Entries never expire; [`ResponseCache::clear`] is the only removal path.
//! Writes go to a temporary sibling and are renamed into place, so readers
//! see either the old record or the new one. Writers to the same key are
//! serialized by a per-key lock; unrelated keys never contend.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::request::GenerationRequest;

/// Length of the hex digest prefix used as the file name.
pub const KEY_PREFIX_LEN: usize = 16;

/// Bytes of a file hashed by [`CacheKey::for_file`].
const FILE_HASH_WINDOW: u64 = 1024 * 1024;

const CACHED_AT_FIELD: &str = "cached_at";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Cache partitions and their on-disk record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    Transcripts,
    AiResponses,
    Pipeline,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [Self::Transcripts, Self::AiResponses, Self::Pipeline];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Transcripts => "transcripts",
            Self::AiResponses => "ai_responses",
            Self::Pipeline => "pipeline",
        }
    }

    fn id_field(&self) -> &'static str {
        match self {
            Self::Transcripts | Self::Pipeline => "video_path",
            Self::AiResponses => "prompt_key",
        }
    }

    fn payload_field(&self) -> &'static str {
        match self {
            Self::Transcripts => "transcript",
            Self::AiResponses => "response",
            Self::Pipeline => "result",
        }
    }
}

/// BLAKE3 content hash identifying one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    digest: String,
    /// Human-readable origin (e.g. a file path) stored as the record id.
    #[serde(default)]
    origin: Option<String>,
}

fn hash_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn hash_optional(hasher: &mut blake3::Hasher, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(&[1]);
            hash_field(hasher, v.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

impl CacheKey {
    fn from_hasher(hasher: blake3::Hasher) -> Self {
        Self {
            digest: hasher.finalize().to_hex().to_string(),
            origin: None,
        }
    }

    /// Key over `(prompt, system, model_id, temperature, schema_id)`.
    ///
    /// Fields are length-prefixed so no two distinct tuples share an
    /// encoding. Temperature is hashed by bit pattern; any change to it
    /// yields a new key.
    pub fn for_request(request: &GenerationRequest, model_id: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hash_field(&mut hasher, request.prompt.as_bytes());
        hash_optional(&mut hasher, request.system.as_deref());
        hash_field(&mut hasher, model_id.as_bytes());
        hasher.update(&request.temperature.to_bits().to_le_bytes());
        hash_optional(&mut hasher, request.schema_id.as_deref());
        Self::from_hasher(hasher)
    }

    pub fn for_text(text: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hash_field(&mut hasher, text.as_bytes());
        Self::from_hasher(hasher)
    }

    /// Key over the first MiB of a file plus its size. Missing files hash
    /// their path instead so lookups simply miss.
    pub async fn for_file(path: &Path) -> Result<Self, CacheError> {
        let origin = path.display().to_string();
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::for_text(&origin).with_origin(origin));
            }
            Err(e) => return Err(CacheError::io(path, e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| CacheError::io(path, e))?
            .len();

        let mut head = Vec::new();
        file.take(FILE_HASH_WINDOW)
            .read_to_end(&mut head)
            .await
            .map_err(|e| CacheError::io(path, e))?;

        let mut hasher = blake3::Hasher::new();
        hash_field(&mut hasher, &head);
        hasher.update(&size.to_le_bytes());
        Ok(Self::from_hasher(hasher).with_origin(origin))
    }

    /// Derive a key for one pipeline stage of an existing key.
    pub fn scoped(&self, stage: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hash_field(&mut hasher, self.digest.as_bytes());
        hash_field(&mut hasher, stage.as_bytes());
        Self {
            digest: hasher.finalize().to_hex().to_string(),
            origin: self.origin.clone(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// File-name stem: the first [`KEY_PREFIX_LEN`] hex characters.
    pub fn file_stem(&self) -> &str {
        &self.digest[..KEY_PREFIX_LEN.min(self.digest.len())]
    }

    fn record_id(&self) -> &str {
        self.origin.as_deref().unwrap_or(&self.digest)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn to_record(&self, category: CacheCategory) -> Value {
        let mut record = Map::new();
        record.insert(
            category.id_field().to_string(),
            Value::String(self.key.record_id().to_string()),
        );
        record.insert(
            CACHED_AT_FIELD.to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        record.insert(category.payload_field().to_string(), self.payload.clone());
        Value::Object(record)
    }

    fn stored_id(category: CacheCategory, record: &Value) -> Option<&str> {
        record.get(category.id_field()).and_then(Value::as_str)
    }

    fn from_record(category: CacheCategory, key: &CacheKey, mut record: Value) -> Option<Self> {
        let created_at = record
            .get(CACHED_AT_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        let payload = record.get_mut(category.payload_field())?.take();
        Some(Self {
            key: key.clone(),
            payload,
            created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub entries: usize,
    pub bytes: u64,
}

impl CategoryStats {
    pub fn size_mb(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Disk usage per category plus lookup counters since open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub categories: BTreeMap<CacheCategory, CategoryStats>,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

impl CacheStats {
    pub fn total_entries(&self) -> usize {
        self.categories.values().map(|c| c.entries).sum()
    }
}

/// File-backed cache rooted at one directory.
#[derive(Debug)]
pub struct ResponseCache {
    root: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl ResponseCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        for category in CacheCategory::ALL {
            let dir = root.join(category.dir_name());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| CacheError::io(&dir, e))?;
        }
        debug!(root = %root.display(), "response cache opened");
        Ok(Self {
            root,
            write_locks: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, category: CacheCategory, key: &CacheKey) -> PathBuf {
        self.root
            .join(category.dir_name())
            .join(format!("{}.json", key.file_stem()))
    }

    fn lock_slot(category: CacheCategory, key: &CacheKey) -> String {
        format!("{}/{}", category.dir_name(), key.file_stem())
    }

    fn write_lock(&self, slot: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(slot.to_string()).or_default())
    }

    /// Drop the slot once no other writer holds or waits on it. Clones are
    /// only handed out under the map lock, so the count cannot grow here.
    fn release_write_lock(&self, slot: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(slot);
        }
    }

    #[cfg(test)]
    fn write_lock_slots(&self) -> usize {
        self.write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Look up an entry. Unreadable or corrupt records count as a miss.
    pub async fn get(
        &self,
        category: CacheCategory,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(category, key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let record = match serde_json::from_slice::<Value>(&raw) {
            Ok(record) => record,
            Err(_) => {
                warn!(path = %path.display(), "ignoring corrupt cache record");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };
        // Keys share a file only by stem; the stored id tells them apart.
        if let Some(stored) = CacheEntry::stored_id(category, &record) {
            if stored != key.record_id() {
                debug!(category = category.dir_name(), key = %key, "cache record belongs to another key");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        }

        match CacheEntry::from_record(category, key, record) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(category = category.dir_name(), key = %key, "cache hit");
                Ok(Some(entry))
            }
            None => {
                warn!(path = %path.display(), "ignoring corrupt cache record");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store `payload` under `key`, replacing any previous record atomically.
    pub async fn put(
        &self,
        category: CacheCategory,
        key: &CacheKey,
        payload: Value,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&entry.to_record(category))?;

        let path = self.entry_path(category, key);
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));

        let slot = Self::lock_slot(category, key);
        let lock = self.write_lock(&slot);
        let written = {
            let _guard = lock.lock().await;
            write_atomically(&tmp, &path, &bytes).await
        };
        self.release_write_lock(&slot, lock);
        written?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(category = category.dir_name(), key = %key, bytes = bytes.len(), "cache write");
        Ok(entry)
    }

    /// Remove every record in one category, or in all of them.
    /// Returns the number of records removed.
    pub async fn clear(&self, category: Option<CacheCategory>) -> Result<usize, CacheError> {
        let categories = match category {
            Some(c) => vec![c],
            None => CacheCategory::ALL.to_vec(),
        };

        let mut removed = 0;
        for category in categories {
            let dir = self.root.join(category.dir_name());
            for path in self.record_files(&dir).await? {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::io(&path, e)),
                }
            }
        }
        self.write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        debug!(removed, "cache cleared");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for category in CacheCategory::ALL {
            let dir = self.root.join(category.dir_name());
            let mut summary = CategoryStats::default();
            for path in self.record_files(&dir).await? {
                if let Ok(meta) = tokio::fs::metadata(&path).await {
                    summary.entries += 1;
                    summary.bytes += meta.len();
                }
            }
            stats.categories.insert(category, summary);
        }
        Ok(stats)
    }

    async fn record_files(&self, dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(CacheError::io(dir, e)),
        };
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(dir, e))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

async fn write_atomically(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    tokio::fs::write(tmp, bytes)
        .await
        .map_err(|e| CacheError::io(tmp, e))?;
    if let Err(e) = tokio::fs::rename(tmp, path).await {
        let _ = tokio::fs::remove_file(tmp).await;
        return Err(CacheError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> GenerationRequest {
        GenerationRequest::new("score this transcript").with_system("judge")
    }

    #[test]
    fn test_request_key_is_stable() {
        let a = CacheKey::for_request(&request(), "gpt-4o");
        let b = CacheKey::for_request(&request(), "gpt-4o");
        assert_eq!(a, b);
        assert_eq!(a.file_stem().len(), KEY_PREFIX_LEN);
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_any_field_change_changes_key() {
        let base = CacheKey::for_request(&request(), "gpt-4o");
        let temp = request().with_temperature(request().temperature + f32::EPSILON);
        assert_ne!(base, CacheKey::for_request(&temp, "gpt-4o"));
        assert_ne!(base, CacheKey::for_request(&request(), "gpt-4o-mini"));
        assert_ne!(
            base,
            CacheKey::for_request(&request().with_schema("scores"), "gpt-4o")
        );
        let mut no_system = request();
        no_system.system = None;
        assert_ne!(base, CacheKey::for_request(&no_system, "gpt-4o"));
        // max_output_tokens is not part of the key
        assert_eq!(
            base,
            CacheKey::for_request(&request().with_max_output_tokens(10), "gpt-4o")
        );
    }

    #[test]
    fn test_length_prefix_prevents_field_bleed() {
        let mut a = GenerationRequest::new("ab");
        a.system = Some("c".into());
        let mut b = GenerationRequest::new("a");
        b.system = Some("bc".into());
        assert_ne!(
            CacheKey::for_request(&a, "m"),
            CacheKey::for_request(&b, "m")
        );
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).await.unwrap();
        let key = CacheKey::for_text("prompt");
        let payload = json!({"content": "hello", "tokens": [1, 2]});

        let stored = cache
            .put(CacheCategory::AiResponses, &key, payload.clone())
            .await
            .unwrap();
        let loaded = cache
            .get(CacheCategory::AiResponses, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.payload, payload);
        assert_eq!(loaded.created_at, stored.created_at);

        // Wrong category misses.
        assert!(cache
            .get(CacheCategory::Pipeline, &key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_record_layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).await.unwrap();
        let key = CacheKey::for_text("k");
        cache
            .put(CacheCategory::AiResponses, &key, json!("text"))
            .await
            .unwrap();

        let path = dir
            .path()
            .join("ai_responses")
            .join(format!("{}.json", key.file_stem()));
        let record: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(record["prompt_key"], key.digest());
        assert_eq!(record["response"], "text");
        assert!(record["cached_at"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).await.unwrap();
        let key = CacheKey::for_text("broken");
        let path = dir
            .path()
            .join("ai_responses")
            .join(format!("{}.json", key.file_stem()));
        std::fs::write(&path, b"{not json").unwrap();

        assert!(cache
            .get(CacheCategory::AiResponses, &key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_file_key_uses_content_and_origin() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        std::fs::write(&a, b"frame data").unwrap();
        std::fs::write(&b, b"frame data").unwrap();

        let ka = CacheKey::for_file(&a).await.unwrap();
        let kb = CacheKey::for_file(&b).await.unwrap();
        assert_eq!(ka.digest(), kb.digest());

        std::fs::write(&b, b"other frames").unwrap();
        let kb = CacheKey::for_file(&b).await.unwrap();
        assert_ne!(ka.digest(), kb.digest());

        let missing = CacheKey::for_file(&dir.path().join("nope.mp4")).await.unwrap();
        assert_eq!(missing.digest().len(), 64);

        let cache = ResponseCache::open(dir.path().join("cache")).await.unwrap();
        cache
            .put(CacheCategory::Transcripts, &ka, json!({"segments": []}))
            .await
            .unwrap();
        let path = dir
            .path()
            .join("cache/transcripts")
            .join(format!("{}.json", ka.file_stem()));
        let record: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert!(record["video_path"].as_str().unwrap().ends_with("a.mp4"));
    }

    #[tokio::test]
    async fn test_scoped_keys_are_distinct_per_stage() {
        let base = CacheKey::for_text("video");
        assert_ne!(base.scoped("discover"), base.scoped("compose"));
        assert_eq!(base.scoped("discover"), base.scoped("discover"));
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).await.unwrap();
        for i in 0..3 {
            cache
                .put(
                    CacheCategory::AiResponses,
                    &CacheKey::for_text(&format!("p{i}")),
                    json!(i),
                )
                .await
                .unwrap();
        }
        cache
            .put(CacheCategory::Pipeline, &CacheKey::for_text("v"), json!({}))
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.categories[&CacheCategory::AiResponses].entries, 3);
        assert_eq!(stats.categories[&CacheCategory::Pipeline].entries, 1);
        assert_eq!(stats.categories[&CacheCategory::Transcripts].entries, 0);
        assert!(stats.categories[&CacheCategory::AiResponses].bytes > 0);
        assert_eq!(stats.writes, 4);

        let removed = cache.clear(Some(CacheCategory::AiResponses)).await.unwrap();
        assert_eq!(removed, 3);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries(), 1);

        assert_eq!(cache.clear(None).await.unwrap(), 1);
        assert_eq!(cache.stats().await.unwrap().total_entries(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResponseCache::open(dir.path()).await.unwrap());
        let key = CacheKey::for_text("hot");

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .put(CacheCategory::AiResponses, &key, json!({ "writer": i }))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let entry = cache
            .get(CacheCategory::AiResponses, &key)
            .await
            .unwrap()
            .unwrap();
        assert!(entry.payload["writer"].as_i64().unwrap() < 8);
        assert_eq!(cache.stats().await.unwrap().total_entries(), 1);
        assert_eq!(cache.write_lock_slots(), 0);
    }

    #[tokio::test]
    async fn test_write_locks_released_after_put() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).await.unwrap();
        for i in 0..20 {
            cache
                .put(
                    CacheCategory::AiResponses,
                    &CacheKey::for_text(&format!("prompt {i}")),
                    json!(i),
                )
                .await
                .unwrap();
        }
        assert_eq!(cache.write_lock_slots(), 0);
        assert_eq!(cache.clear(None).await.unwrap(), 20);
        assert_eq!(cache.write_lock_slots(), 0);
    }

    #[tokio::test]
    async fn test_record_for_another_key_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).await.unwrap();
        let key = CacheKey::for_text("wanted");
        let path = dir
            .path()
            .join("ai_responses")
            .join(format!("{}.json", key.file_stem()));
        // Same file stem, different full digest.
        let foreign = format!("{}{}", key.file_stem(), "0".repeat(64 - KEY_PREFIX_LEN));
        assert_ne!(foreign, key.digest());
        let record = json!({
            "prompt_key": foreign,
            "cached_at": Utc::now().to_rfc3339(),
            "response": "someone else's answer",
        });
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        assert!(cache
            .get(CacheCategory::AiResponses, &key)
            .await
            .unwrap()
            .is_none());
        assert_eq!(cache.stats().await.unwrap().misses, 1);

        cache
            .put(CacheCategory::AiResponses, &key, json!("mine"))
            .await
            .unwrap();
        let entry = cache
            .get(CacheCategory::AiResponses, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload, json!("mine"));
    }

    #[tokio::test]
    async fn test_same_content_under_another_path_misses() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        std::fs::write(&a, b"frame data").unwrap();
        std::fs::write(&b, b"frame data").unwrap();
        let ka = CacheKey::for_file(&a).await.unwrap();
        let kb = CacheKey::for_file(&b).await.unwrap();

        let cache = ResponseCache::open(dir.path().join("cache")).await.unwrap();
        cache
            .put(CacheCategory::Transcripts, &ka, json!({"segments": [1]}))
            .await
            .unwrap();
        assert!(cache
            .get(CacheCategory::Transcripts, &ka)
            .await
            .unwrap()
            .is_some());
        assert!(cache
            .get(CacheCategory::Transcripts, &kb)
            .await
            .unwrap()
            .is_none());
    }
}
