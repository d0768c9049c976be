//! Record store over a single JSON document, pluggable document backends, and shared HTTP client setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use sofia_core::{NoticeStatus, Record};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed store document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("blob storage error: {0}")]
    Blob(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Read/write primitive for the whole store document.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    fn describe(&self) -> String;

    /// `None` when the document has never been written.
    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    async fn save(&self, bytes: &[u8]) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Local JSON file, replaced through a temp file and atomic rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl DocumentBackend for FileBackend {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(&self.path, err)),
        }
    }

    async fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = self.parent_dir();
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| StoreError::io(&parent, err))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|err| StoreError::io(&temp_path, err))?;
        file.write_all(bytes)
            .await
            .map_err(|err| StoreError::io(&temp_path, err))?;
        file.flush()
            .await
            .map_err(|err| StoreError::io(&temp_path, err))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&self.path, err));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let parent = self.parent_dir();
        let meta = fs::metadata(&parent)
            .await
            .map_err(|err| StoreError::io(&parent, err))?;
        if meta.permissions().readonly() {
            return Err(StoreError::io(
                &parent,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "directory is read-only"),
            ));
        }
        Ok(())
    }
}

/// S3-compatible object (DigitalOcean Spaces in production).
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl S3Backend {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Build a client from the ambient AWS credential chain, pointed at `endpoint` when given.
    pub async fn connect(
        endpoint: Option<&str>,
        region: &str,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        Self::new(aws_sdk_s3::Client::new(&shared), bucket, key)
    }
}

#[async_trait]
impl DocumentBackend for S3Backend {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|err| StoreError::Blob(err.to_string()))?;
                Ok(Some(body.into_bytes().to_vec()))
            }
            Err(err) => match err.as_service_error() {
                Some(service) if service.is_no_such_key() => Ok(None),
                _ => Err(StoreError::Blob(DisplayErrorContext(&err).to_string())),
            },
        }
    }

    async fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type("application/json")
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|err| StoreError::Blob(DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| StoreError::Blob(DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }
}

/// Process-local document, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.document.lock().await.clone())
    }

    async fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        *self.document.lock().await = Some(bytes.to_vec());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainOutcome {
    pub kept: usize,
    pub dropped: Vec<String>,
}

/// Map of notice id to record, persisted as one JSON array.
///
/// Every operation reads the whole document and, for mutations, rewrites it
/// wholesale. All operations hold the store lock, so a handle shared between
/// tasks never interleaves two read-modify-write cycles.
pub struct RecordStore {
    backend: Box<dyn DocumentBackend>,
    lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(backend: impl DocumentBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.backend.ping().await
    }

    pub async fn get_all(&self) -> Result<Vec<Record>, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_document().await
    }

    pub async fn get(&self, notice_id: &str) -> Result<Option<Record>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_document()
            .await?
            .into_iter()
            .find(|r| r.notice_id == notice_id))
    }

    pub async fn exists(&self, notice_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let exists = self
            .read_document()
            .await?
            .iter()
            .any(|r| r.notice_id == notice_id);
        debug!(notice_id, exists, "checked record existence");
        Ok(exists)
    }

    pub async fn with_status(&self, status: NoticeStatus) -> Result<Vec<Record>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_document()
            .await?
            .into_iter()
            .filter(|r| r.notice_status == status)
            .collect())
    }

    /// Insert when absent, otherwise replace the stored record wholesale.
    pub async fn upsert(&self, record: Record) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_document().await?;
        let notice_id = record.notice_id.clone();
        match records.iter_mut().find(|r| r.notice_id == record.notice_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.write_document(&records).await?;
        info!(notice_id = %notice_id, "saved record");
        Ok(())
    }

    pub async fn delete(&self, notice_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_document().await?;
        let before = records.len();
        records.retain(|r| r.notice_id != notice_id);
        let removed = records.len() != before;
        if removed {
            self.write_document(&records).await?;
            info!(notice_id, "deleted record");
        }
        Ok(removed)
    }

    /// Keep only records matching `keep` and rewrite the collection.
    pub async fn retain<F>(&self, mut keep: F) -> Result<RetainOutcome, StoreError>
    where
        F: FnMut(&Record) -> bool + Send,
    {
        let _guard = self.lock.lock().await;
        let records = self.read_document().await?;
        let (kept, dropped): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| keep(r));
        self.write_document(&kept).await?;
        Ok(RetainOutcome {
            kept: kept.len(),
            dropped: dropped.into_iter().map(|r| r.notice_id).collect(),
        })
    }

    async fn read_document(&self) -> Result<Vec<Record>, StoreError> {
        match self.backend.load().await? {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                Ok(serde_json::from_slice(&bytes)?)
            }
            _ => {
                debug!(backend = %self.backend.describe(), "store document missing; treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn write_document(&self, records: &[Record]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        self.backend.save(&bytes).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// Shared reqwest client for every outbound API adapter.
pub fn build_http_client(config: &HttpClientConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    builder.build().context("building reqwest client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn mk_record(id: &str, posted: (i32, u32, u32)) -> Record {
        Record {
            notice_id: id.to_string(),
            notice_type: None,
            related_to: None,
            date_fetched: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            title: format!("Notice {id}"),
            federal_org: "DEPT OF THE NAVY".to_string(),
            date_posted: NaiveDate::from_ymd_opt(posted.0, posted.1, posted.2).unwrap(),
            due_date: None,
            set_aside: None,
            naics_codes: vec!["541330".to_string()],
            location_city: String::new(),
            location_state: String::new(),
            description_url: None,
            sam_url: None,
            summary_text: None,
            notice_status: NoticeStatus::New,
        }
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty_store() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(FileBackend::new(dir.path().join("storage.json")));
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(!store.exists("nope").await.unwrap());
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_inserts_then_replaces_wholesale() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("storage.json");
        let store = RecordStore::new(FileBackend::new(&path));

        store.upsert(mk_record("a", (2025, 3, 1))).await.unwrap();
        store.upsert(mk_record("b", (2025, 3, 2))).await.unwrap();

        let mut replacement = mk_record("a", (2025, 3, 1));
        replacement.title = "Replaced".to_string();
        replacement.naics_codes.clear();
        store.upsert(replacement.clone()).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.get("a").await.unwrap(), Some(replacement));

        // The document on disk is a plain JSON array with camelCase keys.
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);
        assert_eq!(raw[0]["noticeId"], "a");
    }

    #[tokio::test]
    async fn delete_and_exists_track_membership() {
        let store = RecordStore::new(MemoryBackend::new());
        store.upsert(mk_record("a", (2025, 3, 1))).await.unwrap();
        assert!(store.exists("a").await.unwrap());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.exists("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn with_status_filters_by_lifecycle_position() {
        let store = RecordStore::new(MemoryBackend::new());
        let mut summarized = mk_record("s", (2025, 3, 1));
        summarized.notice_status = NoticeStatus::Summarized;
        store.upsert(mk_record("n", (2025, 3, 1))).await.unwrap();
        store.upsert(summarized).await.unwrap();

        let new = store.with_status(NoticeStatus::New).await.unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].notice_id, "n");
        assert!(store.with_status(NoticeStatus::Emailed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retain_rewrites_the_kept_set() {
        let store = RecordStore::new(MemoryBackend::new());
        for (id, day) in [("a", 1), ("b", 2), ("c", 3)] {
            store.upsert(mk_record(id, (2025, 3, day))).await.unwrap();
        }
        let cutoff = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        let outcome = store.retain(|r| r.date_posted >= cutoff).await.unwrap();
        assert_eq!(outcome.kept, 2);
        assert_eq!(outcome.dropped, vec!["a".to_string()]);
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn atomic_save_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(FileBackend::new(dir.path().join("storage.json")));
        store.upsert(mk_record("a", (2025, 3, 1))).await.unwrap();
        store.upsert(mk_record("b", (2025, 3, 1))).await.unwrap();

        let names = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["storage.json".to_string()]);
    }

    #[tokio::test]
    async fn malformed_document_is_a_decode_error() {
        let backend = MemoryBackend::new();
        backend.save(b"{not json").await.unwrap();
        let store = RecordStore::new(backend);
        assert!(matches!(store.get_all().await, Err(StoreError::Decode(_))));
    }

    #[tokio::test]
    async fn file_backend_ping_checks_parent_directory() {
        let dir = tempdir().expect("tempdir");
        let ok = FileBackend::new(dir.path().join("storage.json"));
        assert!(ok.ping().await.is_ok());
        let missing = FileBackend::new(dir.path().join("absent").join("storage.json"));
        assert!(missing.ping().await.is_err());
        assert!(!dir.path().join("absent").exists());
    }
}
