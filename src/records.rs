//! Auxiliary record lookup with a process-lifetime cache
//!
//! Records live at `assets/data/{key}/{id}.json`, either behind an HTTP server
//! or in a local asset tree. Each `(key, id)` pair is fetched at most once: the
//! cache stores the in-flight operation, so concurrent callers share a single
//! request. Failures are logged and cached as absent records.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Auxiliary attribute data for one entity
pub type Record = Map<String, Value>;

/// Result of a batch lookup; every requested id is present, `None` when unavailable
pub type RecordSet = HashMap<String, Option<Arc<Record>>>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid JSON in {location}: {source}")]
    Parse { location: String, source: serde_json::Error },
    #[error("{location} is not a JSON object")]
    NotAnObject { location: String },
}

/// Relative location of a record
pub fn record_path(key: &str, id: &str) -> String {
    format!("assets/data/{}/{}.json", key, id)
}

fn parse_record(bytes: &[u8], location: &str) -> Result<Record, FetchError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|source| FetchError::Parse {
        location: location.to_string(),
        source,
    })?;
    match value {
        Value::Object(record) => Ok(record),
        _ => Err(FetchError::NotAnObject { location: location.to_string() }),
    }
}

/// Something that can produce a record for `(key, id)`
#[allow(async_fn_in_trait)]
pub trait RecordFetcher {
    async fn fetch(&self, key: &str, id: &str) -> Result<Record, FetchError>;
}

/// Fetches records over HTTP from `{base_url}/assets/data/...`
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, key: &str, id: &str) -> String {
        format!("{}/{}", self.base_url, record_path(key, id))
    }
}

impl RecordFetcher for HttpFetcher {
    async fn fetch(&self, key: &str, id: &str) -> Result<Record, FetchError> {
        let url = self.url_for(key, id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request { url: url.clone(), source })?;
        parse_record(&body, &url)
    }
}

/// Reads records from a local asset tree rooted at `root`
#[derive(Clone, Debug)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str, id: &str) -> PathBuf {
        self.root.join(record_path(key, id))
    }
}

impl RecordFetcher for DirFetcher {
    async fn fetch(&self, key: &str, id: &str) -> Result<Record, FetchError> {
        let path = self.path_for(key, id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::Io { path: path.clone(), source })?;
        parse_record(&bytes, &path.display().to_string())
    }
}

/// Fetcher chosen from configuration at startup
#[derive(Clone, Debug)]
pub enum AnyFetcher {
    Http(HttpFetcher),
    Dir(DirFetcher),
}

impl RecordFetcher for AnyFetcher {
    async fn fetch(&self, key: &str, id: &str) -> Result<Record, FetchError> {
        match self {
            AnyFetcher::Http(f) => f.fetch(key, id).await,
            AnyFetcher::Dir(f) => f.fetch(key, id).await,
        }
    }
}

type Slot = Arc<OnceCell<Option<Arc<Record>>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub fetches: usize,
}

/// Two-level `key -> id -> record` cache over a fetcher
pub struct RecordCache<F> {
    fetcher: F,
    slots: Mutex<HashMap<String, HashMap<String, Slot>>>,
    fetches: AtomicUsize,
}

impl<F: RecordFetcher> RecordCache<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            slots: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    fn slot(&self, key: &str, id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Record for `(key, id)`, or `None` if it could not be fetched.
    pub async fn get(&self, key: &str, id: &str) -> Option<Arc<Record>> {
        let slot = self.slot(key, id);
        slot.get_or_init(|| self.load(key, id)).await.clone()
    }

    async fn load(&self, key: &str, id: &str) -> Option<Arc<Record>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(key, id, "fetching record");
        match self.fetcher.fetch(key, id).await {
            Ok(record) => Some(Arc::new(record)),
            Err(err) => {
                tracing::warn!(key, id, error = %err, "record unavailable");
                None
            }
        }
    }

    /// Look up all `ids` concurrently; resolves once every lookup has.
    pub async fn get_many(&self, key: &str, ids: &[String]) -> RecordSet {
        let mut unique: Vec<&str> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id.as_str()) {
                unique.push(id);
            }
        }

        let records = join_all(unique.iter().map(|id| self.get(key, id))).await;
        unique.into_iter().map(str::to_string).zip(records).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: slots.values().map(HashMap::len).sum(),
            fetches: self.fetches.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// In-memory fetcher that counts calls; unknown ids fail with 404
    #[derive(Default)]
    pub struct FakeFetcher {
        records: HashMap<(String, String), Record>,
        pub calls: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn with(mut self, key: &str, id: &str, record: Value) -> Self {
            let record = record.as_object().cloned().unwrap_or_default();
            self.records.insert((key.to_string(), id.to_string()), record);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RecordFetcher for FakeFetcher {
        async fn fetch(&self, key: &str, id: &str) -> Result<Record, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Stay pending across a few polls so concurrent callers overlap
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            self.records
                .get(&(key.to_string(), id.to_string()))
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: record_path(key, id),
                    status: 404,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeFetcher;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_concurrent_gets_share_one_fetch() {
        let cache = RecordCache::new(FakeFetcher::default().with("tracts", "36001", json!({"pop": 10})));

        let (a, b) = tokio::join!(cache.get("tracts", "36001"), cache.get("tracts", "36001"));
        assert_eq!(cache.fetcher.calls(), 1);
        assert_eq!(a.unwrap().get("pop"), Some(&json!(10)));
        assert!(b.is_some());

        // Resolved ids never refetch
        cache.get("tracts", "36001").await;
        assert_eq!(cache.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_resolves_to_none() {
        let cache = RecordCache::new(FakeFetcher::default());
        assert!(cache.get("tracts", "99999").await.is_none());
        assert!(cache.get("tracts", "99999").await.is_none());
        assert_eq!(cache.stats(), CacheStats { entries: 1, fetches: 1 });
    }

    #[tokio::test]
    async fn test_get_many_covers_every_id() {
        let fetcher = FakeFetcher::default()
            .with("school_districts", "a", json!({"NAME": "A"}))
            .with("school_districts", "b", json!({"NAME": "B"}));
        let cache = RecordCache::new(fetcher);

        let ids: Vec<String> = ["a", "b", "a", "gone"].iter().map(|s| s.to_string()).collect();
        let records = cache.get_many("school_districts", &ids).await;

        assert_eq!(records.len(), 3);
        assert_eq!(records["a"].as_ref().unwrap().get("NAME"), Some(&json!("A")));
        assert_eq!(records["b"].as_ref().unwrap().get("NAME"), Some(&json!("B")));
        assert!(records["gone"].is_none());
        assert_eq!(cache.fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_keys_are_separate() {
        let fetcher = FakeFetcher::default()
            .with("tracts", "1", json!({"kind": "tract"}))
            .with("public_schools", "1", json!({"kind": "school"}));
        let cache = RecordCache::new(fetcher);
        let tract = cache.get("tracts", "1").await.unwrap();
        let school = cache.get("public_schools", "1").await.unwrap();
        assert_ne!(tract, school);
    }

    #[tokio::test]
    async fn test_dir_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let record_dir = dir.path().join("assets/data/tracts");
        std::fs::create_dir_all(&record_dir).unwrap();
        std::fs::write(record_dir.join("36001.json"), r#"{"pop": 1200, "svi": 0.4}"#).unwrap();
        std::fs::write(record_dir.join("broken.json"), "{not json").unwrap();
        std::fs::write(record_dir.join("list.json"), "[1, 2]").unwrap();

        let fetcher = DirFetcher::new(dir.path());
        let record = fetcher.fetch("tracts", "36001").await.unwrap();
        assert_eq!(record.get("pop"), Some(&json!(1200)));

        assert!(matches!(fetcher.fetch("tracts", "broken").await, Err(FetchError::Parse { .. })));
        assert!(matches!(fetcher.fetch("tracts", "list").await, Err(FetchError::NotAnObject { .. })));
        assert!(matches!(fetcher.fetch("tracts", "missing").await, Err(FetchError::Io { .. })));
    }

    #[test]
    fn test_http_url() {
        let fetcher = HttpFetcher::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            fetcher.url_for("public_schools", "360007"),
            "http://localhost:8080/assets/data/public_schools/360007.json"
        );
    }
}
