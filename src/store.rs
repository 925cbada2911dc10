//! Document persistence: the store contract, an in-memory backend and the
//! typed repositories the pipeline and views use.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    DataDocument, JobRecord, JobStatus, KpiSummary, LogEntry, RankingSet, UploadRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Uploads,
    Processes,
    Data,
    Sla,
    Rankings,
    Logs,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Uploads => "uploads",
            Collection::Processes => "processes",
            Collection::Data => "data",
            Collection::Sla => "sla",
            Collection::Rankings => "rankings",
            Collection::Logs => "logs",
        }
    }
}

/// Whole-document key/value storage. A missing document is `Ok(None)`, never
/// an error.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, collection: Collection, key: &str, doc: &Value) -> StoreResult<()>;
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Value>>;
    /// Every document in the collection, oldest write first.
    async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>>;
}

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<(Collection, String), (u64, Value)>>,
    writes: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, collection: Collection, key: &str, doc: &Value) -> StoreResult<()> {
        let mut writes = self.writes.write().await;
        *writes += 1;
        self.documents
            .write()
            .await
            .insert((collection, key.to_string()), (*writes, doc.clone()));
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .documents
            .read()
            .await
            .get(&(collection, key.to_string()))
            .map(|(_, doc)| doc.clone()))
    }

    async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>> {
        let documents = self.documents.read().await;
        let mut entries: Vec<_> = documents
            .iter()
            .filter(|((owner, _), _)| *owner == collection)
            .map(|((_, key), (sequence, doc))| (*sequence, key.clone(), doc.clone()))
            .collect();
        entries.sort_by_key(|(sequence, _, _)| *sequence);
        Ok(entries.into_iter().map(|(_, key, doc)| (key, doc)).collect())
    }
}

/// Typed access to the collections, keyed the way the artifacts are laid out
/// (`{job}_data`, `{job}_kpis`, `{job}_rankings`).
#[derive(Clone)]
pub struct Repositories {
    store: Arc<dyn DocumentStore>,
}

impl Repositories {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn put_typed<T: Serialize>(&self, collection: Collection, key: &str, doc: &T) -> StoreResult<()> {
        let value = serde_json::to_value(doc).map_err(|source| StoreError::Malformed {
            key: key.to_string(),
            source,
        })?;
        self.store.put(collection, key, &value).await
    }

    async fn get_typed<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> StoreResult<Option<T>> {
        match self.store.get(collection, key).await? {
            Some(value) => decode(key, value).map(Some),
            None => Ok(None),
        }
    }

    async fn list_typed<T: DeserializeOwned>(&self, collection: Collection) -> StoreResult<Vec<T>> {
        self.store
            .list(collection)
            .await?
            .into_iter()
            .map(|(key, value)| decode(&key, value))
            .collect()
    }

    pub async fn save_upload(&self, upload: &UploadRecord) -> StoreResult<()> {
        self.put_typed(Collection::Uploads, &upload.id, upload).await
    }

    pub async fn upload(&self, id: &str) -> StoreResult<Option<UploadRecord>> {
        self.get_typed(Collection::Uploads, id).await
    }

    pub async fn save_job(&self, job: &JobRecord) -> StoreResult<()> {
        self.put_typed(Collection::Processes, &job.id.to_string(), job).await
    }

    pub async fn job(&self, id: Uuid) -> StoreResult<Option<JobRecord>> {
        self.get_typed(Collection::Processes, &id.to_string()).await
    }

    pub async fn jobs(&self) -> StoreResult<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self.list_typed(Collection::Processes).await?;
        jobs.sort_by_key(|job| job.last_updated);
        Ok(jobs)
    }

    /// The most recently updated job, provided it completed.
    pub async fn latest_completed_job(&self) -> StoreResult<Option<JobRecord>> {
        Ok(self
            .jobs()
            .await?
            .pop()
            .filter(|job| job.status == JobStatus::Completed))
    }

    /// The two most recent completed jobs, newest first. `previous` repeats the
    /// current job when only one exists.
    pub async fn last_two_completed(&self) -> StoreResult<Option<(JobRecord, JobRecord)>> {
        let mut completed: Vec<JobRecord> = self
            .jobs()
            .await?
            .into_iter()
            .filter(|job| job.status == JobStatus::Completed)
            .collect();
        let Some(current) = completed.pop() else {
            return Ok(None);
        };
        let previous = completed.pop().unwrap_or_else(|| current.clone());
        Ok(Some((current, previous)))
    }

    pub async fn save_data(&self, job_id: Uuid, data: &DataDocument) -> StoreResult<()> {
        self.put_typed(Collection::Data, &format!("{job_id}_data"), data).await
    }

    pub async fn data(&self, job_id: Uuid) -> StoreResult<Option<DataDocument>> {
        self.get_typed(Collection::Data, &format!("{job_id}_data")).await
    }

    pub async fn save_kpis(&self, job_id: Uuid, kpis: &KpiSummary) -> StoreResult<()> {
        self.put_typed(Collection::Sla, &format!("{job_id}_kpis"), kpis).await
    }

    pub async fn kpis(&self, job_id: Uuid) -> StoreResult<Option<KpiSummary>> {
        self.get_typed(Collection::Sla, &format!("{job_id}_kpis")).await
    }

    pub async fn save_rankings(&self, job_id: Uuid, rankings: &RankingSet) -> StoreResult<()> {
        self.put_typed(Collection::Rankings, &format!("{job_id}_rankings"), rankings)
            .await
    }

    pub async fn rankings(&self, job_id: Uuid) -> StoreResult<Option<RankingSet>> {
        self.get_typed(Collection::Rankings, &format!("{job_id}_rankings")).await
    }

    pub async fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        self.put_typed(Collection::Logs, &Uuid::new_v4().to_string(), entry).await
    }

    pub async fn logs(&self, job_id: Uuid) -> StoreResult<Vec<LogEntry>> {
        let entries: Vec<LogEntry> = self.list_typed(Collection::Logs).await?;
        Ok(entries.into_iter().filter(|entry| entry.job_id == job_id).collect())
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    /// A backend whose every call fails as if the server were down.
    pub(crate) struct DownStore;

    #[async_trait]
    impl DocumentStore for DownStore {
        async fn put(&self, _: Collection, _: &str, _: &Value) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn get(&self, _: Collection, _: &str) -> StoreResult<Option<Value>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn list(&self, _: Collection) -> StoreResult<Vec<(String, Value)>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn memory_repos() -> Repositories {
        Repositories::new(Arc::new(MemoryStore::new()))
    }

    fn job(status: JobStatus, minutes_ago: i64) -> JobRecord {
        let mut job = JobRecord::pending("m", "l");
        job.status = status;
        job.last_updated = Utc::now() - Duration::minutes(minutes_ago);
        job
    }

    #[tokio::test]
    async fn put_overwrites_whole_document() {
        let store = MemoryStore::new();
        store
            .put(Collection::Sla, "k", &serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        store
            .put(Collection::Sla, "k", &serde_json::json!({"a": 3}))
            .await
            .unwrap();
        let doc = store.get(Collection::Sla, "k").await.unwrap().unwrap();
        assert_eq!(doc, serde_json::json!({"a": 3}));
        assert!(store.get(Collection::Data, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_and_unavailable_are_distinct() {
        let found = memory_repos().job(Uuid::new_v4()).await.unwrap();
        assert!(found.is_none());

        let down = Repositories::new(Arc::new(DownStore));
        let err = down.job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn latest_completed_requires_newest_job_to_be_completed() {
        let repos = memory_repos();
        let done = job(JobStatus::Completed, 10);
        repos.save_job(&done).await.unwrap();
        assert_eq!(repos.latest_completed_job().await.unwrap(), Some(done.clone()));

        repos.save_job(&job(JobStatus::Processing, 1)).await.unwrap();
        assert_eq!(repos.latest_completed_job().await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_two_completed_falls_back_to_current() {
        let repos = memory_repos();
        assert!(repos.last_two_completed().await.unwrap().is_none());

        let older = job(JobStatus::Completed, 30);
        repos.save_job(&older).await.unwrap();
        let (current, previous) = repos.last_two_completed().await.unwrap().unwrap();
        assert_eq!(current.id, older.id);
        assert_eq!(previous.id, older.id);

        let newer = job(JobStatus::Completed, 5);
        repos.save_job(&newer).await.unwrap();
        repos.save_job(&job(JobStatus::Failed, 1)).await.unwrap();
        let (current, previous) = repos.last_two_completed().await.unwrap().unwrap();
        assert_eq!(current.id, newer.id);
        assert_eq!(previous.id, older.id);
    }

    #[tokio::test]
    async fn logs_are_filtered_by_job() {
        let repos = memory_repos();
        let job_id = Uuid::new_v4();
        for (owner, message) in [(job_id, "first"), (Uuid::new_v4(), "other"), (job_id, "second")] {
            repos
                .append_log(&LogEntry {
                    job_id: owner,
                    level: "error".to_string(),
                    message: message.to_string(),
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }
        let messages: Vec<_> = repos
            .logs(job_id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
