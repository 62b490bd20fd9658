use std::sync::Arc;

use chrono::{DateTime, Utc};
use roofline_adapters::{AdapterRegistry, BatchFetcher, SourceAdapter};
use roofline_storage::{ListingStore, RawBatchArchive, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::{DedupResolver, Resolution};
use crate::JobSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    /// The provider batch could not be fetched; nothing was mapped or stored.
    FetchFailed,
    /// Store lookup or commit failed; the job's session was rolled back.
    PersistFailed,
    /// The job names an adapter that is not registered.
    Misconfigured,
}

impl JobStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, JobStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    /// Zero-based position in the fetched batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub adapter: String,
    pub provider: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub items_fetched: usize,
    pub items_mapped: usize,
    pub skipped: Vec<SkippedItem>,
    pub new_records: usize,
    pub duplicates: usize,
    pub archived_batch: Option<String>,
}

impl JobSummary {
    fn started(job: &JobSpec) -> Self {
        Self {
            job_id: job.job_id.clone(),
            adapter: job.adapter.clone(),
            provider: job.provider.clone(),
            status: JobStatus::Completed,
            error: None,
            items_fetched: 0,
            items_mapped: 0,
            skipped: Vec::new(),
            new_records: 0,
            duplicates: 0,
            archived_batch: None,
        }
    }

    fn fail(&mut self, status: JobStatus, error: String) {
        self.status = status;
        self.error = Some(error);
        self.new_records = 0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub jobs: usize,
    pub failed_jobs: usize,
    pub items_fetched: usize,
    pub items_mapped: usize,
    pub skipped: usize,
    pub new_records: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: RunTotals,
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    pub fn from_jobs(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        jobs: Vec<JobSummary>,
    ) -> Self {
        let totals = jobs.iter().fold(RunTotals::default(), |mut t, job| {
            t.jobs += 1;
            t.failed_jobs += usize::from(job.status.is_failure());
            t.items_fetched += job.items_fetched;
            t.items_mapped += job.items_mapped;
            t.skipped += job.skipped.len();
            t.new_records += job.new_records;
            t.duplicates += job.duplicates;
            t
        });
        Self {
            run_id,
            started_at,
            finished_at,
            totals,
            jobs,
        }
    }

    pub fn job(&self, job_id: &str) -> Option<&JobSummary> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }
}

/// Drives fetch, map, dedup and persist for each job in turn.
///
/// Failures never cross a job boundary: each job gets its own store session,
/// and any failure is folded into that job's summary.
pub struct IngestionPipeline {
    registry: AdapterRegistry,
    fetcher: Box<dyn BatchFetcher>,
    store: Arc<dyn ListingStore>,
    archive: Option<RawBatchArchive>,
}

impl IngestionPipeline {
    pub fn new(
        registry: AdapterRegistry,
        fetcher: Box<dyn BatchFetcher>,
        store: Arc<dyn ListingStore>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            store,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: RawBatchArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Runs enabled jobs sequentially, in the order given.
    pub async fn run_once(&self, jobs: &[JobSpec]) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut summaries = Vec::new();

        for job in jobs {
            if !job.enabled {
                debug!(job_id = %job.job_id, "job disabled; skipping");
                continue;
            }
            summaries.push(self.run_job(run_id, job).await);
        }

        let summary = RunSummary::from_jobs(run_id, started_at, Utc::now(), summaries);
        info!(
            %run_id,
            jobs = summary.totals.jobs,
            failed_jobs = summary.totals.failed_jobs,
            new_records = summary.totals.new_records,
            duplicates = summary.totals.duplicates,
            "ingest run finished"
        );
        summary
    }

    pub async fn run_job(&self, run_id: Uuid, job: &JobSpec) -> JobSummary {
        let span = info_span!("ingest_job", job_id = %job.job_id, adapter = %job.adapter);
        self.run_job_inner(run_id, job).instrument(span).await
    }

    async fn run_job_inner(&self, run_id: Uuid, job: &JobSpec) -> JobSummary {
        let mut summary = JobSummary::started(job);

        let Some(adapter) = self.registry.get(&job.adapter) else {
            warn!(known = ?self.registry.ids(), "no adapter registered under this id");
            summary.fail(
                JobStatus::Misconfigured,
                format!("unknown adapter `{}`", job.adapter),
            );
            return summary;
        };

        info!(provider = %job.provider, max_items = ?job.max_items, "job started");
        let items = match self.fetcher.fetch_batch(&job.batch_request(run_id)).await {
            Ok(items) => items,
            Err(err) => {
                warn!(provider = %job.provider, error = %err, "fetch failed; job skipped");
                summary.fail(JobStatus::FetchFailed, err.to_string());
                return summary;
            }
        };
        summary.items_fetched = items.len();

        if let Some(archive) = &self.archive {
            match archive.archive_batch(Utc::now(), &job.job_id, &items).await {
                Ok(batch) => {
                    debug!(hash = %batch.content_hash, deduplicated = batch.deduplicated, "raw batch archived");
                    summary.archived_batch = Some(batch.relative_path.display().to_string());
                }
                Err(err) => warn!(error = %format!("{err:#}"), "raw batch not archived"),
            }
        }

        match self.persist(adapter.as_ref(), &items, &mut summary).await {
            Ok(committed) => summary.new_records = committed,
            Err(err) => {
                warn!(error = %err, "persist failed; job rolled back");
                summary.fail(JobStatus::PersistFailed, err.to_string());
            }
        }

        info!(
            status = ?summary.status,
            items_fetched = summary.items_fetched,
            items_mapped = summary.items_mapped,
            skipped = summary.skipped.len(),
            new_records = summary.new_records,
            duplicates = summary.duplicates,
            "job finished"
        );
        summary
    }

    /// Maps and resolves every item inside one session, then commits once.
    /// An early return drops the session, which discards everything staged.
    async fn persist(
        &self,
        adapter: &dyn SourceAdapter,
        items: &[JsonValue],
        summary: &mut JobSummary,
    ) -> Result<usize, StoreError> {
        let mut session = self.store.begin().await?;
        let mut resolver = DedupResolver::new();

        for (index, raw) in items.iter().enumerate() {
            let listing = match adapter.map(raw) {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(index, reason = %err, "item skipped");
                    summary.skipped.push(SkippedItem {
                        index,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            summary.items_mapped += 1;

            match resolver.resolve(session.as_mut(), &listing).await? {
                Resolution::New => {
                    debug!(index, key = %listing.dedup_key(), "new listing staged");
                    session.add(listing);
                }
                Resolution::Duplicate => {
                    debug!(index, key = %listing.dedup_key(), "duplicate discarded");
                    summary.duplicates += 1;
                }
            }
        }

        let committed = session.commit().await?;
        Ok(committed.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use async_trait::async_trait;
    use roofline_adapters::{BatchRequest, FetchError};
    use roofline_storage::MemoryListingStore;
    use serde_json::json;
    use tempfile::tempdir;

    /// Serves canned batches by job id; a job with no batch fails to fetch.
    struct ScriptedFetcher {
        batches: HashMap<String, Vec<JsonValue>>,
    }

    impl ScriptedFetcher {
        fn new(batches: &[(&str, Vec<JsonValue>)]) -> Self {
            Self {
                batches: batches
                    .iter()
                    .map(|(id, items)| (id.to_string(), items.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl BatchFetcher for ScriptedFetcher {
        async fn fetch_batch(&self, request: &BatchRequest) -> Result<Vec<JsonValue>, FetchError> {
            self.batches
                .get(&request.job_id)
                .cloned()
                .ok_or_else(|| FetchError::MalformedEnvelope {
                    provider: request.provider.clone(),
                    message: "quota exceeded".to_string(),
                })
        }
    }

    fn job(job_id: &str, adapter: &str) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
            provider: format!("acme/{job_id}"),
            adapter: adapter.to_string(),
            enabled: true,
            max_items: None,
            input: json!({}),
        }
    }

    fn sunny_flat() -> JsonValue {
        json!({
            "title": "Sunny Flat",
            "price": {"amount": 300000},
            "category": "apartment",
            "floorArea": 60,
            "location": {"areaName": "Cork", "coordinates": {"lat": 51.9, "lon": -8.5}}
        })
    }

    fn daft_item(title: &str, price: u64) -> JsonValue {
        json!({"title": title, "price": price, "category": "house"})
    }

    fn pipeline(fetcher: ScriptedFetcher, store: &MemoryListingStore) -> IngestionPipeline {
        IngestionPipeline::new(
            AdapterRegistry::with_builtin(),
            Box::new(fetcher),
            Arc::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn sunny_flat_rerun_is_idempotent() {
        let store = MemoryListingStore::new();
        let pipeline = pipeline(
            ScriptedFetcher::new(&[("daft", vec![sunny_flat()])]),
            &store,
        );
        let jobs = [job("daft", "daft-ie")];

        let first = pipeline.run_once(&jobs).await;
        assert_eq!(first.totals.new_records, 1);
        assert_eq!(first.totals.duplicates, 0);

        let stored = store.listings().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.title, "Sunny Flat");
        assert_eq!(stored[0].record.area, Some(60.0));
        assert_eq!(stored[0].record.location_city, "Cork");

        let second = pipeline.run_once(&jobs).await;
        let summary = second.job("daft").unwrap();
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.new_records, 0);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn within_batch_duplicates_persist_once() {
        let store = MemoryListingStore::new();
        let batch = vec![daft_item("Cottage", 150_000), daft_item("Cottage", 150_000)];
        let pipeline = pipeline(ScriptedFetcher::new(&[("daft", batch)]), &store);

        let summary = pipeline.run_job(Uuid::new_v4(), &job("daft", "daft-ie")).await;
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.items_mapped, 2);
        assert_eq!(summary.new_records, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_item_three_of_five_is_skipped_alone() {
        let store = MemoryListingStore::new();
        let batch = vec![
            daft_item("One", 1),
            daft_item("Two", 2),
            json!({"title": "Three", "price": "price on application"}),
            daft_item("Four", 4),
            daft_item("Five", 5),
        ];
        let pipeline = pipeline(ScriptedFetcher::new(&[("daft", batch)]), &store);

        let summary = pipeline.run_job(Uuid::new_v4(), &job("daft", "daft-ie")).await;
        assert_eq!(summary.items_fetched, 5);
        assert_eq!(summary.items_mapped, 4);
        assert_eq!(summary.new_records, 4);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].index, 2);
        assert!(summary.skipped[0].reason.contains("price"));

        let titles: Vec<_> = store
            .listings()
            .await
            .into_iter()
            .map(|l| l.record.title)
            .collect();
        assert_eq!(titles, vec!["One", "Two", "Four", "Five"]);
    }

    #[tokio::test]
    async fn fetch_failure_does_not_stop_later_jobs() {
        let store = MemoryListingStore::new();
        let pipeline = pipeline(
            ScriptedFetcher::new(&[("idealista", vec![json!({"title": "Piso", "price": 250000})])]),
            &store,
        );

        let run = pipeline
            .run_once(&[job("daft", "daft-ie"), job("idealista", "idealista-es")])
            .await;
        let daft = run.job("daft").unwrap();
        assert_eq!(daft.status, JobStatus::FetchFailed);
        assert_eq!(daft.new_records, 0);
        assert!(daft.error.as_deref().unwrap().contains("quota exceeded"));

        let idealista = run.job("idealista").unwrap();
        assert_eq!(idealista.status, JobStatus::Completed);
        assert_eq!(idealista.new_records, 1);
        assert_eq!(run.totals.failed_jobs, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commit_failure_leaves_earlier_jobs_committed() {
        let store = MemoryListingStore::new();
        let pipeline = pipeline(
            ScriptedFetcher::new(&[
                ("first", vec![daft_item("Kept", 100_000)]),
                ("second", vec![daft_item("Lost", 200_000), daft_item("Also lost", 1)]),
            ]),
            &store,
        );
        let run_id = Uuid::new_v4();

        let first = pipeline.run_job(run_id, &job("first", "daft-ie")).await;
        assert_eq!(first.new_records, 1);

        store.fail_next_commit("connection reset").await;
        let second = pipeline.run_job(run_id, &job("second", "daft-ie")).await;
        assert_eq!(second.status, JobStatus::PersistFailed);
        assert_eq!(second.new_records, 0);
        assert_eq!(second.items_mapped, 2);

        let stored = store.listings().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.title, "Kept");
    }

    #[tokio::test]
    async fn unknown_adapter_and_disabled_jobs() {
        let store = MemoryListingStore::new();
        let pipeline = pipeline(
            ScriptedFetcher::new(&[
                ("pt", vec![daft_item("Casa", 1)]),
                ("daft", vec![daft_item("Semi-D", 320_000)]),
                ("off", vec![daft_item("Never", 9)]),
            ]),
            &store,
        );
        let mut disabled = job("off", "daft-ie");
        disabled.enabled = false;

        let run = pipeline
            .run_once(&[job("pt", "imovirtual-pt"), job("daft", "daft-ie"), disabled])
            .await;
        assert_eq!(run.totals.jobs, 2);
        assert_eq!(run.job("pt").unwrap().status, JobStatus::Misconfigured);
        assert_eq!(run.job("pt").unwrap().items_fetched, 0);
        assert_eq!(run.job("daft").unwrap().new_records, 1);
        assert!(run.job("off").is_none());
    }

    #[tokio::test]
    async fn fetched_batches_are_archived_before_mapping() {
        let dir = tempdir().unwrap();
        let store = MemoryListingStore::new();
        let pipeline = pipeline(
            ScriptedFetcher::new(&[("daft", vec![json!("not an object")])]),
            &store,
        )
        .with_archive(RawBatchArchive::new(dir.path()));

        let summary = pipeline.run_job(Uuid::new_v4(), &job("daft", "daft-ie")).await;
        assert_eq!(summary.skipped.len(), 1);
        let archived = summary.archived_batch.expect("batch archived");
        assert!(archived.contains("daft"));
        assert!(dir.path().join(&archived).exists());
    }
}
