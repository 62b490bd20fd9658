//! Job configuration, ingestion orchestration, run reports and scheduling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use roofline_adapters::{
    AdapterRegistry, ApifyBatchFetcher, BatchFetcher, BatchRequest, FixtureBatchFetcher,
    DEFAULT_APIFY_BASE_URL,
};
use roofline_core::CountryRule;
use roofline_storage::{
    CountryRuleStore, HttpClientConfig, HttpFetcher, ListingStore, MemoryListingStore,
    PgListingStore, RawBatchArchive, SeedSummary,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

mod dedup;
mod pipeline;
mod report;

pub use dedup::{DedupResolver, Resolution};
pub use pipeline::{IngestionPipeline, JobStatus, JobSummary, RunSummary, RunTotals, SkippedItem};
pub use report::{render_brief, write_run_reports, BRIEF_FILE, SUMMARY_FILE};

pub const CRATE_NAME: &str = "roofline-sync";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not set; {hint}")]
    Missing {
        var: &'static str,
        hint: &'static str,
    },
    #[error("{var} has an invalid value {value:?}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub apify_token: Option<String>,
    pub apify_base_url: String,
    pub jobs_file: PathBuf,
    pub fixtures_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub artifacts_dir: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub ingest_cron: String,
}

impl IngestConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any name lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let http_timeout_secs = match var("ROOFLINE_HTTP_TIMEOUT_SECS") {
            None => 300,
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "ROOFLINE_HTTP_TIMEOUT_SECS",
                value: raw,
                expected: "a whole number of seconds",
            })?,
        };
        let scheduler_enabled = match var("ROOFLINE_SCHEDULER_ENABLED") {
            None => false,
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::Invalid {
                var: "ROOFLINE_SCHEDULER_ENABLED",
                value: raw,
                expected: "true or false",
            })?,
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            apify_token: var("APIFY_TOKEN"),
            apify_base_url: var("APIFY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_APIFY_BASE_URL.to_string()),
            jobs_file: var("ROOFLINE_JOBS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("jobs.yaml")),
            fixtures_dir: var("ROOFLINE_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("fixtures")),
            reports_dir: var("ROOFLINE_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("reports")),
            artifacts_dir: var("ROOFLINE_ARTIFACTS_DIR").map(PathBuf::from),
            http_timeout_secs,
            user_agent: var("ROOFLINE_USER_AGENT")
                .unwrap_or_else(|| "roofline-ingest/0.1".to_string()),
            scheduler_enabled,
            ingest_cron: var("ROOFLINE_INGEST_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing {
            var: "DATABASE_URL",
            hint: "point it at the PostgreSQL database, or pass --memory for a dry run",
        })
    }

    pub fn require_apify_token(&self) -> Result<&str, ConfigError> {
        self.apify_token.as_deref().ok_or(ConfigError::Missing {
            var: "APIFY_TOKEN",
            hint: "set an Apify API token, or pass --fixtures to ingest offline fixtures",
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsFile {
    pub jobs: Vec<JobSpec>,
}

/// One configured (provider, adapter, input) triple.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub job_id: String,
    /// Provider actor id, `owner/name`.
    pub provider: String,
    pub adapter: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default = "empty_input")]
    pub input: JsonValue,
}

fn default_enabled() -> bool {
    true
}

fn empty_input() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl JobSpec {
    pub fn batch_request(&self, run_id: Uuid) -> BatchRequest {
        BatchRequest {
            run_id,
            job_id: self.job_id.clone(),
            provider: self.provider.clone(),
            input: self.input.clone(),
            max_items: self.max_items,
        }
    }
}

impl JobsFile {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: JobsFile = serde_yaml::from_str(text).context("parsing jobs file")?;
        let mut seen = HashSet::new();
        for job in &file.jobs {
            if !seen.insert(job.job_id.as_str()) {
                bail!("job id `{}` is configured more than once", job.job_id);
            }
        }
        Ok(file)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CountryRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<CountryRule>,
}

pub fn parse_country_rules(text: &str) -> Result<Vec<CountryRule>> {
    let file: CountryRulesFile = serde_yaml::from_str(text).context("parsing country rules")?;
    Ok(file.rules)
}

pub async fn seed_country_rules_from_file(
    store: &dyn CountryRuleStore,
    path: &Path,
) -> Result<SeedSummary> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let rules = parse_country_rules(&text).with_context(|| format!("loading {}", path.display()))?;
    let summary = store
        .seed_country_rules(&rules)
        .await
        .context("seeding country rules")?;
    info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        "country rules seeded"
    );
    Ok(summary)
}

/// Where listings come from and where they go for one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Read `fixtures/<job_id>/items.json` instead of calling the provider.
    pub use_fixtures: bool,
    /// Keep listings in process memory instead of PostgreSQL.
    pub in_memory: bool,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub summary: RunSummary,
    pub reports_dir: PathBuf,
}

/// Builds the pipeline for `options`. Every configuration problem surfaces
/// here, before any job runs.
pub async fn build_pipeline(
    config: &IngestConfig,
    options: IngestOptions,
) -> Result<IngestionPipeline> {
    let fetcher: Box<dyn BatchFetcher> = if options.use_fixtures {
        Box::new(FixtureBatchFetcher::new(config.fixtures_dir.clone()))
    } else {
        let token = config.require_apify_token()?;
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Box::new(ApifyBatchFetcher::new(
            http,
            config.apify_base_url.clone(),
            token,
        ))
    };

    let store: Arc<dyn ListingStore> = if options.in_memory {
        Arc::new(MemoryListingStore::new())
    } else {
        let url = config.require_database_url()?;
        let store = PgListingStore::connect(url)
            .await
            .context("connecting to the listing database")?;
        store.migrate().await.context("applying migrations")?;
        Arc::new(store)
    };

    let mut pipeline = IngestionPipeline::new(AdapterRegistry::with_builtin(), fetcher, store);
    if let Some(dir) = &config.artifacts_dir {
        pipeline = pipeline.with_archive(RawBatchArchive::new(dir.clone()));
    }
    Ok(pipeline)
}

pub async fn run_ingest(config: &IngestConfig, options: IngestOptions) -> Result<IngestOutcome> {
    let jobs = JobsFile::load(&config.jobs_file).await?;
    let pipeline = build_pipeline(config, options).await?;
    let summary = pipeline.run_once(&jobs.jobs).await;
    let reports_dir = write_run_reports(&config.reports_dir, &summary).await?;
    Ok(IngestOutcome {
        summary,
        reports_dir,
    })
}

pub async fn run_ingest_from_env(options: IngestOptions) -> Result<IngestOutcome> {
    let config = IngestConfig::from_env()?;
    run_ingest(&config, options).await
}

/// Cron-driven ingest, present only when `ROOFLINE_SCHEDULER_ENABLED` is set.
pub async fn maybe_build_scheduler(
    config: &IngestConfig,
    options: IngestOptions,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let shared = config.clone();
    let job = Job::new_async(&config.ingest_cron, move |_uuid, _l| {
        let config = shared.clone();
        Box::pin(async move {
            match run_ingest(&config, options).await {
                Ok(outcome) => info!(
                    run_id = %outcome.summary.run_id,
                    new_records = outcome.summary.totals.new_records,
                    "scheduled ingest finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled ingest failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", config.ingest_cron))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
