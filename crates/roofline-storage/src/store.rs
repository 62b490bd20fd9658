//! Store contracts consumed by the ingestion pipeline, plus the in-memory store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use roofline_core::{CountryRule, Listing, ListingKey, NewListing};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("listing key {key} already stored")]
    KeyConflict { key: String },
    #[error("session already committed or rolled back")]
    SessionClosed,
    #[error("commit rejected: {0}")]
    CommitRejected(String),
}

/// One transaction-scoped unit of work. Nothing added is visible to other
/// sessions until `commit`; dropping an uncommitted session discards it.
#[async_trait]
pub trait ListingSession: Send {
    async fn exists_by_key(&mut self, key: &ListingKey) -> Result<bool, StoreError>;

    fn add(&mut self, listing: NewListing);

    fn staged_len(&self) -> usize;

    /// Write every staged listing atomically and return them with assigned identity.
    async fn commit(&mut self) -> Result<Vec<Listing>, StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ListingSession>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub inserted: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait CountryRuleStore: Send + Sync {
    /// Insert rules whose `country_code` is not yet present; existing rows are left untouched.
    async fn seed_country_rules(&self, rules: &[CountryRule]) -> Result<SeedSummary, StoreError>;

    async fn country_rule(&self, country_code: &str) -> Result<Option<CountryRule>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    listings: Vec<Listing>,
    country_rules: BTreeMap<String, CountryRule>,
    fail_next_commit: Option<String>,
}

/// Process-local store used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryListingStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn listings(&self) -> Vec<Listing> {
        self.state.lock().await.listings.clone()
    }

    /// The next session to commit fails with `CommitRejected` and writes nothing.
    pub async fn fail_next_commit(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_commit = Some(reason.into());
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn begin(&self) -> Result<Box<dyn ListingSession>, StoreError> {
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            open: true,
        }))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.listings.len())
    }
}

#[async_trait]
impl CountryRuleStore for MemoryListingStore {
    async fn seed_country_rules(&self, rules: &[CountryRule]) -> Result<SeedSummary, StoreError> {
        let mut state = self.state.lock().await;
        let mut summary = SeedSummary::default();
        for rule in rules {
            if state.country_rules.contains_key(&rule.country_code) {
                summary.skipped += 1;
            } else {
                state
                    .country_rules
                    .insert(rule.country_code.clone(), rule.clone());
                summary.inserted += 1;
            }
        }
        Ok(summary)
    }

    async fn country_rule(&self, country_code: &str) -> Result<Option<CountryRule>, StoreError> {
        Ok(self.state.lock().await.country_rules.get(country_code).cloned())
    }
}

struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    staged: Vec<NewListing>,
    open: bool,
}

#[async_trait]
impl ListingSession for MemorySession {
    async fn exists_by_key(&mut self, key: &ListingKey) -> Result<bool, StoreError> {
        if !self.open {
            return Err(StoreError::SessionClosed);
        }
        let state = self.state.lock().await;
        Ok(state.listings.iter().any(|l| &l.dedup_key() == key))
    }

    fn add(&mut self, listing: NewListing) {
        self.staged.push(listing);
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    async fn commit(&mut self) -> Result<Vec<Listing>, StoreError> {
        if !self.open {
            return Err(StoreError::SessionClosed);
        }
        self.open = false;
        let staged = std::mem::take(&mut self.staged);
        let mut state = self.state.lock().await;
        if let Some(reason) = state.fail_next_commit.take() {
            return Err(StoreError::CommitRejected(reason));
        }

        // Mirrors the unique index on (title, price, country_code): all or nothing.
        let mut seen: HashSet<ListingKey> = state.listings.iter().map(Listing::dedup_key).collect();
        for listing in &staged {
            if !seen.insert(listing.dedup_key()) {
                return Err(StoreError::KeyConflict {
                    key: listing.dedup_key().to_string(),
                });
            }
        }

        let created_at = Utc::now();
        let committed: Vec<Listing> = staged
            .into_iter()
            .map(|record| Listing::from_new(record, created_at))
            .collect();
        state.listings.extend(committed.iter().cloned());
        Ok(committed)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.open = false;
        self.staged.clear();
        Ok(())
    }
}
