//! PostgreSQL-backed store. One `sqlx` transaction per session.

use async_trait::async_trait;
use chrono::Utc;
use roofline_core::{CountryRule, Listing, ListingKey, NewListing};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::store::{CountryRuleStore, ListingSession, ListingStore, SeedSummary, StoreError};

#[derive(Debug, Clone)]
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn begin(&self) -> Result<Box<dyn ListingSession>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession {
            tx: Some(tx),
            staged: Vec::new(),
        }))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl CountryRuleStore for PgListingStore {
    async fn seed_country_rules(&self, rules: &[CountryRule]) -> Result<SeedSummary, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut summary = SeedSummary::default();
        for rule in rules {
            let result = sqlx::query(
                r#"
                INSERT INTO country_rules
                    (country_code, tax_rate, lending_multiplier, min_down_payment_ratio,
                     fixed_fees, currency_code, currency_symbol)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (country_code) DO NOTHING
                "#,
            )
            .bind(&rule.country_code)
            .bind(rule.tax_rate)
            .bind(rule.lending_multiplier)
            .bind(rule.min_down_payment_ratio)
            .bind(rule.fixed_fees)
            .bind(&rule.currency_code)
            .bind(&rule.currency_symbol)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                summary.skipped += 1;
            } else {
                summary.inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(summary)
    }

    async fn country_rule(&self, country_code: &str) -> Result<Option<CountryRule>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT country_code, tax_rate, lending_multiplier, min_down_payment_ratio,
                   fixed_fees, currency_code, currency_symbol
              FROM country_rules
             WHERE country_code = $1
            "#,
        )
        .bind(country_code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(CountryRule {
            country_code: row.try_get("country_code")?,
            tax_rate: row.try_get("tax_rate")?,
            lending_multiplier: row.try_get("lending_multiplier")?,
            min_down_payment_ratio: row.try_get("min_down_payment_ratio")?,
            fixed_fees: row.try_get("fixed_fees")?,
            currency_code: row.try_get("currency_code")?,
            currency_symbol: row.try_get("currency_symbol")?,
        }))
    }
}

struct PgSession {
    tx: Option<Transaction<'static, Postgres>>,
    staged: Vec<NewListing>,
}

#[async_trait]
impl ListingSession for PgSession {
    async fn exists_by_key(&mut self, key: &ListingKey) -> Result<bool, StoreError> {
        let tx = self.tx.as_mut().ok_or(StoreError::SessionClosed)?;
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                  FROM listings
                 WHERE title = $1
                   AND price = $2
                   AND country_code = $3
            )
            "#,
        )
        .bind(&key.title)
        .bind(key.price)
        .bind(&key.country_code)
        .fetch_one(&mut **tx)
        .await?;
        Ok(exists)
    }

    fn add(&mut self, listing: NewListing) {
        self.staged.push(listing);
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    async fn commit(&mut self) -> Result<Vec<Listing>, StoreError> {
        let mut tx = self.tx.take().ok_or(StoreError::SessionClosed)?;
        let created_at = Utc::now();
        let mut committed = Vec::with_capacity(self.staged.len());

        for record in std::mem::take(&mut self.staged) {
            let listing = Listing::from_new(record, created_at);
            let r = &listing.record;
            sqlx::query(
                r#"
                INSERT INTO listings
                    (id, title, property_type, price, currency, area, area_unit,
                     country_code, location_city, latitude, longitude,
                     source_url, image_url, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(listing.id)
            .bind(&r.title)
            .bind(r.property_type.as_str())
            .bind(r.price)
            .bind(&r.currency)
            .bind(r.area)
            .bind(r.area_unit.as_str())
            .bind(&r.country_code)
            .bind(&r.location_city)
            .bind(r.latitude)
            .bind(r.longitude)
            .bind(&r.source_url)
            .bind(&r.image_url)
            .bind(listing.created_at)
            .execute(&mut *tx)
            .await?;
            committed.push(listing);
        }

        tx.commit().await?;
        debug!(rows = committed.len(), "committed listing session");
        Ok(committed)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.staged.clear();
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
