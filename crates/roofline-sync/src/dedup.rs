use std::collections::HashSet;

use roofline_core::{ListingKey, NewListing};
use roofline_storage::{ListingSession, StoreError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    New,
    Duplicate,
}

/// Exact-match resolver on (title, price, country_code), scoped to one job.
///
/// Keys staged earlier in the job are checked before the store, so a batch
/// that repeats a listing never stages the same key twice.
#[derive(Debug, Default)]
pub struct DedupResolver {
    staged: HashSet<ListingKey>,
}

impl DedupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(
        &mut self,
        session: &mut dyn ListingSession,
        listing: &NewListing,
    ) -> Result<Resolution, StoreError> {
        let key = listing.dedup_key();
        if self.staged.contains(&key) {
            return Ok(Resolution::Duplicate);
        }
        if session.exists_by_key(&key).await? {
            return Ok(Resolution::Duplicate);
        }
        self.staged.insert(key);
        Ok(Resolution::New)
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roofline_core::{AreaUnit, PropertyType};
    use roofline_storage::{ListingStore, MemoryListingStore};

    fn listing(title: &str, price: f64, country_code: &str) -> NewListing {
        NewListing {
            title: title.to_string(),
            property_type: PropertyType::Apartment,
            price,
            currency: "EUR".into(),
            area: Some(60.0),
            area_unit: AreaUnit::Sqm,
            country_code: country_code.to_string(),
            location_city: "Cork".into(),
            latitude: None,
            longitude: None,
            source_url: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn repeated_key_within_a_job_is_a_duplicate() {
        let store = MemoryListingStore::new();
        let mut session = store.begin().await.unwrap();
        let mut resolver = DedupResolver::new();

        let first = listing("Sunny Flat", 300_000.0, "IE");
        assert_eq!(
            resolver.resolve(session.as_mut(), &first).await.unwrap(),
            Resolution::New
        );
        session.add(first.clone());

        let mut again = first.clone();
        again.location_city = "Dublin".into();
        assert_eq!(
            resolver.resolve(session.as_mut(), &again).await.unwrap(),
            Resolution::Duplicate
        );
        assert_eq!(resolver.staged_len(), 1);
    }

    #[tokio::test]
    async fn stored_key_from_a_prior_run_is_a_duplicate() {
        let store = MemoryListingStore::new();
        let mut session = store.begin().await.unwrap();
        session.add(listing("Sunny Flat", 300_000.0, "IE"));
        session.commit().await.unwrap();

        let mut session = store.begin().await.unwrap();
        let mut resolver = DedupResolver::new();
        assert_eq!(
            resolver
                .resolve(session.as_mut(), &listing("Sunny Flat", 300_000.0, "IE"))
                .await
                .unwrap(),
            Resolution::Duplicate
        );
        // Any differing key component makes a new listing.
        for candidate in [
            listing("Sunny Flat", 300_001.0, "IE"),
            listing("Sunny Flat", 300_000.0, "ES"),
            listing("sunny flat", 300_000.0, "IE"),
        ] {
            assert_eq!(
                resolver.resolve(session.as_mut(), &candidate).await.unwrap(),
                Resolution::New
            );
        }
    }
}
