//! Canonical listing schema and reference data for Roofline.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "roofline-core";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Apartment,
    House,
    Villa,
    Commercial,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment",
            PropertyType::House => "house",
            PropertyType::Villa => "villa",
            PropertyType::Commercial => "commercial",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apartment" => Ok(PropertyType::Apartment),
            "house" => Ok(PropertyType::House),
            "villa" => Ok(PropertyType::Villa),
            "commercial" => Ok(PropertyType::Commercial),
            _ => Err(UnknownVariant {
                kind: "property_type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaUnit {
    Sqm,
    Sqft,
}

impl AreaUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaUnit::Sqm => "sqm",
            AreaUnit::Sqft => "sqft",
        }
    }
}

impl fmt::Display for AreaUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AreaUnit {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqm" => Ok(AreaUnit::Sqm),
            "sqft" => Ok(AreaUnit::Sqft),
            _ => Err(UnknownVariant {
                kind: "area_unit",
                value: s.to_string(),
            }),
        }
    }
}

/// Canonical listing as produced by an adapter, before the store assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListing {
    pub title: String,
    pub property_type: PropertyType,
    pub price: f64,
    pub currency: String,
    pub area: Option<f64>,
    pub area_unit: AreaUnit,
    pub country_code: String,
    pub location_city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
}

impl NewListing {
    pub fn dedup_key(&self) -> ListingKey {
        ListingKey::new(&self.title, self.price, &self.country_code)
    }
}

/// Persisted listing. `id` and `created_at` are assigned at commit and never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: NewListing,
}

impl Listing {
    pub fn from_new(record: NewListing, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            record,
        }
    }

    pub fn dedup_key(&self) -> ListingKey {
        self.record.dedup_key()
    }
}

/// Natural key used for deduplication: exact (title, price, country_code).
///
/// Equality and hashing go through the bit pattern of the price, with `-0.0`
/// folded into `0.0`, so keys can live in hash sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingKey {
    pub title: String,
    pub price: f64,
    pub country_code: String,
}

impl ListingKey {
    pub fn new(title: &str, price: f64, country_code: &str) -> Self {
        Self {
            title: title.to_string(),
            price: if price == 0.0 { 0.0 } else { price },
            country_code: country_code.to_string(),
        }
    }

    fn price_bits(&self) -> u64 {
        self.price.to_bits()
    }
}

impl PartialEq for ListingKey {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.price_bits() == other.price_bits()
            && self.country_code == other.country_code
    }
}

impl Eq for ListingKey {}

impl Hash for ListingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.title.hash(state);
        self.price_bits().hash(state);
        self.country_code.hash(state);
    }
}

impl fmt::Display for ListingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.title, self.price, self.country_code)
    }
}

/// Per-jurisdiction tax and lending parameters. Seeded once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRule {
    pub country_code: String,
    pub tax_rate: f64,
    pub lending_multiplier: f64,
    pub min_down_payment_ratio: f64,
    pub fixed_fees: f64,
    pub currency_code: String,
    pub currency_symbol: String,
}
