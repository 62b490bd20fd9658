//! Source adapter contracts, provider adapters and batch fetchers.

use std::collections::BTreeMap;
use std::sync::Arc;

use roofline_core::{NewListing, PropertyType};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod daft;
mod fetch;
mod idealista;

pub use daft::DaftIeAdapter;
pub use fetch::{
    load_fixture_items, ApifyBatchFetcher, BatchFetcher, BatchRequest, FetchError,
    FixtureBatchFetcher, DEFAULT_APIFY_BASE_URL,
};
pub use idealista::IdealistaEsAdapter;

pub const CRATE_NAME: &str = "roofline-adapters";

/// Per-item failure raised when a raw item cannot be coerced into a listing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("raw item is not a JSON object (found {found})")]
    NotAnObject { found: &'static str },
    #[error("price is not a non-negative number: {raw}")]
    InvalidPrice { raw: String },
    #[error("field `{field}` has an unusable value: {raw}")]
    InvalidField { field: &'static str, raw: String },
}

/// Maps one provider's raw item shape onto the canonical listing.
///
/// Implementations are pure: no I/O and no state carried between calls.
pub trait SourceAdapter: Send + Sync {
    fn adapter_id(&self) -> &'static str;

    fn country_code(&self) -> &'static str;

    fn map(&self, raw: &JsonValue) -> Result<NewListing, MappingError>;
}

/// Adapter lookup by id. New providers register here; the orchestrator never changes.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<&'static str, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DaftIeAdapter));
        registry.register(Arc::new(IdealistaEsAdapter));
        registry
    }

    /// Returns the adapter previously registered under the same id, if any.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.insert(adapter.adapter_id(), adapter)
    }

    pub fn get(&self, adapter_id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(adapter_id).cloned()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeywordRule {
    pub keyword: &'static str,
    pub property_type: PropertyType,
}

pub(crate) const fn rule(keyword: &'static str, property_type: PropertyType) -> KeywordRule {
    KeywordRule {
        keyword,
        property_type,
    }
}

/// First rule whose keyword occurs in the lowercased category wins.
pub fn classify_property_type(
    raw_category: Option<&str>,
    rules: &[KeywordRule],
    fallback: PropertyType,
) -> PropertyType {
    let Some(category) = raw_category else {
        return fallback;
    };
    let lower = category.to_lowercase();
    rules
        .iter()
        .find(|r| lower.contains(r.keyword))
        .map(|r| r.property_type)
        .unwrap_or(fallback)
}

pub(crate) fn ensure_object(raw: &JsonValue) -> Result<(), MappingError> {
    if raw.is_object() {
        return Ok(());
    }
    let found = match raw {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    Err(MappingError::NotAnObject { found })
}

pub(crate) fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// Category-like text: strings as-is, scalars rendered, anything else ignored.
pub(crate) fn json_text(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn coerce_number(value: &JsonValue) -> Option<f64> {
    let number = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

/// Non-empty title, or the provider default when absent, null or blank.
pub(crate) fn title_or(
    raw: &JsonValue,
    key: &'static str,
    default: &str,
) -> Result<String, MappingError> {
    match json_at(raw, &[key]) {
        None => Ok(default.to_string()),
        Some(JsonValue::String(s)) => Ok(text_or_none(s).unwrap_or_else(|| default.to_string())),
        Some(other) => Err(MappingError::InvalidField {
            field: key,
            raw: other.to_string(),
        }),
    }
}

/// Accepts a flat number, a numeric string, or an object carrying `amount`.
/// Absent or null resolves to 0.
pub fn coerce_price(raw: Option<&JsonValue>) -> Result<f64, MappingError> {
    let value = match raw {
        None | Some(JsonValue::Null) => return Ok(0.0),
        Some(JsonValue::Object(map)) => match map.get("amount") {
            None | Some(JsonValue::Null) => return Ok(0.0),
            Some(amount) => amount,
        },
        Some(other) => other,
    };
    match coerce_number(value) {
        Some(price) if price >= 0.0 => Ok(price),
        _ => Err(MappingError::InvalidPrice {
            raw: value.to_string(),
        }),
    }
}

/// Null, absent or empty-string values are unknown; anything else must be a non-negative number.
pub fn coerce_optional_number(
    raw: Option<&JsonValue>,
    field: &'static str,
) -> Result<Option<f64>, MappingError> {
    let value = match raw {
        None | Some(JsonValue::Null) => return Ok(None),
        Some(JsonValue::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(value) => value,
    };
    match coerce_number(value) {
        Some(n) if n >= 0.0 => Ok(Some(n)),
        _ => Err(MappingError::InvalidField {
            field,
            raw: value.to_string(),
        }),
    }
}

pub(crate) fn coordinate(raw: Option<&JsonValue>) -> Option<f64> {
    raw.and_then(coerce_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_amount_and_flat_price_coerce_identically() {
        let flat = coerce_price(Some(&json!(300000))).unwrap();
        let nested = coerce_price(Some(&json!({"amount": 300000}))).unwrap();
        let nested_text = coerce_price(Some(&json!({"amount": "300000"}))).unwrap();
        let text = coerce_price(Some(&json!(" 300000.0 "))).unwrap();
        assert_eq!(flat, 300_000.0);
        assert_eq!(flat, nested);
        assert_eq!(flat, nested_text);
        assert_eq!(flat, text);
    }

    #[test]
    fn missing_price_resolves_to_zero() {
        assert_eq!(coerce_price(None).unwrap(), 0.0);
        assert_eq!(coerce_price(Some(&JsonValue::Null)).unwrap(), 0.0);
        assert_eq!(coerce_price(Some(&json!({}))).unwrap(), 0.0);
        assert_eq!(coerce_price(Some(&json!({"amount": null}))).unwrap(), 0.0);
    }

    #[test]
    fn uncoercible_prices_are_mapping_failures() {
        for raw in [
            json!("POA"),
            json!({"amount": "€300,000"}),
            json!([300000]),
            json!(true),
            json!(-5),
            json!("NaN"),
        ] {
            assert!(
                matches!(coerce_price(Some(&raw)), Err(MappingError::InvalidPrice { .. })),
                "expected failure for {raw}"
            );
        }
    }

    #[test]
    fn optional_numbers_distinguish_unknown_from_zero() {
        assert_eq!(coerce_optional_number(None, "area").unwrap(), None);
        assert_eq!(coerce_optional_number(Some(&json!(null)), "area").unwrap(), None);
        assert_eq!(coerce_optional_number(Some(&json!("")), "area").unwrap(), None);
        assert_eq!(coerce_optional_number(Some(&json!(0)), "area").unwrap(), Some(0.0));
        assert_eq!(coerce_optional_number(Some(&json!("72.5")), "area").unwrap(), Some(72.5));
        assert_eq!(
            coerce_optional_number(Some(&json!("large")), "floorArea"),
            Err(MappingError::InvalidField {
                field: "floorArea",
                raw: "\"large\"".into()
            })
        );
    }

    #[test]
    fn classification_is_case_insensitive_with_fallback() {
        let rules = [
            rule("chalet", PropertyType::Villa),
            rule("office", PropertyType::Commercial),
        ];
        assert_eq!(
            classify_property_type(Some("Detached CHALET"), &rules, PropertyType::Apartment),
            PropertyType::Villa
        );
        assert_eq!(
            classify_property_type(Some("penthouse"), &rules, PropertyType::Apartment),
            PropertyType::Apartment
        );
        assert_eq!(
            classify_property_type(None, &rules, PropertyType::House),
            PropertyType::House
        );
    }

    #[test]
    fn registry_resolves_builtin_adapters_and_accepts_new_ones() {
        struct Fixed;
        impl SourceAdapter for Fixed {
            fn adapter_id(&self) -> &'static str {
                "fixed-pt"
            }
            fn country_code(&self) -> &'static str {
                "PT"
            }
            fn map(&self, _raw: &JsonValue) -> Result<NewListing, MappingError> {
                Err(MappingError::InvalidField {
                    field: "any",
                    raw: String::new(),
                })
            }
        }

        let mut registry = AdapterRegistry::with_builtin();
        assert_eq!(registry.ids(), vec!["daft-ie", "idealista-es"]);
        assert_eq!(registry.get("daft-ie").unwrap().country_code(), "IE");
        assert!(registry.get("fixed-pt").is_none());

        assert!(registry.register(Arc::new(Fixed)).is_none());
        assert_eq!(registry.get("fixed-pt").unwrap().country_code(), "PT");
    }

    #[test]
    fn non_object_items_are_rejected() {
        assert_eq!(
            ensure_object(&json!([1, 2])),
            Err(MappingError::NotAnObject { found: "array" })
        );
        assert!(ensure_object(&json!({})).is_ok());
    }
}
