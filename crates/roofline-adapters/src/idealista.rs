//! Spain (idealista scraper output).

use roofline_core::{AreaUnit, NewListing, PropertyType};
use serde_json::Value as JsonValue;

use crate::{
    classify_property_type, coerce_optional_number, coerce_price, coordinate, ensure_object,
    json_str, json_text, rule, text_or_none, title_or, KeywordRule, MappingError, SourceAdapter,
};

const DEFAULT_TITLE: &str = "Idealista Listing";
const DEFAULT_CITY: &str = "Madrid";

const PROPERTY_TYPE_RULES: &[KeywordRule] = &[
    rule("chalet", PropertyType::Villa),
    rule("villa", PropertyType::Villa),
    rule("penthouse", PropertyType::Apartment),
    rule("house", PropertyType::House),
    rule("casa", PropertyType::House),
    rule("premises", PropertyType::Commercial),
    rule("office", PropertyType::Commercial),
    rule("oficina", PropertyType::Commercial),
    rule("local", PropertyType::Commercial),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct IdealistaEsAdapter;

impl SourceAdapter for IdealistaEsAdapter {
    fn adapter_id(&self) -> &'static str {
        "idealista-es"
    }

    fn country_code(&self) -> &'static str {
        "ES"
    }

    fn map(&self, raw: &JsonValue) -> Result<NewListing, MappingError> {
        ensure_object(raw)?;
        let property_type = json_text(raw, &["propertyType"]);

        Ok(NewListing {
            title: title_or(raw, "title", DEFAULT_TITLE)?,
            property_type: classify_property_type(
                property_type.as_deref(),
                PROPERTY_TYPE_RULES,
                PropertyType::Apartment,
            ),
            price: coerce_price(raw.get("price"))?,
            currency: "EUR".to_string(),
            area: coerce_optional_number(raw.get("sizeM2"), "sizeM2")?,
            area_unit: AreaUnit::Sqm,
            country_code: self.country_code().to_string(),
            location_city: json_str(raw, &["city"])
                .and_then(text_or_none)
                .unwrap_or_else(|| DEFAULT_CITY.to_string()),
            latitude: coordinate(raw.get("latitude")),
            longitude: coordinate(raw.get("longitude")),
            source_url: json_str(raw, &["url"]).and_then(text_or_none),
            image_url: json_str(raw, &["thumbnail"]).and_then(text_or_none),
        })
    }
}
