//! Ireland (daft.ie scraper output).

use roofline_core::{AreaUnit, NewListing, PropertyType};
use serde_json::Value as JsonValue;

use crate::{
    classify_property_type, coerce_optional_number, coerce_price, coordinate, ensure_object,
    json_at, json_str, json_text, rule, text_or_none, title_or, KeywordRule, MappingError,
    SourceAdapter,
};

const DEFAULT_TITLE: &str = "Unknown Title";
const DEFAULT_CITY: &str = "Dublin";

const CATEGORY_RULES: &[KeywordRule] = &[
    rule("apartment", PropertyType::Apartment),
    rule("flat", PropertyType::Apartment),
    rule("studio", PropertyType::Apartment),
    rule("duplex", PropertyType::Apartment),
    rule("commercial", PropertyType::Commercial),
    rule("office", PropertyType::Commercial),
    rule("retail", PropertyType::Commercial),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct DaftIeAdapter;

fn first_image(raw: &JsonValue) -> Option<String> {
    json_at(raw, &["images"])?
        .as_array()?
        .iter()
        .filter_map(JsonValue::as_str)
        .find_map(text_or_none)
}

impl SourceAdapter for DaftIeAdapter {
    fn adapter_id(&self) -> &'static str {
        "daft-ie"
    }

    fn country_code(&self) -> &'static str {
        "IE"
    }

    fn map(&self, raw: &JsonValue) -> Result<NewListing, MappingError> {
        ensure_object(raw)?;
        let category = json_text(raw, &["category"]);

        Ok(NewListing {
            title: title_or(raw, "title", DEFAULT_TITLE)?,
            property_type: classify_property_type(
                category.as_deref(),
                CATEGORY_RULES,
                PropertyType::House,
            ),
            price: coerce_price(raw.get("price"))?,
            currency: "EUR".to_string(),
            area: coerce_optional_number(raw.get("floorArea"), "floorArea")?,
            area_unit: AreaUnit::Sqm,
            country_code: self.country_code().to_string(),
            location_city: json_str(raw, &["location", "areaName"])
                .and_then(text_or_none)
                .unwrap_or_else(|| DEFAULT_CITY.to_string()),
            latitude: coordinate(json_at(raw, &["location", "coordinates", "lat"])),
            longitude: coordinate(json_at(raw, &["location", "coordinates", "lon"])),
            source_url: json_str(raw, &["url"]).and_then(text_or_none),
            image_url: json_str(raw, &["image"])
                .and_then(text_or_none)
                .or_else(|| first_image(raw)),
        })
    }
}
