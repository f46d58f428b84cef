//! Per-source field extractors.
//!
//! Adapters store each ad as a JSON record; the extractor for the ad's
//! source maps that record into a `ListingDraft`. Fields it cannot read
//! safely stay `None` — nothing is ever guessed here.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use carscout_store::listings::ListingDraft;

pub trait FieldExtractor: Send + Sync {
    /// Matches `sources.name`.
    fn source_name(&self) -> &str;

    fn extract(&self, blob: &[u8]) -> Result<ListingDraft>;
}

#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Box<dyn FieldExtractor>>,
}

impl ExtractorRegistry {
    /// The built-in extractor set.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(MobileBgExtractor));
        registry.register(Box::new(CarsBgExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn FieldExtractor>) {
        self.extractors.insert(extractor.source_name().to_string(), extractor);
    }

    pub fn get(&self, source_name: &str) -> Option<&dyn FieldExtractor> {
        self.extractors.get(source_name).map(|b| b.as_ref())
    }
}

/// mobile.bg ad records: flat JSON with English keys from the feed API.
pub struct MobileBgExtractor;

impl FieldExtractor for MobileBgExtractor {
    fn source_name(&self) -> &str {
        "mobile.bg"
    }

    fn extract(&self, blob: &[u8]) -> Result<ListingDraft> {
        let data: serde_json::Value =
            serde_json::from_slice(blob).context("mobile.bg record is not JSON")?;

        let brand = str_field(&data, "make");
        let model = str_field(&data, "model");
        let year = int_field(&data, "year").map(|y| y as i32);

        // Feed titles are frequently empty; synthesize from make/model/year.
        let title = str_field(&data, "title").or_else(|| match (&brand, &model, year) {
            (Some(b), Some(m), Some(y)) => Some(format!("{b} {m} {y}")),
            (Some(b), Some(m), None) => Some(format!("{b} {m}")),
            _ => None,
        });

        Ok(ListingDraft {
            title,
            brand_raw: brand,
            model_raw: model,
            price: decimal_field(&data, "price"),
            currency: str_field(&data, "currency").or_else(|| Some("BGN".to_string())),
            year,
            mileage_km: int_field(&data, "mileage"),
            fuel_raw: str_field(&data, "fuel"),
            gearbox_raw: str_field(&data, "transmission"),
            body_raw: str_field(&data, "category"),
            power_hp: int_field(&data, "power").map(|p| p as i32),
            region_raw: data
                .get("location")
                .and_then(|l| l.get("city"))
                .and_then(|c| c.as_str())
                .map(str::to_string),
            description: str_field(&data, "description"),
            features: data
                .get("features")
                .and_then(|f| f.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            image_urls: image_urls(&data, "images"),
            first_image_phash: data
                .get("image_phash")
                .and_then(|v| v.as_str())
                .and_then(parse_phash),
            seller_phone: str_field(&data, "phone"),
            seller_profile_url: str_field(&data, "seller_url"),
        })
    }
}

/// cars.bg ad records: Bulgarian-labelled fields scraped from detail pages.
pub struct CarsBgExtractor;

impl FieldExtractor for CarsBgExtractor {
    fn source_name(&self) -> &str {
        "cars.bg"
    }

    fn extract(&self, blob: &[u8]) -> Result<ListingDraft> {
        let data: serde_json::Value =
            serde_json::from_slice(blob).context("cars.bg record is not JSON")?;

        Ok(ListingDraft {
            title: str_field(&data, "заглавие").or_else(|| str_field(&data, "title")),
            brand_raw: str_field(&data, "марка"),
            model_raw: str_field(&data, "модел"),
            price: decimal_field(&data, "цена"),
            currency: str_field(&data, "валута").or_else(|| Some("BGN".to_string())),
            year: int_field(&data, "година").map(|y| y as i32),
            mileage_km: int_field(&data, "пробег"),
            fuel_raw: str_field(&data, "гориво"),
            gearbox_raw: str_field(&data, "скоростна кутия"),
            body_raw: str_field(&data, "купе"),
            power_hp: int_field(&data, "мощност").map(|p| p as i32),
            region_raw: str_field(&data, "регион"),
            description: str_field(&data, "описание"),
            features: data
                .get("екстри")
                .and_then(|f| f.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            image_urls: image_urls(&data, "снимки"),
            first_image_phash: data
                .get("image_phash")
                .and_then(|v| v.as_str())
                .and_then(parse_phash),
            seller_phone: str_field(&data, "телефон"),
            seller_profile_url: str_field(&data, "профил"),
        })
    }
}

fn str_field(data: &serde_json::Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn int_field(data: &serde_json::Value, key: &str) -> Option<i64> {
    let value = data.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.replace([' ', ','], "").parse().ok()))
}

fn decimal_field(data: &serde_json::Value, key: &str) -> Option<Decimal> {
    let value = data.get(key)?;
    if let Some(n) = value.as_f64() {
        return Decimal::from_str(&n.to_string()).ok();
    }
    value
        .as_str()
        .map(|s| s.replace([' ', ','], ""))
        .and_then(|s| Decimal::from_str(&s).ok())
}

fn image_urls(data: &serde_json::Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .or_else(|| v.get("url").and_then(|u| u.as_str()).map(str::to_string))
                })
                .take(5)
                .collect()
        })
        .unwrap_or_default()
}

/// Perceptual hashes travel as 16-char hex.
fn parse_phash(hex: &str) -> Option<i64> {
    u64::from_str_radix(hex.trim(), 16).ok().map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_bg_extracts_feed_record() {
        let blob = serde_json::json!({
            "id": "M1",
            "make": "BMW",
            "model": "X5 3.0d",
            "year": 2019,
            "mileage": 45000,
            "price": 28500,
            "currency": "BGN",
            "fuel": "дизел",
            "transmission": "автоматик",
            "description": "Перфектно състояние",
            "images": [{"url": "https://img.example/1.jpg"}, "https://img.example/2.jpg"],
            "phone": "0888123456",
            "location": {"city": "София"}
        });
        let draft = MobileBgExtractor.extract(blob.to_string().as_bytes()).unwrap();

        assert_eq!(draft.brand_raw.as_deref(), Some("BMW"));
        assert_eq!(draft.model_raw.as_deref(), Some("X5 3.0d"));
        assert_eq!(draft.year, Some(2019));
        assert_eq!(draft.mileage_km, Some(45000));
        assert_eq!(draft.price, Some(Decimal::from(28500)));
        assert_eq!(draft.region_raw.as_deref(), Some("София"));
        assert_eq!(draft.image_urls.len(), 2);
        assert_eq!(draft.title.as_deref(), Some("BMW X5 3.0d 2019"));
    }

    #[test]
    fn missing_fields_stay_none() {
        let blob = serde_json::json!({"id": "M2", "make": "BMW"});
        let draft = MobileBgExtractor.extract(blob.to_string().as_bytes()).unwrap();
        assert_eq!(draft.year, None);
        assert_eq!(draft.price, None);
        assert_eq!(draft.description, None);
        assert!(draft.image_urls.is_empty());
    }

    #[test]
    fn cars_bg_reads_bulgarian_labels() {
        let blob = serde_json::json!({
            "заглавие": "VW Passat 2.0 TDI",
            "марка": "VW",
            "модел": "Passat",
            "цена": "15 500",
            "валута": "EUR",
            "пробег": "210 000",
            "гориво": "Дизел",
            "телефон": "+359 88 777 1234"
        });
        let draft = CarsBgExtractor.extract(blob.to_string().as_bytes()).unwrap();
        assert_eq!(draft.price, Some(Decimal::from(15500)));
        assert_eq!(draft.currency.as_deref(), Some("EUR"));
        assert_eq!(draft.mileage_km, Some(210000));
    }

    #[test]
    fn non_json_blob_is_an_error() {
        assert!(MobileBgExtractor.extract(b"<html>draft page</html>").is_err());
    }
}
