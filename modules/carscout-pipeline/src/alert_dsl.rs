//! The alert query DSL: whitespace-separated tokens in any order.
//!
//! `"BMW X5 diesel <25000 2018+ <180000km automatic"` parses into a fixed
//! record of optional filters. Unknown tokens become warnings, never
//! errors, so old queries keep working as the grammar grows. Boundary
//! comparisons are inclusive.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use carscout_common::vocab;

use crate::alias::AliasMatcher;

/// Parsed filters, stored on the alert as JSONB next to the raw query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gearbox: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_mileage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mileage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_power: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_power: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub filters: AlertFilters,
    pub warnings: Vec<String>,
}

fn mileage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([<>])\s*(\d+)\s*(?:km|км|к\.м\.?)\b").unwrap())
}

fn power_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([<>])\s*(\d+)\s*(?:hp|к\.с\.?|кс)\b").unwrap())
}

fn year_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b((?:19|20)\d{2})\s*-\s*((?:19|20)\d{2})\b").unwrap())
}

fn year_min_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b((?:19|20)\d{2})\+").unwrap())
}

fn price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([<>]=?)\s*(\d+)").unwrap())
}

/// Parse a raw query. Never fails: whatever can't be understood lands in
/// `warnings` and the rest of the query still applies.
pub fn parse(query: &str, aliases: &AliasMatcher) -> ParseOutcome {
    let mut text = query.trim().to_lowercase();
    let mut filters = AlertFilters::default();
    let mut warnings = Vec::new();

    // Unit-suffixed ranges first, so the bare-number price pass can't
    // swallow a mileage bound.
    text = extract(mileage_re(), &text, |op, value| {
        // People write <180km meaning thousands.
        let km = if value < 1_000 { value * 1_000 } else { value };
        match op {
            "<" => filters.max_mileage = Some(km),
            _ => filters.min_mileage = Some(km),
        }
    });
    text = extract(power_re(), &text, |op, value| match op {
        "<" => filters.max_power = Some(value as i32),
        _ => filters.min_power = Some(value as i32),
    });

    if let Some(caps) = year_span_re().captures(&text) {
        let lo: i32 = caps[1].parse().unwrap_or(0);
        let hi: i32 = caps[2].parse().unwrap_or(0);
        filters.min_year = Some(lo.min(hi));
        filters.max_year = Some(lo.max(hi));
        let span = caps.get(0).unwrap().range();
        text.replace_range(span, "");
    } else if let Some(caps) = year_min_re().captures(&text) {
        filters.min_year = caps[1].parse().ok();
        let span = caps.get(0).unwrap().range();
        text.replace_range(span, "");
    }

    text = extract(price_re(), &text, |op, value| match op {
        "<" | "<=" => filters.max_price = Some(value),
        _ => filters.min_price = Some(value),
    });

    // Keyword tokens, two-word region names included.
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut consumed = vec![false; tokens.len()];

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if let Some(fuel) = vocab::canonical_fuel(token) {
            filters.fuel.get_or_insert(fuel.to_string());
            consumed[i] = true;
        } else if let Some(gearbox) = vocab::canonical_gearbox(token) {
            filters.gearbox.get_or_insert(gearbox.to_string());
            consumed[i] = true;
        } else if let Some(body) = vocab::canonical_body(token) {
            filters.body.get_or_insert(body.to_string());
            consumed[i] = true;
        } else if i + 1 < tokens.len()
            && vocab::canonical_region(&format!("{} {}", token, tokens[i + 1])).is_some()
        {
            let slug = vocab::canonical_region(&format!("{} {}", token, tokens[i + 1])).unwrap();
            filters.region.get_or_insert(slug.to_string());
            consumed[i] = true;
            consumed[i + 1] = true;
            i += 1;
        } else if let Some(slug) = vocab::canonical_region(token) {
            filters.region.get_or_insert(slug.to_string());
            consumed[i] = true;
        }
        i += 1;
    }

    // Brand and model, greedily, over what's left.
    let leftover: Vec<&str> = tokens
        .iter()
        .zip(&consumed)
        .filter(|(_, used)| !**used)
        .map(|(t, _)| *t)
        .collect();
    let (brand, model, brand_consumed) = aliases.match_tokens(&leftover);
    filters.brand_id = brand;
    filters.model_id = model;

    for (j, token) in leftover.iter().enumerate() {
        if !brand_consumed.contains(&j) {
            warnings.push(format!("unrecognized token: {token}"));
        }
    }

    ParseOutcome { filters, warnings }
}

fn extract(re: &Regex, text: &str, mut apply: impl FnMut(&str, i64)) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if let Ok(value) = caps[2].parse::<i64>() {
            apply(&caps[1], value);
        }
        out.push_str(&text[last..whole.start()]);
        out.push(' ');
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

impl AlertFilters {
    /// Render the canonical query form. Parsing the rendered form yields
    /// these filters again — the round trip is a fixed point.
    pub fn to_query(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(b) = &self.brand_id {
            parts.push(b.clone());
        }
        if let Some(m) = &self.model_id {
            parts.push(m.clone());
        }
        for opt in [&self.fuel, &self.gearbox, &self.body, &self.region] {
            if let Some(v) = opt {
                parts.push(v.clone());
            }
        }
        match (self.min_year, self.max_year) {
            (Some(lo), Some(hi)) => parts.push(format!("{lo}-{hi}")),
            (Some(lo), None) => parts.push(format!("{lo}+")),
            _ => {}
        }
        if let Some(p) = self.min_price {
            parts.push(format!(">{p}"));
        }
        if let Some(p) = self.max_price {
            parts.push(format!("<{p}"));
        }
        if let Some(km) = self.min_mileage {
            parts.push(format!(">{km}km"));
        }
        if let Some(km) = self.max_mileage {
            parts.push(format!("<{km}km"));
        }
        if let Some(hp) = self.min_power {
            parts.push(format!(">{hp}hp"));
        }
        if let Some(hp) = self.max_power {
            parts.push(format!("<{hp}hp"));
        }
        parts.join(" ")
    }
}

/// The listing-side view the matcher needs; built from a stored listing.
#[derive(Debug, Clone, Default)]
pub struct ListingFacts {
    pub brand_id: Option<String>,
    pub model_id: Option<String>,
    pub fuel: Option<String>,
    pub gearbox: Option<String>,
    pub body: Option<String>,
    pub region: Option<String>,
    pub year: Option<i32>,
    pub price_bgn: Option<i64>,
    pub mileage_km: Option<i64>,
    pub power_hp: Option<i32>,
}

/// Every populated filter field must be satisfied by the listing. A listing
/// missing a filtered field does not match.
pub fn matches(filters: &AlertFilters, listing: &ListingFacts) -> bool {
    fn eq(filter: &Option<String>, fact: &Option<String>) -> bool {
        match filter {
            None => true,
            Some(want) => fact.as_deref() == Some(want.as_str()),
        }
    }

    if !eq(&filters.brand_id, &listing.brand_id)
        || !eq(&filters.model_id, &listing.model_id)
        || !eq(&filters.fuel, &listing.fuel)
        || !eq(&filters.gearbox, &listing.gearbox)
        || !eq(&filters.body, &listing.body)
    {
        return false;
    }

    // Regions compare as province slugs; settlement synonyms already
    // collapsed to their province, which covers the one allowed level of
    // administrative containment.
    if !eq(&filters.region, &listing.region) {
        return false;
    }

    fn within<T: PartialOrd + Copy>(lo: Option<T>, hi: Option<T>, fact: Option<T>) -> bool {
        match (lo, hi, fact) {
            (None, None, _) => true,
            (_, _, None) => false,
            (lo, hi, Some(v)) => lo.map_or(true, |l| v >= l) && hi.map_or(true, |h| v <= h),
        }
    }

    within(filters.min_year, filters.max_year, listing.year)
        && within(filters.min_price, filters.max_price, listing.price_bgn)
        && within(filters.min_mileage, filters.max_mileage, listing.mileage_km)
        && within(filters.min_power, filters.max_power, listing.power_hp)
}
