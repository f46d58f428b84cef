//! Alert DSL: parse, match, and the canonical-form fixed point.

use carscout_pipeline::alert_dsl::{self, AlertFilters, ListingFacts};
use carscout_pipeline::alias::AliasMatcher;
use carscout_store::brand_models::BrandModel;

fn aliases() -> AliasMatcher {
    let row = |brand: &str, model: &str, aliases: &[&str]| BrandModel {
        brand_id: brand.to_string(),
        model_id: model.to_string(),
        aliases: serde_json::json!(aliases),
        locale: "bg".to_string(),
    };
    AliasMatcher::from_table(&[
        row("bmw", "x5", &["x 5", "х5"]),
        row("audi", "a4", &["а4"]),
        row("mercedes-benz", "c-class", &["c class"]),
    ])
}

fn x5_listing() -> ListingFacts {
    ListingFacts {
        brand_id: Some("bmw".into()),
        model_id: Some("x5".into()),
        fuel: Some("diesel".into()),
        gearbox: Some("automatic".into()),
        body: Some("suv".into()),
        region: Some("sofia".into()),
        year: Some(2019),
        price_bgn: Some(24_000),
        mileage_km: Some(45_000),
        power_hp: Some(265),
    }
}

#[test]
fn full_query_parses_every_token() {
    let outcome = alert_dsl::parse("BMW X5 diesel <25000 2018+ <180000km automatic", &aliases());
    let f = &outcome.filters;

    assert_eq!(f.brand_id.as_deref(), Some("bmw"));
    assert_eq!(f.model_id.as_deref(), Some("x5"));
    assert_eq!(f.fuel.as_deref(), Some("diesel"));
    assert_eq!(f.gearbox.as_deref(), Some("automatic"));
    assert_eq!(f.max_price, Some(25_000));
    assert_eq!(f.min_year, Some(2018));
    assert_eq!(f.max_mileage, Some(180_000));
    assert!(outcome.warnings.is_empty(), "warnings: {:?}", outcome.warnings);
}

#[test]
fn bulgarian_tokens_parse() {
    let outcome = alert_dsl::parse("бмв х5 дизел автоматик софия <25000", &aliases());
    let f = &outcome.filters;
    assert_eq!(f.brand_id.as_deref(), Some("bmw"));
    assert_eq!(f.model_id.as_deref(), Some("x5"));
    assert_eq!(f.fuel.as_deref(), Some("diesel"));
    assert_eq!(f.gearbox.as_deref(), Some("automatic"));
    assert_eq!(f.region.as_deref(), Some("sofia"));
}

#[test]
fn year_span_and_power_ranges() {
    let outcome = alert_dsl::parse("mercedes c class 2015-2020 >180hp sedan", &aliases());
    let f = &outcome.filters;
    assert_eq!(f.brand_id.as_deref(), Some("mercedes-benz"));
    assert_eq!(f.model_id.as_deref(), Some("c-class"));
    assert_eq!(f.min_year, Some(2015));
    assert_eq!(f.max_year, Some(2020));
    assert_eq!(f.min_power, Some(180));
    assert_eq!(f.body.as_deref(), Some("sedan"));
}

#[test]
fn short_mileage_is_read_as_thousands() {
    let outcome = alert_dsl::parse("audi a4 <180km", &aliases());
    assert_eq!(outcome.filters.max_mileage, Some(180_000));
}

#[test]
fn unknown_tokens_warn_but_do_not_fail() {
    let outcome = alert_dsl::parse("bmw x5 чисто-нова гаражна", &aliases());
    assert_eq!(outcome.filters.brand_id.as_deref(), Some("bmw"));
    assert_eq!(outcome.warnings.len(), 2);
}

#[test]
fn matcher_honors_every_populated_filter() {
    let outcome = alert_dsl::parse("BMW X5 diesel <25000 2018+ automatic", &aliases());
    let listing = x5_listing();
    assert!(alert_dsl::matches(&outcome.filters, &listing));

    // Price above the bound: no match.
    let expensive = ListingFacts { price_bgn: Some(26_000), ..x5_listing() };
    assert!(!alert_dsl::matches(&outcome.filters, &expensive));

    // Year below the bound: no match.
    let old = ListingFacts { year: Some(2016), ..x5_listing() };
    assert!(!alert_dsl::matches(&outcome.filters, &old));

    // A filtered field the listing lacks: no match.
    let no_fuel = ListingFacts { fuel: None, ..x5_listing() };
    assert!(!alert_dsl::matches(&outcome.filters, &no_fuel));
}

#[test]
fn bounds_are_inclusive() {
    let outcome = alert_dsl::parse("bmw x5 <24000 2019+", &aliases());
    let exactly = ListingFacts { price_bgn: Some(24_000), year: Some(2019), ..x5_listing() };
    assert!(alert_dsl::matches(&outcome.filters, &exactly));
}

#[test]
fn canonical_form_is_a_fixed_point() {
    let first = alert_dsl::parse("BMW X5 diesel <25000 2018+ <180000km automatic sofia", &aliases());
    let rendered = first.filters.to_query();
    let second = alert_dsl::parse(&rendered, &aliases());
    assert_eq!(first.filters, second.filters, "round trip changed: {rendered}");

    let third = alert_dsl::parse(&second.filters.to_query(), &aliases());
    assert_eq!(second.filters, third.filters);
}

#[test]
fn empty_filters_match_everything() {
    assert!(alert_dsl::matches(&AlertFilters::default(), &x5_listing()));
}
