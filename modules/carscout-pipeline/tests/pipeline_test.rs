//! End-to-end pipeline test: scrape tick → parse → normalize → dedupe →
//! price → risk → score → channel → alert match, against a real Postgres.
//! Requires DATABASE_TEST_URL; skipped otherwise.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use carscout_common::{Config, Stage};
use carscout_pipeline::adapters::{AdapterRegistry, SourceRecord};
use carscout_pipeline::alert_dsl;
use carscout_pipeline::alias::AliasMatcher;
use carscout_pipeline::deps::PipelineDeps;
use carscout_pipeline::scheduler::Scheduler;
use carscout_pipeline::stages::{self, StageOutcome};
use carscout_pipeline::testing::{FixtureAdapter, MemoryBlobStore, RecordingMessenger, StubRiskLlm};
use carscout_pipeline::worker::ALL_STAGES;
use carscout_store::alerts::{Alert, AlertMatch};
use carscout_store::channel::ChannelPost;
use carscout_store::listings::{Listing, RawListing};
use carscout_store::pricing::CompCache;
use carscout_store::sources::Source;
use carscout_store::{migrate, Queue};

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        blob_dir: std::path::PathBuf::from("unused"),
        llm_api_key: String::new(),
        llm_base_url: None,
        llm_model: "stub".into(),
        llm_timeout_ms: 1_000,
        telegram_bot_token: String::new(),
        telegram_channel: "@carscout-test".into(),
        phone_hash_salt: "test-salt".into(),
        channel_posts_per_hour: 20,
        diversity_window_hours: 6,
        diversity_cap_per_model: 5,
        score_threshold: 7.5,
        sample_threshold: 30,
        confidence_threshold: 0.6,
        free_alert_delay_min: 30,
        worker_fanout: 4,
        per_source_concurrency: 2,
        stage_deadline_secs: 30,
        llm_deadline_secs: 5,
    }
}

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    migrate(&pool).await.ok()?;
    sqlx::query(
        "TRUNCATE sources, scrape_ticks, scrape_outcomes, listings_raw, listings, images,
         sellers, price_history, comp_cache, risk_evaluations, scores, dedupe_signatures,
         duplicate_log, users, entitlements, alerts, alert_matches, channel_posts, jobs,
         dead_letters, token_buckets, daily_counters, llm_cache CASCADE",
    )
    .execute(&pool)
    .await
    .ok()?;
    Some(pool)
}

/// Drain every stage queue until a full pass claims nothing. Deferred jobs
/// (future run_after) stay invisible, so the drain terminates.
async fn drain(deps: &PipelineDeps) {
    loop {
        let mut worked = false;
        for stage in ALL_STAGES {
            let jobs = deps.queue.claim("test-worker", *stage, 10).await.unwrap();
            for job in jobs {
                worked = true;
                let outcome = stages::dispatch(&job, deps).await.unwrap();
                match outcome {
                    StageOutcome::Done | StageOutcome::Skip(_) => {
                        deps.queue.complete(&job).await.unwrap()
                    }
                    StageOutcome::Retry(e) => panic!("unexpected retry in drain: {e}"),
                    StageOutcome::DeadLetter(e) => panic!("unexpected dead letter: {e}"),
                    StageOutcome::Defer(d) => deps.queue.defer(&job, d).await.unwrap(),
                }
            }
        }
        if !worked {
            break;
        }
    }
}

fn record(site_ad_id: &str, payload: serde_json::Value) -> SourceRecord {
    SourceRecord {
        site_ad_id: site_ad_id.to_string(),
        url: format!("https://m.example/{site_ad_id}"),
        raw_blob: payload.to_string().into_bytes(),
        http_status: 200,
        etag: None,
        last_modified: None,
        observed_at: Utc::now(),
    }
}

fn x5_record(site_ad_id: &str, price: i64, phone: &str) -> SourceRecord {
    record(
        site_ad_id,
        serde_json::json!({
            "id": site_ad_id,
            "make": "BMW",
            "model": "X5",
            "year": 2019,
            "mileage": 45_000,
            "price": price,
            "currency": "BGN",
            "fuel": "дизел",
            "transmission": "автоматик",
            "category": "джип",
            "description": "Перфектно състояние, първи собственик",
            "images": ["https://img.example/1.jpg"],
            "phone": phone,
            "location": {"city": "София"}
        }),
    )
}

/// Insert a pre-normalized comparable directly; comparables are market
/// context, not subjects of this test.
async fn seed_comparable(pool: &PgPool, source_id: Uuid, i: i64, price: i64, year: i32, mileage: i64) {
    let raw_id: (Uuid,) = sqlx::query_as(
        "INSERT INTO listings_raw (source_id, site_ad_id, url, raw_blob_key, content_hash)
         VALUES ($1, $2, $3, 'seed', 'seed') RETURNING id",
    )
    .bind(source_id)
    .bind(format!("comp-{i}"))
    .bind(format!("https://m.example/comp-{i}"))
    .fetch_one(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO listings
             (raw_id, brand_id, model_id, year, mileage_km, fuel, gearbox, body,
              price, currency, price_bgn, region, is_normalized)
         VALUES ($1, 'bmw', 'x5', $2, $3, 'diesel', 'automatic', 'suv',
                 $4, 'BGN', $4, 'sofia', true)",
    )
    .bind(raw_id.0)
    .bind(year)
    .bind(mileage)
    .bind(Decimal::from(price))
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn pipeline_end_to_end() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let source_id = Source::insert("mobile.bg", "https://m.example", 120, &pool).await.unwrap();

    // Market context: 60 identically priced comparables spread over the
    // target's year and mileage windows.
    for i in 0..60 {
        let year = 2017 + (i % 5) as i32;
        let mileage = 33_000 + i * 400;
        seed_comparable(&pool, source_id, i, 32_000, year, mileage).await;
    }

    let messenger = Arc::new(RecordingMessenger::default());
    let mut adapters = AdapterRegistry::new();
    adapters.register(Arc::new(FixtureAdapter {
        source_name: "mobile.bg".into(),
        records: vec![x5_record("M1", 22_000, "0888123456")],
    }));

    let deps = PipelineDeps {
        pool: pool.clone(),
        queue: Queue::new(pool.clone()),
        config: test_config(),
        blobs: Arc::new(MemoryBlobStore::default()),
        llm: Some(Arc::new(StubRiskLlm::green(0.9))),
        messenger: messenger.clone(),
        adapters: Arc::new(adapters),
        aliases: Arc::new(tokio::sync::RwLock::new(AliasMatcher::default())),
    };
    deps.reload_aliases().await.unwrap();

    // A Free-plan user watching exactly this car.
    let user_id: (Uuid,) = sqlx::query_as(
        "INSERT INTO users (telegram_user_id, plan_id)
         VALUES (42, (SELECT id FROM plans WHERE name = 'free')) RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let parsed = alert_dsl::parse(
        "BMW X5 diesel <25000 2018+ automatic",
        &*deps.aliases.read().await,
    );
    let alert_id = Alert::create(
        user_id.0,
        "BMW X5 diesel <25000 2018+ automatic",
        &serde_json::to_value(&parsed.filters).unwrap(),
        &pool,
    )
    .await
    .unwrap();

    // --- Scrape tick and full drain ---
    Scheduler::new(deps.clone()).tick().await.unwrap();
    drain(&deps).await;

    let raw: (Uuid,) =
        sqlx::query_as("SELECT id FROM listings_raw WHERE site_ad_id = 'M1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    let listing = Listing::find_by_raw_id(raw.0, &pool).await.unwrap().unwrap();
    assert_eq!(listing.brand_id.as_deref(), Some("bmw"));
    assert_eq!(listing.model_id.as_deref(), Some("x5"));
    assert!(listing.is_normalized);
    assert!(!listing.is_duplicate);

    // Price: P50 of 60 comparables at 32000, deep discount, full confidence.
    let comps = CompCache::find(listing.id, &pool).await.unwrap().unwrap();
    assert_eq!(comps.sample_size, 60);
    assert_eq!(comps.predicted_price, Some(Decimal::from(32_000)));
    let discount = comps.discount_pct.unwrap();
    assert!((discount - 0.3125).abs() < 1e-6, "discount {discount}");
    assert!(comps.confidence > 0.99);

    // Approved and broadcast exactly once.
    let score: (f64, String) =
        sqlx::query_as("SELECT score, state FROM scores WHERE listing_id = $1")
            .bind(listing.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(score.1, "approved", "score was {}", score.0);

    let post = ChannelPost::find("@carscout-test", listing.id, &pool)
        .await
        .unwrap()
        .expect("channel post row");
    assert_eq!(post.last_price_bgn, Decimal::from(22_000));
    assert_eq!(messenger.sent.lock().unwrap().len(), 1);

    // Alert matched, delivery scheduled with the Free-plan delay, not sent.
    let m = AlertMatch::find(alert_id, listing.id, &pool).await.unwrap().unwrap();
    assert_eq!(m.status, "pending");
    let delay = m.deliver_at - m.matched_at;
    assert!(delay >= chrono::Duration::minutes(29), "delay {delay}");
    assert!(messenger
        .sent
        .lock()
        .unwrap()
        .iter()
        .all(|s| s.chat != "42"));

    // --- Scenario: duplicate suppression by phone ---
    let dup_adapters = {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(FixtureAdapter {
            source_name: "mobile.bg".into(),
            records: vec![x5_record("M2", 21_800, "0888123456")],
        }));
        Arc::new(registry)
    };
    let dup_deps = PipelineDeps { adapters: dup_adapters, ..deps.clone() };

    // Second observation of the same car from the same seller.
    let obs = RawListing::upsert_observation(
        source_id,
        "M2",
        "https://m.example/M2",
        "m2-blob",
        "m2-hash",
        200,
        None,
        None,
        &pool,
    )
    .await
    .unwrap();
    dup_deps
        .blobs
        .put("m2-blob", &x5_record("M2", 21_800, "0888123456").raw_blob)
        .await
        .unwrap();
    dup_deps
        .queue
        .enqueue(Stage::Parse, obs.raw_id, "v1")
        .await
        .unwrap();
    drain(&dup_deps).await;

    let dup = Listing::find_by_raw_id(obs.raw_id, &pool).await.unwrap().unwrap();
    assert!(dup.is_duplicate);
    assert_eq!(dup.canonical_of, Some(listing.id));
    let log: (String, f64) = sqlx::query_as(
        "SELECT method, confidence FROM duplicate_log WHERE listing_id = $1",
    )
    .bind(dup.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(log.0, "phone");
    assert!((log.1 - 0.95).abs() < 1e-9);
    assert!(
        CompCache::find(dup.id, &pool).await.unwrap().is_none(),
        "duplicates must not reach the price stage"
    );

    // --- Scenario: price drop re-observation edits the post ---
    let update = x5_record("M1", 21_500, "0888123456");
    let obs = RawListing::upsert_observation(
        source_id,
        "M1",
        "https://m.example/M1",
        "m1-v2-blob",
        "m1-v2-hash",
        200,
        None,
        None,
        &pool,
    )
    .await
    .unwrap();
    assert!(obs.content_changed);
    assert_eq!(obs.version, 2);
    deps.blobs.put("m1-v2-blob", &update.raw_blob).await.unwrap();
    deps.queue
        .enqueue(Stage::Parse, obs.raw_id, "v2")
        .await
        .unwrap();
    drain(&deps).await;

    let post = ChannelPost::find("@carscout-test", listing.id, &pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(post.last_price_bgn, Decimal::from(21_500));
    let history: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM price_history WHERE listing_id = $1")
            .bind(listing.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(history.0, 2, "price history: initial price plus the drop");
    let posts: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM channel_posts WHERE listing_id = $1")
            .bind(listing.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(posts.0, 1, "edits must not create new channel post rows");
    let kinds: Vec<&'static str> = messenger
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.kind)
        .collect();
    assert!(kinds.contains(&"edit"), "expected an edit send, got {kinds:?}");

    // Re-running the terminal stage on unchanged state is a no-op.
    let sends_before = messenger.sent.lock().unwrap().len();
    deps.queue
        .enqueue(Stage::Channel, listing.id, "replay")
        .await
        .unwrap();
    drain(&deps).await;
    assert_eq!(messenger.sent.lock().unwrap().len(), sends_before);

    // --- Scenario: LLM unavailable falls back to the rule result ---
    let llm_down = PipelineDeps {
        llm: Some(Arc::new(StubRiskLlm::unavailable())),
        ..deps.clone()
    };
    let escalating = record(
        "M3",
        serde_json::json!({
            "id": "M3",
            "make": "Audi",
            "model": "A4",
            "year": 2018,
            "mileage": 120_000,
            "price": 26_000,
            "currency": "BGN",
            "fuel": "дизел",
            "transmission": "ръчна",
            "description": "Бърза продажба, запазена кола",
            "phone": "0899000111"
        }),
    );
    let obs = RawListing::upsert_observation(
        source_id,
        "M3",
        "https://m.example/M3",
        "m3-blob",
        "m3-hash",
        200,
        None,
        None,
        &pool,
    )
    .await
    .unwrap();
    llm_down.blobs.put("m3-blob", &escalating.raw_blob).await.unwrap();
    llm_down.queue.enqueue(Stage::Parse, obs.raw_id, "v1").await.unwrap();
    drain(&llm_down).await;

    let m3 = Listing::find_by_raw_id(obs.raw_id, &pool).await.unwrap().unwrap();
    let risk: (String, bool) = sqlx::query_as(
        "SELECT risk_level, llm_unavailable FROM risk_evaluations WHERE listing_id = $1",
    )
    .bind(m3.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(risk.0, "yellow", "rule fallback level");
    assert!(risk.1, "llm_unavailable must be flagged");
}
