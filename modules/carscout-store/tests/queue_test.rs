//! Integration tests for the job queue and rate-limit state.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use carscout_common::Stage;
use carscout_store::rate_limit::TokenBucket;
use carscout_store::{migrate, Queue};
use sqlx::PgPool;
use uuid::Uuid;

/// Get a migrated test pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    migrate(&pool).await.ok()?;
    sqlx::query("TRUNCATE jobs, dead_letters, token_buckets, daily_counters")
        .execute(&pool)
        .await
        .ok()?;
    Some(pool)
}

#[tokio::test]
async fn enqueue_is_idempotent_per_key() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let queue = Queue::new(pool);
    let listing_id = Uuid::new_v4();

    assert!(queue.enqueue(Stage::Parse, listing_id, "v1").await.unwrap());
    assert!(!queue.enqueue(Stage::Parse, listing_id, "v1").await.unwrap());
    // A new parse generation is a new message.
    assert!(queue.enqueue(Stage::Parse, listing_id, "v2").await.unwrap());

    assert_eq!(queue.depth(Stage::Parse).await.unwrap(), 2);
}

#[tokio::test]
async fn claimed_jobs_are_invisible_to_other_workers() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let queue = Queue::new(pool);
    let listing_id = Uuid::new_v4();
    queue.enqueue(Stage::Dedupe, listing_id, "v1").await.unwrap();

    let first = queue.claim("worker-a", Stage::Dedupe, 10).await.unwrap();
    assert_eq!(first.len(), 1);

    let second = queue.claim("worker-b", Stage::Dedupe, 10).await.unwrap();
    assert!(second.is_empty(), "lease should hide the claimed job");

    queue.complete(&first[0]).await.unwrap();
    assert_eq!(queue.depth(Stage::Dedupe).await.unwrap(), 0);
}

#[tokio::test]
async fn exhausted_retries_park_in_dead_letters() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let queue = Queue::new(pool.clone());
    let listing_id = Uuid::new_v4();
    queue.enqueue(Stage::Price, listing_id, "v1").await.unwrap();

    let mut job = queue.claim("worker-a", Stage::Price, 1).await.unwrap().remove(0);
    job.attempts = job.max_attempts - 1;
    queue.retry(&job, "synthetic failure").await.unwrap();

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE listing_id = $1")
            .bind(listing_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
    assert_eq!(queue.depth(Stage::Price).await.unwrap(), 0);
}

#[tokio::test]
async fn token_bucket_enforces_capacity() {
    let Some(pool) = test_pool().await else {
        return;
    };

    // Capacity 2, negligible refill: two takes pass, the third fails.
    assert!(TokenBucket::try_take("test:bucket", 2.0, 0.0001, &pool).await.unwrap());
    assert!(TokenBucket::try_take("test:bucket", 2.0, 0.0001, &pool).await.unwrap());
    assert!(!TokenBucket::try_take("test:bucket", 2.0, 0.0001, &pool).await.unwrap());
}
