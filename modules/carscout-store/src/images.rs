use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Image {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub url: String,
    pub idx: i32,
}

impl Image {
    /// Up to five image URLs in display order, for the media group.
    pub async fn urls_for_listing(listing_id: Uuid, pool: &PgPool) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT url FROM images WHERE listing_id = $1 ORDER BY idx LIMIT 5",
        )
        .bind(listing_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
