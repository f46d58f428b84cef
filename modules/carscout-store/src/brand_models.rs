use anyhow::Result;
use sqlx::PgPool;

/// One canonical `(brand_id, model_id)` pair with its alias spellings.
/// Seed data; the alias matcher loads the whole active table into memory.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BrandModel {
    pub brand_id: String,
    pub model_id: String,
    pub aliases: serde_json::Value,
    pub locale: String,
}

impl BrandModel {
    pub async fn load_active(pool: &PgPool) -> Result<Vec<BrandModel>> {
        let rows = sqlx::query_as::<_, BrandModel>(
            "SELECT brand_id, model_id, aliases, locale FROM brand_models WHERE active
             ORDER BY brand_id, model_id",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub fn alias_list(&self) -> Vec<String> {
        self.aliases
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
