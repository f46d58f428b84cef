use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub telegram_user_id: i64,
    pub plan_id: Option<Uuid>,
    pub status: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub max_alerts: i32,
    pub notification_delay_min: i32,
    /// None means unlimited.
    pub daily_cap: Option<i32>,
}

/// Read-only entitlement projection maintained by the billing system; the
/// core consults it at every alert dispatch.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Entitlement {
    pub user_id: Uuid,
    pub plan_name: String,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl User {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, telegram_user_id, plan_id, status FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(user)
    }
}

impl Plan {
    pub async fn find_by_name(name: &str, pool: &PgPool) -> Result<Option<Plan>> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, name, max_alerts, notification_delay_min, daily_cap
             FROM plans WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;
        Ok(plan)
    }

    /// The plan governing a user right now: entitlement view first, falling
    /// back to the user's stored plan, then to free.
    pub async fn effective_for_user(user_id: Uuid, pool: &PgPool) -> Result<Plan> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT p.id, p.name, p.max_alerts, p.notification_delay_min, p.daily_cap
             FROM plans p
             WHERE p.name = COALESCE(
                 (SELECT e.plan_name FROM entitlements e
                  WHERE e.user_id = $1 AND e.status = 'active'),
                 (SELECT pl.name FROM users u JOIN plans pl ON pl.id = u.plan_id
                  WHERE u.id = $1),
                 'free')",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(plan)
    }
}

impl Entitlement {
    pub async fn find(user_id: Uuid, pool: &PgPool) -> Result<Option<Entitlement>> {
        let row = sqlx::query_as::<_, Entitlement>(
            "SELECT user_id, plan_name, status, current_period_end
             FROM entitlements WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }
}
