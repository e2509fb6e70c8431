use async_trait::async_trait;
use shared::models::{Identity, TeamFlags};
use shared::AppError;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use crate::identity::IdentitySource;
use crate::Mode;

/// Postgres-backed `IdentitySource`: the concrete billing-store read path
/// behind `CachingIdentitySource`'s KV cache (a plain `sqlx` read, cached a
/// layer up rather than inside the repository itself). Billing *writes*
/// (`Billing::charge`) are a separate, explicitly opaque collaborator; this
/// type only reads the credit/concurrency/rate-limit chunk a request is
/// gated against.
pub struct PgIdentitySource {
    pool: PgPool,
}

impl PgIdentitySource {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("migration failed: {e}")))
    }

    /// Upserts a team row. Exposed for test/seed fixtures and operator
    /// tooling; the admission controller itself never writes identity.
    pub async fn upsert(&self, identity: &Identity) -> Result<(), AppError> {
        let rate_limits = serde_json::to_value(&identity.rate_limits)?;
        sqlx::query(
            r#"
            INSERT INTO teams (team_id, sub_id, price_credits, credits_used, adjusted_credits_used,
                                concurrency, rate_limits, bypass_robots, zero_data_retention,
                                crawl_ttl_override_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (team_id) DO UPDATE SET
                sub_id = EXCLUDED.sub_id,
                price_credits = EXCLUDED.price_credits,
                credits_used = EXCLUDED.credits_used,
                adjusted_credits_used = EXCLUDED.adjusted_credits_used,
                concurrency = EXCLUDED.concurrency,
                rate_limits = EXCLUDED.rate_limits,
                bypass_robots = EXCLUDED.bypass_robots,
                zero_data_retention = EXCLUDED.zero_data_retention,
                crawl_ttl_override_seconds = EXCLUDED.crawl_ttl_override_seconds
            "#,
        )
        .bind(identity.team_id)
        .bind(identity.sub_id)
        .bind(identity.price_credits)
        .bind(identity.credits_used)
        .bind(identity.adjusted_credits_used)
        .bind(identity.concurrency as i32)
        .bind(rate_limits)
        .bind(identity.flags.bypass_robots)
        .bind(identity.flags.zero_data_retention)
        .bind(identity.flags.crawl_ttl_override_seconds.map(|v| v as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentitySource for PgIdentitySource {
    async fn fetch_identity(&self, team_id: uuid::Uuid, _mode: Mode) -> Result<Identity, AppError> {
        let row = sqlx::query(
            r#"SELECT sub_id, price_credits, credits_used, adjusted_credits_used, concurrency,
                      rate_limits, bypass_robots, zero_data_retention, crawl_ttl_override_seconds
               FROM teams WHERE team_id = $1"#,
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no identity for team {team_id}")))?;

        let rate_limits: serde_json::Value = row.try_get("rate_limits")?;
        let rate_limits: HashMap<String, u32> = serde_json::from_value(rate_limits).unwrap_or_default();
        let crawl_ttl_override_seconds: Option<i64> = row.try_get("crawl_ttl_override_seconds")?;

        Ok(Identity {
            team_id,
            sub_id: row.try_get("sub_id")?,
            price_credits: row.try_get("price_credits")?,
            credits_used: row.try_get("credits_used")?,
            adjusted_credits_used: row.try_get("adjusted_credits_used")?,
            concurrency: {
                let c: i32 = row.try_get("concurrency")?;
                c.max(0) as u32
            },
            rate_limits,
            flags: TeamFlags {
                bypass_robots: row.try_get("bypass_robots")?,
                zero_data_retention: row.try_get("zero_data_retention")?,
                crawl_ttl_override_seconds: crawl_ttl_override_seconds.map(|v| v.max(0) as u64),
            },
        })
    }
}
