//! Watermark persistence in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cdc::checkpoint::CheckpointStore;
use crate::error::Result;
use crate::model::Watermark;

#[async_trait]
impl CheckpointStore for super::Db {
    async fn load(&self, name: &str) -> Result<Option<Watermark>> {
        let row: Option<(Option<DateTime<Utc>>,)> =
            sqlx::query_as("SELECT watermark FROM cdc_checkpoints WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(wm,)| wm.map(Watermark::at).unwrap_or_default()))
    }

    /// Never moves a stored watermark backwards.
    async fn save(&self, name: &str, watermark: &Watermark) -> Result<()> {
        sqlx::query(
            "INSERT INTO cdc_checkpoints (name, watermark, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (name) DO UPDATE
             SET watermark = GREATEST(cdc_checkpoints.watermark, EXCLUDED.watermark),
                 updated_at = now()",
        )
        .bind(name)
        .bind(watermark.as_time())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unconditional overwrite, including rewinding or clearing.
    async fn reset(&self, name: &str, watermark: &Watermark) -> Result<()> {
        sqlx::query(
            "INSERT INTO cdc_checkpoints (name, watermark, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (name) DO UPDATE
             SET watermark = EXCLUDED.watermark, updated_at = now()",
        )
        .bind(name)
        .bind(watermark.as_time())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
