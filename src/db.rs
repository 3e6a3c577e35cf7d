use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::output::{Post, RunSummary};
use crate::sink::DatasetSink;

const CONNECT_ATTEMPTS: u32 = 15;

/// Connects with a retry loop; the database container often comes up after us.
pub async fn connect(db_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let mut attempts = 0;
    loop {
        match PgPoolOptions::new().max_connections(5).connect(db_url).await {
            Ok(pool) => {
                info!("Database connected");
                return Ok(pool);
            }
            Err(e) => {
                attempts += 1;
                if attempts >= CONNECT_ATTEMPTS {
                    return Err(e.into());
                }
                warn!(
                    "DB connect failed ({}), retrying in 2s... (attempt {}/{})",
                    e, attempts, CONNECT_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvested_posts (
            run_id UUID NOT NULL,
            url VARCHAR NOT NULL,
            post_id VARCHAR,
            record JSONB NOT NULL,
            scraped_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (run_id, url)
        );
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_summaries (
            run_id UUID PRIMARY KEY,
            query VARCHAR NOT NULL,
            total INTEGER NOT NULL,
            record JSONB NOT NULL,
            created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Writes each record of one run into Postgres.
pub struct PgSink {
    pool: PgPool,
    run_id: Uuid,
}

impl PgSink {
    pub fn new(pool: PgPool, run_id: Uuid) -> Self {
        Self { pool, run_id }
    }
}

#[async_trait]
impl DatasetSink for PgSink {
    async fn push_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            "INSERT INTO harvested_posts (run_id, url, post_id, record, scraped_at)
             VALUES ($1::uuid, $2, $3, $4::jsonb, $5)
             ON CONFLICT (run_id, url) DO NOTHING",
        )
        .bind(self.run_id.to_string())
        .bind(&post.url)
        .bind(&post.post_id)
        .bind(serde_json::to_string(post)?)
        .bind(post.scraped_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_summary(&self, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO harvest_summaries (run_id, query, total, record)
             VALUES ($1::uuid, $2, $3, $4::jsonb)
             ON CONFLICT (run_id) DO UPDATE SET total = EXCLUDED.total, record = EXCLUDED.record",
        )
        .bind(self.run_id.to_string())
        .bind(&summary.query)
        .bind(summary.total as i32)
        .bind(serde_json::to_string(summary)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
