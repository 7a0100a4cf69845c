use crate::alert::AlertCondition;
use crate::config::DatabaseConfig;
use crate::document::SensorDocument;
use crate::error::PersistError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Idempotent document persistence keyed by document id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert the document, or overwrite the one sharing its id
    async fn upsert(
        &self,
        document: &SensorDocument,
        alert: AlertCondition,
    ) -> Result<(), PersistError>;
}

/// PostgreSQL-backed document store.
///
/// Documents live in a JSONB column of `sensor_documents`; the evaluated
/// alert is kept in its own column next to the body.
pub struct PgDocumentStore {
    pool: PgPool,
    write_timeout: Duration,
}

impl PgDocumentStore {
    /// Create a new document store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self::from_pool(pool, config.write_timeout()))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, write_timeout: Duration) -> Self {
        Self {
            pool,
            write_timeout,
        }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Fetch a stored document by id
    pub async fn get(&self, id: Uuid) -> Result<Option<SensorDocument>, PersistError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM sensor_documents WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(body,)| serde_json::from_value(body))
            .transpose()
            .map_err(PersistError::from)
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write(
        &self,
        document: &SensorDocument,
        alert: AlertCondition,
    ) -> Result<(), PersistError> {
        let body = serde_json::to_value(document)?;

        sqlx::query(
            r#"
            INSERT INTO sensor_documents (id, body, alert, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                body = EXCLUDED.body,
                alert = EXCLUDED.alert,
                updated_at = NOW()
            "#,
        )
        .bind(document.id)
        .bind(&body)
        .bind(alert.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    #[instrument(skip(self, document), fields(document_id = %document.id))]
    async fn upsert(
        &self,
        document: &SensorDocument,
        alert: AlertCondition,
    ) -> Result<(), PersistError> {
        let started = Instant::now();

        tokio::time::timeout(self.write_timeout, self.write(document, alert))
            .await
            .map_err(|_| PersistError::Timeout(self.write_timeout))??;

        metrics::histogram!("telemetry.upsert.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        metrics::counter!("telemetry.documents.upserted").increment(1);

        debug!(alert = %alert, "Document upserted");

        Ok(())
    }
}
