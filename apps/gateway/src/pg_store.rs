use std::time::Duration;

use async_trait::async_trait;
use relay::{RelayError, SerializedSession, SessionId, SessionStore};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

/// Session records kept in Postgres, one JSONB document per session.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS relay_sessions (
                session_id TEXT PRIMARY KEY,
                record JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;
        info!("session table ready");
        Ok(())
    }
}

fn store_error(err: sqlx::Error) -> RelayError {
    RelayError::Store(err.to_string())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, id: &SessionId) -> relay::Result<Option<SerializedSession>> {
        let row = sqlx::query("SELECT record FROM relay_sessions WHERE session_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        match row {
            Some(row) => {
                let Json(record): Json<SerializedSession> =
                    row.try_get("record").map_err(store_error)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, record: &SerializedSession) -> relay::Result<()> {
        sqlx::query(
            "INSERT INTO relay_sessions (session_id, record, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (session_id)
             DO UPDATE SET record = EXCLUDED.record, updated_at = EXCLUDED.updated_at",
        )
        .bind(record.session_id.as_str())
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> relay::Result<bool> {
        let result = sqlx::query("DELETE FROM relay_sessions WHERE session_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }
}
