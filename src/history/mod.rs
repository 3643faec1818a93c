//! Rebalance history
//!
//! Persists every rebalance outcome per account so operators can audit
//! what was traded and why. Runs against postgres when a database URL
//! is configured, and falls back to an in-memory store otherwise so the
//! service stays usable without infrastructure.

use crate::error::RebalanceError;
use crate::models::{RebalanceOutcome, RunStatus};
use crate::Result;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

enum StoreBackend {
    InMemory {
        outcomes: Arc<RwLock<HashMap<String, Vec<RebalanceOutcome>>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

/// Outcome store keyed by account.
pub struct ReportHistory {
    backend: StoreBackend,
}

impl ReportHistory {
    /// Backend chosen from the environment: postgres when `POSTGRES_URL`
    /// or `DATABASE_URL` points somewhere connectable, in-memory
    /// otherwise.
    pub fn from_env() -> Self {
        Self {
            backend: build_backend(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::InMemory {
                outcomes: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let StoreBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS rebalance_outcomes (
                      report_id UUID PRIMARY KEY,
                      account TEXT NOT NULL,
                      wallet_id TEXT NOT NULL,
                      status TEXT NOT NULL,
                      dry_run BOOLEAN NOT NULL,
                      outcome JSONB NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_rebalance_outcomes_account_time
                    ON rebalance_outcomes (account, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                RebalanceError::Store(format!("Failed to initialize history schema: {}", e))
            })?;

        Ok(())
    }

    fn status_to_db(status: RunStatus) -> &'static str {
        match status {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// Appends one outcome to the account's history.
    pub async fn record(&self, outcome: &RebalanceOutcome) -> Result<()> {
        match &self.backend {
            StoreBackend::InMemory { outcomes } => {
                let mut locked = outcomes.write().await;
                locked
                    .entry(outcome.account.clone())
                    .or_default()
                    .push(outcome.clone());
                Ok(())
            }
            StoreBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let document = serde_json::to_value(outcome)?;

                sqlx::query(
                    r#"
                    INSERT INTO rebalance_outcomes
                      (report_id, account, wallet_id, status, dry_run, outcome, created_at)
                    VALUES
                      ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(outcome.report.report_id)
                .bind(&outcome.account)
                .bind(&outcome.wallet_id)
                .bind(Self::status_to_db(outcome.report.status))
                .bind(outcome.report.dry_run)
                .bind(&document)
                .bind(outcome.report.finished_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    RebalanceError::Store(format!("Failed to record outcome: {}", e))
                })?;

                Ok(())
            }
        }
    }

    /// Most recent outcomes for an account, newest first.
    pub async fn for_account(&self, account: &str, limit: usize) -> Result<Vec<RebalanceOutcome>> {
        match &self.backend {
            StoreBackend::InMemory { outcomes } => {
                let locked = outcomes.read().await;
                Ok(locked
                    .get(account)
                    .map(|history| history.iter().rev().take(limit).cloned().collect())
                    .unwrap_or_default())
            }
            StoreBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let rows = sqlx::query(
                    r#"
                    SELECT outcome
                    FROM rebalance_outcomes
                    WHERE account = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(account)
                .bind(limit as i64)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    RebalanceError::Store(format!("Failed to load account history: {}", e))
                })?;

                let mut history = Vec::with_capacity(rows.len());
                for row in rows {
                    let document: serde_json::Value = row.try_get("outcome").map_err(|e| {
                        RebalanceError::Store(format!("Failed to read outcome column: {}", e))
                    })?;
                    history.push(serde_json::from_value(document)?);
                }

                Ok(history)
            }
        }
    }

    /// The account's latest outcome, if any.
    pub async fn latest(&self, account: &str) -> Result<Option<RebalanceOutcome>> {
        Ok(self.for_account(account, 1).await?.into_iter().next())
    }
}

impl Default for ReportHistory {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn build_backend() -> StoreBackend {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&url)
        {
            Ok(pool) => {
                info!("Rebalance history backend: postgres");
                return StoreBackend::Postgres {
                    pool,
                    schema_ready: Arc::new(OnceCell::new()),
                };
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres history backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Rebalance history backend: in-memory");
    StoreBackend::InMemory {
        outcomes: Arc::new(RwLock::new(HashMap::new())),
    }
}
