use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::{CheckpointStatus, HistoryNode, NodeOrigin, PipelineRun, RunStatus, StageCheckpoint, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                    message: format!("Failed to create database directory: {}", e),
                })?;
            }
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database (tests and dry runs).
    ///
    /// Uses a single long-lived connection, since every SQLite in-memory
    /// connection is its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Close the pool, waiting for connections to be released
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn upsert_node(&self, timeline_id: &str, node: &HistoryNode) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO timeline_nodes (timeline_id, id, parent_id, year, description, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (timeline_id, id) DO UPDATE SET
                parent_id = excluded.parent_id,
                year = excluded.year,
                description = excluded.description,
                created_by = excluded.created_by,
                created_at = excluded.created_at
            "#,
        )
        .bind(timeline_id)
        .bind(&node.id)
        .bind(&node.parent_id)
        .bind(i64::from(node.offset))
        .bind(&node.description)
        .bind(node.origin.to_string())
        .bind(format_timestamp(&node.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_node(&self, timeline_id: &str, id: &str) -> StorageResult<Option<HistoryNode>> {
        let row: Option<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, parent_id, year, description, created_by, created_at
            FROM timeline_nodes
            WHERE timeline_id = ? AND id = ?
            "#,
        )
        .bind(timeline_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(HistoryNode::try_from).transpose()
    }

    async fn list_nodes(&self, timeline_id: &str) -> StorageResult<Vec<HistoryNode>> {
        let rows: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, parent_id, year, description, created_by, created_at
            FROM timeline_nodes
            WHERE timeline_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(timeline_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryNode::try_from).collect()
    }

    async fn count_nodes(&self, timeline_id: &str) -> StorageResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM timeline_nodes WHERE timeline_id = ?")
                .bind(timeline_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }

    async fn create_run(&self, run: &PipelineRun) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, timeline_id, seed_input, status, current_stage, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.timeline_id)
        .bind(&run.seed_input)
        .bind(run.status.to_string())
        .bind(i64::from(run.current_stage))
        .bind(&run.error)
        .bind(format_timestamp(&run.created_at))
        .bind(format_timestamp(&run.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, id: &str) -> StorageResult<Option<PipelineRun>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, timeline_id, seed_input, status, current_stage, error, created_at, updated_at
            FROM pipeline_runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineRun::try_from).transpose()
    }

    async fn update_run(&self, run: &PipelineRun) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = ?, current_stage = ?, error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.to_string())
        .bind(i64::from(run.current_stage))
        .bind(&run.error)
        .bind(format_timestamp(&run.updated_at))
        .bind(&run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RunNotFound {
                run_id: run.id.clone(),
            });
        }

        Ok(())
    }

    async fn finish_run(&self, run: &PipelineRun) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = ?, current_stage = ?, error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.to_string())
        .bind(i64::from(run.current_stage))
        .bind(&run.error)
        .bind(format_timestamp(&run.updated_at))
        .bind(&run.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RunNotFound {
                run_id: run.id.clone(),
            });
        }

        sqlx::query("DELETE FROM stage_checkpoints WHERE run_id = ?")
            .bind(&run.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_unfinished_runs(&self) -> StorageResult<Vec<PipelineRun>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"
            SELECT id, timeline_id, seed_input, status, current_stage, error, created_at, updated_at
            FROM pipeline_runs
            WHERE status IN ('pending', 'running')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }

    async fn save_checkpoint(&self, checkpoint: &StageCheckpoint) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stage_checkpoints (run_id, stage_index, stage_name, year, node_id, output, status, node_created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id, stage_index) DO UPDATE SET
                stage_name = excluded.stage_name,
                year = excluded.year,
                node_id = excluded.node_id,
                output = excluded.output,
                status = excluded.status,
                node_created_at = excluded.node_created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&checkpoint.run_id)
        .bind(i64::from(checkpoint.stage_index))
        .bind(&checkpoint.stage_name)
        .bind(i64::from(checkpoint.offset))
        .bind(&checkpoint.node_id)
        .bind(&checkpoint.output)
        .bind(checkpoint.status.to_string())
        .bind(format_timestamp(&checkpoint.node_created_at))
        .bind(format_timestamp(&checkpoint.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_checkpoints(&self, run_id: &str) -> StorageResult<Vec<StageCheckpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT run_id, stage_index, stage_name, year, node_id, output, status, node_created_at, updated_at
            FROM stage_checkpoints
            WHERE run_id = ?
            ORDER BY stage_index ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StageCheckpoint::try_from).collect()
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 so lexicographic order matches time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str, column: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            message: format!("Invalid {} timestamp '{}': {}", column, raw, e),
        })
}

fn parse_u32(value: i64, column: &str) -> StorageResult<u32> {
    u32::try_from(value).map_err(|_| StorageError::Query {
        message: format!("Column {} out of range: {}", column, value),
    })
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> StorageResult<T> {
    raw.parse().map_err(|message| StorageError::Query { message })
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    parent_id: Option<String>,
    year: i64,
    description: String,
    created_by: String,
    created_at: String,
}

impl TryFrom<NodeRow> for HistoryNode {
    type Error = StorageError;

    fn try_from(row: NodeRow) -> StorageResult<Self> {
        Ok(Self {
            offset: parse_u32(row.year, "year")?,
            origin: parse_enum::<NodeOrigin>(&row.created_by)?,
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            id: row.id,
            parent_id: row.parent_id,
            description: row.description,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    timeline_id: String,
    seed_input: String,
    status: String,
    current_stage: i64,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = StorageError;

    fn try_from(row: RunRow) -> StorageResult<Self> {
        Ok(Self {
            status: parse_enum::<RunStatus>(&row.status)?,
            current_stage: parse_u32(row.current_stage, "current_stage")?,
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
            id: row.id,
            timeline_id: row.timeline_id,
            seed_input: row.seed_input,
            error: row.error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    run_id: String,
    stage_index: i64,
    stage_name: String,
    year: i64,
    node_id: String,
    output: String,
    status: String,
    node_created_at: String,
    updated_at: String,
}

impl TryFrom<CheckpointRow> for StageCheckpoint {
    type Error = StorageError;

    fn try_from(row: CheckpointRow) -> StorageResult<Self> {
        Ok(Self {
            stage_index: parse_u32(row.stage_index, "stage_index")?,
            offset: parse_u32(row.year, "year")?,
            status: parse_enum::<CheckpointStatus>(&row.status)?,
            node_created_at: parse_timestamp(&row.node_created_at, "node_created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
            run_id: row.run_id,
            stage_name: row.stage_name,
            node_id: row.node_id,
            output: row.output,
        })
    }
}
