mod record;

use std::path::Path;

use anyhow::Context;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

pub use record::{NewRecord, PipelineRecord, RecordRepository, RecordUpdate};

use crate::models::{ModelSelection, TestType};

/// SQLite-backed record store
#[derive(Debug, Clone)]
pub struct RecordDb {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    image_ref: String,
    name: String,
    test_type: i64,
    model_selection: i64,
    probability: f64,
    uncertainty: f64,
    timestamp: String,
}

impl TryFrom<RecordRow> for PipelineRecord {
    type Error = anyhow::Error;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(PipelineRecord {
            id: row.id,
            image_ref: row.image_ref,
            name: row.name,
            test_type: TestType::try_from(row.test_type)?,
            model_selection: ModelSelection::try_from(row.model_selection)?,
            probability: row.probability,
            uncertainty: row.uncertainty,
            timestamp: OffsetDateTime::parse(&row.timestamp, &Rfc3339)
                .with_context(|| format!("Invalid timestamp on record {}", row.id))?,
        })
    }
}

const SELECT_RECORD: &str = "SELECT id, image_ref, name, test_type, model_selection, \
     probability, uncertainty, timestamp FROM pipeline_results";

impl RecordDb {
    /// Open (creating if needed) the database file and apply migrations.
    pub async fn open<P: AsRef<Path>>(db_file: P) -> anyhow::Result<Self> {
        let db_file = db_file.as_ref();
        if let Some(parent) = db_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await
            .with_context(|| format!("Failed to open database {:?}", db_file))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(path = %db_file.display(), "Record store opened");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

impl RecordRepository for RecordDb {
    async fn insert(&self, record: NewRecord) -> anyhow::Result<i64> {
        let timestamp = now().format(&Rfc3339)?;
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO pipeline_results
                (image_ref, name, test_type, model_selection, probability, uncertainty, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id"#,
        )
        .bind(&record.image_ref)
        .bind(&record.name)
        .bind(i64::from(record.test_type))
        .bind(i64::from(record.model_selection))
        .bind(record.probability)
        .bind(record.uncertainty)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<PipelineRecord>> {
        let sql = format!("{} WHERE id = $1", SELECT_RECORD);
        sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(PipelineRecord::try_from)
            .transpose()
    }

    async fn get_all(&self) -> anyhow::Result<Vec<PipelineRecord>> {
        let sql = format!("{} ORDER BY id ASC", SELECT_RECORD);
        sqlx::query_as::<_, RecordRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PipelineRecord::try_from)
            .collect()
    }

    async fn update(&self, id: i64, update: &RecordUpdate) -> anyhow::Result<PipelineRecord> {
        let result = sqlx::query(
            r#"UPDATE pipeline_results
            SET name = COALESCE($1, name), test_type = COALESCE($2, test_type)
            WHERE id = $3"#,
        )
        .bind(update.name.as_deref())
        .bind(update.test_type.map(i64::from))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("No record with id {}", id);
        }
        self.get(id)
            .await?
            .with_context(|| format!("Record {} vanished during update", id))
    }

    async fn delete(&self, id: i64) -> anyhow::Result<()> {
        let result = sqlx::query("DELETE FROM pipeline_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("No record with id {}", id);
        }
        Ok(())
    }
}
