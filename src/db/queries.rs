use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::store::{JobFilter, JobStore, StoreError};
use crate::models::generation::GenerationParameters;
use crate::models::job::{GenerationInput, GenerationJob, JobOutput, JobPatch, JobStatus};

const JOB_COLUMNS: &str = r#"
    id, input_text, image_key, style, resolution, color_palette, batch_count,
    status, progress, output, error, created_at, started_at, completed_at
"#;

/// PostgreSQL-backed job store (`generation_jobs` table).
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &GenerationJob) -> Result<(), StoreError> {
        let (input_text, image_key) = match &job.input {
            GenerationInput::Text { text } => (Some(text.as_str()), None),
            GenerationInput::Image { image_key } => (None, Some(image_key.as_str())),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, input_text, image_key, style, resolution, color_palette, batch_count,
                 status, progress, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(input_text)
        .bind(image_key)
        .bind(&job.parameters.style)
        .bind(&job.parameters.resolution)
        .bind(&job.parameters.color_palette)
        .bind(job.parameters.batch_count as i32)
        .bind(job.status.as_ref())
        .bind(job.progress)
        .bind(job.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<GenerationJob, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => job_from_row(&r),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<GenerationJob, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut job = match row {
            Some(r) => job_from_row(&r)?,
            None => return Err(StoreError::NotFound(id)),
        };

        job.apply(patch)
            .map_err(|source| StoreError::InvalidTransition { id, source })?;

        sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = $2,
                progress = $3,
                output = $4,
                error = $5,
                started_at = $6,
                completed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(job.status.as_ref())
        .bind(job.progress)
        .bind(job.output.as_ref().map(Json))
        .bind(job.error.as_deref())
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(job)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<GenerationJob>, StoreError> {
        let limit = filter.limit.map(|l| l as i64);
        let order = if filter.newest_first { "DESC" } else { "ASC" };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM generation_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::timestamptz IS NULL OR started_at < $2)
            ORDER BY seq {order}
            LIMIT $3
            "#
        ))
        .bind(filter.status.map(|s| s.as_ref().to_string()))
        .bind(filter.started_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn job_from_row(r: &PgRow) -> Result<GenerationJob, StoreError> {
    let id: Uuid = r.try_get("id")?;

    let input_text: Option<String> = r.try_get("input_text")?;
    let image_key: Option<String> = r.try_get("image_key")?;
    let input = match (input_text, image_key) {
        (Some(text), None) => GenerationInput::Text { text },
        (None, Some(image_key)) => GenerationInput::Image { image_key },
        _ => {
            return Err(StoreError::Corrupt(format!(
                "job {id} must have exactly one input"
            )))
        }
    };

    let status_str: String = r.try_get("status")?;
    let status: JobStatus = status_str
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("job {id} has unknown status '{status_str}'")))?;

    let batch_count: i32 = r.try_get("batch_count")?;
    let output: Option<Json<JobOutput>> = r.try_get("output")?;

    Ok(GenerationJob {
        id,
        input,
        parameters: GenerationParameters {
            style: r.try_get("style")?,
            resolution: r.try_get("resolution")?,
            color_palette: r.try_get("color_palette")?,
            batch_count: u32::try_from(batch_count)
                .map_err(|_| StoreError::Corrupt(format!("job {id} has negative batch_count")))?,
        },
        status,
        progress: r.try_get("progress")?,
        output: output.map(|Json(o)| o),
        error: r.try_get("error")?,
        created_at: r.try_get("created_at")?,
        started_at: r.try_get("started_at")?,
        completed_at: r.try_get("completed_at")?,
    })
}
