//! The processed-files ledger, one row per source object path.

use sqlx::PgConnection;
use tracing::instrument;

use super::error::{StoreError, StoreResult};
use super::models::{FileOutcome, FileStatus, NewProcessedFile, ProcessedFile};

const SELECT_COLUMNS: &str = "id, filename, s3_path, processed_at, records_count, errors_count, \
    status, created_at, updated_at";

/// Whether the file finished in a status that makes it skip on later runs.
#[instrument(skip(conn))]
pub async fn is_processed(conn: &mut PgConnection, s3_path: &str) -> StoreResult<bool> {
    let processed = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM processed_files
            WHERE s3_path = $1 AND status IN ($2, $3)
        )
        "#,
    )
    .bind(s3_path)
    .bind(FileStatus::Success.as_str())
    .bind(FileStatus::Partial.as_str())
    .fetch_one(&mut *conn)
    .await?;

    Ok(processed)
}

/// Create the ledger row in `Processing`, or reset the row left behind by an
/// earlier failed or interrupted run.
#[instrument(skip(conn, file), fields(s3_path = %file.s3_path))]
pub async fn create(conn: &mut PgConnection, file: &NewProcessedFile) -> StoreResult<ProcessedFile> {
    let sql = format!(
        r#"
        INSERT INTO processed_files (filename, s3_path, processed_at, records_count, errors_count, status)
        VALUES ($1, $2, $3, 0, 0, $4)
        ON CONFLICT (s3_path) DO UPDATE SET
            filename = EXCLUDED.filename,
            processed_at = EXCLUDED.processed_at,
            records_count = 0,
            errors_count = 0,
            status = EXCLUDED.status,
            updated_at = NOW()
        RETURNING {SELECT_COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, ProcessedFile>(&sql)
        .bind(&file.filename)
        .bind(&file.s3_path)
        .bind(file.processed_at)
        .bind(FileStatus::Processing.as_str())
        .fetch_one(&mut *conn)
        .await?;

    Ok(row)
}

/// Record the final counts and status of a ledger row.
#[instrument(skip(conn))]
pub async fn update(conn: &mut PgConnection, id: i64, outcome: &FileOutcome) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE processed_files
        SET records_count = $1, errors_count = $2, status = $3, updated_at = NOW()
        WHERE id = $4
        "#,
    )
    .bind(outcome.records_count)
    .bind(outcome.errors_count)
    .bind(outcome.status.as_str())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::unknown(format!("processed file {} not found", id)));
    }

    Ok(())
}

pub async fn get_by_path(conn: &mut PgConnection, s3_path: &str) -> StoreResult<Option<ProcessedFile>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM processed_files WHERE s3_path = $1");
    let row = sqlx::query_as::<_, ProcessedFile>(&sql)
        .bind(s3_path)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row)
}
