//! Reviewer countries, unique by name. The flag is recorded on first sight.

use sqlx::PgConnection;
use tracing::instrument;

use super::error::StoreResult;
use super::models::{Country, Resolved};

#[instrument(skip(conn))]
pub async fn create_or_get(
    conn: &mut PgConnection,
    name: &str,
    flag: &str,
) -> StoreResult<Resolved<Country>> {
    let inserted = sqlx::query_as::<_, Country>(
        r#"
        INSERT INTO countries (name, flag)
        VALUES ($1, $2)
        ON CONFLICT (name) DO NOTHING
        RETURNING id, name, flag, created_at
        "#,
    )
    .bind(name)
    .bind(flag)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(country) = inserted {
        return Ok(Resolved::created(country));
    }

    let existing = sqlx::query_as::<_, Country>(
        "SELECT id, name, flag, created_at FROM countries WHERE name = $1",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Resolved::existing(existing))
}
