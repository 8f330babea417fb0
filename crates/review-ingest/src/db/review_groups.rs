//! Reviewer groups ("Couple", "Solo traveler", ...), unique by name.

use sqlx::PgConnection;
use tracing::instrument;

use super::error::StoreResult;
use super::models::{Resolved, ReviewGroup};

#[instrument(skip(conn))]
pub async fn create_or_get(
    conn: &mut PgConnection,
    name: &str,
) -> StoreResult<Resolved<ReviewGroup>> {
    let inserted = sqlx::query_as::<_, ReviewGroup>(
        r#"
        INSERT INTO review_groups (name)
        VALUES ($1)
        ON CONFLICT (name) DO NOTHING
        RETURNING id, name, created_at
        "#,
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    match inserted {
        Some(group) => Ok(Resolved::created(group)),
        None => {
            let existing = sqlx::query_as::<_, ReviewGroup>(
                "SELECT id, name, created_at FROM review_groups WHERE name = $1",
            )
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
            Ok(Resolved::existing(existing))
        }
    }
}
