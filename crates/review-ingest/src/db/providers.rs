//! Review providers (Agoda, Booking.com, ...), unique by name.

use sqlx::PgConnection;
use tracing::instrument;

use super::error::StoreResult;
use super::models::{Provider, Resolved};

/// Return the provider named `name`, inserting it first if it does not exist.
///
/// `ON CONFLICT DO NOTHING` followed by a read makes this safe when several
/// writers race on the same name: the loser sees the winner's row.
#[instrument(skip(conn))]
pub async fn create_or_get(conn: &mut PgConnection, name: &str) -> StoreResult<Resolved<Provider>> {
    let inserted = sqlx::query_as::<_, Provider>(
        r#"
        INSERT INTO providers (name)
        VALUES ($1)
        ON CONFLICT (name) DO NOTHING
        RETURNING id, name, created_at
        "#,
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(provider) = inserted {
        return Ok(Resolved::created(provider));
    }

    let existing = sqlx::query_as::<_, Provider>(
        "SELECT id, name, created_at FROM providers WHERE name = $1",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Resolved::existing(existing))
}
