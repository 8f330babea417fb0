//! Hotel rows, keyed by the export's external `hotel_id`.

use sqlx::PgConnection;
use tracing::instrument;

use super::error::StoreResult;
use super::models::{Hotel, HotelRecord, Upserted};

/// Insert a hotel or overwrite its name and platform.
#[instrument(skip(conn, hotel), fields(hotel_id = hotel.hotel_id))]
pub async fn upsert(conn: &mut PgConnection, hotel: &HotelRecord) -> StoreResult<Upserted> {
    let upserted = sqlx::query_as::<_, Upserted>(
        r#"
        INSERT INTO hotels (hotel_id, name, platform)
        VALUES ($1, $2, $3)
        ON CONFLICT (hotel_id) DO UPDATE SET
            name = EXCLUDED.name,
            platform = EXCLUDED.platform,
            updated_at = NOW()
        RETURNING id, (xmax = 0) AS inserted
        "#,
    )
    .bind(hotel.hotel_id)
    .bind(&hotel.name)
    .bind(&hotel.platform)
    .fetch_one(&mut *conn)
    .await?;

    Ok(upserted)
}

pub async fn get_by_hotel_id(conn: &mut PgConnection, hotel_id: i64) -> StoreResult<Option<Hotel>> {
    let hotel = sqlx::query_as::<_, Hotel>(
        r#"
        SELECT id, hotel_id, name, platform, created_at, updated_at
        FROM hotels
        WHERE hotel_id = $1
        "#,
    )
    .bind(hotel_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(hotel)
}
