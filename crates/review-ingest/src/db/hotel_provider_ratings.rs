//! Per-provider aggregate scores for a hotel, unique per (hotel, provider).

use sqlx::PgConnection;
use tracing::instrument;

use super::error::StoreResult;
use super::models::{HotelProviderRating, NewHotelProviderRating, Upserted};

/// Insert the rating or overwrite every score on the existing row.
#[instrument(skip(conn, rating), fields(hotel_id = rating.hotel_id, provider_id = rating.provider_id))]
pub async fn upsert(
    conn: &mut PgConnection,
    rating: &NewHotelProviderRating<'_>,
) -> StoreResult<Upserted> {
    let scores = rating.scores;
    let upserted = sqlx::query_as::<_, Upserted>(
        r#"
        INSERT INTO hotel_provider_ratings (
            hotel_id, provider_id, provider_name, overall_score, review_count,
            cleanliness, facilities, location, room_comfort_quality, service, value_for_money
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (hotel_id, provider_id) DO UPDATE SET
            overall_score = EXCLUDED.overall_score,
            review_count = EXCLUDED.review_count,
            cleanliness = EXCLUDED.cleanliness,
            facilities = EXCLUDED.facilities,
            location = EXCLUDED.location,
            room_comfort_quality = EXCLUDED.room_comfort_quality,
            service = EXCLUDED.service,
            value_for_money = EXCLUDED.value_for_money,
            updated_at = NOW()
        RETURNING id, (xmax = 0) AS inserted
        "#,
    )
    .bind(rating.hotel_id)
    .bind(rating.provider_id)
    .bind(rating.provider_name)
    .bind(scores.overall_score)
    .bind(scores.review_count)
    .bind(scores.cleanliness)
    .bind(scores.facilities)
    .bind(scores.location)
    .bind(scores.room_comfort_quality)
    .bind(scores.service)
    .bind(scores.value_for_money)
    .fetch_one(&mut *conn)
    .await?;

    Ok(upserted)
}

pub async fn list_for_hotel(
    conn: &mut PgConnection,
    hotel_id: i64,
) -> StoreResult<Vec<HotelProviderRating>> {
    let ratings = sqlx::query_as::<_, HotelProviderRating>(
        r#"
        SELECT id, hotel_id, provider_id, provider_name, overall_score, review_count,
               cleanliness, facilities, location, room_comfort_quality, service,
               value_for_money, created_at, updated_at
        FROM hotel_provider_ratings
        WHERE hotel_id = $1
        ORDER BY provider_id
        "#,
    )
    .bind(hotel_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ratings)
}
