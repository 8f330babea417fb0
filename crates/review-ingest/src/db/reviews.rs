//! Reviews, keyed by the export's external `hotel_review_id`.
//!
//! A repeated review only refreshes the columns named in its
//! [`ReviewRefreshFields`] (plus `updated_at`); everything else keeps the
//! values from the first time the review was seen.

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::instrument;

use super::error::StoreResult;
use super::models::{NewReview, Review, ReviewContent, Upserted};

macro_rules! review_fields {
    ($($variant:ident => $column:ident),+ $(,)?) => {
        /// A descriptive review column that an upsert may refresh.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum ReviewField {
            $($variant),+
        }

        impl ReviewField {
            pub const ALL: &'static [ReviewField] = &[$(ReviewField::$variant),+];

            pub fn column(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($column)),+
                }
            }

            /// Copy this column's value from `source` onto `target`.
            #[allow(clippy::clone_on_copy)]
            pub fn copy(self, source: &ReviewContent, target: &mut ReviewContent) {
                match self {
                    $(Self::$variant => target.$column = source.$column.clone()),+
                }
            }
        }
    };
}

review_fields! {
    Rating => rating,
    CheckInMonthYear => check_in_month_year,
    EncryptedReviewData => encrypted_review_data,
    FormattedRating => formatted_rating,
    FormattedReviewDate => formatted_review_date,
    RatingText => rating_text,
    ResponderName => responder_name,
    ResponseDateText => response_date_text,
    ResponseTranslateSource => response_translate_source,
    ReviewComments => review_comments,
    ReviewNegatives => review_negatives,
    ReviewPositives => review_positives,
    ReviewProviderLogo => review_provider_logo,
    ReviewProviderText => review_provider_text,
    ReviewTitle => review_title,
    TranslateSource => translate_source,
    TranslateTarget => translate_target,
    ReviewDate => review_date,
    OriginalTitle => original_title,
    OriginalComment => original_comment,
    FormattedResponseDate => formatted_response_date,
    IsShowReviewResponse => is_show_review_response,
    ReviewerCountryName => reviewer_country_name,
    ReviewerDisplayName => reviewer_display_name,
    ReviewerFlagName => reviewer_flag_name,
    ReviewerGroupName => reviewer_group_name,
    ReviewerRoomTypeName => reviewer_room_type_name,
    ReviewerLengthOfStay => reviewer_length_of_stay,
    ReviewerReviewCount => reviewer_review_count,
    ReviewerIsExpert => reviewer_is_expert,
    ReviewerShowGlobalIcon => reviewer_show_global_icon,
    ReviewerShowReviewCount => reviewer_show_review_count,
}

impl fmt::Display for ReviewField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is not a refreshable review column")]
pub struct UnknownReviewField(pub String);

impl FromStr for ReviewField {
    type Err = UnknownReviewField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.column().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownReviewField(wanted.to_string()))
    }
}

/// Columns overwritten when a review that already exists is written again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewRefreshFields(Vec<ReviewField>);

impl Default for ReviewRefreshFields {
    fn default() -> Self {
        Self(vec![ReviewField::Rating, ReviewField::ReviewComments])
    }
}

impl ReviewRefreshFields {
    pub fn new(fields: impl IntoIterator<Item = ReviewField>) -> Self {
        let mut unique = Vec::new();
        for field in fields {
            if !unique.contains(&field) {
                unique.push(field);
            }
        }
        Self(unique)
    }

    pub fn fields(&self) -> &[ReviewField] {
        &self.0
    }

    /// `SET` clause for the conflict branch of the review upsert.
    /// `updated_at` is always refreshed.
    pub fn set_clause(&self) -> String {
        self.0
            .iter()
            .map(|field| format!("{col} = EXCLUDED.{col}", col = field.column()))
            .chain(std::iter::once("updated_at = NOW()".to_string()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Apply the refresh to an already stored review.
    pub fn apply(&self, incoming: &ReviewContent, stored: &mut ReviewContent) {
        for field in &self.0 {
            field.copy(incoming, stored);
        }
    }
}

impl FromStr for ReviewRefreshFields {
    type Err = UnknownReviewField;

    /// Parse a comma separated list of column names, e.g. `rating,review_comments`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<ReviewField>, _>>()?;
        Ok(Self::new(fields))
    }
}

const INSERT_COLUMNS: &str = "hotel_review_id, hotel_id, provider_id, rating, check_in_month_year, \
    encrypted_review_data, formatted_rating, formatted_review_date, rating_text, \
    responder_name, response_date_text, response_translate_source, review_comments, \
    review_negatives, review_positives, review_provider_logo, review_provider_text, \
    review_title, translate_source, translate_target, review_date, original_title, \
    original_comment, formatted_response_date, is_show_review_response, \
    reviewer_country_name, reviewer_display_name, reviewer_flag_name, \
    reviewer_group_name, reviewer_room_type_name, reviewer_country_id, \
    reviewer_length_of_stay, reviewer_group_id, reviewer_review_count, \
    reviewer_is_expert, reviewer_show_global_icon, reviewer_show_review_count";

fn upsert_sql(refresh: &ReviewRefreshFields) -> String {
    let placeholders = (1..=37)
        .map(|n| format!("${}", n))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO reviews ({INSERT_COLUMNS}) VALUES ({placeholders}) \
         ON CONFLICT (hotel_review_id) DO UPDATE SET {} \
         RETURNING id, (xmax = 0) AS inserted",
        refresh.set_clause()
    )
}

/// Insert the review or refresh the configured columns of the existing row.
#[instrument(skip(conn, review, refresh), fields(hotel_review_id = review.hotel_review_id))]
pub async fn upsert(
    conn: &mut PgConnection,
    review: &NewReview<'_>,
    refresh: &ReviewRefreshFields,
) -> StoreResult<Upserted> {
    let sql = upsert_sql(refresh);
    let c = review.content;

    let upserted = sqlx::query_as::<_, Upserted>(&sql)
        .bind(review.hotel_review_id)
        .bind(review.hotel_id)
        .bind(review.provider_id)
        .bind(c.rating)
        .bind(&c.check_in_month_year)
        .bind(&c.encrypted_review_data)
        .bind(&c.formatted_rating)
        .bind(&c.formatted_review_date)
        .bind(&c.rating_text)
        .bind(&c.responder_name)
        .bind(&c.response_date_text)
        .bind(&c.response_translate_source)
        .bind(&c.review_comments)
        .bind(&c.review_negatives)
        .bind(&c.review_positives)
        .bind(&c.review_provider_logo)
        .bind(&c.review_provider_text)
        .bind(&c.review_title)
        .bind(&c.translate_source)
        .bind(&c.translate_target)
        .bind(c.review_date)
        .bind(&c.original_title)
        .bind(&c.original_comment)
        .bind(&c.formatted_response_date)
        .bind(c.is_show_review_response)
        .bind(&c.reviewer_country_name)
        .bind(&c.reviewer_display_name)
        .bind(&c.reviewer_flag_name)
        .bind(&c.reviewer_group_name)
        .bind(&c.reviewer_room_type_name)
        .bind(review.reviewer_country_id)
        .bind(c.reviewer_length_of_stay)
        .bind(review.reviewer_group_id)
        .bind(c.reviewer_review_count)
        .bind(c.reviewer_is_expert)
        .bind(c.reviewer_show_global_icon)
        .bind(c.reviewer_show_review_count)
        .fetch_one(&mut *conn)
        .await?;

    Ok(upserted)
}

pub async fn get_by_hotel_review_id(
    conn: &mut PgConnection,
    hotel_review_id: i64,
) -> StoreResult<Option<Review>> {
    let sql = format!(
        "SELECT id, {INSERT_COLUMNS}, created_at, updated_at FROM reviews WHERE hotel_review_id = $1"
    );
    let review = sqlx::query_as::<_, Review>(&sql)
        .bind(hotel_review_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(review)
}
