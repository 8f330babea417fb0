//! Row types and write payloads for the review schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result of a create-or-get: the row plus whether this call inserted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub row: T,
    pub created: bool,
}

impl<T> Resolved<T> {
    pub fn created(row: T) -> Self {
        Self { row, created: true }
    }

    pub fn existing(row: T) -> Self {
        Self {
            row,
            created: false,
        }
    }
}

/// Result of an upsert: the surrogate id plus whether a new row was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct Upserted {
    pub id: i64,
    pub inserted: bool,
}

// ============================================================================
// Hotels
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Hotel {
    pub id: i64,
    pub hotel_id: i64,
    pub name: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hotel attributes carried by an export record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelRecord {
    pub hotel_id: i64,
    pub name: String,
    pub platform: String,
}

// ============================================================================
// Lookup entities (create-or-get, never updated)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Provider {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Country {
    pub id: i32,
    pub name: String,
    pub flag: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReviewGroup {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Reviews
// ============================================================================

/// Descriptive review columns, everything except keys and references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReviewContent {
    pub rating: f64,
    pub check_in_month_year: String,
    pub encrypted_review_data: String,
    pub formatted_rating: String,
    pub formatted_review_date: String,
    pub rating_text: String,
    pub responder_name: String,
    pub response_date_text: String,
    pub response_translate_source: String,
    pub review_comments: String,
    pub review_negatives: String,
    pub review_positives: String,
    pub review_provider_logo: String,
    pub review_provider_text: String,
    pub review_title: String,
    pub translate_source: String,
    pub translate_target: String,
    pub review_date: Option<DateTime<Utc>>,
    pub original_title: String,
    pub original_comment: String,
    pub formatted_response_date: String,
    pub is_show_review_response: bool,
    pub reviewer_country_name: String,
    pub reviewer_display_name: String,
    pub reviewer_flag_name: String,
    pub reviewer_group_name: String,
    pub reviewer_room_type_name: String,
    pub reviewer_length_of_stay: i32,
    pub reviewer_review_count: i32,
    pub reviewer_is_expert: bool,
    pub reviewer_show_global_icon: bool,
    pub reviewer_show_review_count: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: i64,
    pub hotel_review_id: i64,
    pub hotel_id: i64,
    pub provider_id: i32,
    pub reviewer_country_id: Option<i32>,
    pub reviewer_group_id: Option<i32>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub content: ReviewContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Review write payload with resolved references.
#[derive(Debug, Clone, Copy)]
pub struct NewReview<'a> {
    pub hotel_review_id: i64,
    pub hotel_id: i64,
    pub provider_id: i32,
    pub reviewer_country_id: Option<i32>,
    pub reviewer_group_id: Option<i32>,
    pub content: &'a ReviewContent,
}

// ============================================================================
// Hotel provider ratings
// ============================================================================

/// Aggregate scores a provider reports for a hotel. Sub-scores stay `None`
/// when the export omits them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RatingScores {
    pub overall_score: f64,
    pub review_count: i32,
    pub cleanliness: Option<f64>,
    pub facilities: Option<f64>,
    pub location: Option<f64>,
    pub room_comfort_quality: Option<f64>,
    pub service: Option<f64>,
    pub value_for_money: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HotelProviderRating {
    pub id: i64,
    pub hotel_id: i64,
    pub provider_id: i32,
    pub provider_name: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub scores: RatingScores,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewHotelProviderRating<'a> {
    pub hotel_id: i64,
    pub provider_id: i32,
    pub provider_name: &'a str,
    pub scores: &'a RatingScores,
}

// ============================================================================
// Processed files (ledger)
// ============================================================================

/// Ledger status of a source file.
///
/// `Success` and `Partial` are terminal and make a file skip on later runs.
/// `Failed` files are picked up again by the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    Processing,
    Success,
    Partial,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "Processing",
            Self::Success => "Success",
            Self::Partial => "Partial",
            Self::Failed => "Failed",
        }
    }

    /// Final status for a file given its success and error counts.
    pub fn from_counts(success_records: usize, error_records: usize) -> Self {
        match (success_records, error_records) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }

    /// Whether a file in this status is skipped by later runs.
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" => Ok(Self::Processing),
            "Success" => Ok(Self::Success),
            "Partial" => Ok(Self::Partial),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown file status '{}'", other)),
        }
    }
}

impl TryFrom<String> for FileStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessedFile {
    pub id: i64,
    pub filename: String,
    pub s3_path: String,
    pub processed_at: DateTime<Utc>,
    pub records_count: i32,
    pub errors_count: i32,
    #[sqlx(try_from = "String")]
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProcessedFile {
    pub filename: String,
    pub s3_path: String,
    pub processed_at: DateTime<Utc>,
}

/// Final counts written back to a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOutcome {
    pub records_count: i32,
    pub errors_count: i32,
    pub status: FileStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_counts() {
        assert_eq!(FileStatus::from_counts(0, 0), FileStatus::Success);
        assert_eq!(FileStatus::from_counts(10, 0), FileStatus::Success);
        assert_eq!(FileStatus::from_counts(9, 1), FileStatus::Partial);
        assert_eq!(FileStatus::from_counts(0, 3), FileStatus::Failed);
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            FileStatus::Processing,
            FileStatus::Success,
            FileStatus::Partial,
            FileStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
        assert!("Done".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_only_success_and_partial_are_processed() {
        assert!(FileStatus::Success.is_processed());
        assert!(FileStatus::Partial.is_processed());
        assert!(!FileStatus::Failed.is_processed());
        assert!(!FileStatus::Processing.is_processed());
    }
}
