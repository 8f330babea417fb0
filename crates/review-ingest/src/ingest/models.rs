//! Raw shapes of one line of a review export.
//!
//! Field names follow the export's camelCase JSON. Only `hotelId`,
//! `comment` and `comment.hotelReviewId` are required; every other field
//! falls back to its empty value when missing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotelReviewData {
    pub hotel_id: i64,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub hotel_name: String,
    pub comment: Comment,
    #[serde(default)]
    pub overall_by_providers: Vec<OverallByProvider>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub hotel_review_id: i64,
    #[serde(default)]
    pub provider_id: i64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub is_show_review_response: bool,
    #[serde(default, rename = "checkInDateMonthAndYear")]
    pub check_in_date_month_and_year: String,
    #[serde(default)]
    pub encrypted_review_data: String,
    #[serde(default)]
    pub formatted_rating: String,
    #[serde(default)]
    pub formatted_review_date: String,
    #[serde(default)]
    pub rating_text: String,
    #[serde(default)]
    pub responder_name: String,
    #[serde(default)]
    pub response_date_text: String,
    #[serde(default)]
    pub response_translate_source: String,
    #[serde(default)]
    pub review_comments: String,
    #[serde(default)]
    pub review_negatives: String,
    #[serde(default)]
    pub review_positives: String,
    #[serde(default)]
    pub review_provider_logo: String,
    #[serde(default)]
    pub review_provider_text: String,
    #[serde(default)]
    pub review_title: String,
    #[serde(default)]
    pub translate_source: String,
    #[serde(default)]
    pub translate_target: String,
    #[serde(default)]
    pub review_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewer_info: ReviewerInfo,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub original_comment: String,
    #[serde(default)]
    pub formatted_response_date: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewerInfo {
    pub country_name: String,
    pub display_member_name: String,
    pub flag_name: String,
    pub review_group_name: String,
    pub room_type_name: String,
    pub country_id: i64,
    pub length_of_stay: i32,
    pub review_group_id: i64,
    pub room_type_id: i64,
    pub reviewer_reviewed_count: i32,
    pub is_expert_reviewer: bool,
    pub is_show_global_icon: bool,
    pub is_show_reviewed_count: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallByProvider {
    #[serde(default)]
    pub provider_id: i64,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default)]
    pub review_count: i32,
    #[serde(default)]
    pub grades: Grades,
}

/// Sub-scores keyed by their display names in the export.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Grades {
    #[serde(rename = "Cleanliness")]
    pub cleanliness: Option<f64>,
    #[serde(rename = "Facilities")]
    pub facilities: Option<f64>,
    #[serde(rename = "Location")]
    pub location: Option<f64>,
    #[serde(rename = "Room comfort and quality")]
    pub room_comfort_and_quality: Option<f64>,
    #[serde(rename = "Service")]
    pub service: Option<f64>,
    #[serde(rename = "Value for money")]
    pub value_for_money: Option<f64>,
}
