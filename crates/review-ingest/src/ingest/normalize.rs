//! Turn one raw export record into the entity graph the writer persists.

use thiserror::Error;

use super::models::{HotelReviewData, OverallByProvider};
use crate::db::models::{HotelRecord, RatingScores, ReviewContent};

/// Why a line could not become a [`NormalizedRecord`].
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Reviewer country as reported by the export.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryRef {
    pub name: String,
    pub flag: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewDraft {
    pub hotel_review_id: i64,
    pub provider_name: String,
    pub country: Option<CountryRef>,
    pub review_group: Option<String>,
    pub content: ReviewContent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingDraft {
    pub provider_name: String,
    pub scores: RatingScores,
}

/// Everything one export line writes, before ids are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub hotel: HotelRecord,
    pub review: ReviewDraft,
    pub ratings: Vec<RatingDraft>,
}

/// Parse and normalize one line of the export.
pub fn parse_line(line: &str) -> Result<NormalizedRecord, NormalizeError> {
    let raw: HotelReviewData = serde_json::from_str(line)?;
    normalize(raw)
}

pub fn normalize(raw: HotelReviewData) -> Result<NormalizedRecord, NormalizeError> {
    let comment = raw.comment;
    let info = comment.reviewer_info;

    let provider_name = comment.review_provider_text.trim().to_string();
    if provider_name.is_empty() {
        return Err(NormalizeError::Invalid(format!(
            "review {} has no provider",
            comment.hotel_review_id
        )));
    }

    let country = non_empty(&info.country_name).map(|name| CountryRef {
        name,
        flag: info.flag_name.clone(),
    });
    let review_group = non_empty(&info.review_group_name);

    let content = ReviewContent {
        rating: comment.rating,
        check_in_month_year: comment.check_in_date_month_and_year,
        encrypted_review_data: comment.encrypted_review_data,
        formatted_rating: comment.formatted_rating,
        formatted_review_date: comment.formatted_review_date,
        rating_text: comment.rating_text,
        responder_name: comment.responder_name,
        response_date_text: comment.response_date_text,
        response_translate_source: comment.response_translate_source,
        review_comments: comment.review_comments,
        review_negatives: comment.review_negatives,
        review_positives: comment.review_positives,
        review_provider_logo: comment.review_provider_logo,
        review_provider_text: comment.review_provider_text,
        review_title: comment.review_title,
        translate_source: comment.translate_source,
        translate_target: comment.translate_target,
        review_date: comment.review_date,
        original_title: comment.original_title,
        original_comment: comment.original_comment,
        formatted_response_date: comment.formatted_response_date,
        is_show_review_response: comment.is_show_review_response,
        reviewer_country_name: info.country_name,
        reviewer_display_name: info.display_member_name,
        reviewer_flag_name: info.flag_name,
        reviewer_group_name: info.review_group_name,
        reviewer_room_type_name: info.room_type_name,
        reviewer_length_of_stay: info.length_of_stay,
        reviewer_review_count: info.reviewer_reviewed_count,
        reviewer_is_expert: info.is_expert_reviewer,
        reviewer_show_global_icon: info.is_show_global_icon,
        reviewer_show_review_count: info.is_show_reviewed_count,
    };

    let ratings = raw
        .overall_by_providers
        .into_iter()
        .map(rating_draft)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NormalizedRecord {
        hotel: HotelRecord {
            hotel_id: raw.hotel_id,
            name: raw.hotel_name,
            platform: raw.platform,
        },
        review: ReviewDraft {
            hotel_review_id: comment.hotel_review_id,
            provider_name,
            country,
            review_group,
            content,
        },
        ratings,
    })
}

fn rating_draft(entry: OverallByProvider) -> Result<RatingDraft, NormalizeError> {
    let provider_name = entry.provider.trim().to_string();
    if provider_name.is_empty() {
        return Err(NormalizeError::Invalid(
            "provider rating entry has no provider name".to_string(),
        ));
    }

    let grades = entry.grades;
    Ok(RatingDraft {
        provider_name,
        scores: RatingScores {
            overall_score: entry.overall_score,
            review_count: entry.review_count,
            cleanliness: grades.cleanliness,
            facilities: grades.facilities,
            location: grades.location,
            room_comfort_quality: grades.room_comfort_and_quality,
            service: grades.service,
            value_for_money: grades.value_for_money,
        },
    })
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
