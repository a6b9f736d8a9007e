use crate::app::AppState;
use crate::error::Result;
use crate::recommend::RecommendationRequest;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub content_type: Option<String>,
    pub similarity_threshold: Option<f64>,
    pub exclude_viewed: Option<bool>,
    pub fresh_days: Option<i64>,
    pub include_content_details: Option<bool>,
    pub auto_page: Option<bool>,
}

pub async fn recommendations(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<RecommendationsQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let req = RecommendationRequest {
        user_id,
        page: query.page,
        limit: query.limit.unwrap_or(20).clamp(1, 100),
        content_type: query.content_type.clone(),
        similarity_threshold: query.similarity_threshold.unwrap_or(0.5),
        exclude_viewed: query.exclude_viewed.unwrap_or(true),
        fresh_days: query.fresh_days.unwrap_or(30),
        include_content_details: query.include_content_details.unwrap_or(false),
        auto_page: query.auto_page.unwrap_or(query.page.is_none()),
    };

    let result = state.recommender.recommend(req).await?;
    Ok(super::ok(result))
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub include_content_details: Option<bool>,
}

pub async fn similar(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<SimilarQuery>,
) -> Result<HttpResponse> {
    let content_id = path.into_inner();
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let include_content_details = query.include_content_details.unwrap_or(false);
    let result = state
        .recommender
        .similar_to(content_id, page, limit, include_content_details)
        .await?;
    Ok(super::ok(result))
}
