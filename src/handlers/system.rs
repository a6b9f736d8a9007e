use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::scoring::ScoringMode;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    version: &'static str,
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct SystemInfoResponse {
    counts: crate::store::StoreCounts,
    scoring_mode: &'static str,
}

pub async fn info(state: web::Data<AppState>) -> Result<HttpResponse> {
    let counts = state.store.counts().await?;
    Ok(super::ok(SystemInfoResponse {
        counts,
        scoring_mode: state.scoring.get_mode().as_str(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ScoringModeQuery {
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoringModeBody {
    pub mode: Option<String>,
}

#[derive(Serialize)]
struct ScoringModeResponse {
    mode: &'static str,
}

pub async fn get_scoring_mode(state: web::Data<AppState>) -> HttpResponse {
    super::ok(ScoringModeResponse {
        mode: state.scoring.get_mode().as_str(),
    })
}

pub async fn set_scoring_mode(
    state: web::Data<AppState>,
    query: web::Query<ScoringModeQuery>,
    body: Option<web::Json<ScoringModeBody>>,
) -> Result<HttpResponse> {
    let requested = query
        .mode
        .clone()
        .or_else(|| body.and_then(|b| b.into_inner().mode))
        .ok_or_else(|| AppError::Validation {
            field: "mode".to_string(),
            message: "mode is required, in body or query".to_string(),
        })?;

    let mode = ScoringMode::parse(&requested).ok_or_else(|| AppError::Validation {
        field: "mode".to_string(),
        message: format!("must be one of ai|random|mixed, got {requested}"),
    })?;

    state.scoring.set_mode(mode);
    Ok(super::ok(ScoringModeResponse { mode: mode.as_str() }))
}
