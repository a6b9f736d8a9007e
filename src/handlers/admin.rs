use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::scoring::ContentInput;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
pub struct EvaluateContentBody {
    pub content: Option<String>,
    pub title: Option<String>,
}

pub async fn evaluate_content(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<EvaluateContentBody>,
) -> Result<HttpResponse> {
    let content_id = path.into_inner();
    let body = body.into_inner();
    let scored = state
        .scoring
        .score(&ContentInput {
            content_id,
            title: body.title,
            text: body.content,
        })
        .await?;
    Ok(super::ok(scored_to_json(&scored)))
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct BatchEvaluateBody {
    pub content_ids: Vec<i64>,
}

pub async fn batch_evaluate(
    state: web::Data<AppState>,
    body: web::Json<BatchEvaluateBody>,
) -> Result<HttpResponse> {
    let ids = body.into_inner().content_ids;
    if ids.len() > MAX_BATCH_SIZE {
        return Err(AppError::Validation {
            field: "content_ids".to_string(),
            message: format!("at most {MAX_BATCH_SIZE} ids per batch, got {}", ids.len()),
        });
    }

    let items = ids
        .into_iter()
        .map(|content_id| ContentInput {
            content_id,
            title: None,
            text: None,
        })
        .collect();
    let results = state.scoring.score_batch(items).await;
    let payload: Vec<_> = results.iter().map(scored_to_json).collect();
    Ok(super::ok(payload))
}

fn scored_to_json(item: &crate::scoring::ScoredItem) -> serde_json::Value {
    serde_json::json!({
        "content_id": item.content_id,
        "vector": item.vector,
        "type_label": item.vector.type_label(),
        "from_cache": item.from_cache,
        "error": item.error,
    })
}
