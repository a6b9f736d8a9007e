use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::profile::T_USER;
use crate::store::{Action, NewBehaviorEvent};
use crate::workers::WorkItem;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RecordBehaviorBody {
    pub user_id: i64,
    pub content_id: i64,
    pub action: String,
    pub source: Option<String>,
    pub session_id: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub timestamp: Option<DateTime<Utc>>,
    pub weight: Option<f64>,
}

#[derive(Serialize)]
struct RecordBehaviorResponse {
    behavior_id: i64,
    behaviors_since_last_update: i64,
    next_threshold_at: i64,
}

pub async fn record(
    state: web::Data<AppState>,
    body: web::Json<RecordBehaviorBody>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let action = Action::parse(&body.action).ok_or_else(|| AppError::Validation {
        field: "action".to_string(),
        message: format!("must be one of view|like|collect|comment|share|follow, got {}", body.action),
    })?;

    let weight = body.weight.unwrap_or_else(|| action.default_weight());
    let event = NewBehaviorEvent {
        user_id: body.user_id,
        content_id: body.content_id,
        action,
        weight,
        source: body.source.unwrap_or_else(|| "api".to_string()),
        session_id: body.session_id,
        extra: body.extra,
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
    };

    let behavior_id = state.store.record_behavior(event).await?;
    let new_count = state.store.increment_behavior_counter(body.user_id).await?;

    if new_count % T_USER == 0 {
        state.work_queue.submit(WorkItem::UpdateUser(body.user_id));
    }
    state.work_queue.submit(WorkItem::ScoreContent(body.content_id));
    state.work_queue.submit(WorkItem::UpdateContent(body.content_id));

    let next_threshold_at = ((new_count / T_USER) + 1) * T_USER;

    Ok(super::ok(RecordBehaviorResponse {
        behavior_id,
        behaviors_since_last_update: new_count,
        next_threshold_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub action: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
struct HistoryResponse {
    items: Vec<crate::store::BehaviorEvent>,
    total: u64,
    page: u32,
    limit: u32,
}

pub async fn history(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let action = match &query.action {
        Some(s) => Some(Action::parse(s).ok_or_else(|| AppError::Validation {
            field: "action".to_string(),
            message: format!("unrecognized action filter: {s}"),
        })?),
        None => None,
    };

    let (items, total) = state
        .store
        .get_behavior_history(user_id, action, query.start_date, query.end_date, page, limit)
        .await?;

    Ok(super::ok(HistoryResponse {
        items,
        total,
        page,
        limit,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

#[derive(Serialize)]
struct StatsResponse {
    total_behaviors: usize,
    action_counts: std::collections::HashMap<&'static str, usize>,
    activity_level: &'static str,
}

pub async fn stats(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let days = query.days.unwrap_or(30);
    if !(1..=365).contains(&days) {
        return Err(AppError::Validation {
            field: "days".to_string(),
            message: "must be between 1 and 365".to_string(),
        });
    }

    let end = Utc::now();
    let start = end - chrono::Duration::days(days);
    let (items, total) = state
        .store
        .get_behavior_history(user_id, None, Some(start), Some(end), 1, u32::MAX)
        .await?;
    let _ = total;

    let mut action_counts = std::collections::HashMap::new();
    for event in &items {
        *action_counts.entry(event.action.as_str()).or_insert(0usize) += 1;
    }

    let per_day = items.len() as f64 / days as f64;
    let activity_level = if per_day >= 5.0 {
        "high"
    } else if per_day >= 2.0 {
        "medium"
    } else if per_day >= 0.5 {
        "low"
    } else {
        "inactive"
    };

    Ok(super::ok(StatsResponse {
        total_behaviors: items.len(),
        action_counts,
        activity_level,
    }))
}
