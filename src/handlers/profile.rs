use crate::app::AppState;
use crate::error::Result;
use crate::profile::{UpdateOutcome, RECENT_BEHAVIOR_LIMIT};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

pub async fn get_profile(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let profile = state.store.get_or_create_profile(user_id).await?;
    Ok(super::ok(profile))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileBody {
    pub force_update: Option<bool>,
    pub analyze_last_n_behaviors: Option<usize>,
}

#[derive(Serialize)]
struct UpdateProfileResponse {
    outcome: &'static str,
    profile: crate::store::UserProfile,
}

pub async fn update_profile(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<UpdateProfileBody>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let force = body.force_update.unwrap_or(false);
    let analyze_last_n = body.analyze_last_n_behaviors.unwrap_or(RECENT_BEHAVIOR_LIMIT);

    let outcome = state
        .profile_updater
        .update_user_from_behaviors_limited(user_id, force, analyze_last_n)
        .await?;

    let profile = state.store.get_or_create_profile(user_id).await?;
    let outcome_str = match outcome {
        UpdateOutcome::Updated => "updated",
        UpdateOutcome::NotDue => "not_due",
        UpdateOutcome::Insufficient => "insufficient_behaviors",
        UpdateOutcome::NoLabeledUsers => "no_labeled_users",
    };

    Ok(super::ok(UpdateProfileResponse {
        outcome: outcome_str,
        profile,
    }))
}
