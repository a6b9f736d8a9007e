//! Profile updater (C5): the two re-derivation procedures that turn
//! accumulated behavior into a user's MBTI vector, and accumulated users
//! into a content item's MBTI vector.

use crate::scoring::ScoringEngine;
use crate::store::ContentStore;
use crate::vector::{blend, MBTIVector};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub const T_USER: i64 = 50;
pub const T_CONTENT: usize = 50;
pub const RECENT_BEHAVIOR_LIMIT: usize = 200;
pub const MIN_BEHAVIORS: usize = 10;

pub type Result<T> = std::result::Result<T, crate::error::AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotDue,
    Insufficient,
    NoLabeledUsers,
}

pub struct ProfileUpdater {
    store: Arc<dyn ContentStore>,
    scoring: Arc<ScoringEngine>,
}

impl ProfileUpdater {
    pub fn new(store: Arc<dyn ContentStore>, scoring: Arc<ScoringEngine>) -> Self {
        Self { store, scoring }
    }

    /// Re-derives a user's MBTI vector from their most recent behaviors.
    pub async fn update_user_from_behaviors(
        &self,
        user_id: i64,
        force: bool,
    ) -> Result<UpdateOutcome> {
        self.update_user_from_behaviors_limited(user_id, force, RECENT_BEHAVIOR_LIMIT)
            .await
    }

    /// As `update_user_from_behaviors`, but with an explicit override of
    /// how many recent behaviors to analyze (the API's
    /// `analyze_last_n_behaviors` field).
    pub async fn update_user_from_behaviors_limited(
        &self,
        user_id: i64,
        force: bool,
        analyze_last_n: usize,
    ) -> Result<UpdateOutcome> {
        let mut profile = self.store.get_or_create_profile(user_id).await?;

        // An unlabeled profile that has already crossed the threshold is
        // implicitly forced, even if the caller passed force=false.
        let forced = force || profile.type_label.is_none() && profile.behaviors_since_last_update >= T_USER;
        if !forced && profile.behaviors_since_last_update < T_USER {
            return Ok(UpdateOutcome::NotDue);
        }

        let behaviors = self.store.get_recent_behaviors(user_id, analyze_last_n).await?;
        if behaviors.len() < MIN_BEHAVIORS {
            return Ok(UpdateOutcome::Insufficient);
        }

        let mut content_weight: HashMap<i64, f64> = HashMap::new();
        for behavior in &behaviors {
            *content_weight.entry(behavior.content_id).or_insert(0.0) += behavior.weight;
        }

        let mut vectors = Vec::with_capacity(content_weight.len());
        let mut weights = Vec::with_capacity(content_weight.len());
        for (&content_id, &weight) in content_weight.iter() {
            let vector = self.scoring.ensure_scored(content_id).await.map_err(|e| {
                crate::error::AppError::UpstreamTransport(format!(
                    "failed to ensure content {content_id} scored: {e}"
                ))
            })?;
            vectors.push(vector);
            weights.push(weight);
        }

        let blended = blend(&vectors, &weights);
        let final_vector = if profile.type_label.is_some() {
            blend(&[profile.vector, blended], &[1.0, 1.0])
        } else {
            blended
        };

        let label = final_vector.type_label();
        let total_behaviors_analyzed = behaviors.len() as i64;
        let expected_version = profile.version;

        match self
            .store
            .update_profile_vector(
                user_id,
                final_vector,
                Some(label.clone()),
                total_behaviors_analyzed,
                expected_version,
            )
            .await
        {
            Ok(()) => {
                info!(user_id, label = %label, "user profile re-derived");
                Ok(UpdateOutcome::Updated)
            }
            Err(crate::store::StoreError::Conflict(_)) => {
                profile = self.store.get_or_create_profile(user_id).await?;
                self.store
                    .update_profile_vector(
                        user_id,
                        final_vector,
                        Some(label),
                        total_behaviors_analyzed,
                        profile.version,
                    )
                    .await?;
                Ok(UpdateOutcome::Updated)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-derives a content item's MBTI vector from the labeled users who
    /// have interacted with it.
    pub async fn update_content_from_users(
        &self,
        content_id: i64,
        force: bool,
    ) -> Result<UpdateOutcome> {
        let user_ids = self.store.get_distinct_toucher_users(content_id).await?;
        if !force && user_ids.len() < T_CONTENT {
            return Ok(UpdateOutcome::NotDue);
        }

        let mut user_vectors = Vec::new();
        for user_id in user_ids {
            let profile = self.store.get_or_create_profile(user_id).await?;
            if profile.type_label.is_some() {
                user_vectors.push(profile.vector);
            }
        }
        if user_vectors.is_empty() {
            return Ok(UpdateOutcome::NoLabeledUsers);
        }

        let weights = vec![1.0; user_vectors.len()];
        let users_avg = blend(&user_vectors, &weights);

        let current = self.store.get_content_vector(content_id).await?;
        let c_old = current
            .as_ref()
            .map(|c| c.vector)
            .unwrap_or(MBTIVector::NEUTRAL);
        let c_new = blend(&[c_old, users_avg], &[1.0, 1.0]);

        let (metadata, method) = match current {
            Some(c) => (c.metadata, c.scoring_method),
            None => (crate::store::ContentMetadata::default(), crate::store::ScoringMethod::RandomGeneration),
        };

        self.store
            .upsert_content_vector(content_id, c_new, metadata, method, false)
            .await?;

        info!(content_id, "content vector re-derived from labeled users");
        Ok(UpdateOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::llm::ScriptedLlmProvider;
    use crate::scoring::{ScoringEngine, ScoringMode};
    use crate::store::memory::InMemoryContentStore;
    use crate::store::{Action, NewBehaviorEvent};
    use chrono::Utc;

    fn make_updater() -> (ProfileUpdater, Arc<dyn ContentStore>) {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        let llm: Arc<dyn crate::scoring::llm::LlmProvider> =
            Arc::new(ScriptedLlmProvider::new(vec![]));
        let scoring = Arc::new(ScoringEngine::new(store.clone(), llm, ScoringMode::Random, 4000));
        (ProfileUpdater::new(store.clone(), scoring), store)
    }

    #[tokio::test]
    async fn not_due_below_threshold_without_force() {
        let (updater, _store) = make_updater();
        let outcome = updater.update_user_from_behaviors(1, false).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::NotDue);
    }

    #[tokio::test]
    async fn insufficient_behaviors_even_when_forced() {
        let (updater, store) = make_updater();
        for content_id in 0..3 {
            store
                .record_behavior(NewBehaviorEvent {
                    user_id: 1,
                    content_id,
                    action: Action::View,
                    weight: 0.1,
                    source: "test".into(),
                    session_id: None,
                    extra: None,
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }
        let outcome = updater.update_user_from_behaviors(1, true).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Insufficient);
    }

    #[tokio::test]
    async fn updates_profile_when_forced_with_enough_behaviors() {
        let (updater, store) = make_updater();
        for content_id in 0..MIN_BEHAVIORS as i64 {
            store
                .record_behavior(NewBehaviorEvent {
                    user_id: 1,
                    content_id,
                    action: Action::Like,
                    weight: 0.8,
                    source: "test".into(),
                    session_id: None,
                    extra: None,
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }
        let outcome = updater.update_user_from_behaviors(1, true).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated);
        let profile = store.get_or_create_profile(1).await.unwrap();
        assert!(profile.type_label.is_some());
    }

    #[tokio::test]
    async fn content_update_requires_labeled_users() {
        let (updater, store) = make_updater();
        store
            .record_behavior(NewBehaviorEvent {
                user_id: 99,
                content_id: 7,
                action: Action::View,
                weight: 0.1,
                source: "test".into(),
                session_id: None,
                extra: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let outcome = updater.update_content_from_users(7, true).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::NoLabeledUsers);
    }
}
