//! End-to-end scenarios driven directly against the service layer
//! (`Recommender`, `ProfileUpdater`, `ScoringEngine`) over an
//! `InMemoryContentStore`, mirroring the component-test style used
//! elsewhere in this codebase rather than standing up a live HTTP server.

use chrono::Utc;
use mbti_recommender::profile::{ProfileUpdater, UpdateOutcome};
use mbti_recommender::recommend::{Recommender, RecommendationRequest};
use mbti_recommender::scoring::llm::ScriptedLlmProvider;
use mbti_recommender::scoring::{ScoringEngine, ScoringMode};
use mbti_recommender::store::memory::InMemoryContentStore;
use mbti_recommender::store::{Action, ContentMetadata, ContentStore, NewBehaviorEvent, ScoringMethod};
use mbti_recommender::upstream::mock::ScriptedUpstreamClient;
use mbti_recommender::upstream::UpstreamClient;
use mbti_recommender::vector::MBTIVector;
use mbti_recommender::workers::WorkQueue;
use std::sync::Arc;

fn behavior(user_id: i64, content_id: i64, action: Action) -> NewBehaviorEvent {
    NewBehaviorEvent {
        user_id,
        content_id,
        action,
        weight: action.default_weight(),
        source: "test".to_string(),
        session_id: None,
        extra: None,
        timestamp: Utc::now(),
    }
}

// Scenario A: cold start for a never-seen user returns up to `limit`
// store candidates with default similarity 0.5 and no cursor advance.
#[tokio::test]
async fn scenario_a_cold_start() {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    for id in 1..=5 {
        store
            .upsert_content_vector(id, MBTIVector::NEUTRAL, ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
            .await
            .unwrap();
    }
    let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstreamClient::new());
    let recommender = Recommender::new(store.clone(), upstream, WorkQueue::disconnected_for_test(16));

    let result = recommender
        .recommend(RecommendationRequest {
            user_id: 42,
            page: None,
            limit: 3,
            content_type: None,
            similarity_threshold: 0.5,
            exclude_viewed: false,
            fresh_days: 30,
            include_content_details: false,
            auto_page: false,
        })
        .await
        .unwrap();

    assert!(result.items.len() <= 3);
    assert!(result.items.iter().all(|i| i.similarity == 0.5));

    let profile = store.get_or_create_profile(42).await.unwrap();
    assert!(profile.type_label.is_none());
    assert_eq!(profile.current_recommendation_page, 0);
}

// Scenario B: the 50th behavior for a user crosses T_user and a forced
// re-derivation yields a confidently ESTJ-leaning profile.
#[tokio::test]
async fn scenario_b_counter_triggered_update() {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    let llm: Arc<dyn mbti_recommender::scoring::llm::LlmProvider> = Arc::new(ScriptedLlmProvider::new(vec![]));
    let scoring = Arc::new(ScoringEngine::new(store.clone(), llm, ScoringMode::Random, 4000));
    let updater = ProfileUpdater::new(store.clone(), scoring);

    let biased = MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4);
    for content_id in 0..50 {
        store
            .upsert_content_vector(content_id, biased, ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
            .await
            .unwrap();
        store.record_behavior(behavior(7, content_id, Action::Like)).await.unwrap();
        store.increment_behavior_counter(7).await.unwrap();
    }

    let outcome = updater.update_user_from_behaviors(7, true).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Updated);

    let profile = store.get_or_create_profile(7).await.unwrap();
    assert_eq!(profile.type_label.as_deref(), Some("ESTJ"));
    assert!(profile.vector.e >= 0.6);
    assert!(profile.vector.s >= 0.6);
    assert!(profile.vector.t >= 0.6);
    assert!(profile.vector.j >= 0.6);
    assert_eq!(profile.behaviors_since_last_update, 0);
}

// Scenario C: random mode is idempotent per content id; AI mode persists
// exactly what the LLM returned, once normalized.
#[tokio::test]
async fn scenario_c_scoring_mode_switch() {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    let llm: Arc<dyn mbti_recommender::scoring::llm::LlmProvider> = Arc::new(ScriptedLlmProvider::new(vec![
        r#"{"E":0.9,"I":0.1,"S":0.5,"N":0.5,"T":0.4,"F":0.6,"J":0.7,"P":0.3}"#.to_string(),
    ]));
    let engine = ScoringEngine::new(store.clone(), llm, ScoringMode::Random, 4000);

    let first = engine.ensure_scored(9001).await.unwrap();
    for axis in first.components() {
        assert!((0.2..=0.8).contains(&axis));
    }
    let second = engine.ensure_scored(9001).await.unwrap();
    assert_eq!(first.components(), second.components());

    engine.set_mode(ScoringMode::Ai);
    let ai_vector = engine.ensure_scored(9002).await.unwrap();
    let expected = MBTIVector::new(0.9, 0.1, 0.5, 0.5, 0.4, 0.6, 0.7, 0.3).normalize();
    for (a, b) in ai_vector.components().iter().zip(expected.components()) {
        assert!((a - b).abs() < 1e-9);
    }
}

// Scenario D: 50 distinct INTJ-labeled users push a neutral content
// item's vector toward I, N, T, J.
#[tokio::test]
async fn scenario_d_threshold_driven_content_update() {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    let llm: Arc<dyn mbti_recommender::scoring::llm::LlmProvider> = Arc::new(ScriptedLlmProvider::new(vec![]));
    let scoring = Arc::new(ScoringEngine::new(store.clone(), llm, ScoringMode::Random, 4000));
    let updater = ProfileUpdater::new(store.clone(), scoring);

    store
        .upsert_content_vector(5000, MBTIVector::NEUTRAL, ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
        .await
        .unwrap();

    let intj = MBTIVector::new(0.1, 0.9, 0.2, 0.8, 0.8, 0.2, 0.85, 0.15);
    for user_id in 0..50 {
        store
            .update_profile_vector(user_id, intj, Some("INTJ".to_string()), 50, 0)
            .await
            .unwrap();
        store.record_behavior(behavior(user_id, 5000, Action::Like)).await.unwrap();
    }

    let outcome = updater.update_content_from_users(5000, false).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Updated);

    let content = store.get_content_vector(5000).await.unwrap().unwrap();
    assert!(content.vector.i - content.vector.e >= 0.1);
    assert!(content.vector.n - content.vector.s >= 0.1);
    assert!(content.vector.t - content.vector.f >= 0.1);
    assert!(content.vector.j - content.vector.p >= 0.1);
}

// Scenario E: two consecutive pages over 120 candidates don't overlap,
// and are ordered so the second page trails the first in similarity.
#[tokio::test]
async fn scenario_e_pagination_consistency() {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    store
        .update_profile_vector(1, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), Some("ESTJ".to_string()), 50, 0)
        .await
        .unwrap();

    for id in 0..120i64 {
        // Vary similarity deterministically by id so ordering is well-defined.
        let skew = (id % 10) as f64 / 10.0;
        let vector = MBTIVector::new(skew, 1.0 - skew, skew, 1.0 - skew, skew, 1.0 - skew, skew, 1.0 - skew);
        store
            .upsert_content_vector(id, vector, ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
            .await
            .unwrap();
    }

    let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstreamClient::new());
    let recommender = Recommender::new(store, upstream, WorkQueue::disconnected_for_test(16));

    let page1 = recommender
        .recommend(RecommendationRequest {
            user_id: 1,
            page: Some(1),
            limit: 20,
            content_type: None,
            similarity_threshold: 0.0,
            exclude_viewed: false,
            fresh_days: 30,
            include_content_details: false,
            auto_page: false,
        })
        .await
        .unwrap();
    let page2 = recommender
        .recommend(RecommendationRequest {
            user_id: 1,
            page: Some(2),
            limit: 20,
            content_type: None,
            similarity_threshold: 0.0,
            exclude_viewed: false,
            fresh_days: 30,
            include_content_details: false,
            auto_page: false,
        })
        .await
        .unwrap();

    let page1_ids: std::collections::HashSet<_> = page1.items.iter().map(|i| i.content_id).collect();
    let page2_ids: std::collections::HashSet<_> = page2.items.iter().map(|i| i.content_id).collect();
    assert!(page1_ids.is_disjoint(&page2_ids));

    let page1_min = page1.items.iter().map(|i| i.similarity).fold(f64::MAX, f64::min);
    let page2_max = page2.items.iter().map(|i| i.similarity).fold(f64::MIN, f64::max);
    assert!(page2_max <= page1_min + 1e-9);
}

// Scenario F: with scored candidates already in the store, an upstream
// that fails every call never prevents the happy-path ranked response —
// it just degrades the content-detail join.
#[tokio::test]
async fn scenario_f_upstream_degraded_does_not_block_ranked_results() {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    store
        .update_profile_vector(1, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), Some("ESTJ".to_string()), 50, 0)
        .await
        .unwrap();
    store
        .upsert_content_vector(10, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
        .await
        .unwrap();

    let upstream = ScriptedUpstreamClient::new();
    upstream.fail_next_listing();
    upstream.fail_next_batch();
    let upstream: Arc<dyn UpstreamClient> = Arc::new(upstream);
    let recommender = Recommender::new(store, upstream, WorkQueue::disconnected_for_test(16));

    let result = recommender
        .recommend(RecommendationRequest {
            user_id: 1,
            page: None,
            limit: 10,
            content_type: None,
            similarity_threshold: 0.5,
            exclude_viewed: false,
            fresh_days: 30,
            include_content_details: true,
            auto_page: false,
        })
        .await
        .unwrap();

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].source, "ranked");
    assert!(!result.content_details_attached);
    assert!(result.items[0].content.is_none());
}
