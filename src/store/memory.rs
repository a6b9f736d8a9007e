//! In-process content store used by component and handler tests, following
//! the same trait-plus-fake shape the rest of this codebase uses for its
//! database abstractions (compare `StubProfileDatabase`).

use super::{
    Action, BehaviorEvent, ContentMetadata, ContentStore, ContentVector, NewBehaviorEvent,
    RecommendationLog, Result, ScoringMethod, StoreCounts, StoreError, UserProfile,
};
use crate::vector::MBTIVector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    profiles: HashMap<i64, UserProfile>,
    content: HashMap<i64, ContentVector>,
    behaviors: Vec<BehaviorEvent>,
    next_behavior_id: i64,
    recommendation_logs: Vec<RecommendationLog>,
}

pub struct InMemoryContentStore {
    state: Mutex<State>,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_behavior_id: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("in-memory store mutex poisoned")
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get_or_create_profile(&self, user_id: i64) -> Result<UserProfile> {
        let mut state = self.lock();
        let profile = state
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::new(user_id))
            .clone();
        Ok(profile)
    }

    async fn update_profile_vector(
        &self,
        user_id: i64,
        vector: MBTIVector,
        type_label: Option<String>,
        total_behaviors_analyzed: i64,
        expected_version: i64,
    ) -> Result<()> {
        let mut state = self.lock();
        let profile = state
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::new(user_id));
        if profile.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "profile {user_id} version mismatch: expected {expected_version}, found {}",
                profile.version
            )));
        }
        profile.vector = vector;
        profile.type_label = type_label;
        profile.total_behaviors_analyzed = total_behaviors_analyzed;
        profile.behaviors_since_last_update = 0;
        profile.last_updated = Utc::now();
        profile.version += 1;
        Ok(())
    }

    async fn increment_behavior_counter(&self, user_id: i64) -> Result<i64> {
        let mut state = self.lock();
        let profile = state
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::new(user_id));
        profile.behaviors_since_last_update += 1;
        Ok(profile.behaviors_since_last_update)
    }

    async fn record_behavior(&self, event: NewBehaviorEvent) -> Result<i64> {
        let mut state = self.lock();
        let id = state.next_behavior_id;
        state.next_behavior_id += 1;
        state.behaviors.push(BehaviorEvent {
            id,
            user_id: event.user_id,
            content_id: event.content_id,
            action: event.action,
            weight: event.weight,
            source: event.source,
            session_id: event.session_id,
            extra: event.extra,
            timestamp: event.timestamp,
        });
        Ok(id)
    }

    async fn get_recent_behaviors(&self, user_id: i64, limit: usize) -> Result<Vec<BehaviorEvent>> {
        let state = self.lock();
        let mut events: Vec<BehaviorEvent> = state
            .behaviors
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        events.truncate(limit);
        Ok(events)
    }

    async fn get_behavior_history(
        &self,
        user_id: i64,
        action: Option<Action>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<BehaviorEvent>, u64)> {
        let state = self.lock();
        let mut events: Vec<BehaviorEvent> = state
            .behaviors
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter(|e| action.map(|a| a == e.action).unwrap_or(true))
            .filter(|e| start.map(|s| e.timestamp >= s).unwrap_or(true))
            .filter(|e| end.map(|en| e.timestamp <= en).unwrap_or(true))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        let total = events.len() as u64;
        let offset = (page.saturating_sub(1) as usize) * (limit as usize);
        let page_items = events.into_iter().skip(offset).take(limit as usize).collect();
        Ok((page_items, total))
    }

    async fn get_distinct_toucher_users(&self, content_id: i64) -> Result<Vec<i64>> {
        let state = self.lock();
        let mut users: Vec<i64> = state
            .behaviors
            .iter()
            .filter(|e| e.content_id == content_id)
            .map(|e| e.user_id)
            .collect();
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }

    async fn get_distinct_operated_content_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let state = self.lock();
        let mut ids: Vec<i64> = state
            .behaviors
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.content_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn get_content_vector(&self, content_id: i64) -> Result<Option<ContentVector>> {
        Ok(self.lock().content.get(&content_id).cloned())
    }

    async fn upsert_content_vector(
        &self,
        content_id: i64,
        vector: MBTIVector,
        metadata: ContentMetadata,
        scoring_method: ScoringMethod,
        scoring_failed: bool,
    ) -> Result<()> {
        let mut state = self.lock();
        let now = Utc::now();
        match state.content.get_mut(&content_id) {
            Some(existing) => {
                existing.vector = vector;
                existing.metadata = metadata;
                existing.scoring_method = scoring_method;
                existing.scoring_failed = scoring_failed;
                existing.updated_at = now;
                existing.version += 1;
            }
            None => {
                state.content.insert(
                    content_id,
                    ContentVector {
                        content_id,
                        vector,
                        metadata,
                        scoring_method,
                        scoring_failed,
                        created_at: now,
                        updated_at: now,
                        version: 0,
                    },
                );
            }
        }
        Ok(())
    }

    async fn candidate_content_ids(&self, exclude_ids: &[i64], limit: usize) -> Result<Vec<i64>> {
        let state = self.lock();
        let exclude: std::collections::HashSet<i64> = exclude_ids.iter().copied().collect();
        let mut items: Vec<&ContentVector> = state
            .content
            .values()
            .filter(|c| !exclude.contains(&c.content_id))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.content_id.cmp(&a.content_id)));
        Ok(items.into_iter().take(limit).map(|c| c.content_id).collect())
    }

    async fn get_liked_content_ids(&self, user_id: i64, since_days: i64) -> Result<Vec<i64>> {
        let state = self.lock();
        let cutoff = Utc::now() - chrono::Duration::days(since_days);
        let mut ids: Vec<i64> = state
            .behaviors
            .iter()
            .filter(|e| e.user_id == user_id && e.action == Action::Like && e.timestamp >= cutoff)
            .map(|e| e.content_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn advance_recommendation_cursor(&self, user_id: i64, new_page: i32) -> Result<()> {
        let mut state = self.lock();
        let profile = state
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::new(user_id));
        if new_page > profile.current_recommendation_page {
            profile.current_recommendation_page = new_page;
        }
        profile.last_recommendation_time = Some(Utc::now());
        Ok(())
    }

    async fn record_recommendation(&self, log: RecommendationLog) -> Result<()> {
        self.lock().recommendation_logs.push(log);
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let state = self.lock();
        Ok(StoreCounts {
            user_profiles: state.profiles.len() as i64,
            content_vectors: state.content.len() as i64,
            behavior_events: state.behaviors.len() as i64,
        })
    }
}
