//! Content store (C2): the single relational-store abstraction behind which
//! user profiles, content vectors, the behavior log and the recommendation
//! audit log live. Everything upstream of this module talks to the
//! `ContentStore` trait, never to `sqlx` directly, so that components can be
//! exercised against `InMemoryContentStore` without a live database.

pub mod memory;
pub mod postgres;

use crate::vector::MBTIVector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryContentStore;
pub use postgres::PgContentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Storage(other.to_string()),
        }
    }
}

impl From<StoreError> for crate::error::AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => crate::error::AppError::NotFound(m),
            StoreError::Conflict(m) => crate::error::AppError::Conflict(m),
            StoreError::Storage(m) => crate::error::AppError::Storage(m),
        }
    }
}

/// Behavior actions, each with a default weight used when the caller does
/// not supply one explicitly (explicit argument wins over the table
/// default — see the Open Question this spec resolves in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Like,
    Collect,
    Comment,
    Share,
    Follow,
}

impl Action {
    pub fn default_weight(&self) -> f64 {
        match self {
            Action::View => 0.1,
            Action::Like => 0.8,
            Action::Collect => 0.9,
            Action::Comment => 0.7,
            Action::Share => 0.6,
            Action::Follow => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Like => "like",
            Action::Collect => "collect",
            Action::Comment => "comment",
            Action::Share => "share",
            Action::Follow => "follow",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "view" => Some(Action::View),
            "like" => Some(Action::Like),
            "collect" => Some(Action::Collect),
            "comment" => Some(Action::Comment),
            "share" => Some(Action::Share),
            "follow" => Some(Action::Follow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub vector: MBTIVector,
    pub type_label: Option<String>,
    pub total_behaviors_analyzed: i64,
    pub behaviors_since_last_update: i64,
    pub current_recommendation_page: i32,
    pub last_recommendation_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl UserProfile {
    pub fn new(user_id: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            vector: MBTIVector::NEUTRAL,
            type_label: None,
            total_behaviors_analyzed: 0,
            behaviors_since_last_update: 0,
            current_recommendation_page: 0,
            last_recommendation_time: None,
            last_updated: now,
            created_at: now,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentMetadata {
    pub title: Option<String>,
    pub cover_image: Option<String>,
    pub author: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    LlmGeneration,
    RandomGeneration,
}

impl ScoringMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::LlmGeneration => "llm_generation",
            ScoringMethod::RandomGeneration => "random_generation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVector {
    pub content_id: i64,
    pub vector: MBTIVector,
    pub metadata: ContentMetadata,
    pub scoring_method: ScoringMethod,
    pub scoring_failed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub id: i64,
    pub user_id: i64,
    pub content_id: i64,
    pub action: Action,
    pub weight: f64,
    pub source: String,
    pub session_id: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBehaviorEvent {
    pub user_id: i64,
    pub content_id: i64,
    pub action: Action,
    pub weight: f64,
    pub source: String,
    pub session_id: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationLog {
    pub user_id: i64,
    pub content_ids: Vec<i64>,
    pub similarity_scores: Vec<f64>,
    pub request_params: serde_json::Value,
    pub total_candidates: i64,
    pub average_similarity: f64,
    pub user_probabilities: MBTIVector,
    pub created_at: DateTime<Utc>,
}

/// The content-store query vocabulary. Every method takes whatever row
/// lock its write requires for the duration of the call; callers never
/// see lock handles.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_or_create_profile(&self, user_id: i64) -> Result<UserProfile>;

    /// Atomically replaces the profile's vector/label/confidence-derived
    /// fields, resets `behaviors_since_last_update` to 0, bumps
    /// `total_behaviors_analyzed` by the given delta, and stamps
    /// `last_updated`. Fails with `Conflict` if `expected_version` is stale.
    async fn update_profile_vector(
        &self,
        user_id: i64,
        vector: MBTIVector,
        type_label: Option<String>,
        total_behaviors_analyzed: i64,
        expected_version: i64,
    ) -> Result<()>;

    /// Short atomic counter bump that does not take the profile's long lock.
    async fn increment_behavior_counter(&self, user_id: i64) -> Result<i64>;

    async fn record_behavior(&self, event: NewBehaviorEvent) -> Result<i64>;

    async fn get_recent_behaviors(&self, user_id: i64, limit: usize) -> Result<Vec<BehaviorEvent>>;

    async fn get_behavior_history(
        &self,
        user_id: i64,
        action: Option<Action>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<BehaviorEvent>, u64)>;

    async fn get_distinct_toucher_users(&self, content_id: i64) -> Result<Vec<i64>>;

    async fn get_distinct_operated_content_ids(&self, user_id: i64) -> Result<Vec<i64>>;

    async fn get_content_vector(&self, content_id: i64) -> Result<Option<ContentVector>>;

    async fn upsert_content_vector(
        &self,
        content_id: i64,
        vector: MBTIVector,
        metadata: ContentMetadata,
        scoring_method: ScoringMethod,
        scoring_failed: bool,
    ) -> Result<()>;

    /// Newest-first candidate ids, excluding the given set. If
    /// `exclude_ids` has ≥ 10_000 entries the exclusion is applied in
    /// chunks; store implementations may instead skip exclusion and log
    /// a warning when chunking is impractical.
    async fn candidate_content_ids(&self, exclude_ids: &[i64], limit: usize) -> Result<Vec<i64>>;

    async fn get_liked_content_ids(&self, user_id: i64, since_days: i64) -> Result<Vec<i64>>;

    /// Only advances the cursor if `new_page` is greater than the current
    /// value — safe to call from racing concurrent requests.
    async fn advance_recommendation_cursor(&self, user_id: i64, new_page: i32) -> Result<()>;

    async fn record_recommendation(&self, log: RecommendationLog) -> Result<()>;

    /// Counts used by the system-info endpoint.
    async fn counts(&self) -> Result<StoreCounts>;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub user_profiles: i64,
    pub content_vectors: i64,
    pub behavior_events: i64,
}
