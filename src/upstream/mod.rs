//! Upstream content platform client (C3): the encrypted RPC surface this
//! service calls for article listings and detail lookups, plus the
//! recommendation-serving fallback path when the local store has no
//! candidates of its own.

pub mod client;
pub mod crypto;
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::SohuUpstreamClient;
pub use mock::ScriptedUpstreamClient;

pub type Result<T> = std::result::Result<T, UpstreamError>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned unauthenticated response")]
    Unauthenticated,
    #[error("upstream response could not be parsed: {0}")]
    Parse(String),
}

impl From<UpstreamError> for crate::error::AppError {
    fn from(err: UpstreamError) -> Self {
        crate::error::AppError::UpstreamTransport(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleListItem {
    pub content_id: i64,
    pub title: Option<String>,
    pub cover_image: Option<String>,
    pub author: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "auditState", alias = "audit_state", default)]
    pub audit_state: String,
}

impl ArticleListItem {
    /// Non-empty title, a cover image, `state = "OnShelf"`, `audit_state =
    /// "Pass"`, and at least a summary or the title+cover pair.
    pub fn is_recommendable(&self) -> bool {
        is_recommendable(&self.title, &self.cover_image, &self.summary, &self.state, &self.audit_state)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleDetail {
    pub content_id: i64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub cover_image: Option<String>,
    pub author: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "auditState", alias = "audit_state", default)]
    pub audit_state: String,
}

impl ArticleDetail {
    /// Non-empty title, a cover image, `state = "OnShelf"`, `audit_state =
    /// "Pass"`, and at least one of {non-empty body, title+cover}.
    pub fn is_recommendable(&self) -> bool {
        is_recommendable(&self.title, &self.cover_image, &self.body, &self.state, &self.audit_state)
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

fn is_recommendable(
    title: &Option<String>,
    cover_image: &Option<String>,
    body: &Option<String>,
    state: &str,
    audit_state: &str,
) -> bool {
    let has_title = non_empty(title);
    let has_cover = non_empty(cover_image);
    has_title
        && has_cover
        && state == "OnShelf"
        && audit_state == "Pass"
        && (non_empty(body) || has_cover || (has_title && has_cover))
}

#[derive(Debug, Clone, Default)]
pub struct ListArticlesParams {
    pub page: u32,
    pub size: u32,
    pub content_type: Option<String>,
}

/// The content-platform surface the recommender and admin handlers depend
/// on. Implementations own their own retry/backoff and authentication
/// state; callers never see a handshake or a raw HTTP response.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn list_articles(&self, params: ListArticlesParams) -> Result<Vec<ArticleListItem>>;

    async fn get_article(&self, content_id: i64) -> Result<Option<ArticleDetail>>;

    /// Batch detail lookup; ids with no matching detail are reported in
    /// `missing_ids` rather than causing the whole call to fail.
    async fn get_articles_batch(&self, content_ids: &[i64]) -> Result<(Vec<ArticleDetail>, Vec<i64>)>;
}
