//! Recommender (C6): candidate acquisition, cosine ranking against the
//! user's reduced 4-axis projection, pagination, and upstream fallback
//! when the local store has nothing to offer.

use crate::store::ContentStore;
use crate::upstream::{ArticleDetail, ListArticlesParams, UpstreamClient};
use crate::vector::cosine;
use crate::workers::{WorkItem, WorkQueue};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const MAX_CANDIDATES: usize = 1_000;
const SIMILAR_ITEM_THRESHOLD: f64 = 0.3;

pub type Result<T> = std::result::Result<T, crate::error::AppError>;

#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub user_id: i64,
    pub page: Option<u32>,
    pub limit: u32,
    pub content_type: Option<String>,
    pub similarity_threshold: f64,
    pub exclude_viewed: bool,
    pub fresh_days: i64,
    pub include_content_details: bool,
    pub auto_page: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedItem {
    pub content_id: i64,
    pub similarity: f64,
    pub source: &'static str,
    pub content: Option<ArticleDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationResult {
    pub items: Vec<RecommendedItem>,
    pub page: u32,
    pub total_candidates: usize,
    pub threshold_relaxed: bool,
    pub content_details_attached: bool,
}

pub struct Recommender {
    store: Arc<dyn ContentStore>,
    upstream: Arc<dyn UpstreamClient>,
    work_queue: WorkQueue,
}

impl Recommender {
    pub fn new(store: Arc<dyn ContentStore>, upstream: Arc<dyn UpstreamClient>, work_queue: WorkQueue) -> Self {
        Self {
            store,
            upstream,
            work_queue,
        }
    }

    pub async fn recommend(&self, req: RecommendationRequest) -> Result<RecommendationResult> {
        let profile = self.store.get_or_create_profile(req.user_id).await?;

        if profile.type_label.is_none() {
            return self.cold_start(&req).await;
        }

        let page = self.resolve_page(&req, profile.current_recommendation_page);
        let offset = (page.saturating_sub(1) as usize) * (req.limit as usize);

        let mut exclude_ids = Vec::new();
        if req.exclude_viewed {
            exclude_ids = self
                .store
                .get_liked_content_ids(req.user_id, req.fresh_days)
                .await?;
        }

        let candidate_ids = self
            .store
            .candidate_content_ids(&exclude_ids, MAX_CANDIDATES)
            .await?;

        if candidate_ids.is_empty() {
            return self.upstream_direct(&req).await;
        }

        let user_axes = profile.vector.reduced_axes();

        let mut scored: Vec<(i64, f64, chrono::DateTime<chrono::Utc>)> =
            Vec::with_capacity(candidate_ids.len());
        for content_id in candidate_ids {
            match self.store.get_content_vector(content_id).await? {
                Some(content) => {
                    let similarity = cosine(&user_axes, &content.vector.reduced_axes());
                    scored.push((content_id, similarity, content.created_at));
                }
                None => {
                    self.work_queue.submit(WorkItem::ScoreContent(content_id));
                    scored.push((content_id, 0.5, chrono::Utc::now()));
                }
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.cmp(&a.2))
        });

        let total_candidates = scored.len();
        let above_threshold: Vec<_> = scored
            .iter()
            .filter(|(_, sim, _)| *sim >= req.similarity_threshold)
            .collect();

        let (selected, threshold_relaxed) = if above_threshold.len() >= req.limit as usize {
            (above_threshold, false)
        } else {
            (scored.iter().collect(), true)
        };

        let page_items: Vec<RecommendedItem> = selected
            .into_iter()
            .skip(offset)
            .take(req.limit as usize)
            .map(|(content_id, similarity, _)| RecommendedItem {
                content_id: *content_id,
                similarity: *similarity,
                source: "ranked",
                content: None,
            })
            .collect();

        if !page_items.is_empty() {
            self.store.advance_recommendation_cursor(req.user_id, page as i32).await?;
            self.store
                .record_recommendation(crate::store::RecommendationLog {
                    user_id: req.user_id,
                    content_ids: page_items.iter().map(|i| i.content_id).collect(),
                    similarity_scores: page_items.iter().map(|i| i.similarity).collect(),
                    request_params: serde_json::json!({
                        "page": page,
                        "limit": req.limit,
                        "similarity_threshold": req.similarity_threshold,
                        "exclude_viewed": req.exclude_viewed,
                    }),
                    total_candidates: total_candidates as i64,
                    average_similarity: average(&page_items),
                    user_probabilities: profile.vector,
                    created_at: chrono::Utc::now(),
                })
                .await?;
        }

        let (page_items, content_details_attached) =
            self.attach_content_details(page_items, req.include_content_details).await;

        Ok(RecommendationResult {
            items: page_items,
            page,
            total_candidates,
            threshold_relaxed,
            content_details_attached,
        })
    }

    /// Joins content details onto `items` via a single batched upstream
    /// call when `include` is true. An upstream failure never fails the
    /// response — it leaves `content` unset on every item and reports
    /// `content_details_attached = false`. Ids the upstream doesn't return
    /// a detail for get `content = None` rather than being dropped.
    async fn attach_content_details(
        &self,
        mut items: Vec<RecommendedItem>,
        include: bool,
    ) -> (Vec<RecommendedItem>, bool) {
        if !include || items.is_empty() {
            return (items, false);
        }

        let ids: Vec<i64> = items.iter().map(|i| i.content_id).collect();
        match self.upstream.get_articles_batch(&ids).await {
            Ok((found, _missing_ids)) => {
                let mut by_id: HashMap<i64, ArticleDetail> =
                    found.into_iter().map(|d| (d.content_id, d)).collect();
                for item in &mut items {
                    item.content = by_id.remove(&item.content_id);
                }
                (items, true)
            }
            Err(e) => {
                warn!(error = %e, "content detail join failed, returning ranked results without content");
                (items, false)
            }
        }
    }

    /// The "query vector" is the content's own vector rather than a
    /// user's; excludes the item itself and requires a 0.3 similarity floor.
    pub async fn similar_to(
        &self,
        content_id: i64,
        page: u32,
        limit: u32,
        include_content_details: bool,
    ) -> Result<RecommendationResult> {
        let query = self
            .store
            .get_content_vector(content_id)
            .await?
            .ok_or_else(|| crate::error::AppError::NotFound(format!("content {content_id} not found")))?;
        let query_axes = query.vector.reduced_axes();

        let candidates = self
            .store
            .candidate_content_ids(&[content_id], MAX_CANDIDATES)
            .await?;

        let mut scored = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(content) = self.store.get_content_vector(id).await? {
                let similarity = cosine(&query_axes, &content.vector.reduced_axes());
                if similarity >= SIMILAR_ITEM_THRESHOLD {
                    scored.push((id, similarity));
                }
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let offset = (page.saturating_sub(1) as usize) * (limit as usize);
        let total_candidates = scored.len();
        let items = scored
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|(content_id, similarity)| RecommendedItem {
                content_id,
                similarity,
                source: "similar",
                content: None,
            })
            .collect();

        let (items, content_details_attached) =
            self.attach_content_details(items, include_content_details).await;

        Ok(RecommendationResult {
            items,
            page,
            total_candidates,
            threshold_relaxed: false,
            content_details_attached,
        })
    }

    fn resolve_page(&self, req: &RecommendationRequest, current_page: i32) -> u32 {
        match req.page {
            Some(p) => p.max(1),
            None if req.auto_page => (current_page as u32) + 1,
            None => 1,
        }
    }

    async fn cold_start(&self, req: &RecommendationRequest) -> Result<RecommendationResult> {
        let candidate_ids = self.store.candidate_content_ids(&[], req.limit as usize).await?;
        let items = candidate_ids
            .into_iter()
            .map(|content_id| RecommendedItem {
                content_id,
                similarity: 0.5,
                source: "cold_start",
                content: None,
            })
            .collect();
        let (items, content_details_attached) =
            self.attach_content_details(items, req.include_content_details).await;
        Ok(RecommendationResult {
            items,
            page: 1,
            total_candidates: 0,
            threshold_relaxed: false,
            content_details_attached,
        })
    }

    async fn upstream_direct(&self, req: &RecommendationRequest) -> Result<RecommendationResult> {
        let articles = self
            .upstream
            .list_articles(ListArticlesParams {
                page: req.page.unwrap_or(1),
                size: req.limit,
                content_type: req.content_type.clone(),
            })
            .await?;
        let items = articles
            .into_iter()
            .filter(|a| a.is_recommendable())
            .map(|a| RecommendedItem {
                content_id: a.content_id,
                similarity: 0.5,
                source: "upstream_direct",
                content: None,
            })
            .collect();
        let (items, content_details_attached) =
            self.attach_content_details(items, req.include_content_details).await;
        Ok(RecommendationResult {
            items,
            page: req.page.unwrap_or(1),
            total_candidates: 0,
            threshold_relaxed: false,
            content_details_attached,
        })
    }
}

fn average(items: &[RecommendedItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    items.iter().map(|i| i.similarity).sum::<f64>() / items.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryContentStore;
    use crate::store::{Action, ContentMetadata, NewBehaviorEvent, ScoringMethod};
    use crate::upstream::mock::ScriptedUpstreamClient;
    use crate::vector::MBTIVector;
    use chrono::Utc;

    fn idle_queue() -> WorkQueue {
        WorkQueue::disconnected_for_test(16)
    }

    #[tokio::test]
    async fn cold_start_when_user_has_no_type_label() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        store
            .upsert_content_vector(1, MBTIVector::NEUTRAL, ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
            .await
            .unwrap();
        let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstreamClient::new());
        let recommender = Recommender::new(store, upstream, idle_queue());

        let result = recommender
            .recommend(RecommendationRequest {
                user_id: 1,
                page: None,
                limit: 10,
                content_type: None,
                similarity_threshold: 0.5,
                exclude_viewed: false,
                fresh_days: 30,
                include_content_details: false,
                auto_page: false,
            })
            .await
            .unwrap();
        assert_eq!(result.items[0].source, "cold_start");
    }

    #[tokio::test]
    async fn upstream_direct_when_store_has_no_candidates() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        store
            .update_profile_vector(1, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), Some("ESTJ".into()), 50, 0)
            .await
            .unwrap();
        let upstream: Arc<dyn UpstreamClient> = Arc::new(
            ScriptedUpstreamClient::new().with_articles(vec![crate::upstream::ArticleListItem {
                content_id: 42,
                title: Some("fallback".into()),
                cover_image: Some("cover.jpg".into()),
                author: None,
                publish_time: None,
                content_type: None,
                summary: Some("summary".into()),
                state: "OnShelf".into(),
                audit_state: "Pass".into(),
            }]),
        );
        let recommender = Recommender::new(store, upstream, idle_queue());

        let result = recommender
            .recommend(RecommendationRequest {
                user_id: 1,
                page: None,
                limit: 10,
                content_type: None,
                similarity_threshold: 0.5,
                exclude_viewed: false,
                fresh_days: 30,
                include_content_details: false,
                auto_page: false,
            })
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].source, "upstream_direct");
    }

    #[tokio::test]
    async fn degraded_mode_relaxes_threshold_when_too_few_survive() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        store
            .update_profile_vector(1, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), Some("ESTJ".into()), 50, 0)
            .await
            .unwrap();
        // Two candidates, both dissimilar to the user.
        for id in [10, 11] {
            store
                .upsert_content_vector(id, MBTIVector::new(0.1, 0.9, 0.2, 0.8, 0.3, 0.7, 0.4, 0.6), ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
                .await
                .unwrap();
        }

        let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstreamClient::new());
        let recommender = Recommender::new(store, upstream, idle_queue());

        let result = recommender
            .recommend(RecommendationRequest {
                user_id: 1,
                page: None,
                limit: 5,
                content_type: None,
                similarity_threshold: 0.9,
                exclude_viewed: false,
                fresh_days: 30,
                include_content_details: false,
                auto_page: false,
            })
            .await
            .unwrap();
        assert!(result.threshold_relaxed);
        assert_eq!(result.items.len(), 2);
    }

    #[tokio::test]
    async fn exclude_viewed_drops_recently_liked_content() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        store
            .update_profile_vector(1, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), Some("ESTJ".into()), 50, 0)
            .await
            .unwrap();
        for id in [10, 11] {
            store
                .upsert_content_vector(id, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
                .await
                .unwrap();
        }
        store
            .record_behavior(NewBehaviorEvent {
                user_id: 1,
                content_id: 10,
                action: Action::Like,
                weight: Action::Like.default_weight(),
                source: "test".to_string(),
                session_id: None,
                extra: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstreamClient::new());
        let recommender = Recommender::new(store, upstream, idle_queue());

        let result = recommender
            .recommend(RecommendationRequest {
                user_id: 1,
                page: None,
                limit: 5,
                content_type: None,
                similarity_threshold: 0.5,
                exclude_viewed: true,
                fresh_days: 30,
                include_content_details: false,
                auto_page: false,
            })
            .await
            .unwrap();
        assert!(result.items.iter().all(|i| i.content_id != 10));
        assert!(result.items.iter().any(|i| i.content_id == 11));
    }

    #[tokio::test]
    async fn content_details_attach_on_request_and_degrade_gracefully_on_upstream_failure() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        store
            .update_profile_vector(1, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), Some("ESTJ".into()), 50, 0)
            .await
            .unwrap();
        store
            .upsert_content_vector(10, MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4), ContentMetadata::default(), ScoringMethod::RandomGeneration, false)
            .await
            .unwrap();
        let upstream = Arc::new(ScriptedUpstreamClient::new().with_detail(
            10,
            crate::upstream::ArticleDetail {
                content_id: 10,
                title: Some("title".into()),
                body: Some("body".into()),
                cover_image: Some("cover.jpg".into()),
                author: None,
                publish_time: None,
                content_type: None,
                state: "OnShelf".into(),
                audit_state: "Pass".into(),
            },
        ));
        let recommender = Recommender::new(store.clone(), upstream.clone(), idle_queue());

        let req = RecommendationRequest {
            user_id: 1,
            page: None,
            limit: 5,
            content_type: None,
            similarity_threshold: 0.5,
            exclude_viewed: false,
            fresh_days: 30,
            include_content_details: true,
            auto_page: false,
        };

        let result = recommender.recommend(req.clone()).await.unwrap();
        assert!(result.content_details_attached);
        assert_eq!(result.items[0].content.as_ref().unwrap().content_id, 10);

        upstream.fail_next_batch();
        let recommender = Recommender::new(store, upstream, idle_queue());
        let result = recommender.recommend(req).await.unwrap();
        assert!(!result.content_details_attached);
        assert!(result.items[0].content.is_none());
    }
}
