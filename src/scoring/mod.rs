//! Scoring engine (C4): turns a content item into an `MBTIVector`, either
//! via a deterministic random draw or via an LLM completion, with
//! process-wide mode selection and bounded-concurrency batching.

pub mod llm;
pub mod parse;
pub mod random;

use crate::store::{ContentMetadata, ContentStore, ScoringMethod};
use crate::vector::MBTIVector;
use llm::LlmProvider;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub type Result<T> = std::result::Result<T, ScoringError>;

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("LLM transport error: {0}")]
    LlmTransport(String),
    #[error("LLM response could not be parsed")]
    LlmParse,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<llm::LlmError> for ScoringError {
    fn from(err: llm::LlmError) -> Self {
        match err {
            llm::LlmError::Transport(m) => ScoringError::LlmTransport(m),
        }
    }
}

impl From<crate::store::StoreError> for ScoringError {
    fn from(err: crate::store::StoreError) -> Self {
        ScoringError::Storage(err.to_string())
    }
}

impl From<ScoringError> for crate::error::AppError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::Storage(m) => crate::error::AppError::Storage(m),
            other => crate::error::AppError::UpstreamTransport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    Ai,
    Random,
    Mixed,
}

impl ScoringMode {
    fn to_u8(self) -> u8 {
        match self {
            ScoringMode::Ai => 0,
            ScoringMode::Random => 1,
            ScoringMode::Mixed => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ScoringMode::Ai,
            2 => ScoringMode::Mixed,
            _ => ScoringMode::Random,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ai" => Some(ScoringMode::Ai),
            "random" => Some(ScoringMode::Random),
            "mixed" => Some(ScoringMode::Mixed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMode::Ai => "ai",
            ScoringMode::Random => "random",
            ScoringMode::Mixed => "mixed",
        }
    }
}

pub struct ScoredItem {
    pub content_id: i64,
    pub vector: MBTIVector,
    pub from_cache: bool,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ContentInput {
    pub content_id: i64,
    pub title: Option<String>,
    pub text: Option<String>,
}

const SUB_BATCH_SIZE: usize = 10;
const MAX_CONCURRENCY: usize = 3;
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(1_000);

pub struct ScoringEngine {
    store: Arc<dyn ContentStore>,
    llm: Arc<dyn LlmProvider>,
    mode: AtomicU8,
    max_tokens: u32,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn ContentStore>, llm: Arc<dyn LlmProvider>, default_mode: ScoringMode, max_tokens: u32) -> Self {
        Self {
            store,
            llm,
            mode: AtomicU8::new(default_mode.to_u8()),
            max_tokens,
        }
    }

    pub fn get_mode(&self) -> ScoringMode {
        ScoringMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: ScoringMode) {
        self.mode.store(mode.to_u8(), Ordering::Relaxed);
    }

    /// Idempotent: returns the existing vector if one already exists,
    /// otherwise scores and persists it.
    pub async fn ensure_scored(&self, content_id: i64) -> Result<MBTIVector> {
        if let Some(existing) = self.store.get_content_vector(content_id).await? {
            return Ok(existing.vector);
        }
        let item = ContentInput {
            content_id,
            title: None,
            text: None,
        };
        let scored = self.score(&item).await?;
        Ok(scored.vector)
    }

    /// Scores a single item, routing by the current mode, and persists
    /// the result. Re-reads the store immediately before writing so a
    /// concurrent scorer for the same id does not get overwritten.
    pub async fn score(&self, item: &ContentInput) -> Result<ScoredItem> {
        if let Some(existing) = self.store.get_content_vector(item.content_id).await? {
            return Ok(ScoredItem {
                content_id: item.content_id,
                vector: existing.vector,
                from_cache: true,
                error: None,
            });
        }

        let use_llm = match self.get_mode() {
            ScoringMode::Random => false,
            ScoringMode::Ai => true,
            ScoringMode::Mixed => rand::thread_rng().gen_bool(0.5),
        };

        self.score_with_route(item, use_llm).await
    }

    /// Scores and persists `item` via the given route, re-checking the
    /// store immediately before writing so a concurrent scorer for the
    /// same id does not get overwritten.
    async fn score_with_route(&self, item: &ContentInput, use_llm: bool) -> Result<ScoredItem> {
        let (vector, method, scoring_failed, error) = if use_llm {
            match self.score_with_llm(item).await {
                Ok(v) => (v, ScoringMethod::LlmGeneration, false, None),
                Err(e) => (
                    MBTIVector::NEUTRAL,
                    ScoringMethod::LlmGeneration,
                    true,
                    Some(e.to_string()),
                ),
            }
        } else {
            (random::generate(item.content_id), ScoringMethod::RandomGeneration, false, None)
        };

        if let Some(existing) = self.store.get_content_vector(item.content_id).await? {
            return Ok(ScoredItem {
                content_id: item.content_id,
                vector: existing.vector,
                from_cache: true,
                error: None,
            });
        }

        self.store
            .upsert_content_vector(
                item.content_id,
                vector,
                ContentMetadata {
                    title: item.title.clone(),
                    ..Default::default()
                },
                method,
                scoring_failed,
            )
            .await?;

        Ok(ScoredItem {
            content_id: item.content_id,
            vector,
            from_cache: false,
            error,
        })
    }

    async fn score_with_llm(&self, item: &ContentInput) -> Result<MBTIVector> {
        let prompt = build_single_prompt(item);
        let completion = self.llm.complete(&prompt, self.max_tokens).await?;
        parse::parse_single(&completion).ok_or(ScoringError::LlmParse)
    }

    /// Scores a batch of items. Items that would be randomly scored are
    /// handled individually (cheap, no LLM involved); items routed to the
    /// LLM are grouped into sub-batches of at most `SUB_BATCH_SIZE` and
    /// each sub-batch is sent as a single combined-prompt LLM call, with
    /// at most `MAX_CONCURRENCY` sub-batch calls in flight at a time and a
    /// pause between groups of sub-batches. Cache hits never touch either
    /// budget.
    pub async fn score_batch(&self, items: Vec<ContentInput>) -> Vec<ScoredItem> {
        let mut results = Vec::with_capacity(items.len());
        let mut ai_pending = Vec::new();
        let mut random_pending = Vec::new();

        for item in items {
            match self.store.get_content_vector(item.content_id).await {
                Ok(Some(existing)) => results.push(ScoredItem {
                    content_id: item.content_id,
                    vector: existing.vector,
                    from_cache: true,
                    error: None,
                }),
                _ => match self.get_mode() {
                    ScoringMode::Random => random_pending.push(item),
                    ScoringMode::Ai => ai_pending.push(item),
                    ScoringMode::Mixed => {
                        if rand::thread_rng().gen_bool(0.5) {
                            ai_pending.push(item);
                        } else {
                            random_pending.push(item);
                        }
                    }
                },
            }
        }

        for item in random_pending {
            let content_id = item.content_id;
            match self.score_with_route(&item, false).await {
                Ok(scored) => results.push(scored),
                Err(e) => {
                    warn!(error = %e, content_id, "random scoring failed in batch");
                    results.push(ScoredItem {
                        content_id,
                        vector: MBTIVector::NEUTRAL,
                        from_cache: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let sub_batches: Vec<Vec<ContentInput>> =
            ai_pending.chunks(SUB_BATCH_SIZE).map(|c| c.to_vec()).collect();

        for (i, group) in sub_batches.chunks(MAX_CONCURRENCY).enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_BATCH_PAUSE).await;
            }
            let handles = group.iter().cloned().map(|sub_batch| self.score_llm_sub_batch(sub_batch));
            for scored in futures::future::join_all(handles).await {
                results.extend(scored);
            }
        }

        results
    }

    /// Builds one combined prompt for `chunk` and issues a single LLM
    /// call, matching results back to items by `content_id` when the
    /// response carries one, falling back to response order otherwise.
    /// Items with no corresponding result (a partially-parsed response, or
    /// a transport failure for the whole call) get the neutral vector and
    /// `scoring_failed = true`, without failing the rest of the chunk.
    async fn score_llm_sub_batch(&self, chunk: Vec<ContentInput>) -> Vec<ScoredItem> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let prompt = build_batch_prompt(&chunk);
        let parsed = match self.llm.complete(&prompt, self.max_tokens).await {
            Ok(completion) => parse::parse_batch(&completion),
            Err(e) => {
                warn!(error = %e, "batch LLM call failed, falling back to neutral for sub-batch");
                Vec::new()
            }
        };

        let mut by_id: HashMap<i64, MBTIVector> = HashMap::new();
        let mut positional = Vec::new();
        for (content_id, vector) in parsed {
            match content_id {
                Some(id) => {
                    by_id.insert(id, vector);
                }
                None => positional.push(vector),
            }
        }
        let mut positional = positional.into_iter();

        let mut out = Vec::with_capacity(chunk.len());
        for item in chunk {
            let (vector, scoring_failed, error) =
                match by_id.remove(&item.content_id).or_else(|| positional.next()) {
                    Some(v) => (v, false, None),
                    None => (
                        MBTIVector::NEUTRAL,
                        true,
                        Some("batch response had no result for this item".to_string()),
                    ),
                };

            let scored = match self.store.get_content_vector(item.content_id).await {
                Ok(Some(existing)) => ScoredItem {
                    content_id: item.content_id,
                    vector: existing.vector,
                    from_cache: true,
                    error: None,
                },
                _ => match self
                    .store
                    .upsert_content_vector(
                        item.content_id,
                        vector,
                        ContentMetadata {
                            title: item.title.clone(),
                            ..Default::default()
                        },
                        ScoringMethod::LlmGeneration,
                        scoring_failed,
                    )
                    .await
                {
                    Ok(()) => ScoredItem {
                        content_id: item.content_id,
                        vector,
                        from_cache: false,
                        error,
                    },
                    Err(e) => ScoredItem {
                        content_id: item.content_id,
                        vector: MBTIVector::NEUTRAL,
                        from_cache: false,
                        error: Some(e.to_string()),
                    },
                },
            };
            out.push(scored);
        }
        out
    }
}

fn build_single_prompt(item: &ContentInput) -> String {
    let title = item.title.as_deref().unwrap_or("");
    let text = item.text.as_deref().unwrap_or("");
    format!(
        "请分析以下内容并给出MBTI八个维度的概率估计（每对维度的概率之和应为1）。\n\
         以JSON格式返回，例如 {{\"E\":0.6,\"I\":0.4,\"S\":0.5,\"N\":0.5,\"T\":0.7,\"F\":0.3,\"J\":0.6,\"P\":0.4}}。\n\n\
         标题：{title}\n正文：{text}"
    )
}

/// Combines several items into one prompt so the LLM scores all of them
/// in a single completion, mirroring the original batch-evaluation
/// prompt shape (numbered entries, one combined JSON-array response).
fn build_batch_prompt(items: &[ContentInput]) -> String {
    let mut entries = String::new();
    for (i, item) in items.iter().enumerate() {
        let title = item.title.as_deref().unwrap_or("");
        let text = item.text.as_deref().unwrap_or("");
        entries.push_str(&format!(
            "{}. ID: {}\n   标题：{}\n   正文：{}\n\n",
            i + 1,
            item.content_id,
            title,
            text
        ));
    }
    format!(
        "请分别分析以下{}篇内容，给出每篇内容MBTI八个维度的概率估计（每对维度的概率之和应为1）。\n\
         以JSON格式返回：{{\"results\":[{{\"content_id\":ID,\"mbti_probabilities\":{{\"E\":...,\"I\":...,\"S\":...,\"N\":...,\"T\":...,\"F\":...,\"J\":...,\"P\":...}}}}, ...]}}，按下列顺序逐条给出结果：\n\n{entries}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryContentStore;

    #[tokio::test]
    async fn random_mode_persists_and_is_idempotent() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        let llm: Arc<dyn LlmProvider> = Arc::new(llm::ScriptedLlmProvider::new(vec![]));
        let engine = ScoringEngine::new(store.clone(), llm, ScoringMode::Random, 4000);

        let first = engine.ensure_scored(1).await.unwrap();
        let second = engine.ensure_scored(1).await.unwrap();
        assert_eq!(first.components(), second.components());

        let stored = store.get_content_vector(1).await.unwrap().unwrap();
        assert_eq!(stored.scoring_method, ScoringMethod::RandomGeneration);
    }

    #[tokio::test]
    async fn ai_mode_parse_failure_falls_back_to_neutral_and_marks_failed() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        let llm: Arc<dyn LlmProvider> =
            Arc::new(llm::ScriptedLlmProvider::new(vec!["not json at all".to_string()]));
        let engine = ScoringEngine::new(store.clone(), llm, ScoringMode::Ai, 4000);

        let scored = engine
            .score(&ContentInput {
                content_id: 5,
                title: None,
                text: None,
            })
            .await
            .unwrap();
        assert_eq!(scored.vector.components(), MBTIVector::NEUTRAL.components());

        let stored = store.get_content_vector(5).await.unwrap().unwrap();
        assert!(stored.scoring_failed);
    }

    #[tokio::test]
    async fn cache_hit_skips_llm_entirely() {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        store
            .upsert_content_vector(
                9,
                MBTIVector::NEUTRAL,
                ContentMetadata::default(),
                ScoringMethod::RandomGeneration,
                false,
            )
            .await
            .unwrap();
        let llm: Arc<dyn LlmProvider> = Arc::new(llm::ScriptedLlmProvider::new(vec![]));
        let engine = ScoringEngine::new(store, llm, ScoringMode::Ai, 4000);

        let scored = engine
            .score(&ContentInput {
                content_id: 9,
                title: None,
                text: None,
            })
            .await
            .unwrap();
        assert!(scored.from_cache);
    }
}
