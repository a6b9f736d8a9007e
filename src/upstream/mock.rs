//! Canned `UpstreamClient` for handler and recommender tests — no network,
//! no encryption, just whatever the test wired up.

use super::{
    ArticleDetail, ArticleListItem, ListArticlesParams, Result, UpstreamClient, UpstreamError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct ScriptedUpstreamClient {
    articles: Mutex<Vec<ArticleListItem>>,
    details: Mutex<HashMap<i64, ArticleDetail>>,
    fail_listing: Mutex<bool>,
    fail_batch: Mutex<bool>,
}

impl ScriptedUpstreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(self, items: Vec<ArticleListItem>) -> Self {
        *self.articles.lock().unwrap() = items;
        self
    }

    pub fn with_detail(self, id: i64, detail: ArticleDetail) -> Self {
        self.details.lock().unwrap().insert(id, detail);
        self
    }

    pub fn fail_next_listing(&self) {
        *self.fail_listing.lock().unwrap() = true;
    }

    pub fn fail_next_batch(&self) {
        *self.fail_batch.lock().unwrap() = true;
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstreamClient {
    async fn list_articles(&self, _params: ListArticlesParams) -> Result<Vec<ArticleListItem>> {
        let mut fail = self.fail_listing.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(UpstreamError::Transport("scripted failure".to_string()));
        }
        Ok(self.articles.lock().unwrap().clone())
    }

    async fn get_article(&self, content_id: i64) -> Result<Option<ArticleDetail>> {
        Ok(self.details.lock().unwrap().get(&content_id).cloned())
    }

    async fn get_articles_batch(&self, content_ids: &[i64]) -> Result<(Vec<ArticleDetail>, Vec<i64>)> {
        let mut fail = self.fail_batch.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(UpstreamError::Transport("scripted failure".to_string()));
        }
        drop(fail);
        let details = self.details.lock().unwrap();
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for &id in content_ids {
            match details.get(&id) {
                Some(detail) => found.push(detail.clone()),
                None => missing.push(id),
            }
        }
        Ok((found, missing))
    }
}
