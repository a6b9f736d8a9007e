//! Real `UpstreamClient`: key handshake, login, per-request HMAC signing
//! and AES-CBC encryption, with a single automatic re-handshake on an
//! "unauthenticated" response.

use super::crypto::{build_query_string, encrypt, generate_nonce, hmac_sign};
use super::{
    ArticleDetail, ArticleListItem, ListArticlesParams, Result, UpstreamClient, UpstreamError,
};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Default)]
struct Session {
    hmac_key: Option<String>,
    aes_key: Option<String>,
    iv: Option<String>,
    token: Option<String>,
    user_id: i64,
}

pub struct SohuUpstreamClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    max_retries: u32,
    session: Mutex<Session>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i32,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AesKeyData {
    #[serde(rename = "hmacKey")]
    hmac_key: String,
    #[serde(rename = "aesKey")]
    aes_key: String,
    iv: String,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
    #[serde(rename = "userId", default)]
    user_id: i64,
}

impl SohuUpstreamClient {
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        request_timeout_secs: u64,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url,
            username,
            password,
            max_retries,
            session: Mutex::new(Session::default()),
        })
    }

    async fn ensure_session(&self) -> Result<()> {
        {
            let session = self.session.lock().await;
            if session.hmac_key.is_some() && session.token.is_some() {
                return Ok(());
            }
        }
        self.handshake().await?;
        self.login().await
    }

    async fn handshake(&self) -> Result<()> {
        let url = format!("{}/app/v1/query/aesKey", self.base_url);
        let resp: Envelope<AesKeyData> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let data = resp
            .data
            .ok_or_else(|| UpstreamError::Parse("handshake response missing data".to_string()))?;

        let mut session = self.session.lock().await;
        session.hmac_key = Some(data.hmac_key);
        session.aes_key = Some(data.aes_key);
        session.iv = Some(data.iv);
        Ok(())
    }

    async fn login(&self) -> Result<()> {
        let url = format!("{}/auth/v2/login", self.base_url);
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
            "loginType": "PASSWORD",
        });
        let resp: Envelope<LoginData> = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let data = resp
            .data
            .ok_or_else(|| UpstreamError::Parse("login response missing data".to_string()))?;

        let mut session = self.session.lock().await;
        session.token = Some(data.token);
        session.user_id = data.user_id;
        Ok(())
    }

    async fn signed_headers(&self, endpoint: &str) -> Result<reqwest::header::HeaderMap> {
        let (token, user_id, hmac_key, aes_key, iv) = {
            let session = self.session.lock().await;
            (
                session.token.clone().unwrap_or_default(),
                session.user_id,
                session
                    .hmac_key
                    .clone()
                    .ok_or_else(|| UpstreamError::Unauthenticated)?,
                session
                    .aes_key
                    .clone()
                    .ok_or_else(|| UpstreamError::Unauthenticated)?,
                session.iv.clone().ok_or_else(|| UpstreamError::Unauthenticated)?,
            )
        };

        let timestamp = chrono::Utc::now().timestamp_millis();
        let nonce = generate_nonce();
        let params = [
            ("token", token.clone()),
            ("userId", user_id.to_string()),
            ("timestamp", timestamp.to_string()),
            ("url", endpoint.to_string()),
            ("platform", "web".to_string()),
            ("nonce", nonce.clone()),
        ];
        let query_string = build_query_string(&params, &hmac_key);
        let sign = hmac_sign(&hmac_key, &query_string);

        let signed = serde_json::json!({
            "token": token,
            "userId": user_id,
            "timestamp": timestamp,
            "url": endpoint,
            "platform": "web",
            "nonce": nonce,
            "sign": sign,
        });
        let serialized = serde_json::to_string(&signed)
            .map_err(|e| UpstreamError::Parse(format!("failed to serialize signed envelope: {e}")))?;
        let encrypted = encrypt(&aes_key, &iv, &serialized)
            .map_err(|e| UpstreamError::Parse(format!("failed to encrypt request: {e}")))?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-encrypt-key",
            encrypted
                .parse()
                .map_err(|_| UpstreamError::Parse("encrypted key is not valid header value".into()))?,
        );
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|_| UpstreamError::Parse("token is not valid header value".into()))?,
        );
        headers.insert(
            "Version",
            "1.5.0"
                .parse()
                .map_err(|_| UpstreamError::Parse("version header invalid".into()))?,
        );
        Ok(headers)
    }

    /// Runs one signed GET, re-handshaking and retrying once if the
    /// upstream reports the session as unauthenticated, then retries the
    /// outer transport with exponential backoff up to `max_retries`.
    async fn get_signed<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.ensure_session().await?;

        let mut attempt = 0;
        let mut backoff = Duration::from_millis(200);
        loop {
            let headers = self.signed_headers(endpoint).await?;
            let url = format!("{}{}", self.base_url, endpoint);
            let result = self
                .http
                .get(&url)
                .headers(headers)
                .query(query)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
                    warn!(endpoint, "upstream reported unauthenticated, re-handshaking");
                    self.handshake().await?;
                    self.login().await?;
                    if attempt >= 1 {
                        return Err(UpstreamError::Unauthenticated);
                    }
                    attempt += 1;
                    continue;
                }
                Ok(resp) => {
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| UpstreamError::Parse(e.to_string()));
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(UpstreamError::Transport(e.to_string()));
                    }
                    let jitter = rand::thread_rng().gen_range(0.85..1.15);
                    let delay = backoff.mul_f64(jitter);
                    warn!(endpoint, attempt, ?delay, "upstream transport error, retrying");
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(Duration::from_secs(10));
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArticleListData {
    list: Vec<ArticleListItem>,
}

#[async_trait]
impl UpstreamClient for SohuUpstreamClient {
    async fn list_articles(&self, params: ListArticlesParams) -> Result<Vec<ArticleListItem>> {
        let mut query = vec![
            ("page", params.page.to_string()),
            ("size", params.size.to_string()),
        ];
        if let Some(content_type) = params.content_type {
            query.push(("contentType", content_type));
        }
        let envelope: Envelope<ArticleListData> =
            self.get_signed("/app/api/content/article/list", &query).await?;
        Ok(envelope.data.map(|d| d.list).unwrap_or_default())
    }

    async fn get_article(&self, content_id: i64) -> Result<Option<ArticleDetail>> {
        let endpoint = format!("/app/api/content/article/{content_id}");
        let envelope: Envelope<ArticleDetail> = self.get_signed(&endpoint, &[]).await?;
        Ok(envelope.data)
    }

    async fn get_articles_batch(&self, content_ids: &[i64]) -> Result<(Vec<ArticleDetail>, Vec<i64>)> {
        let mut found = Vec::with_capacity(content_ids.len());
        let mut missing = Vec::new();
        for &id in content_ids {
            match self.get_article(id).await? {
                Some(detail) => found.push(detail),
                None => missing.push(id),
            }
        }
        Ok((found, missing))
    }
}
