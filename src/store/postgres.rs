//! PostgreSQL-backed `ContentStore`, via `sqlx`. Queries are issued with
//! `query`/`query_as` (not the `query!` macro) so the crate builds without a
//! live database at compile time.

use super::{
    Action, BehaviorEvent, ContentMetadata, ContentStore, ContentVector, NewBehaviorEvent,
    RecommendationLog, Result, ScoringMethod, StoreCounts, StoreError, UserProfile,
};
use crate::vector::MBTIVector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Row};

pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Storage(format!("failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct ProfileRow {
    user_id: i64,
    e: f64,
    i: f64,
    s: f64,
    n: f64,
    t: f64,
    f: f64,
    j: f64,
    p: f64,
    type_label: Option<String>,
    total_behaviors_analyzed: i64,
    behaviors_since_last_update: i64,
    current_recommendation_page: i32,
    last_recommendation_time: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    created_at: DateTime<Utc>,
    version: i64,
}

impl From<ProfileRow> for UserProfile {
    fn from(r: ProfileRow) -> Self {
        UserProfile {
            user_id: r.user_id,
            vector: MBTIVector::new(r.e, r.i, r.s, r.n, r.t, r.f, r.j, r.p),
            type_label: r.type_label,
            total_behaviors_analyzed: r.total_behaviors_analyzed,
            behaviors_since_last_update: r.behaviors_since_last_update,
            current_recommendation_page: r.current_recommendation_page,
            last_recommendation_time: r.last_recommendation_time,
            last_updated: r.last_updated,
            created_at: r.created_at,
            version: r.version,
        }
    }
}

#[derive(FromRow)]
struct ContentRow {
    content_id: i64,
    e: f64,
    i: f64,
    s: f64,
    n: f64,
    t: f64,
    f: f64,
    j: f64,
    p: f64,
    title: Option<String>,
    cover_image: Option<String>,
    author: Option<String>,
    publish_time: Option<DateTime<Utc>>,
    content_type: Option<String>,
    scoring_method: String,
    scoring_failed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<ContentRow> for ContentVector {
    fn from(r: ContentRow) -> Self {
        ContentVector {
            content_id: r.content_id,
            vector: MBTIVector::new(r.e, r.i, r.s, r.n, r.t, r.f, r.j, r.p),
            metadata: ContentMetadata {
                title: r.title,
                cover_image: r.cover_image,
                author: r.author,
                publish_time: r.publish_time,
                content_type: r.content_type,
            },
            scoring_method: if r.scoring_method == ScoringMethod::LlmGeneration.as_str() {
                ScoringMethod::LlmGeneration
            } else {
                ScoringMethod::RandomGeneration
            },
            scoring_failed: r.scoring_failed,
            created_at: r.created_at,
            updated_at: r.updated_at,
            version: r.version,
        }
    }
}

#[derive(FromRow)]
struct BehaviorRow {
    id: i64,
    user_id: i64,
    content_id: i64,
    action: String,
    weight: f64,
    source: String,
    session_id: Option<String>,
    extra: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl From<BehaviorRow> for BehaviorEvent {
    fn from(r: BehaviorRow) -> Self {
        BehaviorEvent {
            id: r.id,
            user_id: r.user_id,
            content_id: r.content_id,
            action: Action::parse(&r.action).unwrap_or(Action::View),
            weight: r.weight,
            source: r.source,
            session_id: r.session_id,
            extra: r.extra,
            timestamp: r.created_at,
        }
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn get_or_create_profile(&self, user_id: i64) -> Result<UserProfile> {
        let existing: Option<ProfileRow> =
            sqlx::query_as("SELECT * FROM user_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(row) = existing {
            return Ok(row.into());
        }

        let profile = UserProfile::new(user_id);
        sqlx::query(
            "INSERT INTO user_profiles
                (user_id, e, i, s, n, t, f, j, p, type_label, total_behaviors_analyzed,
                 behaviors_since_last_update, current_recommendation_page, last_updated, created_at, version)
             VALUES ($1, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, NULL, 0, 0, 0, $2, $3, 0)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(profile.last_updated)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;

        let row: ProfileRow = sqlx::query_as("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn update_profile_vector(
        &self,
        user_id: i64,
        vector: MBTIVector,
        type_label: Option<String>,
        total_behaviors_analyzed: i64,
        expected_version: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_profiles
             SET e = $1, i = $2, s = $3, n = $4, t = $5, f = $6, j = $7, p = $8,
                 type_label = $9, total_behaviors_analyzed = $10,
                 behaviors_since_last_update = 0, last_updated = now(), version = version + 1
             WHERE user_id = $11 AND version = $12",
        )
        .bind(vector.e)
        .bind(vector.i)
        .bind(vector.s)
        .bind(vector.n)
        .bind(vector.t)
        .bind(vector.f)
        .bind(vector.j)
        .bind(vector.p)
        .bind(type_label)
        .bind(total_behaviors_analyzed)
        .bind(user_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "profile {user_id} version mismatch (expected {expected_version})"
            )));
        }
        Ok(())
    }

    async fn increment_behavior_counter(&self, user_id: i64) -> Result<i64> {
        self.get_or_create_profile(user_id).await?;
        let row = sqlx::query(
            "UPDATE user_profiles
             SET behaviors_since_last_update = behaviors_since_last_update + 1
             WHERE user_id = $1
             RETURNING behaviors_since_last_update",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("behaviors_since_last_update")?)
    }

    async fn record_behavior(&self, event: NewBehaviorEvent) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO behavior_events (user_id, content_id, action, weight, source, session_id, extra, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(event.user_id)
        .bind(event.content_id)
        .bind(event.action.as_str())
        .bind(event.weight)
        .bind(event.source)
        .bind(event.session_id)
        .bind(event.extra)
        .bind(event.timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn get_recent_behaviors(&self, user_id: i64, limit: usize) -> Result<Vec<BehaviorEvent>> {
        let rows: Vec<BehaviorRow> = sqlx::query_as(
            "SELECT * FROM behavior_events WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
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
        let offset = (page.saturating_sub(1) as i64) * (limit as i64);
        let action_str = action.map(|a| a.as_str().to_string());

        let rows: Vec<BehaviorRow> = sqlx::query_as(
            "SELECT * FROM behavior_events
             WHERE user_id = $1
               AND ($2::text IS NULL OR action = $2)
               AND ($3::timestamptz IS NULL OR created_at >= $3)
               AND ($4::timestamptz IS NULL OR created_at <= $4)
             ORDER BY created_at DESC, id DESC
             LIMIT $5 OFFSET $6",
        )
        .bind(user_id)
        .bind(&action_str)
        .bind(start)
        .bind(end)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total_row = sqlx::query(
            "SELECT COUNT(*) AS count FROM behavior_events
             WHERE user_id = $1
               AND ($2::text IS NULL OR action = $2)
               AND ($3::timestamptz IS NULL OR created_at >= $3)
               AND ($4::timestamptz IS NULL OR created_at <= $4)",
        )
        .bind(user_id)
        .bind(&action_str)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = total_row.try_get("count")?;

        Ok((rows.into_iter().map(Into::into).collect(), total as u64))
    }

    async fn get_distinct_toucher_users(&self, content_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM behavior_events WHERE content_id = $1")
            .bind(content_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| r.try_get::<i64, _>("user_id").map_err(StoreError::from))
            .collect()
    }

    async fn get_distinct_operated_content_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT DISTINCT content_id FROM behavior_events WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| r.try_get::<i64, _>("content_id").map_err(StoreError::from))
            .collect()
    }

    async fn get_content_vector(&self, content_id: i64) -> Result<Option<ContentVector>> {
        let row: Option<ContentRow> =
            sqlx::query_as("SELECT * FROM content_vectors WHERE content_id = $1")
                .bind(content_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn upsert_content_vector(
        &self,
        content_id: i64,
        vector: MBTIVector,
        metadata: ContentMetadata,
        scoring_method: ScoringMethod,
        scoring_failed: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO content_vectors
                (content_id, e, i, s, n, t, f, j, p, title, cover_image, author, publish_time,
                 content_type, scoring_method, scoring_failed, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, now(), now(), 0)
             ON CONFLICT (content_id) DO UPDATE SET
                e = EXCLUDED.e, i = EXCLUDED.i, s = EXCLUDED.s, n = EXCLUDED.n,
                t = EXCLUDED.t, f = EXCLUDED.f, j = EXCLUDED.j, p = EXCLUDED.p,
                title = EXCLUDED.title, cover_image = EXCLUDED.cover_image,
                author = EXCLUDED.author, publish_time = EXCLUDED.publish_time,
                content_type = EXCLUDED.content_type, scoring_method = EXCLUDED.scoring_method,
                scoring_failed = EXCLUDED.scoring_failed, updated_at = now(),
                version = content_vectors.version + 1",
        )
        .bind(content_id)
        .bind(vector.e)
        .bind(vector.i)
        .bind(vector.s)
        .bind(vector.n)
        .bind(vector.t)
        .bind(vector.f)
        .bind(vector.j)
        .bind(vector.p)
        .bind(metadata.title)
        .bind(metadata.cover_image)
        .bind(metadata.author)
        .bind(metadata.publish_time)
        .bind(metadata.content_type)
        .bind(scoring_method.as_str())
        .bind(scoring_failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn candidate_content_ids(&self, exclude_ids: &[i64], limit: usize) -> Result<Vec<i64>> {
        const CHUNK_SIZE: usize = 5_000;
        if exclude_ids.len() >= 10_000 {
            tracing::warn!(
                exclude_count = exclude_ids.len(),
                "candidate exclusion set is very large, applying in chunks"
            );
        }

        // With no exclusions, or a manageable exclusion set, a single ANY($1) works;
        // sqlx binds arrays natively via the Postgres array type.
        let chunks: Vec<&[i64]> = if exclude_ids.is_empty() {
            vec![&[]]
        } else {
            exclude_ids.chunks(CHUNK_SIZE).collect()
        };

        let mut candidates: Vec<i64> = Vec::new();
        for chunk in chunks {
            let rows = sqlx::query(
                "SELECT content_id FROM content_vectors
                 WHERE NOT (content_id = ANY($1))
                 ORDER BY created_at DESC, content_id DESC
                 LIMIT $2",
            )
            .bind(chunk)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                let id: i64 = row.try_get("content_id")?;
                if !candidates.contains(&id) {
                    candidates.push(id);
                }
            }
            if candidates.len() >= limit {
                break;
            }
        }
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn get_liked_content_ids(&self, user_id: i64, since_days: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT DISTINCT content_id FROM behavior_events
             WHERE user_id = $1 AND action = 'like' AND created_at >= now() - ($2 || ' days')::interval",
        )
        .bind(user_id)
        .bind(since_days.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.try_get::<i64, _>("content_id").map_err(StoreError::from))
            .collect()
    }

    async fn advance_recommendation_cursor(&self, user_id: i64, new_page: i32) -> Result<()> {
        sqlx::query(
            "UPDATE user_profiles
             SET current_recommendation_page = GREATEST(current_recommendation_page, $2),
                 last_recommendation_time = now()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(new_page)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_recommendation(&self, log: RecommendationLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO recommendation_logs
                (user_id, content_ids, similarity_scores, request_params, total_candidates,
                 average_similarity, user_probabilities, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(log.user_id)
        .bind(serde_json::to_value(&log.content_ids).unwrap_or_default())
        .bind(serde_json::to_value(&log.similarity_scores).unwrap_or_default())
        .bind(log.request_params)
        .bind(log.total_candidates as i32)
        .bind(log.average_similarity)
        .bind(serde_json::to_value(log.user_probabilities).unwrap_or_default())
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let profiles: i64 = sqlx::query("SELECT COUNT(*) AS c FROM user_profiles")
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        let content: i64 = sqlx::query("SELECT COUNT(*) AS c FROM content_vectors")
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        let behaviors: i64 = sqlx::query("SELECT COUNT(*) AS c FROM behavior_events")
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        Ok(StoreCounts {
            user_profiles: profiles,
            content_vectors: content,
            behavior_events: behaviors,
        })
    }
}
