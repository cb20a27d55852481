use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, QueryBuilder, Row};
use std::collections::{HashMap, HashSet};
use subscout_core::{
    AccountToken, CoreError, DatabaseConfig, DatabaseError, DiscoveredPost, Interaction,
    InteractionStatus, InteractionType, Lead, LeadScore, LeadStatus, RedditAccount, Tenant,
    TenantProfile, TrackedSubreddit,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::Store;

/// Keeps `IN (...)` lists under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;

const INTERACTION_COLUMNS: &str = "id, user_id, reddit_account_id, reddit_comment_id, \
     reddit_post_id, subreddit, author, their_content, our_content, thread_context, \
     interaction_type, status, error_message, scheduled_for, created_at, updated_at";

const LEAD_COLUMNS: &str = "id, user_id, author, score, buying_signals, pain_points, \
     conversation_summary, status, interaction_count, last_interaction_at, scored_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn existing_values(
        &self,
        select: &str,
        scope: Option<(&str, &str)>,
        column: &str,
        values: &[String],
    ) -> Result<HashSet<String>, CoreError> {
        let mut found = HashSet::new();

        for chunk in values.chunks(IN_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(select);
            builder.push(" WHERE ");
            if let Some((scope_column, scope_value)) = scope {
                builder.push(scope_column);
                builder.push(" = ");
                builder.push_bind(scope_value);
                builder.push(" AND ");
            }
            builder.push(column);
            builder.push(" IN (");
            let mut separated = builder.separated(", ");
            for value in chunk {
                separated.push_bind(value.as_str());
            }
            separated.push_unseparated(")");

            let rows = builder.build().fetch_all(&self.pool).await.map_err(db_error)?;
            for row in rows {
                found.insert(row.try_get::<String, _>(0).map_err(db_error)?);
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn tracked_subreddits(&self) -> Result<Vec<TrackedSubreddit>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, name FROM tracked_subreddits WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                Ok(TrackedSubreddit {
                    id: row.try_get("id").map_err(db_error)?,
                    name: row.try_get("name").map_err(db_error)?,
                })
            })
            .collect()
    }

    async fn existing_post_ids(&self, reddit_ids: &[String]) -> Result<HashSet<String>, CoreError> {
        if reddit_ids.is_empty() {
            return Ok(HashSet::new());
        }
        self.existing_values(
            "SELECT reddit_id FROM discovered_posts",
            None,
            "reddit_id",
            reddit_ids,
        )
        .await
    }

    async fn upsert_posts(&self, posts: &[DiscoveredPost]) -> Result<u64, CoreError> {
        let now = Utc::now();
        let mut written = 0;

        for post in posts {
            let result = sqlx::query(
                r#"
                INSERT INTO discovered_posts (
                    reddit_id, subreddit, title, body, author, url, score, num_comments,
                    created_utc, approved, spam_confidence, category, summary,
                    discovered_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(reddit_id) DO UPDATE SET
                    approved = excluded.approved,
                    spam_confidence = excluded.spam_confidence,
                    category = excluded.category,
                    summary = excluded.summary,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&post.reddit_id)
            .bind(&post.subreddit)
            .bind(&post.title)
            .bind(&post.body)
            .bind(&post.author)
            .bind(&post.url)
            .bind(post.score)
            .bind(post.num_comments)
            .bind(post.created_utc)
            .bind(post.approved)
            .bind(post.spam_confidence)
            .bind(post.category.map(|c| c.as_str()))
            .bind(&post.summary)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            written += result.rows_affected();
        }

        debug!("Upserted {} discovered posts", written);
        Ok(written)
    }

    async fn active_tenants(&self) -> Result<Vec<Tenant>, CoreError> {
        let profile_rows = sqlx::query(
            r#"
            SELECT p.user_id, p.product_name, p.product_description, p.target_audience,
                   p.keywords, p.expertise, p.auto_reply_enabled, p.reply_delay_minutes
            FROM tenant_profiles p
            WHERE p.is_active = 1
              AND EXISTS (
                  SELECT 1 FROM reddit_accounts a
                  WHERE a.user_id = p.user_id AND a.is_active = 1
              )
            ORDER BY p.user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let account_rows = sqlx::query(
            r#"
            SELECT id, user_id, username, access_token, refresh_token, token_expires_at
            FROM reddit_accounts
            WHERE is_active = 1
            ORDER BY user_id, username
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut accounts_by_user: HashMap<String, Vec<RedditAccount>> = HashMap::new();
        for row in &account_rows {
            let account = account_from_row(row)?;
            accounts_by_user
                .entry(account.user_id.clone())
                .or_default()
                .push(account);
        }

        profile_rows
            .iter()
            .map(|row| {
                let profile = profile_from_row(row)?;
                let accounts = accounts_by_user.remove(&profile.user_id).unwrap_or_default();
                Ok(Tenant { profile, accounts })
            })
            .collect()
    }

    async fn update_account_token(
        &self,
        account_id: &str,
        token: &AccountToken,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE reddit_accounts
            SET access_token = ?, refresh_token = COALESCE(?, refresh_token), token_expires_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn existing_interaction_comment_ids(
        &self,
        user_id: &str,
        comment_ids: &[String],
    ) -> Result<HashSet<String>, CoreError> {
        if comment_ids.is_empty() {
            return Ok(HashSet::new());
        }
        self.existing_values(
            "SELECT reddit_comment_id FROM interactions",
            Some(("user_id", user_id)),
            "reddit_comment_id",
            comment_ids,
        )
        .await
    }

    async fn insert_interactions(&self, interactions: &[Interaction]) -> Result<u64, CoreError> {
        let mut inserted = 0;
        for interaction in interactions {
            inserted += insert_interaction_row(&self.pool, interaction).await?;
        }
        Ok(inserted)
    }

    async fn insert_interaction_with_lead(
        &self,
        interaction: &Interaction,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        if insert_interaction_row(&mut *tx, interaction).await? == 0 {
            return Ok(false);
        }
        upsert_lead_row(
            &mut *tx,
            &interaction.user_id,
            &interaction.author,
            interaction.created_at,
        )
        .await?;

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn get_interaction(&self, id: Uuid) -> Result<Option<Interaction>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(interaction_from_row).transpose()
    }

    async fn transition_interaction(
        &self,
        id: Uuid,
        next: InteractionStatus,
        error_message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let current = self
            .get_interaction(id)
            .await?
            .ok_or_else(|| CoreError::InvalidInput {
                message: format!("interaction {id} not found"),
            })?
            .status;

        let invalid = || CoreError::InvalidTransition {
            interaction_id: id.to_string(),
            from: current.as_str().to_string(),
            to: next.as_str().to_string(),
        };

        if !current.can_transition_to(next) {
            return Err(invalid());
        }

        let result = sqlx::query(
            r#"
            UPDATE interactions
            SET status = ?, error_message = COALESCE(?, error_message), updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.as_str())
        .bind(error_message)
        .bind(at)
        .bind(id.to_string())
        .bind(current.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        // Another writer moved it first
        if result.rows_affected() == 0 {
            return Err(invalid());
        }

        debug!(interaction_id = %id, from = %current, to = %next, "Interaction transitioned");
        Ok(())
    }

    async fn record_lead_interaction(
        &self,
        user_id: &str,
        author: &str,
        at: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        upsert_lead_row(&self.pool, user_id, author, at).await
    }

    async fn leads_needing_score(&self, limit: u32) -> Result<Vec<Lead>, CoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LEAD_COLUMNS} FROM leads
            WHERE status != 'archived'
              AND (scored_at IS NULL OR scored_at < last_interaction_at)
            ORDER BY last_interaction_at DESC
            LIMIT ?
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(lead_from_row).collect()
    }

    async fn lead_conversation(&self, lead: &Lead) -> Result<Vec<Interaction>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions \
             WHERE user_id = ? AND author = ? ORDER BY created_at"
        ))
        .bind(&lead.user_id)
        .bind(&lead.author)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(interaction_from_row).collect()
    }

    async fn update_lead_score(
        &self,
        score: &LeadScore,
        scored_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE leads
            SET score = ?, buying_signals = ?, pain_points = ?, conversation_summary = ?,
                scored_at = ?
            WHERE id = ?
            "#,
        )
        .bind(score.score as i64)
        .bind(serde_json::to_string(&score.buying_signals)?)
        .bind(serde_json::to_string(&score.pain_points)?)
        .bind(&score.summary)
        .bind(scored_at)
        .bind(score.lead_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

async fn insert_interaction_row<'e, E>(
    executor: E,
    interaction: &Interaction,
) -> Result<u64, CoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let thread_context = serde_json::to_string(&interaction.thread_context)?;
    let result = sqlx::query(
        r#"
        INSERT INTO interactions (
            id, user_id, reddit_account_id, reddit_comment_id, reddit_post_id,
            subreddit, author, their_content, our_content, thread_context,
            interaction_type, status, error_message, scheduled_for, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, reddit_comment_id) DO NOTHING
        "#,
    )
    .bind(interaction.id.to_string())
    .bind(&interaction.user_id)
    .bind(&interaction.reddit_account_id)
    .bind(&interaction.reddit_comment_id)
    .bind(&interaction.reddit_post_id)
    .bind(&interaction.subreddit)
    .bind(&interaction.author)
    .bind(&interaction.their_content)
    .bind(&interaction.our_content)
    .bind(thread_context)
    .bind(interaction.interaction_type.as_str())
    .bind(interaction.status.as_str())
    .bind(&interaction.error_message)
    .bind(interaction.scheduled_for)
    .bind(interaction.created_at)
    .bind(interaction.updated_at)
    .execute(executor)
    .await
    .map_err(db_error)?;

    Ok(result.rows_affected())
}

async fn upsert_lead_row<'e, E>(
    executor: E,
    user_id: &str,
    author: &str,
    at: DateTime<Utc>,
) -> Result<i64, CoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO leads (user_id, author, status, interaction_count, last_interaction_at)
        VALUES (?, ?, 'new', 1, ?)
        ON CONFLICT(user_id, author) DO UPDATE SET
            interaction_count = interaction_count + 1,
            last_interaction_at = MAX(last_interaction_at, excluded.last_interaction_at)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(author)
    .bind(at)
    .fetch_one(executor)
    .await
    .map_err(db_error)?;

    row.try_get("id").map_err(db_error)
}

fn db_error(error: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.message().contains("database is locked") {
            return DatabaseError::DatabaseLocked.into();
        }
        if db.is_unique_violation() {
            return DatabaseError::ConstraintViolation {
                constraint: db.message().to_string(),
            }
            .into();
        }
    }
    DatabaseError::Sql(error).into()
}

fn corrupt(column: &str, value: &str) -> CoreError {
    CoreError::Internal {
        message: format!("unexpected value {value:?} in column {column}"),
    }
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn profile_from_row(row: &SqliteRow) -> Result<TenantProfile, CoreError> {
    Ok(TenantProfile {
        user_id: row.try_get("user_id").map_err(db_error)?,
        product_name: row.try_get("product_name").map_err(db_error)?,
        product_description: row.try_get("product_description").map_err(db_error)?,
        target_audience: row.try_get("target_audience").map_err(db_error)?,
        keywords: json_list(&row.try_get::<String, _>("keywords").map_err(db_error)?),
        expertise: json_list(&row.try_get::<String, _>("expertise").map_err(db_error)?),
        auto_reply_enabled: row.try_get("auto_reply_enabled").map_err(db_error)?,
        reply_delay_minutes: row.try_get("reply_delay_minutes").map_err(db_error)?,
    })
}

fn account_from_row(row: &SqliteRow) -> Result<RedditAccount, CoreError> {
    Ok(RedditAccount {
        id: row.try_get("id").map_err(db_error)?,
        user_id: row.try_get("user_id").map_err(db_error)?,
        username: row.try_get("username").map_err(db_error)?,
        access_token: row.try_get("access_token").map_err(db_error)?,
        refresh_token: row.try_get("refresh_token").map_err(db_error)?,
        token_expires_at: row.try_get("token_expires_at").map_err(db_error)?,
    })
}

fn interaction_from_row(row: &SqliteRow) -> Result<Interaction, CoreError> {
    let id: String = row.try_get("id").map_err(db_error)?;
    let thread_context: String = row.try_get("thread_context").map_err(db_error)?;
    let interaction_type: String = row.try_get("interaction_type").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;

    Ok(Interaction {
        id: Uuid::parse_str(&id).map_err(|_| corrupt("interactions.id", &id))?,
        user_id: row.try_get("user_id").map_err(db_error)?,
        reddit_account_id: row.try_get("reddit_account_id").map_err(db_error)?,
        reddit_comment_id: row.try_get("reddit_comment_id").map_err(db_error)?,
        reddit_post_id: row.try_get("reddit_post_id").map_err(db_error)?,
        subreddit: row.try_get("subreddit").map_err(db_error)?,
        author: row.try_get("author").map_err(db_error)?,
        their_content: row.try_get("their_content").map_err(db_error)?,
        our_content: row.try_get("our_content").map_err(db_error)?,
        thread_context: serde_json::from_str(&thread_context)?,
        interaction_type: InteractionType::parse(&interaction_type)
            .ok_or_else(|| corrupt("interactions.interaction_type", &interaction_type))?,
        status: InteractionStatus::parse(&status)
            .ok_or_else(|| corrupt("interactions.status", &status))?,
        error_message: row.try_get("error_message").map_err(db_error)?,
        scheduled_for: row.try_get("scheduled_for").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead, CoreError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let score: Option<i64> = row.try_get("score").map_err(db_error)?;

    Ok(Lead {
        id: row.try_get("id").map_err(db_error)?,
        user_id: row.try_get("user_id").map_err(db_error)?,
        author: row.try_get("author").map_err(db_error)?,
        score: score.map(|s| s.clamp(0, 100) as u8),
        buying_signals: json_list(&row.try_get::<String, _>("buying_signals").map_err(db_error)?),
        pain_points: json_list(&row.try_get::<String, _>("pain_points").map_err(db_error)?),
        conversation_summary: row.try_get("conversation_summary").map_err(db_error)?,
        status: LeadStatus::parse(&status).ok_or_else(|| corrupt("leads.status", &status))?,
        interaction_count: row.try_get("interaction_count").map_err(db_error)?,
        last_interaction_at: row.try_get("last_interaction_at").map_err(db_error)?,
        scored_at: row.try_get("scored_at").map_err(db_error)?,
    })
}

