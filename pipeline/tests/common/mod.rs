#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use database::SqliteStore;
use llm_interface::{CompletionRequest, LlmProvider, ResponseFormat};
use reddit_client::{InboxComment, RedditApi, TokenProvider};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use subscout_core::{
    AccountToken, CoreError, LlmError, RedditApiError, RedditPost, ThreadComment, ThreadContext,
    ThreadPost,
};

const SCHEMA: &str = include_str!("../../../database/tests/fixtures/schema.sql");

pub async fn memory_store() -> SqliteStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    SqliteStore::new(pool)
}

pub async fn execute(store: &SqliteStore, sql: &str) {
    sqlx::query(sql).execute(store.pool()).await.unwrap();
}

pub async fn count(store: &SqliteStore, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(store.pool()).await.unwrap()
}

/// One tenant, `user-1`, with a single connected account `ledgerly_team`
/// holding a token that is valid for another hour.
pub async fn seed_tenant(store: &SqliteStore, auto_reply: bool) {
    execute(
        store,
        &format!(
            "INSERT INTO tenant_profiles (user_id, product_name, product_description, target_audience, \
             keywords, auto_reply_enabled, reply_delay_minutes) \
             VALUES ('user-1', 'Ledgerly', 'Invoicing for freelancers', 'freelancers', \
             '[\"invoice\"]', {}, 30)",
            auto_reply as i32
        ),
    )
    .await;
    let expires = (Utc::now() + Duration::hours(1)).to_rfc3339();
    execute(
        store,
        &format!(
            "INSERT INTO reddit_accounts (id, user_id, username, access_token, refresh_token, token_expires_at) \
             VALUES ('acc-1', 'user-1', 'ledgerly_team', 'token-1', 'refresh-1', '{expires}')"
        ),
    )
    .await;
}

pub fn comment(id: &str, author: &str, body: &str) -> InboxComment {
    InboxComment {
        id: id.to_string(),
        fullname: format!("t1_{id}"),
        post_id: "post1".to_string(),
        parent_id: Some("t1_ours".to_string()),
        author: author.to_string(),
        body: body.to_string(),
        subreddit: "freelance".to_string(),
        link_title: "How do you invoice?".to_string(),
        created_utc: Utc::now(),
        is_new: true,
    }
}

pub fn post(id: &str, title: &str) -> RedditPost {
    RedditPost {
        id: id.to_string(),
        subreddit: "freelance".to_string(),
        title: title.to_string(),
        body: "What do you all use?".to_string(),
        author: "someone".to_string(),
        url: format!("https://reddit.com/{id}"),
        permalink: format!("/r/freelance/comments/{id}"),
        score: 3,
        num_comments: 1,
        created_utc: Utc::now(),
    }
}

#[derive(Default)]
pub struct FakeReddit {
    inboxes: Mutex<HashMap<String, Result<Vec<InboxComment>, RedditApiError>>>,
    listings: Mutex<HashMap<String, Result<Vec<RedditPost>, RedditApiError>>>,
    thread_calls: Mutex<Vec<String>>,
}

impl FakeReddit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_inbox(&self, token: &str, comments: Vec<InboxComment>) {
        self.inboxes.lock().unwrap().insert(token.to_string(), Ok(comments));
    }

    pub fn fail_inbox(&self, token: &str, error: RedditApiError) {
        self.inboxes.lock().unwrap().insert(token.to_string(), Err(error));
    }

    pub fn set_listing(&self, subreddit: &str, posts: Vec<RedditPost>) {
        self.listings.lock().unwrap().insert(subreddit.to_string(), Ok(posts));
    }

    pub fn fail_listing(&self, subreddit: &str, error: RedditApiError) {
        self.listings.lock().unwrap().insert(subreddit.to_string(), Err(error));
    }

    /// Comment ids whose thread was fetched, in call order.
    pub fn thread_calls(&self) -> Vec<String> {
        self.thread_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RedditApi for FakeReddit {
    async fn inbox_comment_replies(
        &self,
        access_token: &str,
        _limit: u32,
    ) -> Result<Vec<InboxComment>, CoreError> {
        self.inboxes
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .unwrap_or(Err(RedditApiError::InvalidToken))
            .map_err(CoreError::from)
    }

    async fn thread_context(
        &self,
        _access_token: &str,
        post_id: &str,
        comment_id: &str,
        _max_depth: u32,
    ) -> Result<ThreadContext, CoreError> {
        self.thread_calls.lock().unwrap().push(comment_id.to_string());
        Ok(ThreadContext {
            post: ThreadPost {
                id: post_id.to_string(),
                subreddit: "freelance".to_string(),
                title: "How do you invoice?".to_string(),
                body: "Looking for tools.".to_string(),
                author: "op".to_string(),
                url: String::new(),
            },
            comments: vec![ThreadComment {
                id: comment_id.to_string(),
                author: "commenter".to_string(),
                body: "reply".to_string(),
                score: 1,
                created_utc: Utc::now(),
                depth: 0,
                children: vec![],
            }],
            target_comment_id: comment_id.to_string(),
            truncated: false,
        })
    }

    async fn subreddit_new_posts(
        &self,
        _access_token: &str,
        subreddit: &str,
        _limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError> {
        self.listings
            .lock()
            .unwrap()
            .get(subreddit)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(CoreError::from)
    }
}

#[derive(Default)]
pub struct FakeTokens {
    refreshed: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeTokens {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_refresh_for(&self, username: &str) {
        self.failing.lock().unwrap().insert(username.to_string());
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn app_token(&self) -> Result<String, CoreError> {
        Ok("app-token".to_string())
    }

    async fn refresh_account_token(
        &self,
        username: &str,
        refresh_token: &str,
    ) -> Result<AccountToken, CoreError> {
        if self.failing.lock().unwrap().contains(username) {
            return Err(RedditApiError::AuthenticationFailed {
                reason: "invalid_grant".to_string(),
            }
            .into());
        }
        self.refreshed.lock().unwrap().push(username.to_string());
        Ok(AccountToken {
            access_token: format!("fresh-{username}"),
            refresh_token: Some(refresh_token.to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}

/// Answers every pipeline stage:
/// - spam filter rejects titles containing "BUY NOW"
/// - categorizer labels everything `help_request`
/// - lead scorer gives 60
/// - reply generation fails for comments containing "FAIL"
pub struct FakeLlm {
    requests: Mutex<Vec<CompletionRequest>>,
    spam_down: bool,
}

impl FakeLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            spam_down: false,
        })
    }

    /// The spam filter stage answers 503 every time.
    pub fn with_spam_filter_down() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            spam_down: true,
        })
    }

    pub fn requests_named(&self, name: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| match &r.response_format {
                ResponseFormat::JsonSchema { name: n, .. } => n == name,
                _ => false,
            })
            .count()
    }

    pub fn reply_requests(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r.response_format, ResponseFormat::Text))
            .count()
    }
}

fn items_after(prompt: &str, marker: &str) -> Vec<Value> {
    let start = prompt.find(marker).unwrap() + marker.len();
    serde_json::from_str(&prompt[start..]).unwrap()
}

fn unavailable() -> CoreError {
    LlmError::ServiceUnavailable {
        provider: "fake".to_string(),
        status_code: 503,
    }
    .into()
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CoreError> {
        self.requests.lock().unwrap().push(request.clone());

        let name = match &request.response_format {
            ResponseFormat::Text => {
                if request.user_prompt.contains("FAIL") {
                    return Err(unavailable());
                }
                return Ok("Happy to help, what's your workflow today?".to_string());
            }
            ResponseFormat::JsonSchema { name, .. } => name.as_str(),
        };

        let body = match name {
            "spam_filter" => {
                if self.spam_down {
                    return Err(unavailable());
                }
                let posts: Vec<Value> = items_after(&request.user_prompt, "Review these posts:\n")
                    .iter()
                    .map(|p| {
                        let spam = p["title"].as_str().unwrap_or("").contains("BUY NOW");
                        json!({ "id": p["id"], "approved": !spam, "confidence": 0.8 })
                    })
                    .collect();
                json!({ "posts": posts })
            }
            "categorize" => {
                let posts: Vec<Value> = items_after(&request.user_prompt, "Posts:\n")
                    .iter()
                    .map(|p| {
                        json!({
                            "id": p["id"],
                            "category": "help_request",
                            "summary": "Asks for tools.",
                        })
                    })
                    .collect();
                json!({ "posts": posts })
            }
            "lead_scoring" => {
                let leads: Vec<Value> = items_after(&request.user_prompt, "Leads:\n")
                    .iter()
                    .map(|l| {
                        json!({
                            "id": l["id"],
                            "score": 60,
                            "buying_signals": ["asked about pricing"],
                            "pain_points": ["manual invoicing"],
                            "summary": "Curious about pricing."
                        })
                    })
                    .collect();
                json!({ "leads": leads })
            }
            other => panic!("unexpected stage {other}"),
        };
        Ok(body.to_string())
    }
}
