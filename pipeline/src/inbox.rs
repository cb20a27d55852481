use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use llm_interface::{ReplyGenerator, ReplyTarget};
use reddit_client::{InboxComment, RedditApi, TokenProvider};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use subscout_core::{
    AppConfig, CoreError, ErrorExt, Interaction, InteractionStatus, InteractionType, RedditAccount,
    Tenant, ThreadContext,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use database::Store;

/// Serialized as the cron response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxRunReport {
    pub success: bool,
    /// Users whose accounts were all visited, whatever happened per account.
    pub processed_users: usize,
    pub total_interactions: u64,
    pub failed_users: usize,
    pub skipped_accounts: usize,
}

impl fmt::Display for InboxRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Inbox: {} users processed ({} failed), {} interactions created, {} accounts skipped",
            self.processed_users, self.failed_users, self.total_interactions, self.skipped_accounts,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InboxSettings {
    pub inbox_limit: u32,
    pub thread_depth: u32,
    pub reply_concurrency: usize,
}

impl InboxSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            inbox_limit: config.reddit.inbox_limit,
            thread_depth: config.reddit.thread_depth,
            reply_concurrency: config.pipeline.reply_concurrency,
        }
    }
}

impl Default for InboxSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// A new comment with the thread it was fetched in.
struct FetchedThread {
    comment: InboxComment,
    context: ThreadContext,
}

/// Turns new inbox comment replies into drafted interactions, one tenant and
/// one account at a time.
pub struct InboxWatcher {
    store: Arc<dyn Store>,
    reddit: Arc<dyn RedditApi>,
    tokens: Arc<dyn TokenProvider>,
    replies: ReplyGenerator,
    settings: InboxSettings,
}

impl InboxWatcher {
    pub fn new(
        store: Arc<dyn Store>,
        reddit: Arc<dyn RedditApi>,
        tokens: Arc<dyn TokenProvider>,
        replies: ReplyGenerator,
        settings: InboxSettings,
    ) -> Self {
        Self {
            store,
            reddit,
            tokens,
            replies,
            settings,
        }
    }

    pub async fn run(&self) -> Result<InboxRunReport, CoreError> {
        let tenants = self.store.active_tenants().await?;
        info!("Checking inboxes for {} users", tenants.len());

        let mut report = InboxRunReport::default();
        for tenant in &tenants {
            let user_id = &tenant.profile.user_id;
            let before = report.total_interactions;
            match self.process_tenant(tenant, &mut report).await {
                Ok(()) => {
                    report.processed_users += 1;
                    let created = report.total_interactions - before;
                    debug!(user_id = %user_id, created, "User processed");
                }
                Err(e) => {
                    e.log_warn();
                    warn!(user_id = %user_id, "Inbox processing failed for user, continuing");
                    report.failed_users += 1;
                }
            }
        }

        report.success = true;
        info!("{}", report);
        Ok(report)
    }

    /// Reddit failures are isolated per account. Storage failures fail the user,
    /// keeping whatever was already counted as stored.
    async fn process_tenant(
        &self,
        tenant: &Tenant,
        report: &mut InboxRunReport,
    ) -> Result<(), CoreError> {
        for account in &tenant.accounts {
            let token = match self.account_token(account).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    warn!(
                        user_id = %tenant.profile.user_id,
                        account = %account.username,
                        "Account has no usable credentials, skipping"
                    );
                    report.skipped_accounts += 1;
                    continue;
                }
                Err(e) => {
                    e.log_warn();
                    warn!(account = %account.username, "Token refresh failed, skipping account");
                    report.skipped_accounts += 1;
                    continue;
                }
            };

            let comments = match self
                .reddit
                .inbox_comment_replies(&token, self.settings.inbox_limit)
                .await
            {
                Ok(comments) => comments,
                Err(e) => {
                    e.log_warn();
                    warn!(account = %account.username, "Inbox fetch failed, continuing");
                    continue;
                }
            };

            self.process_comments(tenant, account, &token, comments, report).await?;
        }

        Ok(())
    }

    /// A valid access token for the account, refreshing it when it is about to
    /// expire. `None` when the account cannot be used at all.
    async fn account_token(&self, account: &RedditAccount) -> Result<Option<String>, CoreError> {
        if let Some(token) = account.token() {
            if !token.needs_refresh(Utc::now()) {
                return Ok(Some(token.access_token));
            }
        }

        let Some(refresh_token) = account
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
        else {
            return Ok(None);
        };

        let token = self
            .tokens
            .refresh_account_token(&account.username, refresh_token)
            .await?;
        self.store.update_account_token(&account.id, &token).await?;
        Ok(Some(token.access_token))
    }

    async fn process_comments(
        &self,
        tenant: &Tenant,
        account: &RedditAccount,
        token: &str,
        comments: Vec<InboxComment>,
        report: &mut InboxRunReport,
    ) -> Result<(), CoreError> {
        let fresh = self.new_comments(tenant, account, comments).await?;
        if fresh.is_empty() {
            return Ok(());
        }
        info!(account = %account.username, count = fresh.len(), "New inbox replies");

        let mut threads = Vec::with_capacity(fresh.len());
        for comment in fresh {
            match self
                .reddit
                .thread_context(token, &comment.post_id, &comment.id, self.settings.thread_depth)
                .await
            {
                Ok(context) => threads.push(FetchedThread { comment, context }),
                Err(e) => {
                    e.log_warn();
                    warn!(comment_id = %comment.id, "Thread fetch failed, skipping comment");
                }
            }
        }

        let drafted = self.draft_replies(tenant, threads).await;
        self.persist(tenant, account, drafted, report).await
    }

    /// Drops our own comments, deleted authors, repeats within the fetch and
    /// comments that already have an interaction.
    async fn new_comments(
        &self,
        tenant: &Tenant,
        account: &RedditAccount,
        comments: Vec<InboxComment>,
    ) -> Result<Vec<InboxComment>, CoreError> {
        let mut seen = HashSet::new();
        let candidates: Vec<InboxComment> = comments
            .into_iter()
            .filter(|c| !c.is_from_deleted_author())
            .filter(|c| !c.author.eq_ignore_ascii_case(&account.username))
            .filter(|c| seen.insert(c.id.clone()))
            .collect();

        if candidates.is_empty() {
            return Ok(candidates);
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let existing = self
            .store
            .existing_interaction_comment_ids(&tenant.profile.user_id, &ids)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|c| !existing.contains(&c.id))
            .collect())
    }

    /// Generations run concurrently; a failed one only drops its own comment.
    async fn draft_replies(
        &self,
        tenant: &Tenant,
        threads: Vec<FetchedThread>,
    ) -> Vec<(FetchedThread, String)> {
        let profile = &tenant.profile;
        let results: Vec<(FetchedThread, Result<String, CoreError>)> = stream::iter(threads)
            .map(|thread| async move {
                let target = ReplyTarget {
                    comment_id: &thread.comment.id,
                    author: &thread.comment.author,
                    body: &thread.comment.body,
                };
                let draft = self.replies.generate(profile, &thread.context, target).await;
                (thread, draft)
            })
            .buffer_unordered(self.settings.reply_concurrency.max(1))
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(thread, draft)| match draft {
                Ok(draft) => Some((thread, draft)),
                Err(e) => {
                    e.log_warn();
                    warn!(
                        comment_id = %thread.comment.id,
                        "Reply generation failed, skipping comment"
                    );
                    None
                }
            })
            .collect()
    }

    async fn persist(
        &self,
        tenant: &Tenant,
        account: &RedditAccount,
        drafted: Vec<(FetchedThread, String)>,
        report: &mut InboxRunReport,
    ) -> Result<(), CoreError> {
        let profile = &tenant.profile;
        let now = Utc::now();
        let (status, scheduled_for) = if profile.auto_reply_enabled {
            (
                InteractionStatus::Scheduled,
                Some(now + Duration::minutes(profile.reply_delay_minutes.max(0))),
            )
        } else {
            (InteractionStatus::New, None)
        };

        for (thread, draft) in drafted {
            let FetchedThread { comment, context } = thread;
            let interaction = Interaction {
                id: Uuid::new_v4(),
                user_id: profile.user_id.clone(),
                reddit_account_id: account.id.clone(),
                reddit_comment_id: comment.id,
                reddit_post_id: comment.post_id,
                subreddit: if comment.subreddit.is_empty() {
                    context.post.subreddit.clone()
                } else {
                    comment.subreddit
                },
                author: comment.author,
                their_content: comment.body,
                our_content: draft,
                thread_context: context,
                interaction_type: InteractionType::CommentReply,
                status,
                error_message: None,
                scheduled_for,
                created_at: now,
                updated_at: now,
            };

            // Another run may have stored the same comment since the dedup check
            if self.store.insert_interaction_with_lead(&interaction).await? {
                report.total_interactions += 1;
            } else {
                debug!(comment_id = %interaction.reddit_comment_id, "Interaction already stored");
            }
        }

        Ok(())
    }
}
