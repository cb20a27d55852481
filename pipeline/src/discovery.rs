use llm_interface::{CategoryClassifier, SpamFilter};
use reddit_client::{RedditApi, TokenProvider};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use subscout_core::{CoreError, DiscoveredPost, ErrorExt, RedditPost, TrackedSubreddit};
use tracing::{debug, info, warn};

use database::Store;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub success: bool,
    pub subreddits_scanned: usize,
    pub failed_subreddits: usize,
    pub posts_fetched: usize,
    pub posts_already_seen: usize,
    pub posts_approved: usize,
    pub posts_rejected: usize,
    /// Posts that got a fallback verdict because their spam batch failed.
    pub spam_fallbacks: usize,
    pub category_fallbacks: usize,
    pub posts_persisted: u64,
}

impl fmt::Display for DiscoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Discovery: {} subreddits ({} failed), {} posts fetched, {} already seen, \
             {} approved, {} rejected, {} persisted (fallbacks: {} spam, {} category)",
            self.subreddits_scanned,
            self.failed_subreddits,
            self.posts_fetched,
            self.posts_already_seen,
            self.posts_approved,
            self.posts_rejected,
            self.posts_persisted,
            self.spam_fallbacks,
            self.category_fallbacks,
        )
    }
}

/// Pulls new posts from every tracked subreddit, runs them through the spam
/// filter and the category classifier, and stores the result.
pub struct DiscoveryOrchestrator {
    store: Arc<dyn Store>,
    reddit: Arc<dyn RedditApi>,
    tokens: Arc<dyn TokenProvider>,
    spam_filter: SpamFilter,
    classifier: CategoryClassifier,
    listing_limit: u32,
}

impl DiscoveryOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        reddit: Arc<dyn RedditApi>,
        tokens: Arc<dyn TokenProvider>,
        spam_filter: SpamFilter,
        classifier: CategoryClassifier,
        listing_limit: u32,
    ) -> Self {
        Self {
            store,
            reddit,
            tokens,
            spam_filter,
            classifier,
            listing_limit,
        }
    }

    /// Fails only when the run cannot start. A subreddit that fails is logged,
    /// counted and skipped.
    pub async fn run(&self) -> Result<DiscoveryReport, CoreError> {
        let subreddits = self.store.tracked_subreddits().await?;
        let mut report = DiscoveryReport::default();

        if subreddits.is_empty() {
            info!("No tracked subreddits, nothing to discover");
            report.success = true;
            return Ok(report);
        }

        let token = self.tokens.app_token().await?;
        info!("Starting discovery across {} subreddits", subreddits.len());

        for subreddit in &subreddits {
            report.subreddits_scanned += 1;
            if let Err(e) = self.discover_subreddit(&token, subreddit, &mut report).await {
                e.log_warn();
                warn!(subreddit = %subreddit.name, "Discovery failed for subreddit, continuing");
                report.failed_subreddits += 1;
            }
        }

        report.success = true;
        info!("{}", report);
        Ok(report)
    }

    async fn discover_subreddit(
        &self,
        token: &str,
        subreddit: &TrackedSubreddit,
        report: &mut DiscoveryReport,
    ) -> Result<(), CoreError> {
        let fetched = self
            .reddit
            .subreddit_new_posts(token, &subreddit.name, self.listing_limit)
            .await?;
        report.posts_fetched += fetched.len();

        let posts = self.unseen_posts(fetched).await?;
        report.posts_already_seen += posts.skipped;
        if posts.fresh.is_empty() {
            debug!(subreddit = %subreddit.name, "No new posts");
            return Ok(());
        }

        let classified = self.classify(posts.fresh, report).await;
        let written = self.store.upsert_posts(&classified).await?;
        report.posts_persisted += written;

        info!(
            subreddit = %subreddit.name,
            new_posts = classified.len(),
            written,
            "Subreddit processed"
        );
        Ok(())
    }

    /// Drops posts already in storage, and repeats within the same listing.
    async fn unseen_posts(&self, fetched: Vec<RedditPost>) -> Result<UnseenPosts, CoreError> {
        let total = fetched.len();
        let mut seen_in_listing = HashSet::new();
        let fetched: Vec<RedditPost> = fetched
            .into_iter()
            .filter(|post| seen_in_listing.insert(post.id.clone()))
            .collect();

        let ids: Vec<String> = fetched.iter().map(|p| p.id.clone()).collect();
        let stored = self.store.existing_post_ids(&ids).await?;

        let fresh: Vec<RedditPost> = fetched
            .into_iter()
            .filter(|post| !stored.contains(&post.id))
            .collect();

        Ok(UnseenPosts {
            skipped: total - fresh.len(),
            fresh,
        })
    }

    /// Spam filter first; only approved posts are categorized. Rejected posts
    /// are kept for auditing with no category.
    async fn classify(
        &self,
        posts: Vec<RedditPost>,
        report: &mut DiscoveryReport,
    ) -> Vec<DiscoveredPost> {
        let verdicts = self.spam_filter.filter(&posts).await;
        report.spam_fallbacks += verdicts.fallback_items();

        let (approved, rejected): (Vec<_>, Vec<_>) = posts
            .into_iter()
            .zip(verdicts.results)
            .partition(|(_, verdict)| verdict.approved);
        report.posts_approved += approved.len();
        report.posts_rejected += rejected.len();

        let approved_posts: Vec<RedditPost> =
            approved.iter().map(|(post, _)| post.clone()).collect();
        let categories = self.classifier.classify(&approved_posts).await;
        report.category_fallbacks += categories.fallback_items();

        let mut discovered: Vec<DiscoveredPost> = approved
            .into_iter()
            .zip(categories.results)
            .map(|((post, verdict), assignment)| {
                let mut discovered = DiscoveredPost::from_post(post, true, verdict.confidence);
                discovered.category = Some(assignment.category);
                discovered.summary = Some(assignment.summary);
                discovered
            })
            .collect();

        discovered.extend(
            rejected
                .into_iter()
                .map(|(post, verdict)| DiscoveredPost::from_post(post, false, verdict.confidence)),
        );
        discovered
    }
}

struct UnseenPosts {
    fresh: Vec<RedditPost>,
    skipped: usize,
}
