use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subscout_core::{CoreError, RedditPost};

use crate::batch::{classify_in_batches, BatchConfig, BatchOutcome, Identified};
use crate::provider::{complete_structured, CompletionRequest, LlmProvider};
use crate::text::truncate_for_prompt;

const SYSTEM_PROMPT: &str = "You review Reddit posts for a community monitoring tool. \
For every post decide whether it is genuine discussion worth reading (approved = true) or \
promotional spam, self-advertising, affiliate content, low-effort bait or bot output \
(approved = false). Give your confidence between 0 and 1. Return exactly one verdict per \
input post and copy each post's id unchanged.";

/// Verdict for one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpamVerdict {
    /// The id of the post this verdict is for
    pub id: String,
    /// true if the post is genuine, false if it is spam or promotion
    pub approved: bool,
    /// Confidence in the verdict, 0.0 to 1.0
    pub confidence: f64,
}

impl SpamVerdict {
    pub const FALLBACK_CONFIDENCE: f64 = 0.5;

    /// Used when the model could not be reached. Posts are let through rather
    /// than silently dropped.
    pub fn fallback(id: &str) -> Self {
        Self {
            id: id.to_string(),
            approved: true,
            confidence: Self::FALLBACK_CONFIDENCE,
        }
    }
}

impl Identified for SpamVerdict {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpamFilterResponse {
    pub posts: Vec<SpamVerdict>,
}

#[derive(Debug, Serialize)]
struct PostForReview<'a> {
    id: &'a str,
    subreddit: &'a str,
    title: &'a str,
    body: String,
}

pub struct SpamFilter {
    provider: Arc<dyn LlmProvider>,
    config: BatchConfig,
    max_input_chars: usize,
}

impl SpamFilter {
    pub const DEFAULT_BATCH_SIZE: usize = 10;
    pub const DEFAULT_CONCURRENCY: usize = 50;

    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: BatchConfig,
        max_input_chars: usize,
    ) -> Self {
        Self {
            provider,
            config,
            max_input_chars,
        }
    }

    pub fn with_defaults(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(
            provider,
            BatchConfig::new(Self::DEFAULT_BATCH_SIZE, Self::DEFAULT_CONCURRENCY),
            1250,
        )
    }

    /// One verdict per post, in input order. Never fails.
    pub async fn filter(&self, posts: &[RedditPost]) -> BatchOutcome<SpamVerdict> {
        classify_in_batches(
            "spam_filter",
            posts,
            &self.config,
            |batch| self.review_batch(batch),
            |post| SpamVerdict::fallback(&post.id),
        )
        .await
    }

    async fn review_batch(&self, batch: &[RedditPost]) -> Result<Vec<SpamVerdict>, CoreError> {
        let request = CompletionRequest::structured::<SpamFilterResponse>(
            "spam_filter",
            SYSTEM_PROMPT,
            self.build_prompt(batch)?,
        );
        let response: SpamFilterResponse =
            complete_structured(self.provider.as_ref(), &request).await?;

        Ok(response
            .posts
            .into_iter()
            .map(|mut verdict| {
                verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
                verdict
            })
            .collect())
    }

    fn build_prompt(&self, batch: &[RedditPost]) -> Result<String, CoreError> {
        let posts: Vec<PostForReview> = batch
            .iter()
            .map(|post| PostForReview {
                id: &post.id,
                subreddit: &post.subreddit,
                title: &post.title,
                body: truncate_for_prompt(&post.body, self.max_input_chars),
            })
            .collect();
        Ok(format!(
            "Review these posts:\n{}",
            serde_json::to_string_pretty(&posts)?
        ))
    }
}
