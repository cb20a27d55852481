use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subscout_core::{CoreError, PostCategory, RedditPost};

use crate::batch::{classify_in_batches, BatchConfig, BatchOutcome, Identified};
use crate::provider::{complete_structured, CompletionRequest, LlmProvider};
use crate::text::truncate_for_prompt;

const SYSTEM_PROMPT: &str = "You categorize Reddit posts. For every post pick the single best \
category from the allowed list and write a one-sentence summary (at most 25 words) of what the \
author wants. Use \"other\" when nothing fits. Return exactly one entry per input post and copy \
each post's id unchanged.";

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAssignment {
    pub id: String,
    pub category: PostCategory,
    pub summary: String,
}

impl CategoryAssignment {
    pub fn fallback(id: &str) -> Self {
        Self {
            id: id.to_string(),
            category: PostCategory::Other,
            summary: String::new(),
        }
    }
}

impl Identified for CategoryAssignment {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CategoryResponse {
    pub posts: Vec<CategoryEntry>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CategoryEntry {
    /// The id of the post
    pub id: String,
    /// One of the allowed categories
    #[schemars(schema_with = "category_schema")]
    pub category: String,
    /// One-sentence summary of the post
    pub summary: String,
}

impl From<CategoryEntry> for CategoryAssignment {
    fn from(entry: CategoryEntry) -> Self {
        Self {
            category: PostCategory::from_label(&entry.category),
            summary: entry.summary.trim().to_string(),
            id: entry.id,
        }
    }
}

fn category_schema(_: &mut SchemaGenerator) -> Schema {
    SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(
            PostCategory::ALL
                .iter()
                .map(|c| serde_json::Value::String(c.as_str().to_string()))
                .collect(),
        ),
        ..Default::default()
    }
    .into()
}

#[derive(Debug, Serialize)]
struct PostForCategory<'a> {
    id: &'a str,
    subreddit: &'a str,
    title: &'a str,
    body: String,
}

pub struct CategoryClassifier {
    provider: Arc<dyn LlmProvider>,
    config: BatchConfig,
    max_input_chars: usize,
}

impl CategoryClassifier {
    pub const DEFAULT_BATCH_SIZE: usize = 10;
    pub const DEFAULT_CONCURRENCY: usize = 10;

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

    /// Callers pass approved posts only.
    pub async fn classify(&self, posts: &[RedditPost]) -> BatchOutcome<CategoryAssignment> {
        classify_in_batches(
            "categorize",
            posts,
            &self.config,
            |batch| self.classify_batch(batch),
            |post| CategoryAssignment::fallback(&post.id),
        )
        .await
    }

    async fn classify_batch(
        &self,
        batch: &[RedditPost],
    ) -> Result<Vec<CategoryAssignment>, CoreError> {
        let posts: Vec<PostForCategory> = batch
            .iter()
            .map(|post| PostForCategory {
                id: &post.id,
                subreddit: &post.subreddit,
                title: &post.title,
                body: truncate_for_prompt(&post.body, self.max_input_chars),
            })
            .collect();

        let labels: Vec<&str> = PostCategory::ALL.iter().map(|c| c.as_str()).collect();
        let user_prompt = format!(
            "Allowed categories: {}\n\nPosts:\n{}",
            labels.join(", "),
            serde_json::to_string_pretty(&posts)?
        );

        let request = CompletionRequest::structured::<CategoryResponse>(
            "categorize",
            SYSTEM_PROMPT,
            user_prompt,
        );
        let response: CategoryResponse =
            complete_structured(self.provider.as_ref(), &request).await?;

        Ok(response.posts.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructuredOutput;

    #[test]
    fn test_category_schema_lists_all_labels() {
        let schema = CategoryResponse::openai_schema();
        let labels = schema
            .pointer("/properties/posts/items/properties/category/enum")
            .and_then(|v| v.as_array())
            .unwrap();
        assert_eq!(labels.len(), 12);
        assert!(labels.iter().any(|l| l == "pain_point"));
        assert!(labels.iter().any(|l| l == "other"));
    }

    #[test]
    fn test_entry_conversion_is_lenient() {
        let entry = CategoryEntry {
            id: "p1".to_string(),
            category: "not-a-category".to_string(),
            summary: "  Wants a CRM.  ".to_string(),
        };
        let assignment: CategoryAssignment = entry.into();
        assert_eq!(assignment.category, PostCategory::Other);
        assert_eq!(assignment.summary, "Wants a CRM.");
    }
}
