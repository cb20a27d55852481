use std::fmt::Write as _;
use std::sync::Arc;
use subscout_core::{CoreError, LlmError, TenantProfile, ThreadComment, ThreadContext};
use tracing::debug;

use crate::provider::{CompletionRequest, LlmProvider};
use crate::text::truncate_for_prompt;

const MAX_COMMENT_CHARS: usize = 600;
const MAX_REPLY_TOKENS: u32 = 400;

/// The inbox comment being answered.
#[derive(Debug, Clone, Copy)]
pub struct ReplyTarget<'a> {
    pub comment_id: &'a str,
    pub author: &'a str,
    pub body: &'a str,
}

/// Drafts a reply to one inbox comment, grounded in the tenant's product profile.
pub struct ReplyGenerator {
    provider: Arc<dyn LlmProvider>,
    max_input_chars: usize,
}

impl ReplyGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, max_input_chars: usize) -> Self {
        Self {
            provider,
            max_input_chars,
        }
    }

    /// Single attempt. An empty draft is an error.
    pub async fn generate(
        &self,
        profile: &TenantProfile,
        context: &ThreadContext,
        target: ReplyTarget<'_>,
    ) -> Result<String, CoreError> {
        let request = CompletionRequest::text(
            system_prompt(profile),
            self.user_prompt(context, target),
        )
        .with_temperature(0.7)
        .with_max_tokens(MAX_REPLY_TOKENS);

        let draft = self.provider.complete(&request).await?;
        let draft = clean_draft(&draft);
        if draft.is_empty() {
            return Err(LlmError::InvalidResponseFormat {
                provider: self.provider.name().to_string(),
                details: "empty reply draft".to_string(),
            }
            .into());
        }

        debug!(comment_id = target.comment_id, chars = draft.len(), "Generated reply draft");
        Ok(draft)
    }

    fn user_prompt(&self, context: &ThreadContext, target: ReplyTarget<'_>) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Subreddit: r/{}", context.post.subreddit);
        let _ = writeln!(prompt, "Post title: {}", context.post.title);
        let _ = writeln!(
            prompt,
            "Post body: {}",
            truncate_for_prompt(&context.post.body, self.max_input_chars)
        );
        prompt.push_str(
            "\nConversation (indented by reply depth, >> marks the comment to answer):\n",
        );
        for comment in &context.comments {
            render_comment(&mut prompt, comment, target.comment_id);
        }
        if context.truncated {
            prompt.push_str("(deeper replies omitted)\n");
        }
        let _ = write!(
            prompt,
            "\nWrite a reply to u/{}, who wrote:\n{}",
            target.author,
            truncate_for_prompt(target.body, self.max_input_chars)
        );
        prompt
    }
}

fn system_prompt(profile: &TenantProfile) -> String {
    let mut prompt = format!(
        "You are helping the team behind {} reply on Reddit. {}\n\
         Their audience: {}.",
        profile.product_name, profile.product_description, profile.target_audience
    );
    if !profile.expertise.is_empty() {
        let _ = write!(prompt, "\nAreas of expertise: {}.", profile.expertise.join(", "));
    }
    prompt.push_str(
        "\nWrite a short, friendly, genuinely helpful reply in plain text. Answer the person \
         first. Mention the product only if it directly helps, never as a sales pitch. No \
         hashtags, no links unless asked, no sign-off.",
    );
    prompt
}

fn render_comment(prompt: &mut String, comment: &ThreadComment, target_id: &str) {
    let marker = if comment.id == target_id { ">> " } else { "" };
    let _ = writeln!(
        prompt,
        "{}{}u/{}: {}",
        "  ".repeat(comment.depth as usize),
        marker,
        comment.author,
        truncate_for_prompt(&comment.body, MAX_COMMENT_CHARS).replace('\n', " ")
    );
    for child in &comment.children {
        render_comment(prompt, child, target_id);
    }
}

/// Strip whitespace and wrapping quotes the model sometimes adds.
fn clean_draft(draft: &str) -> String {
    let trimmed = draft.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}
