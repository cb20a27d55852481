use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use subscout_core::{
    AccountToken, CoreError, DiscoveredPost, Interaction, InteractionStatus, Lead, LeadScore,
    Tenant, TrackedSubreddit,
};
use uuid::Uuid;

/// Typed reads and idempotent writes against the externally owned tables.
#[async_trait]
pub trait Store: Send + Sync {
    async fn tracked_subreddits(&self) -> Result<Vec<TrackedSubreddit>, CoreError>;

    /// Which of `reddit_ids` are already stored.
    async fn existing_post_ids(&self, reddit_ids: &[String]) -> Result<HashSet<String>, CoreError>;

    /// Insert new posts; an existing `reddit_id` only gets its classification
    /// fields overwritten. Returns rows written.
    async fn upsert_posts(&self, posts: &[DiscoveredPost]) -> Result<u64, CoreError>;

    /// Active profiles that have at least one active Reddit account.
    async fn active_tenants(&self) -> Result<Vec<Tenant>, CoreError>;

    async fn update_account_token(
        &self,
        account_id: &str,
        token: &AccountToken,
    ) -> Result<(), CoreError>;

    /// Which of `comment_ids` already have an interaction for this user.
    async fn existing_interaction_comment_ids(
        &self,
        user_id: &str,
        comment_ids: &[String],
    ) -> Result<HashSet<String>, CoreError>;

    /// Returns how many were new; duplicates are skipped silently.
    async fn insert_interactions(&self, interactions: &[Interaction]) -> Result<u64, CoreError>;

    /// Insert one interaction and upsert its author's lead in a single
    /// transaction. `false` when the comment already had an interaction.
    async fn insert_interaction_with_lead(
        &self,
        interaction: &Interaction,
    ) -> Result<bool, CoreError>;

    async fn get_interaction(&self, id: Uuid) -> Result<Option<Interaction>, CoreError>;

    /// Move an interaction along its state machine. Illegal moves, and moves
    /// that lose a race with another writer, are `CoreError::InvalidTransition`.
    async fn transition_interaction(
        &self,
        id: Uuid,
        next: InteractionStatus,
        error_message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// Create the (user, author) lead or bump its interaction count. Returns the lead id.
    async fn record_lead_interaction(
        &self,
        user_id: &str,
        author: &str,
        at: DateTime<Utc>,
    ) -> Result<i64, CoreError>;

    /// Unscored leads and leads with interactions newer than their score.
    async fn leads_needing_score(&self, limit: u32) -> Result<Vec<Lead>, CoreError>;

    /// Interactions with the lead's author, oldest first.
    async fn lead_conversation(&self, lead: &Lead) -> Result<Vec<Interaction>, CoreError>;

    async fn update_lead_score(
        &self,
        score: &LeadScore,
        scored_at: DateTime<Utc>,
    ) -> Result<(), CoreError>;
}
