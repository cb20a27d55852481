use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A submission as fetched from a subreddit listing, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub url: String,
    pub permalink: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
}

/// Fixed taxonomy assigned by the category classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostCategory {
    HelpRequest,
    RecommendationRequest,
    PainPoint,
    Comparison,
    FeedbackRequest,
    Discussion,
    News,
    Showcase,
    Tutorial,
    JobPosting,
    Humor,
    Other,
}

impl PostCategory {
    pub const ALL: [PostCategory; 12] = [
        PostCategory::HelpRequest,
        PostCategory::RecommendationRequest,
        PostCategory::PainPoint,
        PostCategory::Comparison,
        PostCategory::FeedbackRequest,
        PostCategory::Discussion,
        PostCategory::News,
        PostCategory::Showcase,
        PostCategory::Tutorial,
        PostCategory::JobPosting,
        PostCategory::Humor,
        PostCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostCategory::HelpRequest => "help_request",
            PostCategory::RecommendationRequest => "recommendation_request",
            PostCategory::PainPoint => "pain_point",
            PostCategory::Comparison => "comparison",
            PostCategory::FeedbackRequest => "feedback_request",
            PostCategory::Discussion => "discussion",
            PostCategory::News => "news",
            PostCategory::Showcase => "showcase",
            PostCategory::Tutorial => "tutorial",
            PostCategory::JobPosting => "job_posting",
            PostCategory::Humor => "humor",
            PostCategory::Other => "other",
        }
    }

    /// Lenient parse; anything outside the taxonomy becomes `Other`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .unwrap_or(PostCategory::Other)
    }
}

impl fmt::Display for PostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Reddit submission seen by the pipeline, with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPost {
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub url: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
    pub approved: bool,
    pub spam_confidence: f64,
    pub category: Option<PostCategory>,
    pub summary: Option<String>,
}

impl DiscoveredPost {
    pub fn from_post(post: RedditPost, approved: bool, spam_confidence: f64) -> Self {
        Self {
            reddit_id: post.id,
            subreddit: post.subreddit,
            title: post.title,
            body: post.body,
            author: post.author,
            url: post.url,
            score: post.score,
            num_comments: post.num_comments,
            created_utc: post.created_utc,
            approved,
            spam_confidence,
            category: None,
            summary: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedSubreddit {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    New,
    Scheduled,
    Posted,
    Ignored,
    Failed,
}

impl InteractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionStatus::New => "new",
            InteractionStatus::Scheduled => "scheduled",
            InteractionStatus::Posted => "posted",
            InteractionStatus::Ignored => "ignored",
            InteractionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(InteractionStatus::New),
            "scheduled" => Some(InteractionStatus::Scheduled),
            "posted" => Some(InteractionStatus::Posted),
            "ignored" => Some(InteractionStatus::Ignored),
            "failed" => Some(InteractionStatus::Failed),
            _ => None,
        }
    }

    /// `new -> scheduled -> posted`, `new -> ignored`, and any live state `-> failed`.
    pub fn can_transition_to(&self, next: InteractionStatus) -> bool {
        use InteractionStatus::*;
        matches!(
            (self, next),
            (New, Scheduled) | (New, Ignored) | (Scheduled, Posted)
        ) || (next == Failed && *self != Failed)
    }
}

impl fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    CommentReply,
    PostReply,
    Dm,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::CommentReply => "comment_reply",
            InteractionType::PostReply => "post_reply",
            InteractionType::Dm => "dm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "comment_reply" => Some(InteractionType::CommentReply),
            "post_reply" => Some(InteractionType::PostReply),
            "dm" => Some(InteractionType::Dm),
            _ => None,
        }
    }
}

/// Snapshot of one comment and its replies, bounded in depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadComment {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    pub depth: u32,
    #[serde(default)]
    pub children: Vec<ThreadComment>,
}

impl ThreadComment {
    pub fn find(&self, id: &str) -> Option<&ThreadComment> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ThreadComment::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadPost {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub url: String,
}

/// Parent post plus comment tree, as captured when the reply was discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadContext {
    pub post: ThreadPost,
    pub comments: Vec<ThreadComment>,
    /// The inbox comment this context was fetched for.
    pub target_comment_id: String,
    /// Set when branches deeper than the depth limit were dropped.
    #[serde(default)]
    pub truncated: bool,
}

impl ThreadContext {
    pub fn find_comment(&self, id: &str) -> Option<&ThreadComment> {
        self.comments.iter().find_map(|c| c.find(id))
    }

    pub fn comment_count(&self) -> usize {
        self.comments.iter().map(ThreadComment::count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub user_id: String,
    pub reddit_account_id: String,
    pub reddit_comment_id: String,
    pub reddit_post_id: String,
    pub subreddit: String,
    pub author: String,
    pub their_content: String,
    pub our_content: String,
    pub thread_context: ThreadContext,
    pub interaction_type: InteractionType,
    pub status: InteractionStatus,
    pub error_message: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Archived,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(LeadStatus::New),
            "contacted" => Some(LeadStatus::Contacted),
            "qualified" => Some(LeadStatus::Qualified),
            "archived" => Some(LeadStatus::Archived),
            _ => None,
        }
    }
}

/// Aggregate of interactions with one external author, for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub user_id: String,
    pub author: String,
    pub score: Option<u8>,
    pub buying_signals: Vec<String>,
    pub pain_points: Vec<String>,
    pub conversation_summary: Option<String>,
    pub status: LeadStatus,
    pub interaction_count: i64,
    pub last_interaction_at: DateTime<Utc>,
    pub scored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeadScore {
    pub lead_id: i64,
    /// Clamped to 0..=100.
    pub score: u8,
    pub buying_signals: Vec<String>,
    pub pain_points: Vec<String>,
    pub summary: String,
}

/// Per-tenant targeting configuration, owned by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub user_id: String,
    pub product_name: String,
    pub product_description: String,
    pub target_audience: String,
    pub keywords: Vec<String>,
    pub expertise: Vec<String>,
    pub auto_reply_enabled: bool,
    pub reply_delay_minutes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccountToken {
    const REFRESH_SKEW_SECS: i64 = 60;

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(Self::REFRESH_SKEW_SECS) <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedditAccount {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl RedditAccount {
    pub fn token(&self) -> Option<AccountToken> {
        let access_token = self.access_token.clone().filter(|t| !t.is_empty())?;
        Some(AccountToken {
            access_token,
            refresh_token: self.refresh_token.clone(),
            expires_at: self.token_expires_at,
        })
    }
}

/// A user with an active profile and its active Reddit accounts.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub profile: TenantProfile,
    pub accounts: Vec<RedditAccount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_labels_round_trip() {
        for category in PostCategory::ALL {
            assert_eq!(PostCategory::from_label(category.as_str()), category);
        }
        assert_eq!(
            PostCategory::from_label("Recommendation Request"),
            PostCategory::RecommendationRequest
        );
        assert_eq!(PostCategory::from_label("spam"), PostCategory::Other);
    }

    #[test]
    fn test_interaction_state_machine() {
        use InteractionStatus::*;
        assert!(New.can_transition_to(Scheduled));
        assert!(New.can_transition_to(Ignored));
        assert!(Scheduled.can_transition_to(Posted));
        assert!(Scheduled.can_transition_to(Failed));
        assert!(Posted.can_transition_to(Failed));

        assert!(!New.can_transition_to(Posted));
        assert!(!Ignored.can_transition_to(Scheduled));
        assert!(!Posted.can_transition_to(New));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_token_refresh_window() {
        let now = Utc::now();
        let token = AccountToken {
            access_token: "t".to_string(),
            refresh_token: Some("r".to_string()),
            expires_at: Some(now + Duration::seconds(30)),
        };
        assert!(token.needs_refresh(now));

        let fresh = AccountToken {
            expires_at: Some(now + Duration::hours(1)),
            ..token.clone()
        };
        assert!(!fresh.needs_refresh(now));
    }

    #[test]
    fn test_account_without_access_token_has_no_token() {
        let account = RedditAccount {
            id: "acc".to_string(),
            user_id: "u".to_string(),
            username: "me".to_string(),
            access_token: Some(String::new()),
            refresh_token: None,
            token_expires_at: None,
        };
        assert!(account.token().is_none());
    }

    #[test]
    fn test_thread_lookup() {
        let leaf = ThreadComment {
            id: "c2".to_string(),
            author: "b".to_string(),
            body: "reply".to_string(),
            score: 1,
            created_utc: Utc::now(),
            depth: 1,
            children: vec![],
        };
        let root = ThreadComment {
            id: "c1".to_string(),
            author: "a".to_string(),
            body: "top".to_string(),
            score: 3,
            created_utc: Utc::now(),
            depth: 0,
            children: vec![leaf],
        };
        let context = ThreadContext {
            post: ThreadPost {
                id: "p".to_string(),
                subreddit: "rust".to_string(),
                title: "t".to_string(),
                body: String::new(),
                author: "op".to_string(),
                url: String::new(),
            },
            comments: vec![root],
            target_comment_id: "c2".to_string(),
            truncated: false,
        };

        assert_eq!(context.comment_count(), 2);
        assert_eq!(context.find_comment("c2").map(|c| c.depth), Some(1));
        assert!(context.find_comment("missing").is_none());
    }
}
