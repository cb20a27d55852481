use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subscout_core::{RedditApiError, RedditPost, ThreadComment, ThreadContext, ThreadPost};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub subreddit: String,
    pub url: String,
    pub permalink: String,
    pub created_utc: f64,
    pub score: i64,
    pub num_comments: i64,
    pub stickied: bool,
    pub over_18: bool,
}

impl From<RedditPostData> for RedditPost {
    fn from(post_data: RedditPostData) -> Self {
        Self {
            id: post_data.id,
            subreddit: post_data.subreddit,
            title: post_data.title,
            body: post_data.selftext,
            author: post_data.author,
            url: post_data.url,
            permalink: post_data.permalink,
            score: post_data.score,
            num_comments: post_data.num_comments,
            created_utc: timestamp_to_utc(post_data.created_utc),
        }
    }
}

/// A `t1` entry from `/message/comments`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxMessageData {
    pub id: String,
    pub name: String,
    pub author: Option<String>,
    pub body: String,
    pub subreddit: Option<String>,
    pub link_title: Option<String>,
    pub link_id: Option<String>,
    pub parent_id: Option<String>,
    pub context: String,
    pub created_utc: f64,
    pub new: bool,
    pub was_comment: bool,
}

/// A comment reply that landed in an account's inbox.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxComment {
    pub id: String,
    pub fullname: String,
    pub post_id: String,
    pub parent_id: Option<String>,
    pub author: String,
    pub body: String,
    pub subreddit: String,
    pub link_title: String,
    pub created_utc: DateTime<Utc>,
    pub is_new: bool,
}

impl InboxComment {
    pub const DELETED_AUTHOR: &'static str = "[deleted]";

    /// Returns `None` for entries that are not comments or whose post can't be located.
    pub fn from_message(message: InboxMessageData) -> Option<Self> {
        if !message.was_comment && !message.name.starts_with("t1_") {
            return None;
        }
        let post_id = message
            .link_id
            .as_deref()
            .map(|id| id.trim_start_matches("t3_").to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| post_id_from_context(&message.context))?;

        Some(Self {
            fullname: if message.name.is_empty() {
                format!("t1_{}", message.id)
            } else {
                message.name
            },
            id: message.id,
            post_id,
            parent_id: message.parent_id,
            author: message
                .author
                .unwrap_or_else(|| Self::DELETED_AUTHOR.to_string()),
            body: message.body,
            subreddit: message.subreddit.unwrap_or_default(),
            link_title: message.link_title.unwrap_or_default(),
            created_utc: timestamp_to_utc(message.created_utc),
            is_new: message.new,
        })
    }

    pub fn is_from_deleted_author(&self) -> bool {
        self.author == Self::DELETED_AUTHOR
    }
}

/// `/r/{sub}/comments/{post_id}/{slug}/{comment_id}/?context=3` -> `post_id`
pub fn post_id_from_context(context: &str) -> Option<String> {
    let mut segments = context.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == "comments")?;
    segments
        .next()
        .map(|s| s.split('?').next().unwrap_or(s).to_string())
        .filter(|s| !s.is_empty())
}

pub fn timestamp_to_utc(created_utc: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(created_utc as i64, 0)
        .single()
        .unwrap_or_default()
}

/// Build a [`ThreadContext`] from a `/comments/{post}` response
/// (`[post listing, comment listing]`). Branches below `max_depth` are dropped
/// and flagged through `truncated`; `more` stubs are skipped.
pub fn parse_thread(
    value: &Value,
    target_comment_id: &str,
    max_depth: u32,
) -> Result<ThreadContext, RedditApiError> {
    let parts = value
        .as_array()
        .filter(|parts| parts.len() >= 2)
        .ok_or_else(|| RedditApiError::InvalidResponse {
            details: "thread response is not a [post, comments] pair".to_string(),
        })?;

    let post_value = parts[0]
        .pointer("/data/children/0/data")
        .cloned()
        .ok_or_else(|| RedditApiError::InvalidResponse {
            details: "thread response has no post".to_string(),
        })?;
    let post: RedditPostData =
        serde_json::from_value(post_value).map_err(|e| RedditApiError::InvalidResponse {
            details: format!("failed to parse thread post: {e}"),
        })?;

    let mut truncated = false;
    let comments = parse_comment_listing(&parts[1], 0, max_depth, &mut truncated);

    Ok(ThreadContext {
        post: ThreadPost {
            id: post.id,
            subreddit: post.subreddit,
            title: post.title,
            body: post.selftext,
            author: post.author,
            url: post.url,
        },
        comments,
        target_comment_id: target_comment_id.to_string(),
        truncated,
    })
}

fn parse_comment_listing(
    listing: &Value,
    depth: u32,
    max_depth: u32,
    truncated: &mut bool,
) -> Vec<ThreadComment> {
    let Some(children) = listing.pointer("/data/children").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut comments = Vec::with_capacity(children.len());
    for child in children {
        if child.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let Some(data) = child.get("data") else {
            continue;
        };

        let replies = data.get("replies").filter(|r| r.is_object());
        let children = match replies {
            Some(replies) if depth + 1 < max_depth => {
                parse_comment_listing(replies, depth + 1, max_depth, truncated)
            }
            Some(replies) => {
                let has_replies = replies
                    .pointer("/data/children")
                    .and_then(Value::as_array)
                    .is_some_and(|c| !c.is_empty());
                if has_replies {
                    *truncated = true;
                }
                Vec::new()
            }
            None => Vec::new(),
        };

        comments.push(ThreadComment {
            id: str_field(data, "id"),
            author: data
                .get("author")
                .and_then(Value::as_str)
                .unwrap_or(InboxComment::DELETED_AUTHOR)
                .to_string(),
            body: str_field(data, "body"),
            score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
            created_utc: timestamp_to_utc(
                data.get("created_utc").and_then(Value::as_f64).unwrap_or(0.0),
            ),
            depth,
            children,
        });
    }
    comments
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(id: &str, author: &str, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "author": author,
                "body": format!("body of {id}"),
                "score": 2,
                "created_utc": 1_700_000_000.0,
                "replies": replies
            }
        })
    }

    fn listing(children: Vec<Value>) -> Value {
        json!({ "kind": "Listing", "data": { "children": children } })
    }

    fn thread(comments: Vec<Value>) -> Value {
        json!([
            listing(vec![json!({
                "kind": "t3",
                "data": {
                    "id": "post1",
                    "title": "Which CRM do you use?",
                    "selftext": "Looking for something simple",
                    "author": "op",
                    "subreddit": "smallbusiness",
                    "url": "https://reddit.com/r/smallbusiness/comments/post1"
                }
            })]),
            listing(comments)
        ])
    }

    #[test]
    fn test_parse_nested_thread() {
        let value = thread(vec![
            comment(
                "c1",
                "alice",
                listing(vec![comment("c2", "bob", json!(""))]),
            ),
            json!({ "kind": "more", "data": { "children": ["c9"] } }),
        ]);

        let context = parse_thread(&value, "c2", 8).unwrap();
        assert_eq!(context.post.id, "post1");
        assert_eq!(context.post.subreddit, "smallbusiness");
        assert_eq!(context.comments.len(), 1);
        assert_eq!(context.comment_count(), 2);
        assert_eq!(context.find_comment("c2").unwrap().depth, 1);
        assert!(!context.truncated);
    }

    #[test]
    fn test_depth_limit_truncates_deep_branches() {
        // c0 -> c1 -> c2 -> c3
        let mut nested = json!("");
        for i in (0..4).rev() {
            nested = listing(vec![comment(&format!("c{i}"), "deep", nested)]);
        }
        let value = json!([
            listing(vec![json!({ "kind": "t3", "data": { "id": "p" } })]),
            nested
        ]);

        let context = parse_thread(&value, "c3", 2).unwrap();
        assert_eq!(context.comment_count(), 2);
        assert!(context.find_comment("c1").is_some());
        assert!(context.find_comment("c2").is_none());
        assert!(context.truncated);
    }

    #[test]
    fn test_parse_thread_rejects_bad_shape() {
        assert!(parse_thread(&json!({ "kind": "Listing" }), "c1", 8).is_err());
        assert!(parse_thread(&json!([listing(vec![]), listing(vec![])]), "c1", 8).is_err());
    }

    #[test]
    fn test_inbox_comment_from_message() {
        let message: InboxMessageData = serde_json::from_value(json!({
            "id": "k1",
            "name": "t1_k1",
            "author": "prospect",
            "body": "How does your tool handle invoices?",
            "subreddit": "smallbusiness",
            "link_title": "Which CRM do you use?",
            "parent_id": "t1_ours",
            "context": "/r/smallbusiness/comments/post1/which_crm/k1/?context=3",
            "created_utc": 1_700_000_000.0,
            "new": true,
            "was_comment": true
        }))
        .unwrap();

        let comment = InboxComment::from_message(message).unwrap();
        assert_eq!(comment.post_id, "post1");
        assert_eq!(comment.fullname, "t1_k1");
        assert_eq!(comment.author, "prospect");
        assert!(comment.is_new);
    }

    #[test]
    fn test_private_messages_are_not_inbox_comments() {
        let message = InboxMessageData {
            id: "m1".to_string(),
            name: "t4_m1".to_string(),
            was_comment: false,
            ..Default::default()
        };
        assert!(InboxComment::from_message(message).is_none());
    }

    #[test]
    fn test_post_id_from_context() {
        assert_eq!(
            post_id_from_context("/r/rust/comments/abc123/title/def456/?context=3"),
            Some("abc123".to_string())
        );
        assert_eq!(post_id_from_context("/message/messages/xyz"), None);
    }

    #[test]
    fn test_reddit_post_conversion() {
        let post_data = RedditPostData {
            id: "test123".to_string(),
            title: "Test Post".to_string(),
            selftext: "This is test content".to_string(),
            author: "test_user".to_string(),
            subreddit: "test".to_string(),
            created_utc: 1640995200.0,
            score: 42,
            num_comments: 5,
            ..Default::default()
        };

        let reddit_post: RedditPost = post_data.into();
        assert_eq!(reddit_post.id, "test123");
        assert_eq!(reddit_post.body, "This is test content");
        assert_eq!(reddit_post.created_utc.timestamp(), 1640995200);
    }
}
