pub mod api;
pub mod auth;
pub mod metrics;
pub mod models;
pub mod rate_limiter;

pub use api::{RedditApi, RedditApiClient};
pub use auth::{RedditAuthenticator, TokenProvider};
pub use metrics::{ApiMetrics, MetricsCollector};
pub use models::InboxComment;
pub use rate_limiter::{RateLimitConfig, RateLimitPermit, RateLimitStatus, RateLimiter};
