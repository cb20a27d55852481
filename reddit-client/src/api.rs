use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics};
use crate::models::{
    parse_thread, InboxComment, InboxMessageData, RedditListing, RedditPostData,
};
use crate::rate_limiter::{RateLimitStatus, RateLimiter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subscout_core::retry::{retry_async, RetryConfig};
use subscout_core::{CoreError, RedditApiError, RedditConfig, RedditPost, ThreadContext};
use tracing::{debug, error, info, warn};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// The Reddit calls the pipelines depend on. Every implementation must route
/// through the shared rate limiter.
#[async_trait]
pub trait RedditApi: Send + Sync {
    /// Comment replies in the account's inbox, newest first.
    async fn inbox_comment_replies(
        &self,
        access_token: &str,
        limit: u32,
    ) -> Result<Vec<InboxComment>, CoreError>;

    /// The post and comment tree around `comment_id`.
    async fn thread_context(
        &self,
        access_token: &str,
        post_id: &str,
        comment_id: &str,
        max_depth: u32,
    ) -> Result<ThreadContext, CoreError>;

    async fn subreddit_new_posts(
        &self,
        access_token: &str,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError>;
}

#[derive(Debug, Clone)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    metrics: MetricsCollector,
    retry_config: RetryConfig,
    base_url: String,
}

impl RedditApiClient {
    pub fn new(config: &RedditConfig, rate_limiter: Arc<RateLimiter>) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter,
            metrics: MetricsCollector::new(),
            retry_config: RetryConfig::reddit(),
            base_url: REDDIT_API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// GET `path` with retries. `route` is the path shape used for logs and metrics.
    async fn get_json<T: DeserializeOwned>(
        &self,
        route: &str,
        path: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, CoreError> {
        let operation = format!("reddit GET {route}");
        retry_async(&operation, &self.retry_config, || {
            self.send_once(route, path, access_token, query)
        })
        .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        route: &str,
        path: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, CoreError> {
        let url = format!("{}{}", self.base_url, path);

        let permit = self.rate_limiter.acquire().await;
        debug!(
            "Acquired rate limit permit for {} after {:?}",
            route, permit.queue_wait_time
        );

        let start_time = Instant::now();
        let result = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await;

        let mut request_metrics = RequestMetrics {
            endpoint: route.to_string(),
            status_code: None,
            response_time: start_time.elapsed(),
            queue_wait: permit.queue_wait_time,
            success: false,
            rate_limited: false,
            error_type: None,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                drop(permit);
                error!("Network error for GET {}: {}", route, e);
                request_metrics.error_type = Some("network_error".to_string());
                self.metrics.record_request(request_metrics).await;

                return Err(if e.is_timeout() {
                    CoreError::RedditApi(RedditApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                });
            }
        };

        let status = response.status();
        request_metrics.status_code = Some(status.as_u16());

        if let Some(api_error) = map_status(status, response.headers(), route) {
            drop(permit);
            request_metrics.error_type = Some(error_label(&api_error).to_string());

            if let RedditApiError::RateLimitExceeded { retry_after } = api_error {
                request_metrics.rate_limited = true;
                warn!("Rate limited on {}, deferring {}s", route, retry_after);
                self.rate_limiter
                    .defer(Duration::from_secs(retry_after))
                    .await;
            } else {
                error!("Request failed with status: {} for {}", status, route);
            }

            self.metrics.record_request(request_metrics).await;
            return Err(CoreError::RedditApi(api_error));
        }

        let body = response.json::<T>().await;
        drop(permit);
        request_metrics.response_time = start_time.elapsed();

        match body {
            Ok(body) => {
                request_metrics.success = true;
                self.metrics.record_request(request_metrics).await;
                debug!("Request successful: {} {}", status, route);
                Ok(body)
            }
            Err(e) => {
                request_metrics.error_type = Some("invalid_response".to_string());
                self.metrics.record_request(request_metrics).await;
                Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                    details: format!("failed to decode {route}: {e}"),
                }))
            }
        }
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.status().await
    }
}

#[async_trait]
impl RedditApi for RedditApiClient {
    async fn inbox_comment_replies(
        &self,
        access_token: &str,
        limit: u32,
    ) -> Result<Vec<InboxComment>, CoreError> {
        let listing: RedditListing<InboxMessageData> = self
            .get_json(
                "/message/comments",
                "/message/comments",
                access_token,
                &[("limit", limit.to_string()), ("raw_json", "1".to_string())],
            )
            .await?;

        let comments: Vec<InboxComment> = listing
            .data
            .children
            .into_iter()
            .filter_map(|child| InboxComment::from_message(child.data))
            .collect();

        info!("Fetched {} inbox comment replies", comments.len());
        Ok(comments)
    }

    async fn thread_context(
        &self,
        access_token: &str,
        post_id: &str,
        comment_id: &str,
        max_depth: u32,
    ) -> Result<ThreadContext, CoreError> {
        let path = format!("/comments/{post_id}");
        let value: Value = self
            .get_json(
                "/comments/{post}",
                &path,
                access_token,
                &[
                    ("comment", comment_id.to_string()),
                    ("context", "8".to_string()),
                    ("depth", max_depth.to_string()),
                    ("raw_json", "1".to_string()),
                ],
            )
            .await?;

        Ok(parse_thread(&value, comment_id, max_depth)?)
    }

    async fn subreddit_new_posts(
        &self,
        access_token: &str,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError> {
        let path = format!("/r/{subreddit}/new");
        let listing: RedditListing<RedditPostData> = self
            .get_json(
                "/r/{sub}/new",
                &path,
                access_token,
                &[("limit", limit.to_string()), ("raw_json", "1".to_string())],
            )
            .await?;

        let posts: Vec<RedditPost> = listing
            .data
            .children
            .into_iter()
            .map(|child| child.data)
            .filter(|post| !post.stickied)
            .map(RedditPost::from)
            .collect();

        info!("Fetched {} new posts from r/{}", posts.len(), subreddit);
        Ok(posts)
    }
}

/// `None` for success statuses.
pub fn map_status(status: StatusCode, headers: &HeaderMap, route: &str) -> Option<RedditApiError> {
    if status.is_success() {
        return None;
    }

    Some(match status.as_u16() {
        401 => RedditApiError::InvalidToken,
        403 => RedditApiError::Forbidden {
            resource: route.to_string(),
        },
        404 => RedditApiError::NotFound {
            resource: route.to_string(),
        },
        429 => RedditApiError::RateLimitExceeded {
            retry_after: parse_retry_after(headers).unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
        code => RedditApiError::InvalidResponse {
            details: format!("unexpected status {code} for {route}"),
        },
    })
}

/// Reddit sends whole or fractional seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|secs| secs.max(0.0).ceil() as u64))
}

fn error_label(error: &RedditApiError) -> &'static str {
    match error {
        RedditApiError::InvalidToken => "unauthorized",
        RedditApiError::Forbidden { .. } => "forbidden",
        RedditApiError::NotFound { .. } => "not_found",
        RedditApiError::RateLimitExceeded { .. } => "rate_limited",
        RedditApiError::ServerError { .. } => "server_error",
        _ => "invalid_response",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimitConfig;
    use reqwest::header::HeaderValue;

    fn headers_with_retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_status_mapping() {
        let empty = HeaderMap::new();
        assert!(map_status(StatusCode::OK, &empty, "/x").is_none());
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, &empty, "/x"),
            Some(RedditApiError::InvalidToken)
        ));
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, &empty, "/r/{sub}/new"),
            Some(RedditApiError::Forbidden { resource }) if resource == "/r/{sub}/new"
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, &empty, "/x"),
            Some(RedditApiError::NotFound { .. })
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, &empty, "/x"),
            Some(RedditApiError::ServerError { status_code: 502 })
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, &empty, "/x"),
            Some(RedditApiError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_rate_limit_retry_after() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), "/x"),
            Some(RedditApiError::RateLimitExceeded { retry_after: 60 })
        ));
        assert!(matches!(
            map_status(
                StatusCode::TOO_MANY_REQUESTS,
                &headers_with_retry_after("7"),
                "/x"
            ),
            Some(RedditApiError::RateLimitExceeded { retry_after: 7 })
        ));
        assert_eq!(parse_retry_after(&headers_with_retry_after("2.5")), Some(3));
        assert_eq!(parse_retry_after(&headers_with_retry_after("soon")), None);
    }

    #[tokio::test]
    async fn test_api_client_creation() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::reddit()));
        let client = RedditApiClient::new(&RedditConfig::default(), limiter)
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        assert_eq!(client.base_url, "http://127.0.0.1:9");
        assert_eq!(client.get_metrics().await.total_requests, 0);
        assert_eq!(client.get_rate_limit_status().await.available, 30);
    }

    #[tokio::test]
    async fn test_unreachable_host_records_failure() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            min_interval: Duration::ZERO,
            ..RateLimitConfig::reddit()
        }));
        let client = RedditApiClient::new(&RedditConfig::default(), limiter)
            .unwrap()
            .with_base_url("http://127.0.0.1:9")
            .with_retry_config(RetryConfig::none());

        let result = client.inbox_comment_replies("token", 25).await;
        assert!(result.is_err());

        let metrics = client.get_metrics().await;
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
    }
}
