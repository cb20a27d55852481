use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RefreshToken, RequestTokenError,
    TokenResponse, TokenUrl,
};
use std::sync::Arc;
use std::time::Duration;
use subscout_core::{AccountToken, CoreError, RedditApiError, RedditConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::rate_limiter::RateLimiter;

pub const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Where the pipeline gets bearer tokens from.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn app_token(&self) -> Result<String, CoreError>;

    async fn refresh_account_token(
        &self,
        username: &str,
        refresh_token: &str,
    ) -> Result<AccountToken, CoreError>;
}

/// Obtains app-only tokens for discovery and refreshes per-account tokens for
/// the inbox watcher. Token requests draw from the same limiter as API calls.
#[derive(Debug)]
pub struct RedditAuthenticator {
    oauth_client: BasicClient,
    http_client: reqwest::Client,
    app_token: Mutex<Option<AccountToken>>,
    rate_limiter: Arc<RateLimiter>,
}

impl RedditAuthenticator {
    pub fn new(config: &RedditConfig, rate_limiter: Arc<RateLimiter>) -> Result<Self, CoreError> {
        let (client_id, client_secret) = config.credentials()?;
        Self::with_token_url(config, client_id, client_secret, REDDIT_TOKEN_URL, rate_limiter)
    }

    pub fn with_token_url(
        config: &RedditConfig,
        client_id: String,
        client_secret: String,
        token_url: &str,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(invalid_url)?;
        let token_url = TokenUrl::new(token_url.to_string()).map_err(invalid_url)?;

        let oauth_client = BasicClient::new(
            ClientId::new(client_id),
            Some(ClientSecret::new(client_secret)),
            auth_url,
            Some(token_url),
        );

        // Reddit rejects token requests without a descriptive User-Agent
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            oauth_client,
            http_client,
            app_token: Mutex::new(None),
            rate_limiter,
        })
    }

    /// App-only token from the client credentials grant, cached until it is
    /// about to expire.
    pub async fn app_token(&self) -> Result<String, CoreError> {
        let mut cached = self.app_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let _permit = self.rate_limiter.acquire().await;
        debug!("Requesting app-only Reddit token");
        let http_client = self.http_client.clone();
        let response = self
            .oauth_client
            .exchange_client_credentials()
            .request_async(|request| send_token_request(http_client, request))
            .await
            .map_err(map_token_error)?;

        let token = to_account_token(&response, None);
        let access_token = token.access_token.clone();
        *cached = Some(token);

        info!("Obtained app-only Reddit token");
        Ok(access_token)
    }

    /// Exchange a stored refresh token for a fresh access token. Reddit does
    /// not always rotate the refresh token, so the old one is kept when absent.
    pub async fn refresh_account_token(
        &self,
        username: &str,
        refresh_token: &str,
    ) -> Result<AccountToken, CoreError> {
        if refresh_token.is_empty() {
            return Err(RedditApiError::MissingCredentials {
                account: username.to_string(),
            }
            .into());
        }

        let _permit = self.rate_limiter.acquire().await;
        debug!("Refreshing Reddit token for u/{}", username);
        let http_client = self.http_client.clone();
        let response = self
            .oauth_client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(|request| send_token_request(http_client, request))
            .await
            .map_err(map_token_error)?;

        info!("Refreshed Reddit token for u/{}", username);
        Ok(to_account_token(&response, Some(refresh_token)))
    }
}

#[async_trait]
impl TokenProvider for RedditAuthenticator {
    async fn app_token(&self) -> Result<String, CoreError> {
        RedditAuthenticator::app_token(self).await
    }

    async fn refresh_account_token(
        &self,
        username: &str,
        refresh_token: &str,
    ) -> Result<AccountToken, CoreError> {
        RedditAuthenticator::refresh_account_token(self, username, refresh_token).await
    }
}

fn to_account_token(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> AccountToken {
    AccountToken {
        access_token: response.access_token().secret().clone(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous_refresh.map(str::to_string)),
        expires_at: response
            .expires_in()
            .and_then(|d| ChronoDuration::from_std(d).ok())
            .map(|d| Utc::now() + d),
    }
}

async fn send_token_request(
    client: reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let mut request_builder = client
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in &request.headers {
        request_builder = request_builder.header(name.as_str(), value.as_bytes());
    }

    let response = request_builder.send().await?;
    let status_code = response.status();
    let headers = response.headers().to_owned();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn map_token_error(error: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> CoreError {
    let api_error = match error {
        RequestTokenError::ServerResponse(response) => RedditApiError::AuthenticationFailed {
            reason: response.to_string(),
        },
        RequestTokenError::Request(e) if e.is_timeout() => RedditApiError::RequestTimeout,
        RequestTokenError::Request(e) => return CoreError::Network(e),
        RequestTokenError::Parse(e, _) => RedditApiError::InvalidResponse {
            details: format!("token response: {e}"),
        },
        RequestTokenError::Other(reason) => RedditApiError::AuthenticationFailed { reason },
    };
    api_error.into()
}

fn invalid_url(error: oauth2::url::ParseError) -> CoreError {
    CoreError::InvalidInput {
        message: format!("invalid OAuth URL: {error}"),
    }
}
