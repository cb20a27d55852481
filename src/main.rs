use anyhow::Result;
use clap::{Parser, Subcommand};
use database::{SqliteStore, Store};
use llm_interface::{
    BatchConfig, CategoryClassifier, LeadScorer, LlmProvider, OpenAiProvider, ReplyGenerator,
    SpamFilter,
};
use pipeline::{DiscoveryOrchestrator, InboxSettings, InboxWatcher, LeadScoringJob};
use reddit_client::{RateLimitConfig, RateLimiter, RedditApiClient, RedditAuthenticator};
use std::path::PathBuf;
use std::sync::Arc;
use subscout_core::{AppConfig, CoreError, ErrorExt};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "subscout=info,pipeline=info,reddit_client=info,llm_interface=info,database=info";

#[derive(Debug, Parser)]
#[command(name = "subscout", version, about = "Scheduled Reddit discovery and inbox jobs")]
struct Cli {
    /// TOML config file; environment variables override it
    #[arg(long, env = "SUBSCOUT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    job: Job,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Job {
    /// Pull, filter and classify new posts from tracked subreddits
    Discover,
    /// Draft replies to new comments in connected accounts' inboxes
    Inbox,
    /// Rescore leads whose conversations changed
    ScoreLeads,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the run report
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    info!(job = ?cli.job, "Starting subscout job");

    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&config.database).await?);

    let report = match cli.job {
        Job::Discover => run_discovery(&config, store).await,
        Job::Inbox => run_inbox(&config, store).await,
        Job::ScoreLeads => run_lead_scoring(&config, store).await,
    }
    .map_err(|e| {
        e.log_error();
        e
    })?;

    println!("{report}");
    Ok(())
}

fn llm_provider(config: &AppConfig) -> Result<Arc<dyn LlmProvider>, CoreError> {
    let provider = OpenAiProvider::new(&config.llm)?;
    info!(model = provider.model(), "Using LLM provider");
    Ok(Arc::new(provider))
}

/// API client and authenticator sharing one limiter.
fn reddit_clients(
    config: &AppConfig,
) -> Result<(Arc<RedditApiClient>, Arc<RedditAuthenticator>), CoreError> {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::from_reddit_config(
        &config.reddit,
    )));
    let client = RedditApiClient::new(&config.reddit, limiter.clone())?;
    let tokens = RedditAuthenticator::new(&config.reddit, limiter)?;
    Ok((Arc::new(client), Arc::new(tokens)))
}

async fn log_reddit_usage(client: &RedditApiClient) {
    let metrics = client.get_metrics().await;
    info!(
        total = metrics.total_requests,
        successful = metrics.successful_requests,
        failed = metrics.failed_requests,
        rate_limited = metrics.rate_limited_requests,
        avg_response_ms = metrics.average_response_time().as_millis() as u64,
        avg_queue_wait_ms = metrics.average_queue_wait().as_millis() as u64,
        "Reddit API usage"
    );
    for (endpoint, stats) in &metrics.requests_by_endpoint {
        debug!(
            endpoint = %endpoint,
            requests = stats.request_count,
            success_rate = stats.success_rate(),
            "Reddit endpoint usage"
        );
    }

    let limit = client.get_rate_limit_status().await;
    info!(
        available = limit.available,
        capacity = limit.capacity,
        utilization = limit.utilization_percentage(),
        "Reddit rate limit after run"
    );
}

async fn run_discovery(config: &AppConfig, store: Arc<dyn Store>) -> Result<String, CoreError> {
    let llm = llm_provider(config)?;
    let (reddit, tokens) = reddit_clients(config)?;
    let pipeline = &config.pipeline;

    let orchestrator = DiscoveryOrchestrator::new(
        store,
        reddit.clone(),
        tokens,
        SpamFilter::new(
            llm.clone(),
            BatchConfig::new(pipeline.batch_size, pipeline.spam_concurrency),
            pipeline.max_input_chars,
        ),
        CategoryClassifier::new(
            llm,
            BatchConfig::new(pipeline.batch_size, pipeline.classify_concurrency),
            pipeline.max_input_chars,
        ),
        config.reddit.listing_limit,
    );

    let report = orchestrator.run().await;
    log_reddit_usage(&reddit).await;
    Ok(serde_json::to_string_pretty(&report?)?)
}

async fn run_inbox(config: &AppConfig, store: Arc<dyn Store>) -> Result<String, CoreError> {
    let llm = llm_provider(config)?;
    let (reddit, tokens) = reddit_clients(config)?;

    let watcher = InboxWatcher::new(
        store,
        reddit.clone(),
        tokens,
        ReplyGenerator::new(llm, config.pipeline.max_input_chars),
        InboxSettings::from_config(config),
    );

    let report = watcher.run().await;
    log_reddit_usage(&reddit).await;
    Ok(serde_json::to_string_pretty(&report?)?)
}

async fn run_lead_scoring(config: &AppConfig, store: Arc<dyn Store>) -> Result<String, CoreError> {
    let llm = llm_provider(config)?;
    let pipeline = &config.pipeline;

    let job = LeadScoringJob::new(
        store,
        LeadScorer::new(
            llm,
            BatchConfig::new(pipeline.lead_batch_size, pipeline.classify_concurrency),
            pipeline.max_input_chars,
        ),
        pipeline.lead_rescore_limit,
    );

    Ok(serde_json::to_string_pretty(&job.run().await?)?)
}
