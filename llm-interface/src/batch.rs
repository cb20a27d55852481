use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use subscout_core::retry::{retry_async, RetryConfig};
use subscout_core::{CoreError, RedditPost};
use tracing::{debug, info, warn};

/// Anything that carries the id used to match requests with responses.
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for RedditPost {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Maximum batch calls in flight at once.
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl BatchConfig {
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size,
            concurrency,
            retry: RetryConfig::llm_batch(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome<R> {
    /// One result per input item, in input order.
    pub results: Vec<R>,
    /// Ids of items that received the fallback value.
    pub fallback_ids: HashSet<String>,
    pub total_batches: usize,
    pub failed_batches: usize,
}

impl<R> BatchOutcome<R> {
    pub fn fallback_items(&self) -> usize {
        self.fallback_ids.len()
    }

    pub fn is_fallback(&self, id: &str) -> bool {
        self.fallback_ids.contains(id)
    }

    fn empty() -> Self {
        Self {
            results: Vec::new(),
            fallback_ids: HashSet::new(),
            total_batches: 0,
            failed_batches: 0,
        }
    }
}

/// Split `items` into batches, classify each batch with bounded concurrency and
/// retries, and reconcile the answers by id.
///
/// A batch that exhausts its retries gives every item `fallback(item)`. Items
/// the model skipped also get the fallback; duplicate or unknown ids in a
/// response are ignored. This never fails: errors only show up in the counts.
pub async fn classify_in_batches<'a, T, R, F, Fut, FB>(
    stage: &str,
    items: &'a [T],
    config: &BatchConfig,
    classify: F,
    fallback: FB,
) -> BatchOutcome<R>
where
    T: Identified,
    R: Identified,
    F: Fn(&'a [T]) -> Fut,
    Fut: Future<Output = Result<Vec<R>, CoreError>>,
    FB: Fn(&T) -> R,
{
    if items.is_empty() {
        return BatchOutcome::empty();
    }

    let batch_size = config.batch_size.max(1);
    let concurrency = config.concurrency.max(1);
    let classify = &classify;
    let retry = &config.retry;

    let mut responses: Vec<(usize, Result<Vec<R>, CoreError>)> =
        stream::iter(items.chunks(batch_size).enumerate())
            .map(|(index, batch)| async move {
                let operation = format!("{stage} batch {index}");
                let result = retry_async(&operation, retry, || classify(batch)).await;
                (index, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
    responses.sort_by_key(|(index, _)| *index);

    let mut outcome = BatchOutcome::empty();
    outcome.results.reserve(items.len());
    outcome.total_batches = responses.len();

    for (batch, (index, response)) in items.chunks(batch_size).zip(responses) {
        let mut by_id = match response {
            Ok(results) => index_by_id(stage, batch, results),
            Err(error) => {
                warn!(
                    stage,
                    batch = index,
                    items = batch.len(),
                    "Batch failed after retries, using fallback values: {}",
                    error
                );
                outcome.failed_batches += 1;
                HashMap::new()
            }
        };

        for item in batch {
            match by_id.remove(item.id()) {
                Some(result) => outcome.results.push(result),
                None => {
                    outcome.fallback_ids.insert(item.id().to_string());
                    outcome.results.push(fallback(item));
                }
            }
        }
    }

    info!(
        stage,
        items = items.len(),
        batches = outcome.total_batches,
        failed_batches = outcome.failed_batches,
        fallback_items = outcome.fallback_items(),
        "Batch classification finished"
    );
    outcome
}

fn index_by_id<T: Identified, R: Identified>(
    stage: &str,
    batch: &[T],
    results: Vec<R>,
) -> HashMap<String, R> {
    let requested: HashSet<&str> = batch.iter().map(Identified::id).collect();
    let mut by_id = HashMap::with_capacity(results.len());

    for result in results {
        if !requested.contains(result.id()) {
            debug!(stage, id = result.id(), "Ignoring result for unknown id");
            continue;
        }
        if by_id.contains_key(result.id()) {
            debug!(stage, id = result.id(), "Ignoring duplicate result");
            continue;
        }
        by_id.insert(result.id().to_string(), result);
    }

    if by_id.len() < requested.len() {
        warn!(
            stage,
            missing = requested.len() - by_id.len(),
            "Model response skipped some items"
        );
    }
    by_id
}
