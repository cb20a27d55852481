use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub total_response_time: Duration,
    pub total_queue_wait: Duration,
    pub requests_by_endpoint: HashMap<String, EndpointMetrics>,
}

impl ApiMetrics {
    pub fn average_response_time(&self) -> Duration {
        average(self.total_response_time, self.total_requests)
    }

    pub fn average_queue_wait(&self) -> Duration {
        average(self.total_queue_wait, self.total_requests)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time: Duration,
    pub max_response_time: Duration,
    pub last_error: Option<String>,
}

/// One attempt against the Reddit API, recorded after the response (or error) arrives.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub endpoint: String,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub queue_wait: Duration,
    pub success: bool,
    pub rate_limited: bool,
    pub error_type: Option<String>,
}

impl EndpointMetrics {
    fn update(&mut self, metrics: &RequestMetrics) {
        self.request_count += 1;
        self.total_response_time += metrics.response_time;
        self.max_response_time = self.max_response_time.max(metrics.response_time);

        if metrics.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
            self.last_error = metrics.error_type.clone();
        }
    }

    pub fn average_response_time(&self) -> Duration {
        average(self.total_response_time, self.request_count)
    }

    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.request_count as f64
        }
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        total / count.min(u32::MAX as u64) as u32
    }
}

/// Endpoints are keyed by route shape (`/r/{sub}/new`), not the concrete path.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<ApiMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, request_metrics: RequestMetrics) {
        let mut metrics = self.metrics.write().await;

        metrics.total_requests += 1;
        metrics.total_response_time += request_metrics.response_time;
        metrics.total_queue_wait += request_metrics.queue_wait;

        if request_metrics.success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }
        if request_metrics.rate_limited {
            metrics.rate_limited_requests += 1;
        }

        metrics
            .requests_by_endpoint
            .entry(request_metrics.endpoint.clone())
            .or_default()
            .update(&request_metrics);
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endpoint: &str, success: bool, millis: u64) -> RequestMetrics {
        RequestMetrics {
            endpoint: endpoint.to_string(),
            status_code: Some(if success { 200 } else { 429 }),
            response_time: Duration::from_millis(millis),
            queue_wait: Duration::from_millis(10),
            success,
            rate_limited: !success,
            error_type: (!success).then(|| "rate_limited".to_string()),
        }
    }

    #[tokio::test]
    async fn test_metrics_collection() {
        let collector = MetricsCollector::new();

        collector.record_request(request("/message/comments", true, 100)).await;
        collector.record_request(request("/message/comments", false, 300)).await;
        collector.record_request(request("/r/{sub}/new", true, 200)).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.rate_limited_requests, 1);
        assert_eq!(metrics.average_response_time(), Duration::from_millis(200));

        let inbox = &metrics.requests_by_endpoint["/message/comments"];
        assert_eq!(inbox.request_count, 2);
        assert_eq!(inbox.success_rate(), 0.5);
        assert_eq!(inbox.max_response_time, Duration::from_millis(300));
        assert_eq!(inbox.last_error.as_deref(), Some("rate_limited"));
    }
}
