use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};
use subscout_core::RedditConfig;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum gap between the starts of two consecutive requests.
    pub min_interval: Duration,
    /// Maximum requests in flight at once.
    pub max_concurrent: usize,
    /// Permits available per refresh window.
    pub reservoir: u32,
    /// The reservoir is reset to full on this fixed interval.
    pub refresh_interval: Duration,
}

impl RateLimitConfig {
    pub fn reddit() -> Self {
        Self {
            min_interval: Duration::from_millis(2000),
            max_concurrent: 1,
            reservoir: 30,
            refresh_interval: Duration::from_secs(60),
        }
    }

    pub fn from_reddit_config(config: &RedditConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_concurrent: config.max_concurrent,
            reservoir: config.reservoir,
            refresh_interval: Duration::from_secs(config.reservoir_refresh_secs),
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    available: u32,
    next_refill: Instant,
    last_request: Option<Instant>,
}

impl LimiterState {
    fn refill(&mut self, now: Instant, config: &RateLimitConfig) {
        if now < self.next_refill {
            return;
        }
        self.available = config.reservoir;
        while self.next_refill <= now {
            self.next_refill += config.refresh_interval;
        }
    }
}

/// Shared limiter for every outbound Reddit call in the process.
///
/// Callers queue FIFO on an internal async mutex, so the minimum gap holds
/// across concurrent callers. When the reservoir is empty, `acquire` waits for
/// the next refresh instead of failing. The limiter never errors.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    in_flight: Arc<Semaphore>,
    deferred_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(mut config: RateLimitConfig) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        config.reservoir = config.reservoir.max(1);
        config.refresh_interval = config.refresh_interval.max(Duration::from_millis(1));

        let state = LimiterState {
            available: config.reservoir,
            next_refill: Instant::now() + config.refresh_interval,
            last_request: None,
        };

        Self {
            in_flight: Arc::new(Semaphore::new(config.max_concurrent)),
            state: Mutex::new(state),
            deferred_until: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until one more request may be issued. The returned permit holds an
    /// in-flight slot until dropped.
    pub async fn acquire(&self) -> RateLimitPermit {
        let start_time = Instant::now();
        let mut state = self.state.lock().await;

        loop {
            let now = Instant::now();

            let deferred = *self.deferred_until.lock().await;
            if let Some(until) = deferred {
                if now < until {
                    debug!("Rate limiter deferred by server, waiting {:?}", until - now);
                    sleep_until(until).await;
                    continue;
                }
            }

            state.refill(now, &self.config);
            if state.available == 0 {
                debug!(
                    "Reservoir exhausted, waiting {:?} for refill",
                    state.next_refill - now
                );
                sleep_until(state.next_refill).await;
                continue;
            }

            if let Some(last) = state.last_request {
                let earliest = last + self.config.min_interval;
                if now < earliest {
                    sleep_until(earliest).await;
                    continue;
                }
            }

            break;
        }

        // The semaphore is never closed, so this only waits.
        let permit = self.in_flight.clone().acquire_owned().await.ok();

        state.available -= 1;
        state.last_request = Some(Instant::now());
        drop(state);

        RateLimitPermit {
            _permit: permit,
            queue_wait_time: start_time.elapsed(),
        }
    }

    /// Hold every later `acquire` until `delay` has passed, e.g. for a 429's
    /// `retry-after`. A shorter deferral never shortens a longer pending one.
    pub async fn defer(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut deferred = self.deferred_until.lock().await;
        match *deferred {
            Some(existing) if existing >= until => {}
            _ => *deferred = Some(until),
        }
    }

    pub async fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let deferred_for = self
            .deferred_until
            .lock()
            .await
            .map(|until| until.saturating_duration_since(now))
            .filter(|d| !d.is_zero());

        let mut state = self.state.lock().await;
        state.refill(now, &self.config);

        RateLimitStatus {
            available: state.available,
            capacity: self.config.reservoir,
            max_concurrent: self.config.max_concurrent,
            in_flight: self.config.max_concurrent - self.in_flight.available_permits(),
            next_refill_in: state.next_refill.saturating_duration_since(now),
            deferred_for,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: Option<OwnedSemaphorePermit>,
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub available: u32,
    pub capacity: u32,
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub next_refill_in: Duration,
    pub deferred_for: Option<Duration>,
}

impl RateLimitStatus {
    pub fn utilization_percentage(&self) -> f64 {
        let used = self.capacity.saturating_sub(self.available);
        (used as f64 / self.capacity as f64) * 100.0
    }
}
