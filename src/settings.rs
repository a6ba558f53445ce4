//! Run-time settings for the oracle client and the inference algorithms.
//!
//! Thresholds have no default: they depend on the platform and must be
//! calibrated by the operator beforehand.
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::error::{Error, Result};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Relative endpoints exposed by every probe instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub lock: String,
    pub check: String,
    pub instance_id: String,
    pub info: String,
}

impl Default for Endpoints {
    fn default() -> Endpoints {
        Endpoints {
            lock: "lock".to_string(),
            check: "check".to_string(),
            instance_id: "instance_id".to_string(),
            info: "info".to_string(),
        }
    }
}

/// Retry behaviour for idempotent GETs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    /// Delay before retry `n` is `backoff * 2^(n-1)`.
    pub backoff: Duration,
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_secs(1),
            statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Transport failures and retryable statuses are worth another try.
    pub fn is_transient(&self, error: &Error) -> bool {
        match error {
            Error::Request { .. } => true,
            Error::Status { status, .. } => self.is_retryable(*status),
            _ => false,
        }
    }

    /// Delays between attempts: `backoff`, then doubling, without jitter.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff)
            .with_multiplier(2.)
            .with_randomization_factor(0.)
            .with_max_interval(MAX_RETRY_DELAY)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Minimum mem-check metric to infer server sharing.
    pub coverage_threshold: Option<f64>,
    /// Minimum victim median latency (seconds) to infer co-residency.
    pub latency_threshold: Option<f64>,
    pub request_timeout: Duration,
    pub lock_timeout: Duration,
    pub victim_timeout: Duration,
    /// Sleep between triggering contention and probing (partitioner).
    pub settle_delay: Duration,
    /// Sleep between triggering contention and probing (localizer).
    pub lock_warmup: Duration,
    /// Victim requests per contention burst.
    pub probe_runs: usize,
    /// Mem-check requests per iteration in the shared-URL setting.
    pub check_requests: usize,
    /// Identity requests issued by instance discovery.
    pub discovery_requests: usize,
    /// Upper bound on the aggregator's worker pool.
    pub max_workers: usize,
    /// Consecutive stale lock attributions tolerated before giving up.
    pub max_stale_locks: usize,
    pub endpoints: Endpoints,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            coverage_threshold: None,
            latency_threshold: None,
            request_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(60),
            victim_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(100),
            lock_warmup: Duration::from_millis(100),
            probe_runs: 1,
            check_requests: 60,
            discovery_requests: 60,
            max_workers: 64,
            max_stale_locks: 100,
            endpoints: Endpoints::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn require(value: Option<f64>, name: &'static str) -> Result<f64> {
    match value {
        None => Err(Error::MissingThreshold(name)),
        Some(t) if !t.is_finite() || t < 0. => Err(Error::InvalidSetting(
            format!("{} threshold must be a non-negative number, got {}", name, t))),
        Some(t) => Ok(t),
    }
}

impl Settings {
    pub fn require_coverage_threshold(&self) -> Result<f64> {
        require(self.coverage_threshold, "coverage")
    }

    pub fn require_latency_threshold(&self) -> Result<f64> {
        require(self.latency_threshold, "latency")
    }

    /// Checks the counts that must be positive.
    pub fn validate(&self) -> Result<()> {
        let counts = [("probe runs", self.probe_runs),
                      ("check requests", self.check_requests),
                      ("discovery requests", self.discovery_requests),
                      ("workers", self.max_workers),
                      ("retry attempts", self.retry.max_attempts)];
        for (name, n) in counts.iter() {
            if *n == 0 {
                return Err(Error::InvalidSetting(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}
