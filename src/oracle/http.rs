//! The oracle over real HTTP, with `reqwest`'s blocking client.
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use tracing::debug;

use crate::error::{Error, Result};
use crate::oracle::{join_endpoint, parse_instance_id, ContentionOracle, CpuInfo};
use crate::settings::{Endpoints, RetryPolicy, Settings};

/// HTTP client for the probe instances and the victim.
///
/// Each class of request gets its own client so that its timeout applies
/// per call: `/lock` runs the whole contention workload before answering,
/// so it is given much longer than `/check`.
pub struct HttpOracle {
    client: Client,
    lock_client: Client,
    victim_client: Client,
    endpoints: Endpoints,
    retry: RetryPolicy,
}

fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn request_error(url: &str, e: reqwest::Error) -> Error {
    let reason = if e.is_timeout() {
        format!("timed out: {}", e)
    } else {
        e.to_string()
    };
    Error::Request { url: url.to_string(), reason }
}

fn ensure_success(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Status { url: url.to_string(), status: status.as_u16() })
    }
}

impl HttpOracle {
    pub fn new(settings: &Settings) -> Result<HttpOracle> {
        Ok(HttpOracle {
            client: build_client(settings.request_timeout)?,
            lock_client: build_client(settings.lock_timeout)?,
            victim_client: build_client(settings.victim_timeout)?,
            endpoints: settings.endpoints.clone(),
            retry: settings.retry.clone(),
        })
    }

    /// One GET of `url`, with its body.
    fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send()
                                  .map_err(|e| request_error(url, e))?;
        ensure_success(url, response)?.text().map_err(|e| request_error(url, e))
    }

    /// GETs `url`, retrying transport failures and the policy's status
    /// codes up to `max_attempts` times in total.
    ///
    /// Only used for idempotent endpoints.
    fn get_text(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        let op = || {
            attempt += 1;
            self.fetch(url).map_err(|e| {
                if attempt >= self.retry.max_attempts || !self.retry.is_transient(&e) {
                    backoff::Error::permanent(e)
                } else {
                    debug!(url, attempt, error = %e, "retrying");
                    backoff::Error::transient(e)
                }
            })
        };

        backoff::retry(self.retry.schedule(), op).map_err(|e| match e {
            backoff::Error::Permanent(e) => e,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}

impl ContentionOracle for HttpOracle {
    fn lock(&self, base_url: &str) -> Result<()> {
        let url = join_endpoint(base_url, &self.endpoints.lock);
        let response = self.lock_client.get(&url).send()
                                       .map_err(|e| request_error(&url, e))?;
        ensure_success(&url, response).map(|_| ())
    }

    fn check(&self, base_url: &str) -> Result<String> {
        self.get_text(&join_endpoint(base_url, &self.endpoints.check))
    }

    fn instance_id(&self, base_url: &str) -> Result<String> {
        let url = join_endpoint(base_url, &self.endpoints.instance_id);
        let body = self.get_text(&url)?;
        parse_instance_id(&body).ok_or_else(|| Error::Response {
            url,
            reason: format!("no instance_id in {:?}", body.chars().take(80).collect::<String>()),
        })
    }

    fn info(&self, base_url: &str) -> Result<CpuInfo> {
        let url = join_endpoint(base_url, &self.endpoints.info);
        let body = self.get_text(&url)?;
        serde_json::from_str(&body).map_err(|e| Error::Response {
            url,
            reason: e.to_string(),
        })
    }

    fn time_request(&self, url: &str) -> Result<Duration> {
        let start = Instant::now();
        let response = self.victim_client.get(url).send()
                                         .map_err(|e| request_error(url, e))?;
        let response = ensure_success(url, response)?;
        response.bytes().map_err(|e| request_error(url, e))?;
        Ok(start.elapsed())
    }
}
