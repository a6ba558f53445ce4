//! Client side of the contention oracle.
//!
//! Every probe instance exposes `/lock` (run the contention workload),
//! `/check` (run the measurement workload), `/instance_id` and `/info`.
//! Implementors of `ContentionOracle` provide the raw calls; the provided
//! methods turn failures into sentinels so that the inference algorithms
//! never deal with transport errors.
//!
//! The instance that answered a request is always identified *after* the
//! fact with a separate identity probe: a base URL may be routed to a
//! different worker on every request.
pub mod http;
pub mod metric;
#[cfg(test)]
pub(crate) mod mock;

pub use self::http::HttpOracle;
pub use self::metric::{parse_metric, Metric};

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Identity of the worker that handled a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceId {
    Known(String),
    /// The identity probe failed; never attributed to any instance.
    Unknown,
}

impl InstanceId {
    pub fn known(&self) -> Option<&str> {
        match self {
            InstanceId::Known(id) => Some(id),
            InstanceId::Unknown => None,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InstanceId::Known(id) => write!(f, "{}", id),
            InstanceId::Unknown => write!(f, "unknown"),
        }
    }
}

/// Declared hardware identity, as returned by `/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    #[serde(default)]
    pub cpu_brand: Option<String>,
    /// Clock frequency in Hz.
    #[serde(default)]
    pub parsed_freq: Option<f64>,
}

#[derive(Deserialize)]
struct InstanceIdBody {
    instance_id: Option<serde_json::Value>,
}

/// Extracts the identifier from an `/instance_id` JSON body.
pub fn parse_instance_id(body: &str) -> Option<String> {
    let parsed: InstanceIdBody = serde_json::from_str(body).ok()?;
    match parsed.instance_id? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Joins a base URL and a relative endpoint.
pub fn join_endpoint(base: &str, endpoint: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), endpoint.trim_start_matches('/'))
}

pub trait ContentionOracle: Sync {
    /// Sends `/lock` to `base_url`.
    fn lock(&self, base_url: &str) -> Result<()>;

    /// Sends `/check` to `base_url` and returns the body.
    fn check(&self, base_url: &str) -> Result<String>;

    /// Sends `/instance_id` to `base_url` and returns the identifier.
    fn instance_id(&self, base_url: &str) -> Result<String>;

    /// Sends `/info` to `base_url`.
    fn info(&self, base_url: &str) -> Result<CpuInfo>;

    /// Times one successful GET of `url`.
    fn time_request(&self, url: &str) -> Result<Duration>;

    /// Triggers contention on whichever instance handles the request.
    ///
    /// Failures are logged and swallowed: the workload may well be running
    /// even if the response never arrived.
    fn trigger_contention(&self, base_url: &str) {
        match self.lock(base_url) {
            Ok(()) => debug!(url = base_url, "lock triggered"),
            Err(e) => warn!(url = base_url, phase = "lock", error = %e,
                            "lock request failed"),
        }
    }

    fn identify_handler(&self, base_url: &str) -> InstanceId {
        match self.instance_id(base_url) {
            Ok(id) => InstanceId::Known(id),
            Err(e) => {
                warn!(url = base_url, phase = "identify", error = %e,
                      "could not identify handling instance");
                InstanceId::Unknown
            },
        }
    }

    /// Measures contention at `base_url`, then identifies who measured it.
    ///
    /// The two requests may be routed to different workers.
    fn measure_metric(&self, base_url: &str) -> (InstanceId, Metric) {
        let body = match self.check(base_url) {
            Ok(body) => body,
            Err(e) => {
                warn!(url = base_url, phase = "check", error = %e,
                      "mem-check request failed");
                return (InstanceId::Unknown, Metric::UNMEASURABLE);
            },
        };

        let metric = parse_metric(&body);
        if !metric.is_measurable() {
            let excerpt = body.chars().take(120).collect::<String>();
            warn!(url = base_url, phase = "check", body = %excerpt,
                  "no count[..] values in mem-check output");
        }

        (self.identify_handler(base_url), metric)
    }

    fn cpu_info(&self, base_url: &str) -> Option<CpuInfo> {
        match self.info(base_url) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(url = base_url, phase = "info", error = %e,
                      "could not fetch cpu info");
                None
            },
        }
    }

    /// Latency of one victim request, `None` if it failed.
    fn victim_latency(&self, url: &str) -> Option<Duration> {
        match self.time_request(url) {
            Ok(elapsed) => Some(elapsed),
            Err(e) => {
                warn!(url, phase = "victim", error = %e, "victim request failed");
                None
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn joins_endpoints() {
        assert_eq!(join_endpoint("https://a.example/api/", "lock"),
                   "https://a.example/api/lock");
        assert_eq!(join_endpoint("https://a.example", "/info"),
                   "https://a.example/info");
    }

    #[test]
    fn parses_instance_id_bodies() {
        assert_eq!(parse_instance_id(r#"{"instance_id": "w-17"}"#),
                   Some("w-17".to_string()));
        assert_eq!(parse_instance_id(r#"{"instance_id": 42}"#),
                   Some("42".to_string()));
        assert_eq!(parse_instance_id(r#"{"instance_id": null}"#), None);
        assert_eq!(parse_instance_id(r#"{"other": "x"}"#), None);
        assert_eq!(parse_instance_id("<html>"), None);
    }

    struct Broken;

    impl ContentionOracle for Broken {
        fn lock(&self, url: &str) -> Result<()> {
            Err(Error::Request { url: url.to_string(), reason: "refused".into() })
        }
        fn check(&self, _: &str) -> Result<String> {
            Ok("Segmentation fault".to_string())
        }
        fn instance_id(&self, url: &str) -> Result<String> {
            Err(Error::Status { url: url.to_string(), status: 502 })
        }
        fn info(&self, url: &str) -> Result<CpuInfo> {
            Err(Error::Status { url: url.to_string(), status: 500 })
        }
        fn time_request(&self, url: &str) -> Result<Duration> {
            Err(Error::Request { url: url.to_string(), reason: "timeout".into() })
        }
    }

    #[test]
    fn failures_become_sentinels() {
        let oracle = Broken;
        oracle.trigger_contention("http://x");
        assert_eq!(oracle.identify_handler("http://x"), InstanceId::Unknown);
        assert_eq!(oracle.measure_metric("http://x"),
                   (InstanceId::Unknown, Metric::UNMEASURABLE));
        assert!(oracle.cpu_info("http://x").is_none());
        assert!(oracle.victim_latency("http://victim").is_none());
    }
}
