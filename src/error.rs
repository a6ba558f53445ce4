//! Error type shared by the library and the binary.
use thiserror::Error;

/// Errors produced by `colocate`.
///
/// Transient network failures only surface here from the oracle
/// primitives; the inference algorithms fold them into sentinels.
#[derive(Debug, Error)]
pub enum Error {
    /// A required threshold was not supplied.
    #[error("{0} threshold is not set")]
    MissingThreshold(&'static str),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// The request could not be sent or timed out.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    /// The body could not be interpreted.
    #[error("bad response from {url}: {reason}")]
    Response { url: String, reason: String },

    /// Contention kept landing on grouped or unidentifiable instances.
    #[error("gave up after {attempts} consecutive stale lock attributions \
             ({remaining} instances left ungrouped)")]
    StaleLockLimit { attempts: usize, remaining: usize },

    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("could not build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
