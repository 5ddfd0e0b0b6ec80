//! Error types for the extraction service client.
//!
//! Transport failures are uniform: an unreachable service, a non-success
//! status and an undecodable body all surface as [`TransportError`], so
//! callers never branch on "task not found" separately.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to the extraction service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection failed or the body was cut short
    #[error("request to service failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered with a non-2xx status
    #[error("{endpoint} returned {status}")]
    Status {
        /// Path of the endpoint that rejected the call
        endpoint: String,
        status: StatusCode,
    },

    /// The request body could not be encoded
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// The body could not be decoded into the expected shape
    #[error("malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// Writing a retrieved artifact to disk failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A [`crate::state::DownloadRequest`] could not be built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("url must not be empty")]
    EmptyUrl,

    #[error("invalid crop `{0}`: expected WxH or WxH+X+Y")]
    InvalidCrop(String),
}

/// Submitting a job did not yield a task id. The session stays empty.
#[derive(Debug, Error)]
#[error("failed to start download: {0}")]
pub struct SubmissionError(#[from] pub TransportError);

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base url `{url}`: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("rate limit must be greater than zero")]
    ZeroRateLimit,

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
