//! Error types for the price tracking pipeline
//!
//! This module defines custom error types used throughout the application.
//! Scrape failures that cross component boundaries travel as
//! [`crate::models::ScrapeOutcome`] variants; the enums here cover the
//! narrower seams (fetching, persistence, queue, service ingress).

use thiserror::Error;

use crate::models::FailureKind;

/// Errors that can occur during URL canonicalization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    /// URL could not be parsed at all
    #[error("URL is not parseable: {0}")]
    Unparseable(String),

    /// Scheme is not http or https
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Host component is missing or empty
    #[error("URL has no host")]
    MissingHost,
}

/// Errors that can occur during HTTP or browser fetching
#[derive(Error, Debug)]
pub enum FetchError {
    /// Request exceeded its deadline
    #[error("Request timeout")]
    Timeout,

    /// Non-success HTTP status that is not rate limiting or blocking
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    /// Upstream asked us to slow down (429)
    #[error("Rate limited by upstream")]
    RateLimited,

    /// Site actively refused the request (403, 451, captcha wall)
    #[error("Blocked by upstream: {0}")]
    Blocked(u16),

    /// Server-side failure (5xx) or transport error
    #[error("Network error: {0}")]
    Network(String),

    /// Headless browser failed to navigate or render
    #[error("Browser error: {0}")]
    Browser(String),

    /// robots.txt disallows fetching this URL
    #[error("Denied by robots.txt")]
    RobotsDenied,
}

impl FetchError {
    /// Map a fetch failure onto the pipeline failure taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout => FailureKind::Timeout,
            Self::Status(_) => FailureKind::HttpStatus,
            Self::RateLimited => FailureKind::RateLimited,
            Self::Blocked(_) => FailureKind::Blocked,
            Self::Network(_) => FailureKind::NetworkError,
            Self::Browser(_) => FailureKind::BrowserError,
            Self::RobotsDenied => FailureKind::RobotsDeny,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_redirect() {
            // Exceeded redirect bound is classified as a network error
            Self::Network(format!("redirect limit exceeded: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Errors from the tracker, history, product, rule, and audit stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row violated a store invariant (corrupt enum tag, bad decimal)
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict after exhausting CAS retries
    #[error("Concurrent modification of tracker {0}")]
    Conflict(uuid::Uuid),
}

/// Errors from the job queue and DLQ
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Operation is not legal for the job's current state
    #[error("Job {id} is not in state {expected}")]
    InvalidState {
        id: uuid::Uuid,
        expected: &'static str,
    },

    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

/// Errors surfaced to the ingress layer (the external REST surface maps
/// each variant to a documented response shape)
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Caller-side mistake; never retried
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Rejected by the domain allowlist policy
    #[error("Domain not allowed: {0}")]
    DomainBlocked(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A synchronous scrape failed; carries the classification and detail
    #[error("Scrape failed ({kind}): {detail}")]
    ScrapeFailed { kind: FailureKind, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<UrlError> for ServiceError {
    fn from(e: UrlError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kinds() {
        assert_eq!(FetchError::Timeout.kind(), FailureKind::Timeout);
        assert_eq!(FetchError::Status(404).kind(), FailureKind::HttpStatus);
        assert_eq!(FetchError::RateLimited.kind(), FailureKind::RateLimited);
        assert_eq!(FetchError::Blocked(403).kind(), FailureKind::Blocked);
        assert_eq!(
            FetchError::Network("reset".into()).kind(),
            FailureKind::NetworkError
        );
        assert_eq!(
            FetchError::Browser("crash".into()).kind(),
            FailureKind::BrowserError
        );
        assert_eq!(FetchError::RobotsDenied.kind(), FailureKind::RobotsDeny);
    }

    #[test]
    fn test_url_error_display() {
        let err = UrlError::UnsupportedScheme("ftp".to_string());
        assert!(err.to_string().contains("ftp"));
    }
}
