//! HTTP fetch tier
//!
//! Lightweight static fetcher used for the first tier of every scrape:
//! - User-Agent rotation from a fixed pool
//! - Pooled connection reuse and gzip
//! - Bounded redirect following
//! - Status classification into the pipeline failure taxonomy
//!
//! Retries are not handled here: failed fetches surface a classified
//! [`FetchError`] and the job queue's retry policy decides what happens.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{redirect, Client};

use crate::utils::error::FetchError;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Agent presented to robots.txt and the browser tier
pub const DEFAULT_USER_AGENT: &str = USER_AGENTS[0];

/// A fetched page plus provenance
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    /// URL after redirects
    pub final_url: String,
    pub elapsed: Duration,
}

/// Static HTTP fetcher (tier one)
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given per-request timeout and redirect bound.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Network` if the HTTP client cannot be created.
    pub fn new(timeout: Duration, max_redirects: usize) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(redirect::Policy::limited(max_redirects))
            .gzip(true)
            .cookie_store(true)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch a URL and classify the response.
    ///
    /// # Errors
    ///
    /// - 429 → `RateLimited`
    /// - 403 / 451 → `Blocked`
    /// - 5xx → `Network`
    /// - other non-2xx → `Status`
    /// - transport timeout → `Timeout`, exceeded redirects → `Network`
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();
        let headers = self.build_headers();

        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status();
        let code = status.as_u16();

        if !status.is_success() {
            return Err(classify_status(code));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let body = response.text().await?;

        Ok(FetchedPage {
            status: code,
            content_type,
            body,
            final_url,
            elapsed: started.elapsed(),
        })
    }

    /// Build request headers with a random user agent from the pool
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, HeaderValue::from_static(self.random_user_agent()));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9,de;q=0.7,tr;q=0.6"),
        );

        headers
    }

    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0])
    }
}

/// Map a non-success HTTP status onto the failure taxonomy
fn classify_status(code: u16) -> FetchError {
    match code {
        429 => FetchError::RateLimited,
        403 | 451 => FetchError::Blocked(code),
        500..=599 => FetchError::Network(format!("server error {code}")),
        _ => FetchError::Status(code),
    }
}
