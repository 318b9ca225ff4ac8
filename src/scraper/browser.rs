//! Headless browser fetch tier
//!
//! Second-tier fetcher for pages whose prices only exist after client-side
//! rendering. A single shared browser process is launched lazily and reused;
//! each fetch opens and closes one page. Navigation and content retrieval
//! run under their own timeouts, with a bounded wait for network idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Mutex;

use super::fetcher::FetchedPage;
use crate::utils::error::FetchError;

/// Renders a URL into final HTML. Implemented by [`BrowserFetcher`] and by
/// test stand-ins, which is the seam the executor uses for tier escalation.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// chromiumoxide-backed renderer with a lazily launched shared browser
pub struct BrowserFetcher {
    inner: Arc<Mutex<Option<Arc<Browser>>>>,
    user_agent: String,
    nav_timeout: Duration,
    idle_wait: Duration,
}

impl BrowserFetcher {
    pub fn new(user_agent: &str, nav_timeout: Duration, idle_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            user_agent: user_agent.to_string(),
            nav_timeout,
            idle_wait,
        }
    }

    async fn get_or_launch(&self) -> Result<Arc<Browser>, FetchError> {
        let mut guard = self.inner.lock().await;
        if let Some(browser) = guard.as_ref() {
            return Ok(Arc::clone(browser));
        }

        let config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.user_agent))
            .build()
            .map_err(|e| FetchError::Browser(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("browser launch: {e}")))?;

        // Drive the CDP event loop until the browser goes away
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let shared = Arc::new(browser);
        *guard = Some(Arc::clone(&shared));
        Ok(shared)
    }

    /// Close the shared browser process, if one was launched
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(browser) = guard.take() {
            if let Ok(mut browser) = Arc::try_unwrap(browser) {
                if let Err(e) = browser.close().await {
                    tracing::warn!(error = %e, "Browser close error");
                }
            }
        }
    }
}

#[async_trait]
impl PageRenderer for BrowserFetcher {
    async fn render(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();
        let browser = self.get_or_launch().await?;

        let page = tokio::time::timeout(self.nav_timeout, browser.new_page(url))
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| classify_navigation_error(&e.to_string()))?;

        // Bounded wait for network idle; best effort
        let _ = tokio::time::timeout(self.idle_wait, page.wait_for_navigation()).await;

        let html = tokio::time::timeout(self.nav_timeout, page.content())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Browser(format!("content retrieval: {e}")))?;

        if let Err(e) = page.close().await {
            tracing::debug!(url, error = %e, "Page close error");
        }

        Ok(FetchedPage {
            status: 200,
            content_type: "text/html".to_string(),
            body: html,
            final_url: url.to_string(),
            elapsed: started.elapsed(),
        })
    }
}

/// Navigation errors mentioning a blocked load are classified as BLOCKED;
/// everything else is a browser failure.
fn classify_navigation_error(detail: &str) -> FetchError {
    if detail.contains("ERR_BLOCKED") || detail.contains("ERR_ACCESS_DENIED") {
        FetchError::Blocked(0)
    } else {
        FetchError::Browser(format!("navigation: {detail}"))
    }
}
