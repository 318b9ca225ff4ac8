//! robots.txt politeness gate
//!
//! Fetches and caches one robots.txt body per host and answers allow/deny
//! for concrete URLs. Unreachable or missing robots.txt is treated as
//! allow-all. Can be disabled entirely through configuration.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use robotstxt::DefaultMatcher;
use tokio::sync::Mutex;
use url::Url;

/// Cap on cached hosts; oldest-inserted entries are evicted beyond this
const MAX_CACHED_HOSTS: usize = 1_000;

/// Cached per-host robots.txt matcher
pub struct RobotsGate {
    client: Client,
    user_agent: String,
    cache: Mutex<HashMap<String, String>>,
}

impl RobotsGate {
    /// Create a gate with its own short-timeout HTTP client
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .unwrap_or_default();

        Self {
            client,
            user_agent: user_agent.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether robots.txt permits fetching `url`
    pub async fn allows(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        {
            let cache = self.cache.lock().await;
            if let Some(text) = cache.get(&host) {
                let mut matcher = DefaultMatcher::default();
                return matcher.one_agent_allowed_by_robots(text, &self.user_agent, url);
            }
        }

        let robots_url = format!("{}://{}/robots.txt", parsed.scheme(), host);
        let text = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            // Missing or unreachable robots.txt is allow-all
            _ => String::new(),
        };

        let mut cache = self.cache.lock().await;
        if cache.len() >= MAX_CACHED_HOSTS {
            if let Some(key) = cache.keys().next().cloned() {
                cache.remove(&key);
            }
        }
        cache.insert(host, text.clone());
        drop(cache);

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&text, &self.user_agent, url)
    }
}
