//! Two-step retrieval of candidate pages: a HEAD probe that checks the page is
//! HTML, then a GET of the full body.
//!
//! [`fetch_all`] runs the retrievals on a bounded pool of tokio workers. Each
//! request has its own deadline; nothing is retried.
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Fetch;
use crate::model::{CandidateLink, FetchedPage};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("error making head request: {0}")]
    Probe(#[source] reqwest::Error),
    #[error("head request returned {0}")]
    ProbeStatus(StatusCode),
    #[error("content type {0:?} is not text/html")]
    NotHtml(String),
    #[error("error making get request: {0}")]
    Retrieve(#[source] reqwest::Error),
    #[error("get request returned {0}")]
    RetrieveStatus(StatusCode),
    #[error("could not read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Ordered `pattern -> user agent` rules with a fallback.
///
/// The first rule whose pattern occurs in the candidate's link text wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentRules {
    rules: Vec<(String, String)>,
    default: String,
}

impl UserAgentRules {
    pub fn new(rules: impl IntoIterator<Item = (String, String)>, default: String) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            default,
        }
    }

    pub fn select(&self, link: &str) -> &str {
        self.rules
            .iter()
            .find(|(pattern, _)| link.contains(pattern.as_str()))
            .map(|(_, agent)| agent.as_str())
            .unwrap_or(&self.default)
    }
}

/// Retrieves the HTML of one candidate.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, candidate: &CandidateLink) -> Result<Vec<u8>, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
    timeout: Duration,
    user_agents: UserAgentRules,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("timeout", &self.timeout)
            .field("user_agents", &self.user_agents)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agents: UserAgentRules) -> reqwest::Result<Self> {
        let http = Client::builder().no_proxy().build()?;
        Ok(Self {
            http,
            timeout,
            user_agents,
        })
    }

    pub fn from_config(cfg: &Fetch) -> reqwest::Result<Self> {
        Self::new(cfg.timeout(), cfg.user_agents())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, candidate: &CandidateLink) -> Result<Vec<u8>, FetchError> {
        let agent = self.user_agents.select(&candidate.link);

        let head = self
            .http
            .head(candidate.url.clone())
            .header(USER_AGENT, agent)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FetchError::Probe)?;
        if !head.status().is_success() {
            return Err(FetchError::ProbeStatus(head.status()));
        }
        let content_type = head
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.contains("text/html") {
            return Err(FetchError::NotHtml(content_type.to_string()));
        }

        let res = self
            .http
            .get(candidate.url.clone())
            .header(USER_AGENT, agent)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FetchError::Retrieve)?;
        if !res.status().is_success() {
            return Err(FetchError::RetrieveStatus(res.status()));
        }
        let body = res.bytes().await.map_err(FetchError::Body)?;
        Ok(body.to_vec())
    }
}

/// Fetch every scheduled candidate and return the ones that succeeded.
///
/// `workers` bounds how many candidates are in flight at once; 0 runs every
/// candidate at the same time. Returns only after every worker has finished.
/// Result order is completion order.
#[instrument(skip_all, fields(scheduled = schedule.len()))]
pub async fn fetch_all(
    fetcher: Arc<dyn PageFetcher>,
    schedule: Vec<CandidateLink>,
    workers: usize,
) -> Vec<FetchedPage> {
    let total = schedule.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = if workers == 0 { total } else { workers.min(total) };

    let (task_tx, task_rx) = mpsc::channel::<CandidateLink>(total);
    for candidate in schedule {
        // Capacity equals the schedule length, so this never waits.
        if task_tx.send(candidate).await.is_err() {
            break;
        }
    }
    drop(task_tx);
    let task_rx = Arc::new(Mutex::new(task_rx));

    // Room for every result so no worker blocks on delivery.
    let (done_tx, mut done_rx) = mpsc::channel::<FetchedPage>(total);

    let mut set = JoinSet::new();
    for worker in 0..workers {
        let fetcher = Arc::clone(&fetcher);
        let task_rx = Arc::clone(&task_rx);
        let done_tx = done_tx.clone();
        set.spawn(async move {
            loop {
                let next = task_rx.lock().await.recv().await;
                let Some(candidate) = next else {
                    break;
                };
                match fetcher.fetch(&candidate).await {
                    Ok(html) => {
                        debug!(worker, link = %candidate.link, bytes = html.len(), "fetched page");
                        let page = FetchedPage { candidate, html };
                        if done_tx.send(page).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(worker, link = %candidate.link, %err, "candidate not fetched");
                    }
                }
            }
        });
    }
    drop(done_tx);

    while let Some(joined) = set.join_next().await {
        if let Err(err) = joined {
            error!(?err, "fetch worker failed");
        }
    }
    info!(workers, "finished fetching candidate pages");

    let mut pages = Vec::with_capacity(total);
    while let Some(page) = done_rx.recv().await {
        pages.push(page);
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn candidate(link: &str) -> CandidateLink {
        CandidateLink {
            link: link.into(),
            url: Url::parse(link).unwrap(),
            post_id: 1,
        }
    }

    /// Fails every link containing "down", tracks peak concurrency.
    #[derive(Default)]
    struct StubFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, candidate: &CandidateLink) -> Result<Vec<u8>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if candidate.link.contains("down") {
                return Err(FetchError::NotHtml("image/png".into()));
            }
            Ok(candidate.link.as_bytes().to_vec())
        }
    }

    fn schedule(n: usize) -> Vec<CandidateLink> {
        (0..n)
            .map(|i| candidate(&format!("https://site{}.example.com/", i)))
            .collect()
    }

    #[test]
    fn user_agent_first_matching_rule_wins() {
        let rules = UserAgentRules::new(
            vec![
                ("tumblr.com".to_string(), "Baiduspider".to_string()),
                ("tumblr".to_string(), "Other".to_string()),
            ],
            "default-agent".to_string(),
        );
        assert_eq!(rules.select("https://art.tumblr.com/post/1"), "Baiduspider");
        assert_eq!(rules.select("https://tumblr.org/"), "Other");
        assert_eq!(rules.select("https://example.com/"), "default-agent");
    }

    #[tokio::test]
    async fn empty_schedule_returns_nothing() {
        let fetcher = Arc::new(StubFetcher::default());
        assert!(fetch_all(fetcher, Vec::new(), 4).await.is_empty());
    }

    #[tokio::test]
    async fn failures_are_dropped() {
        let fetcher = Arc::new(StubFetcher::default());
        let pages = fetch_all(
            fetcher,
            vec![
                candidate("https://up.example.com/"),
                candidate("https://down.example.com/"),
                candidate("https://also-up.example.org/"),
            ],
            2,
        )
        .await;
        let links: HashSet<_> = pages.iter().map(|p| p.candidate.link.clone()).collect();
        assert_eq!(links.len(), 2);
        assert!(links.contains("https://up.example.com/"));
        assert!(links.contains("https://also-up.example.org/"));
        for page in &pages {
            assert_eq!(page.html, page.candidate.link.as_bytes());
        }
    }

    #[tokio::test]
    async fn worker_limit_bounds_concurrency() {
        let fetcher = Arc::new(StubFetcher::default());
        let pages = fetch_all(fetcher.clone(), schedule(12), 3).await;
        assert_eq!(pages.len(), 12);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn zero_workers_fans_out_fully() {
        let fetcher = Arc::new(StubFetcher::default());
        let pages = fetch_all(fetcher.clone(), schedule(8), 0).await;
        assert_eq!(pages.len(), 8);
        assert!(fetcher.peak.load(Ordering::SeqCst) > 1);
    }
}
