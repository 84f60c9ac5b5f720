use std::collections::BTreeSet;
use std::time::Duration;

use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::convert::clean_url;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_SCROLL_ROUNDS: usize = 60;
const STABLE_ROUNDS: usize = 3;

// Substack may serve a <noscript> placeholder before hydration; wait until a
// likely article container exists before grabbing the DOM.
const ARTICLE_PROBE_JS: &str = r#"(() => !!(document.querySelector('article')
    || document.querySelector('div.available-content')
    || document.querySelector('div.post')))()"#;

const ARCHIVE_COLLECT_JS: &str = r#"(() => {
    window.scrollTo(0, document.body.scrollHeight);
    return Array.from(document.querySelectorAll("a[href*='/p/']")).map(a => a.href);
})()"#;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page did not render within {0:?}")]
    Timeout(Duration),
    #[error("browser endpoint refused connection at {0}")]
    ConnectionRefused(String),
    #[error("browser endpoint returned HTTP {0}")]
    HttpStatus(u16),
    #[error("devtools protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Wrapper around an already-running browser's remote debugging interface.
/// Each fetch opens a throwaway target in the user's authenticated session,
/// renders one page, and closes the target again.
pub struct CdpFetcher {
    browser: Browser,
    handler_task: JoinHandle<()>,
    timeout: Duration,
}

impl CdpFetcher {
    pub async fn connect(config: &FetchConfig) -> Result<Self, FetchError> {
        let endpoint = format!("http://{}:{}/json/version", config.host, config.port);
        let resp = reqwest::get(&endpoint).await.map_err(|e| {
            if e.is_connect() {
                FetchError::ConnectionRefused(endpoint.clone())
            } else if e.is_timeout() {
                FetchError::Timeout(config.timeout)
            } else {
                FetchError::Protocol(e.to_string())
            }
        })?;
        if !resp.status().is_success() {
            return Err(FetchError::HttpStatus(resp.status().as_u16()));
        }
        let info: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))?;
        let ws_url = info["webSocketDebuggerUrl"]
            .as_str()
            .ok_or_else(|| {
                FetchError::Protocol("version endpoint had no webSocketDebuggerUrl".to_string())
            })?
            .to_string();

        debug!("attaching to browser at {}", ws_url);
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
            timeout: config.timeout,
        })
    }

    /// Render one address and return the full document HTML.
    pub async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let page = self.new_target().await?;
        let result = self.render(&page, url).await;
        if let Err(e) = page.close().await {
            warn!("failed to close target: {}", e);
        }
        result
    }

    async fn new_target(&self) -> Result<Page, FetchError> {
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))
    }

    async fn render(&self, page: &Page, url: &str) -> Result<String, FetchError> {
        page.goto(url)
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))?;
        // The load event may never fire on hydrated pages; bounded wait only.
        let _ = timeout(self.timeout, page.wait_for_navigation()).await;

        let deadline = Instant::now() + self.timeout;
        loop {
            let ready = page
                .evaluate(ARTICLE_PROBE_JS)
                .await
                .map_err(|e| FetchError::Protocol(e.to_string()))?
                .into_value::<bool>()
                .unwrap_or(false);
            if ready || Instant::now() >= deadline {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }

        // Grab whatever is rendered by now; the extractor decides whether it
        // amounts to an article.
        let html = page
            .content()
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))?;
        if html.trim().is_empty() {
            return Err(FetchError::Timeout(self.timeout));
        }
        Ok(html)
    }

    /// Render a publication's archive page, scroll until the set of post
    /// URLs stops growing, and return them sorted.
    pub async fn archive_post_urls(&self, archive_url: &str) -> Result<Vec<String>, FetchError> {
        let page = self.new_target().await?;
        let result = self.scroll_archive(&page, archive_url).await;
        if let Err(e) = page.close().await {
            warn!("failed to close target: {}", e);
        }
        result
    }

    async fn scroll_archive(
        &self,
        page: &Page,
        archive_url: &str,
    ) -> Result<Vec<String>, FetchError> {
        page.goto(archive_url)
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))?;
        let _ = timeout(self.timeout, page.wait_for_navigation()).await;

        let mut urls: BTreeSet<String> = BTreeSet::new();
        let mut stable = 0usize;
        let mut last_count = usize::MAX;

        for _ in 0..MAX_SCROLL_ROUNDS {
            let hrefs = page
                .evaluate(ARCHIVE_COLLECT_JS)
                .await
                .map_err(|e| FetchError::Protocol(e.to_string()))?
                .into_value::<Vec<String>>()
                .unwrap_or_default();
            for href in hrefs {
                if href.contains("/p/") {
                    urls.insert(clean_url(&href));
                }
            }
            if urls.len() == last_count {
                stable += 1;
                if stable >= STABLE_ROUNDS {
                    break;
                }
            } else {
                stable = 0;
                last_count = urls.len();
            }
            sleep(POLL_INTERVAL).await;
        }

        Ok(urls.into_iter().collect())
    }

    /// Detach from the browser. The browser itself keeps running — it
    /// belongs to the user, not to us.
    pub async fn close(self) {
        drop(self.browser);
        self.handler_task.abort();
    }
}

/// Archive address for a publication slug or any address on the publication.
pub fn archive_url_for(input: &str) -> String {
    if input.contains("substack.com") {
        if let Ok(parsed) = url::Url::parse(input) {
            if let Some(host) = parsed.host_str() {
                return format!("{}://{}/archive", parsed.scheme(), host);
            }
        }
        // Bare host without a scheme.
        let host = input.trim_end_matches('/');
        return format!("https://{}/archive", host);
    }
    format!("https://{}.substack.com/archive", input)
}

// ── Tests ──
