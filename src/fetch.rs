use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    /// Body must parse as JSON for the attempt to count as a success.
    Json,
}

impl ContentKind {
    fn accept_header(self) -> &'static str {
        match self {
            Self::Html => "text/html,application/xhtml+xml",
            Self::Json => "application/json",
        }
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, kind: ContentKind) -> anyhow::Result<String>;
}

/// Retrieves remote content through an ordered list of pass-through proxies.
///
/// Each call starts at the proxy that last succeeded and walks the list
/// once, wrapping around. An empty proxy list means direct requests.
#[derive(Debug)]
pub struct ContentFetcher {
    client: reqwest::Client,
    proxies: Vec<String>,
    preferred: AtomicUsize,
}

impl ContentFetcher {
    pub fn new(proxies: Vec<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build fetch http client")?;

        let proxies = proxies
            .into_iter()
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            client,
            proxies,
            preferred: AtomicUsize::new(0),
        })
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    pub fn preferred_index(&self) -> usize {
        self.preferred.load(Ordering::Relaxed)
    }

    async fn fetch_once(&self, request_url: &str, kind: ContentKind) -> anyhow::Result<String> {
        let response = self
            .client
            .get(request_url)
            .header(USER_AGENT, concat!("stockwatch/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, kind.accept_header())
            .send()
            .await
            .with_context(|| format!("GET {request_url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status}");
        }

        let body = response.text().await.context("read response body")?;
        if kind == ContentKind::Json {
            serde_json::from_str::<serde_json::Value>(&body).context("parse json body")?;
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetch for ContentFetcher {
    async fn fetch(&self, url: &str, kind: ContentKind) -> anyhow::Result<String> {
        if self.proxies.is_empty() {
            return self.fetch_once(url, kind).await;
        }

        let total = self.proxies.len();
        let start = self.preferred.load(Ordering::Relaxed) % total;
        let encoded = urlencoding::encode(url);
        let mut last_err = None;

        for offset in 0..total {
            let index = (start + offset) % total;
            let proxy = &self.proxies[index];
            let request_url = format!("{proxy}{encoded}");

            match self.fetch_once(&request_url, kind).await {
                Ok(body) => {
                    self.preferred.store(index, Ordering::Relaxed);
                    return Ok(body);
                }
                Err(err) => {
                    tracing::debug!(
                        proxy = %proxy,
                        attempt = offset + 1,
                        total,
                        url,
                        ?err,
                        "proxy attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no proxy attempted"));
        Err(err.context(format!("all {total} proxies failed for {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_proxy_entries_are_dropped() -> anyhow::Result<()> {
        let fetcher = ContentFetcher::new(
            vec![" ".to_owned(), "https://proxy.example/?url=".to_owned()],
            DEFAULT_FETCH_TIMEOUT,
        )?;
        assert_eq!(fetcher.proxies(), ["https://proxy.example/?url="]);
        assert_eq!(fetcher.preferred_index(), 0);
        Ok(())
    }
}
