use super::{SearchHit, WebSearch};
use crate::config::LookupConfig;
use crate::security::{ContentType, Sanitizer};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Web search against a SearxNG-style JSON endpoint.
///
/// Result titles and snippets are sanitized with injection filtering before
/// they can reach a prompt; a hostile result degrades to the filtered marker
/// instead of failing the lookup.
pub struct HttpWebSearch {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    max_results: usize,
    sanitizer: Arc<Sanitizer>,
}

#[derive(Deserialize)]
struct WireResults {
    #[serde(default)]
    results: Vec<WireResult>,
}

#[derive(Deserialize)]
struct WireResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    /// SearxNG calls the snippet `content`.
    #[serde(default)]
    content: String,
}

impl HttpWebSearch {
    pub fn new(
        endpoint: &str,
        config: &LookupConfig,
        sanitizer: Arc<Sanitizer>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("build search HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.search_timeout_secs),
            max_results: config.max_results,
            sanitizer,
        })
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(format!("{}/search", self.endpoint))
            .query(&[("q", query), ("format", "json")])
            .timeout(self.timeout)
            .send()
            .await
            .context("send search request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("search endpoint returned {status}");
        }

        let parsed: WireResults = response.json().await.context("decode search results")?;

        let hits = parsed
            .results
            .into_iter()
            .take(self.max_results)
            .map(|r| SearchHit {
                title: self
                    .sanitizer
                    .sanitize_from(&r.url, &r.title, ContentType::PageTitle, true),
                snippet: self.sanitizer.sanitize_from(
                    &r.url,
                    &r.content,
                    ContentType::SearchSnippet,
                    true,
                ),
                url: if r.url.starts_with("http://") || r.url.starts_with("https://") {
                    r.url
                } else {
                    String::new()
                },
            })
            .collect();

        Ok(hits)
    }
}
