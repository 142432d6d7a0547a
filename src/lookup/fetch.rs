use super::{FetchedPage, PageFetcher};
use crate::config::LookupConfig;
use crate::security::{ContentType, Sanitizer, url_guard};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Adjutant/0.1)";

/// Elements whose text never belongs in extracted page content.
const SKIP_ELEMENTS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "noscript", "template",
];

/// Fetches a public web page and reduces it to sanitized text.
///
/// Every URL passes the SSRF guard (scheme check, blocked-host patterns, DNS
/// resolution into private ranges) before any request is made. Content is
/// HTML-stripped, capped, and run through the sanitizer with injection
/// filtering.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_chars: usize,
    sanitizer: Arc<Sanitizer>,
    enforce_guard: bool,
}

impl HttpPageFetcher {
    pub fn new(config: &LookupConfig, sanitizer: Arc<Sanitizer>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("build fetch HTTP client")?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_chars: config.fetch_max_chars,
            sanitizer,
            enforce_guard: true,
        })
    }

    /// Test constructor that skips the SSRF guard so a loopback mock server
    /// can stand in for the web.
    #[cfg(test)]
    fn without_guard(config: &LookupConfig, sanitizer: Arc<Sanitizer>) -> anyhow::Result<Self> {
        let mut fetcher = Self::new(config, sanitizer)?;
        fetcher.enforce_guard = false;
        Ok(fetcher)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedPage> {
        if self.enforce_guard {
            url_guard::validate_fetch_url(url).await?;
        } else {
            url::Url::parse(url).context("parse fetch URL")?;
        }

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .context("send fetch request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("fetch returned {status}");
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") && !content_type.contains("text/plain") {
            anyhow::bail!("unsupported content type: {content_type}");
        }

        let final_url = response.url().to_string();
        let body = response.text().await.context("read fetch body")?;

        let (raw_title, raw_text) = if content_type.contains("text/html") {
            extract_page_text(&body)
        } else {
            (None, body)
        };

        let capped: String = raw_text.chars().take(self.max_chars).collect();
        let text = self
            .sanitizer
            .sanitize_from(&final_url, &capped, ContentType::FetchedPage, true);
        let title = raw_title.map(|t| {
            self.sanitizer
                .sanitize_from(&final_url, &t, ContentType::PageTitle, true)
        });

        Ok(FetchedPage {
            url: final_url,
            title,
            text,
        })
    }
}

/// Reduce an HTML document to its title and readable text, skipping script,
/// style, and boilerplate chrome elements.
fn extract_page_text(html: &str) -> (Option<String>, String) {
    let document = scraper::Html::parse_document(html);

    let title = scraper::Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .filter(|t| !t.is_empty());

    let mut lines: Vec<String> = Vec::new();
    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skip = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIP_ELEMENTS.contains(&el.name()))
        });
        if skip {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    (title, lines.join("\n"))
}
