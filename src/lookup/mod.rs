//! Web lookup collaborators backing the SEARCH/FETCH directives.
//!
//! Both capabilities are shared across sessions and carry per-call timeouts
//! so one slow lookup cannot stall other pipelines. The pipeline only sees
//! the traits; HTTP implementations live in this module.

mod fetch;
mod search;

pub use fetch::HttpPageFetcher;
pub use search::HttpWebSearch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

/// External web-search engine.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchHit>>;
}

/// External page fetcher. Returns HTML-stripped text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedPage>;
}

/// Format search hits for inclusion in the model's context.
pub fn format_search_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No search results found.".to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut parts = vec![format!("{}. {}", i + 1, hit.title)];
            if !hit.url.is_empty() {
                parts.push(format!("   URL: {}", hit.url));
            }
            if !hit.snippet.is_empty() {
                parts.push(format!("   {}", hit.snippet));
            }
            parts.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Format a fetched page for inclusion in the model's context.
pub fn format_fetched_page(page: &FetchedPage) -> String {
    let title = page.title.as_deref().unwrap_or("Untitled");
    format!("### {title}\nSource: {}\n\n{}", page.url, page.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_numbered_results() {
        let hits = vec![
            SearchHit {
                title: "Edinburgh weather".into(),
                snippet: "Light rain, 12C".into(),
                url: "https://example.com/weather".into(),
            },
            SearchHit {
                title: "Forecast".into(),
                snippet: String::new(),
                url: String::new(),
            },
        ];

        let formatted = format_search_results(&hits);
        assert!(formatted.starts_with("1. Edinburgh weather"));
        assert!(formatted.contains("   URL: https://example.com/weather"));
        assert!(formatted.contains("2. Forecast"));
    }

    #[test]
    fn empty_results_say_so() {
        assert_eq!(format_search_results(&[]), "No search results found.");
    }

    #[test]
    fn formats_fetched_page_with_fallback_title() {
        let page = FetchedPage {
            url: "https://example.com".into(),
            title: None,
            text: "body text".into(),
        };
        let formatted = format_fetched_page(&page);
        assert!(formatted.starts_with("### Untitled"));
        assert!(formatted.contains("Source: https://example.com"));
        assert!(formatted.contains("body text"));
    }
}
