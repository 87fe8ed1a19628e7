//! SearXNG image search.
//!
//! Queries `{endpoint}/search?format=json&categories=images` and returns the
//! `img_src` of each result in relevance order. The instance must have the
//! JSON output format enabled.

use async_trait::async_trait;
use chatterbox_core::error::SearchError;
use chatterbox_core::search::ResourceSearch;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub struct SearxngSearch {
    endpoint: String,
    client: reqwest::Client,
}

impl SearxngSearch {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| SearchError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Extract fetchable image URIs, dropping duplicates and non-http sources.
    fn collect_urls(response: SearchResponse, limit: usize) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        response
            .results
            .into_iter()
            .filter_map(|r| r.img_src)
            .map(|src| {
                if src.starts_with("//") {
                    format!("https:{src}")
                } else {
                    src
                }
            })
            .filter(|src| src.starts_with("http://") || src.starts_with("https://"))
            .filter(|src| seen.insert(src.clone()))
            .take(limit)
            .collect()
    }
}

#[async_trait]
impl ResourceSearch for SearxngSearch {
    fn name(&self) -> &str {
        "searxng"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, SearchError> {
        let url = format!("{}/search", self.endpoint);
        debug!(query, limit, "Searching images");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("categories", "images"),
                ("safesearch", "1"),
            ])
            .send()
            .await
            .map_err(|e| SearchError::Failed(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(SearchError::RateLimited);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Search backend returned error");
            return Err(SearchError::Failed(format!("status {status}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Failed(format!("Failed to parse results: {e}")))?;

        Ok(Self::collect_urls(parsed, limit))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    img_src: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_image_sources_in_order() {
        let raw = r#"{
            "query": "cats",
            "results": [
                {"url": "https://a", "img_src": "https://img/1.jpg"},
                {"url": "https://b"},
                {"url": "https://c", "img_src": "//img/2.png"},
                {"url": "https://d", "img_src": "https://img/1.jpg"},
                {"url": "https://e", "img_src": "data:image/png;base64,AAAA"},
                {"url": "https://f", "img_src": "https://img/3.gif"}
            ]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        let urls = SearxngSearch::collect_urls(parsed, 10);
        assert_eq!(
            urls,
            vec![
                "https://img/1.jpg".to_string(),
                "https://img/2.png".to_string(),
                "https://img/3.gif".to_string(),
            ]
        );
    }

    #[test]
    fn respects_limit() {
        let raw = r#"{"results": [
            {"img_src": "https://i/1"}, {"img_src": "https://i/2"}, {"img_src": "https://i/3"}
        ]}"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(SearxngSearch::collect_urls(parsed, 2).len(), 2);
    }

    #[test]
    fn empty_payload() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(SearxngSearch::collect_urls(parsed, 5).is_empty());
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let s = SearxngSearch::new("http://localhost:8888/").unwrap();
        assert_eq!(s.endpoint, "http://localhost:8888");
        assert_eq!(s.name(), "searxng");
    }
}
