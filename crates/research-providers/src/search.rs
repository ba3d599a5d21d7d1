use async_trait::async_trait;
use research_types::{ResearchError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedContent>;
}

/// Thin client against a Tavily-shaped search API. Query wording, ranking
/// and scoring all live on the provider's side; this only owns request/
/// response plumbing.
pub struct HttpSearchClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpSearchClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.tavily.com".into(),
        }
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
        });
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ResearchError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ResearchError::Network(format!(
                "search request failed: {}",
                response.status()
            )));
        }
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ResearchError::Network(format!("invalid search payload: {e}")))?;
        let results = payload
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(results
            .into_iter()
            .filter_map(|r| {
                Some(SearchResult {
                    url: r.get("url")?.as_str()?.to_string(),
                    title: r.get("title").and_then(|t| t.as_str()).unwrap_or_default().to_string(),
                    snippet: r.get("content").and_then(|c| c.as_str()).unwrap_or_default().to_string(),
                    score: r.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                })
            })
            .collect())
    }
}

pub struct HttpExtractionClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpExtractionClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.tavily.com".into(),
        }
    }
}

#[async_trait]
impl ExtractionClient for HttpExtractionClient {
    async fn extract(&self, url: &str) -> Result<ExtractedContent> {
        let body = serde_json::json!({ "api_key": self.api_key, "urls": [url] });
        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ResearchError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ResearchError::Network(format!(
                "extraction request failed: {}",
                response.status()
            )));
        }
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ResearchError::Network(format!("invalid extraction payload: {e}")))?;
        let entry = payload
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
            .ok_or_else(|| ResearchError::Network("extraction returned no results".into()))?;
        Ok(ExtractedContent {
            url: url.to_string(),
            title: entry.get("title").and_then(|t| t.as_str()).map(String::from),
            content: entry
                .get("raw_content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }
}
