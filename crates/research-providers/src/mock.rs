use std::sync::Mutex;

use async_trait::async_trait;
use research_types::Result;

use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};
use crate::search::{ExtractedContent, ExtractionClient, SearchClient, SearchResult};

/// Replays a fixed queue of responses, one per call, cycling the last entry
/// once exhausted. Good enough for pipeline unit tests that don't care about
/// exact prompt wording.
pub struct MockLlmClient {
    responses: Mutex<Vec<CompletionResponse>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(vec![CompletionResponse {
            content: Some(content.into()),
            tool_call: None,
            prompt_tokens: 10,
            completion_tokens: 10,
        }])
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses.first().cloned().unwrap_or_default())
        }
    }
}

pub struct MockSearchClient {
    results: Vec<SearchResult>,
}

impl MockSearchClient {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl SearchClient for MockSearchClient {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

pub struct MockExtractionClient;

#[async_trait]
impl ExtractionClient for MockExtractionClient {
    async fn extract(&self, url: &str) -> Result<ExtractedContent> {
        Ok(ExtractedContent {
            url: url.to_string(),
            title: Some("mock title".into()),
            content: format!("extracted content for {url}"),
        })
    }
}
