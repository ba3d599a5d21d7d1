//! LLM and web-research client interfaces. The engine treats the model API,
//! the search API and the page-extraction API as external collaborators: this
//! crate defines the interfaces the pipeline programs against and a thin
//! HTTP implementation of each, plus in-memory mocks for tests.

mod llm;
mod mock;
mod search;

pub use llm::{ChatMessage, CompletionRequest, CompletionResponse, HttpLlmClient, LlmClient, Role, ToolCall, ToolDefinition};
pub use mock::{MockExtractionClient, MockLlmClient, MockSearchClient};
pub use search::{ExtractedContent, ExtractionClient, HttpExtractionClient, HttpSearchClient, SearchClient, SearchResult};
