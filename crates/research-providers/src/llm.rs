use async_trait::async_trait;
use research_types::{ResearchError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
    pub tools: Option<Vec<ToolDefinition>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a single completion call. Callers (the pipeline's model-output
    /// parsing contracts) handle the native-tool-call / JSON-mode /
    /// plain-text fallback chain themselves by inspecting the response, not
    /// by retrying here.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

/// Thin client against an OpenAI-compatible chat-completions endpoint. The
/// actual model, prompt wording and endpoint are an external collaborator;
/// this only owns the HTTP/JSON plumbing.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role { Role::System => "system", Role::User => "user", Role::Assistant => "assistant" },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if let Some(tools) = &request.tools {
            body["tools"] = serde_json::json!(tools
                .iter()
                .map(|t| serde_json::json!({
                    "type": "function",
                    "function": {"name": t.name, "description": t.description, "parameters": t.parameters},
                }))
                .collect::<Vec<_>>());
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResearchError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ResearchError::Model(format!(
                "completion request failed: {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ResearchError::Model(format!("invalid completion payload: {e}")))?;

        parse_completion_payload(&payload)
    }
}

fn parse_completion_payload(payload: &Value) -> Result<CompletionResponse> {
    let choice = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ResearchError::Model("completion response had no choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| ResearchError::Model("completion choice had no message".into()))?;

    let tool_call = message
        .get("tool_calls")
        .and_then(|tc| tc.get(0))
        .and_then(|tc| tc.get("function"))
        .and_then(|f| {
            let name = f.get("name")?.as_str()?.to_string();
            let arguments = f.get("arguments")?.as_str()?;
            let arguments = serde_json::from_str(arguments).unwrap_or(Value::Null);
            Some(ToolCall { name, arguments })
        });

    let usage = payload.get("usage");
    Ok(CompletionResponse {
        content: message.get("content").and_then(|c| c.as_str()).map(String::from),
        tool_call,
        prompt_tokens: usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).unwrap_or(0),
        completion_tokens: usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    })
}
