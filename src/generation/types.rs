use serde::{Deserialize, Serialize};

/// Message in a generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request body for a model run
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    /// Create a request from an ordered message list
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: None,
        }
    }

    /// Cap the generated length
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Envelope returned by the model run endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub success: bool,
    pub result: Option<GenerateResult>,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
}

/// Model output
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResult {
    pub response: Option<String>,
}

/// Error or info entry in the response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

impl GenerateResponse {
    /// Extract the generated text, trimmed. `None` when absent or blank.
    pub fn text(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.response.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Join envelope errors into one message
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "request reported failure without details".to_string();
        }
        self.errors
            .iter()
            .map(|e| match e.code {
                Some(code) => format!("{} ({})", e.message, code),
                None => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
