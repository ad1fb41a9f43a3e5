pub mod client;
pub mod reply;
pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::provider::reply::Reply;
use crate::provider::schema::{OutputSchema, ToolSpec};

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unavailable(String),

    #[error("provider rate limited")]
    RateLimited,

    #[error("reply violates requested schema: {0}")]
    SchemaViolation(String),

    #[error("gateway error {status}: {detail}")]
    Gateway { status: u16, detail: String },
}

impl ProviderError {
    /// Transient errors are retried with bounded backoff; anything else
    /// terminates the provider call immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_)
                | ProviderError::RateLimited
                | ProviderError::SchemaViolation(_)
        )
    }
}

/// Token accounting extracted from the gateway's usage object.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
}

impl TokenUsage {
    pub fn absorb(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// One completion request: ordered conversation turns plus the optional
/// machine-checkable constraints the gateway should apply.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Value>,
    pub schema: Option<OutputSchema>,
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Value>) -> Self {
        Self {
            messages,
            schema: None,
            tools: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub reply: Reply,
    pub usage: TokenUsage,
}

/// Boundary abstraction over the hosted completion capability.
/// Opaque, possibly slow, possibly failing.
pub trait CompletionProvider {
    fn complete(&self, req: &CompletionRequest) -> Result<Completion, ProviderError>;
}
