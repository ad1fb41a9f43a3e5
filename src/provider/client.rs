use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use hex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::provider::reply::Reply;
use crate::provider::{Completion, CompletionProvider, CompletionRequest, ProviderError, TokenUsage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Gateway endpoint configuration. Loaded from the environment or the
/// user config file; never read from ambient globals past construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    #[serde(default)]
    pub app_name: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, String> {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(GatewayConfig {
                    api_key: key,
                    base_url: default_base_url(),
                    app_name: std::env::var("OPENROUTER_APP_NAME").ok(),
                });
            }
        }

        load_config().ok_or_else(|| {
            "no API key: set OPENROUTER_API_KEY or run `repairbench config --api-key <key>`"
                .to_string()
        })
    }

    pub fn store(api_key: &str) -> Result<(), String> {
        if api_key.trim().is_empty() {
            return Err("API key cannot be empty".into());
        }

        let cfg = GatewayConfig {
            api_key: api_key.trim().to_string(),
            base_url: default_base_url(),
            app_name: None,
        };
        save_config(&cfg).map_err(|e| e.to_string())
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repairbench/gateway.toml")
}

fn load_config() -> Option<GatewayConfig> {
    fs::read_to_string(config_path())
        .ok()
        .and_then(|s| toml::from_str(&s).ok())
}

fn save_config(cfg: &GatewayConfig) -> std::io::Result<()> {
    let path = config_path();
    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    let body = toml::to_string(cfg).map_err(std::io::Error::other)?;
    fs::write(path, body)
}

/// Blocking client for an OpenRouter-compatible chat-completions gateway.
#[derive(Clone)]
pub struct GatewayClient {
    cfg: GatewayConfig,
    model: String,
}

impl GatewayClient {
    pub fn new(cfg: GatewayConfig, model: String) -> Self {
        Self { cfg, model }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_payload(&self, req: &CompletionRequest) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": req.messages,
            "temperature": req.temperature,
        });

        if let Some(max) = req.max_tokens {
            payload["max_tokens"] = max.into();
        }

        if !req.tools.is_empty() {
            payload["tools"] = Value::Array(req.tools.iter().map(|t| t.to_value()).collect());
            payload["tool_choice"] = "auto".into();
        }

        if let Some(schema) = &req.schema {
            payload["response_format"] = schema.to_response_format();
        }

        payload
    }
}

impl CompletionProvider for GatewayClient {
    fn complete(&self, req: &CompletionRequest) -> Result<Completion, ProviderError> {
        let payload = self.build_payload(req);
        debug!(
            model = %self.model,
            request = %hash_request(&payload),
            turns = req.messages.len(),
            "gateway request"
        );

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let mut http = client
            .post(format!("{}/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&payload);

        if let Some(name) = &self.cfg.app_name {
            http = http.header("X-Title", name.clone());
        }

        let resp = http
            .send()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }

        let body: Value = resp
            .json()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Gateway {
                status: status.as_u16(),
                detail: body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| ProviderError::SchemaViolation("response has no choices".into()))?;

        let mut reply = Reply::from_message(message)?;

        // A schema-constrained request must come back as the declared
        // object; re-parse and validate the text the gateway returned.
        if let Some(schema) = &req.schema {
            if let Reply::Text(text) = &reply {
                let value = Reply::parse_structured(text)?;
                schema
                    .validate(&value)
                    .map_err(ProviderError::SchemaViolation)?;
                reply = Reply::Structured(value);
            }
        }

        Ok(Completion {
            reply,
            usage: extract_usage(&body),
        })
    }
}

fn extract_usage(body: &Value) -> TokenUsage {
    let get = |ptr: &str| body.pointer(ptr).and_then(Value::as_u64).unwrap_or(0);

    TokenUsage {
        prompt_tokens: get("/usage/prompt_tokens"),
        completion_tokens: get("/usage/completion_tokens"),
        total_tokens: get("/usage/total_tokens"),
        cached_tokens: get("/usage/prompt_tokens_cached"),
    }
}

fn hash_request(payload: &Value) -> String {
    let mut h = Sha256::new();
    h.update(payload.to_string().as_bytes());
    hex::encode(&h.finalize()[..8])
}
