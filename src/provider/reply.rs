use serde_json::Value;

use crate::provider::ProviderError;

/// A requested tool invocation: name plus parsed arguments.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Tagged reply from the gateway. Callers handle each variant
/// exhaustively instead of walking a dynamic blob.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    ToolCalls(Vec<ToolInvocation>),
    Structured(Value),
}

impl Reply {
    /// Interpret the assistant message of a chat-completions response.
    ///
    /// Tool calls win over content; structured replies are produced by
    /// the caller re-parsing `Text` against its schema (see
    /// `parse_structured`).
    pub fn from_message(message: &Value) -> Result<Reply, ProviderError> {
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            if !calls.is_empty() {
                let invocations = calls
                    .iter()
                    .map(parse_tool_call)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Reply::ToolCalls(invocations));
            }
        }

        let text = message
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::SchemaViolation("message has neither content nor tool calls".into())
            })?;

        Ok(Reply::Text(text.to_string()))
    }

    /// Parse a text reply as the structured object the request asked for.
    pub fn parse_structured(text: &str) -> Result<Value, ProviderError> {
        let cleaned = strip_fences(text);
        serde_json::from_str(cleaned)
            .map_err(|e| ProviderError::SchemaViolation(format!("invalid JSON reply: {e}")))
    }
}

fn parse_tool_call(call: &Value) -> Result<ToolInvocation, ProviderError> {
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let function = call
        .get("function")
        .ok_or_else(|| ProviderError::SchemaViolation("tool call missing function".into()))?;

    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::SchemaViolation("tool call missing name".into()))?
        .to_string();

    let arguments = function
        .get("arguments")
        .and_then(Value::as_str)
        .map(|s| serde_json::from_str(s).unwrap_or(Value::Null))
        .unwrap_or(Value::Null);

    Ok(ToolInvocation {
        id,
        name,
        arguments,
    })
}

/// Remove markdown fences (```json, ```python, ```) when the model wraps
/// its reply in them despite instructions.
pub fn strip_fences(output: &str) -> &str {
    let trimmed = output.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let inner = match rest.split_once('\n') {
        Some((lang, body)) if lang.len() <= 12 && !lang.contains('{') => body,
        _ => rest,
    };

    inner
        .rsplit_once("```")
        .map(|(body, _)| body.trim())
        .unwrap_or_else(|| inner.trim())
}
