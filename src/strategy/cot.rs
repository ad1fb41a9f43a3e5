use serde_json::json;

use crate::candidate::RepairContext;
use crate::problem::Problem;
use crate::provider::reply::Reply;
use crate::provider::schema::{FieldType, OutputSchema};
use crate::provider::{CompletionProvider, CompletionRequest, ProviderError};
use crate::strategy::{finalize_code, prompts, Generation, Generator};

/// Chain-of-thought: one schema-constrained call that reasons inline
/// and returns `{thinking, name, code}`.
pub struct ChainOfThought;

pub(crate) fn solution_schema() -> OutputSchema {
    OutputSchema::new("solution")
        .field("thinking", FieldType::String)
        .field("name", FieldType::String)
        .field("code", FieldType::String)
}

impl Generator for ChainOfThought {
    fn name(&self) -> &'static str {
        "cot"
    }

    fn generate(
        &self,
        provider: &dyn CompletionProvider,
        problem: &Problem,
        repair: Option<&RepairContext>,
    ) -> Result<Generation, ProviderError> {
        let messages = vec![
            json!({ "role": "system", "content": prompts::SYSTEM_COT }),
            json!({ "role": "user", "content": prompts::user_problem(problem, repair) }),
        ];

        let req = CompletionRequest::new(messages).with_schema(solution_schema());
        let completion = provider.complete(&req)?;

        let value = match completion.reply {
            Reply::Structured(v) => v,
            Reply::Text(t) => Reply::parse_structured(&t)?,
            Reply::ToolCalls(_) => {
                return Err(ProviderError::SchemaViolation(
                    "unexpected tool call from a plain generation request".into(),
                ))
            }
        };

        Ok(Generation {
            code: finalize_code(&value, problem)?,
            tests: None,
            usage: completion.usage,
        })
    }
}
