use serde_json::json;

use crate::candidate::RepairContext;
use crate::problem::Problem;
use crate::provider::reply::Reply;
use crate::provider::schema::{FieldType, OutputSchema};
use crate::provider::{CompletionProvider, CompletionRequest, ProviderError, TokenUsage};
use crate::strategy::{finalize_code, prompts, Generation, Generator};

/// Stepwise chain-of-thought (self-planning): one call produces a
/// numbered plan, a second implements it.
pub struct SelfPlanning;

impl Generator for SelfPlanning {
    fn name(&self) -> &'static str {
        "stepwise"
    }

    fn generate(
        &self,
        provider: &dyn CompletionProvider,
        problem: &Problem,
        repair: Option<&RepairContext>,
    ) -> Result<Generation, ProviderError> {
        let mut usage = TokenUsage::default();

        // Round 1: plan as free text.
        let plan_req = CompletionRequest::new(vec![
            json!({ "role": "system", "content": prompts::SYSTEM_PLAN }),
            json!({ "role": "user", "content": prompts::user_problem(problem, repair) }),
        ]);

        let plan_completion = provider.complete(&plan_req)?;
        usage.absorb(plan_completion.usage);

        let plan = match plan_completion.reply {
            Reply::Text(t) => t,
            Reply::Structured(v) => v.to_string(),
            Reply::ToolCalls(_) => {
                return Err(ProviderError::SchemaViolation(
                    "unexpected tool call from a planning request".into(),
                ))
            }
        };

        // Round 2: implementation constrained to {name, code}.
        let code_schema = OutputSchema::new("implementation")
            .field("name", FieldType::String)
            .field("code", FieldType::String);

        let code_req = CompletionRequest::new(vec![
            json!({ "role": "system", "content": prompts::SYSTEM_CODE }),
            json!({
                "role": "user",
                "content": prompts::user_plan_implementation(problem, &plan, repair)
            }),
        ])
        .with_schema(code_schema);

        let code_completion = provider.complete(&code_req)?;
        usage.absorb(code_completion.usage);

        let value = match code_completion.reply {
            Reply::Structured(v) => v,
            Reply::Text(t) => Reply::parse_structured(&t)?,
            Reply::ToolCalls(_) => {
                return Err(ProviderError::SchemaViolation(
                    "unexpected tool call from an implementation request".into(),
                ))
            }
        };

        Ok(Generation {
            code: finalize_code(&value, problem)?,
            tests: None,
            usage,
        })
    }
}
