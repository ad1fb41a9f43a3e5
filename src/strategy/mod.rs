pub mod agent;
pub mod cot;
pub mod prompts;
pub mod stepwise;

use serde_json::Value;

use crate::candidate::RepairContext;
use crate::problem::Problem;
use crate::provider::{CompletionProvider, ProviderError, TokenUsage};

/// Output of one generation round, before the controller stamps
/// provenance onto it.
#[derive(Debug, Clone)]
pub struct Generation {
    pub code: String,
    pub tests: Option<String>,
    pub usage: TokenUsage,
}

/// A prompting strategy: given a problem (and, on repair rounds, the
/// prior failure), produce one candidate via the provider.
pub trait Generator {
    fn name(&self) -> &'static str;

    fn generate(
        &self,
        provider: &dyn CompletionProvider,
        problem: &Problem,
        repair: Option<&RepairContext>,
    ) -> Result<Generation, ProviderError>;
}

/// Build a strategy by its CLI label.
pub fn build(name: &str) -> Result<Box<dyn Generator>, String> {
    match name {
        "cot" => Ok(Box::new(cot::ChainOfThought)),
        "stepwise" => Ok(Box::new(stepwise::SelfPlanning)),
        "tdd" => Ok(Box::new(agent::TestDrivenAgent::new(12))),
        other => Err(format!(
            "unknown strategy `{other}` (expected cot, stepwise, or tdd)"
        )),
    }
}

/// Pull the `name`/`code` pair out of a structured reply and make sure
/// the problem's entry point resolves even when the model picked its
/// own function name.
pub(crate) fn finalize_code(value: &Value, problem: &Problem) -> Result<String, ProviderError> {
    let code = value
        .get("code")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ProviderError::SchemaViolation("reply has no code".into()))?;

    let mut code = code.to_string();

    if let Some(name) = value.get("name").and_then(Value::as_str) {
        let name = name.trim();
        if !name.is_empty()
            && name != problem.entry_point
            && !code.contains(&format!("def {}(", problem.entry_point))
        {
            code.push_str(&format!("\n\n{} = {}\n", problem.entry_point, name));
        }
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn problem() -> Problem {
        Problem {
            id: "p".into(),
            description: "d".into(),
            entry_point: "add".into(),
            assertions: vec![crate::problem::Assertion {
                inputs: vec![json!(1)],
                expected: json!(1),
            }],
        }
    }

    #[test]
    fn builds_known_strategies() {
        assert_eq!(build("cot").unwrap().name(), "cot");
        assert_eq!(build("stepwise").unwrap().name(), "stepwise");
        assert_eq!(build("tdd").unwrap().name(), "tdd");
        assert!(build("nope").is_err());
    }

    #[test]
    fn finalize_keeps_matching_names() {
        let code = finalize_code(
            &json!({"name": "add", "code": "def add(a, b):\n    return a + b"}),
            &problem(),
        )
        .unwrap();
        assert!(!code.contains("add = "));
    }

    #[test]
    fn finalize_aliases_mismatched_names() {
        let code = finalize_code(
            &json!({"name": "sum_two", "code": "def sum_two(a, b):\n    return a + b"}),
            &problem(),
        )
        .unwrap();
        assert!(code.contains("add = sum_two"));
    }

    #[test]
    fn finalize_rejects_empty_code() {
        assert!(finalize_code(&json!({"name": "f", "code": "  "}), &problem()).is_err());
        assert!(finalize_code(&json!({"name": "f"}), &problem()).is_err());
    }
}
