use crate::provider::TokenUsage;

/// One generated code attempt for a problem, tied to a specific
/// repair iteration. Superseded, never mutated, by the next round's
/// candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Stable identity for logs: problem, strategy, iteration.
    pub id: String,

    /* source */
    pub code: String,
    pub tests: Option<String>,

    /* provenance */
    pub strategy: String,
    pub model: String,
    pub iteration: u32,

    /* cost of producing this candidate */
    pub usage: TokenUsage,
}

impl Candidate {
    pub fn compute_id(problem_id: &str, strategy: &str, iteration: u32) -> String {
        format!("{problem_id}::{strategy}::i{iteration}")
    }
}

/// Failure context carried from one repair round into the next prompt.
/// Dropping this silently is a regression; the controller asserts it is
/// present on every iteration after the first.
#[derive(Debug, Clone)]
pub struct RepairContext {
    pub prior_code: String,
    pub failure_kind: String,
    pub failure_detail: String,
}
