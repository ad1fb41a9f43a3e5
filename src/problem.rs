use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MalformedProblem {
    #[error("problem {id}: entry point missing or empty")]
    MissingEntryPoint { id: String },

    #[error("problem {id}: no assertions")]
    NoAssertions { id: String },

    #[error("problem {id}: {inputs} inputs vs {outputs} expected outputs")]
    AssertionMismatch {
        id: String,
        inputs: usize,
        outputs: usize,
    },

    #[error("failed to read problem source: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("problem source is not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),
}

/// One input/expected-output check defining correctness for a problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub inputs: Vec<Value>,
    pub expected: Value,
}

/// A programming problem: prompt, target function name, and its checks.
/// Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Problem {
    pub id: String,
    pub description: String,
    pub entry_point: String,
    pub assertions: Vec<Assertion>,
}

/* ============================================================
   Source document shape

   Matches the corpus files used in practice: an ordered array
   of { prompt, entry_point, inputs: [[..], ..], outputs: [..] }.
   ============================================================ */

#[derive(Deserialize)]
struct RawProblem {
    #[serde(default)]
    id: Option<String>,
    prompt: String,
    entry_point: Option<String>,
    #[serde(default)]
    inputs: Vec<Vec<Value>>,
    #[serde(default)]
    outputs: Vec<Value>,
}

impl Problem {
    /// Parse a single problem document.
    pub fn load(path: &Path) -> Result<Problem, MalformedProblem> {
        let raw = fs::read_to_string(path)?;
        let parsed: RawProblem = serde_json::from_str(&raw)?;
        from_raw(parsed, 0)
    }

    /// Parse an ordered problem set.
    pub fn load_set(path: &Path) -> Result<Vec<Problem>, MalformedProblem> {
        Self::load_each(path)?.into_iter().collect()
    }

    /// Parse an ordered problem set, keeping per-problem results so a
    /// malformed entry can be skipped without discarding the rest.
    pub fn load_each(path: &Path) -> Result<Vec<Result<Problem, MalformedProblem>>, MalformedProblem> {
        let raw = fs::read_to_string(path)?;
        let parsed: Vec<RawProblem> = serde_json::from_str(&raw)?;

        Ok(parsed
            .into_iter()
            .enumerate()
            .map(|(idx, p)| from_raw(p, idx))
            .collect())
    }
}

fn from_raw(raw: RawProblem, index: usize) -> Result<Problem, MalformedProblem> {
    let id = raw.id.unwrap_or_else(|| format!("problem_{index}"));

    let entry_point = raw
        .entry_point
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MalformedProblem::MissingEntryPoint { id: id.clone() })?;

    if raw.inputs.is_empty() {
        return Err(MalformedProblem::NoAssertions { id });
    }

    if raw.inputs.len() != raw.outputs.len() {
        return Err(MalformedProblem::AssertionMismatch {
            id,
            inputs: raw.inputs.len(),
            outputs: raw.outputs.len(),
        });
    }

    let assertions = raw
        .inputs
        .into_iter()
        .zip(raw.outputs)
        .map(|(inputs, expected)| Assertion {
            inputs: inputs.into_iter().map(normalize_literal).collect(),
            expected: normalize_literal(unwrap_expected(expected)),
        })
        .collect();

    Ok(Problem {
        id,
        description: raw.prompt,
        entry_point,
        assertions,
    })
}

/// Dataset outputs are wrapped as single-item lists. Unwrap the outer
/// list so comparisons use the actual return value.
fn unwrap_expected(val: Value) -> Value {
    match val {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

/// Some corpus values carry an extra layer of quoting, e.g. the string
/// `"\"text\""`. Strip the outer quotes so the harness compares the
/// intended literal.
fn normalize_literal(val: Value) -> Value {
    match val {
        Value::String(s) => {
            let t = s.trim();
            if t.len() >= 2
                && ((t.starts_with('"') && t.ends_with('"'))
                    || (t.starts_with('\'') && t.ends_with('\'')))
            {
                Value::String(t[1..t.len() - 1].to_string())
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}
