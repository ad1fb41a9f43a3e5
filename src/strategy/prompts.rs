//! System and user prompts for each strategy. System prompts are
//! stable; user prompts are assembled from the problem and, on repair
//! rounds, the prior failure.

use crate::candidate::RepairContext;
use crate::problem::Problem;

pub const SYSTEM_COT: &str = r#"You are an expert programmer. For each problem, reason step by step:

STEP 1 - UNDERSTAND: inputs, outputs, what the examples show, constraints.
STEP 2 - PLAN: the algorithm and data structures, with complexity.
STEP 3 - EDGE CASES: empty inputs, single elements, boundaries, negatives.
STEP 4 - IMPLEMENT: clean, correct Python handling every edge case.

After reasoning, output ONLY a JSON object (no markdown fences, no extra text):
{
  "thinking": "<your step-by-step reasoning>",
  "name": "<function_name>",
  "code": "<complete_python_function_code_only>"
}

CRITICAL: the "code" field must contain ONLY the function code."#;

pub const SYSTEM_PLAN: &str = "Create a numbered step-by-step solution plan. \
Focus on the algorithm, not code. Output only the plan.";

pub const SYSTEM_CODE: &str = r#"Implement the given plan in Python.
Output ONLY a JSON object (no markdown fences, no extra text):
{"name": "<function_name>", "code": "<complete_python_function_code_only>"}"#;

pub const SYSTEM_TDD: &str = r#"You are a test-driven development agent solving one programming problem.

Workflow, strictly in this order:
1. Read the problem and pick a short snake_case name for the solution function.
2. Write a test file FIRST with write_file: test_<name>.py, covering normal
   cases, edge cases, and error cases. It must import from <name>.py.
3. Write the minimal solution with write_file: <name>.py.
4. Run the tests with run_python on test_<name>.py and read the output.
5. If tests fail, fix <name>.py with write_file and return to step 4.
6. When every test passes, call finish with a one-line summary.

Rules:
- Tests before implementation, always.
- Only write enough code to pass the tests.
- You must call tools; describing what you would do accomplishes nothing."#;

/// User prompt for single-shot code generation. Repair rounds append
/// the prior code and the classified failure so the model sees exactly
/// what went wrong.
pub fn user_problem(problem: &Problem, repair: Option<&RepairContext>) -> String {
    let mut out = String::new();

    out.push_str("Problem:\n");
    out.push_str(&problem.description);
    out.push_str(&format!(
        "\n\nName the solution function `{}`.\n",
        problem.entry_point
    ));

    if let Some(r) = repair {
        out.push_str(&repair_section(r));
    }

    out
}

/// User prompt for the second self-planning call, carrying the plan.
pub fn user_plan_implementation(
    problem: &Problem,
    plan: &str,
    repair: Option<&RepairContext>,
) -> String {
    let mut out = format!(
        "Problem:\n{}\n\nPlan:\n{}\n\nName the solution function `{}`.\n",
        problem.description, plan, problem.entry_point
    );

    if let Some(r) = repair {
        out.push_str(&repair_section(r));
    }

    out
}

fn repair_section(r: &RepairContext) -> String {
    format!(
        "\nYour previous attempt failed ({kind}).\n\nPrevious code:\n```python\n{code}\n```\n\nFailure detail:\n{detail}\n\nFix the code. Do not repeat the same mistake.\n",
        kind = r.failure_kind,
        code = r.prior_code,
        detail = r.failure_detail,
    )
}
