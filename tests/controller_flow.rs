//! End-to-end controller behavior with scripted provider, generator,
//! and runner doubles. Covers the repair loop's bounds and verdicts.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use repairbench::candidate::{Candidate, RepairContext};
use repairbench::controller::{RepairController, RunConfig, Verdict};
use repairbench::executor::{AssertionResult, CandidateRunner, ExecStatus, ExecutionResult};
use repairbench::problem::{Assertion, Problem};
use repairbench::provider::{
    Completion, CompletionProvider, CompletionRequest, ProviderError, TokenUsage,
};
use repairbench::strategy::{Generation, Generator};

/* ===== doubles ===== */

/// Provider that never gets called directly by these generators but
/// satisfies the controller's wiring.
struct InertProvider;

impl CompletionProvider for InertProvider {
    fn complete(&self, _req: &CompletionRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::Unavailable("not used in this test".into()))
    }
}

/// Generator that replays scripted results and records the repair
/// context it was handed on each call.
struct ScriptedGenerator {
    script: RefCell<Vec<Result<Generation, ProviderError>>>,
    seen_repairs: RefCell<Vec<Option<RepairContext>>>,
}

impl ScriptedGenerator {
    fn new(mut script: Vec<Result<Generation, ProviderError>>) -> Self {
        script.reverse();
        Self {
            script: RefCell::new(script),
            seen_repairs: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.seen_repairs.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn generate(
        &self,
        _provider: &dyn CompletionProvider,
        _problem: &Problem,
        repair: Option<&RepairContext>,
    ) -> Result<Generation, ProviderError> {
        self.seen_repairs.borrow_mut().push(repair.cloned());
        self.script
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".into())))
    }
}

/// Runner that replays scripted execution results.
struct ScriptedRunner {
    script: RefCell<Vec<ExecutionResult>>,
    runs: RefCell<u32>,
}

impl ScriptedRunner {
    fn new(mut script: Vec<ExecutionResult>) -> Self {
        script.reverse();
        Self {
            script: RefCell::new(script),
            runs: RefCell::new(0),
        }
    }

    fn runs(&self) -> u32 {
        *self.runs.borrow()
    }
}

impl CandidateRunner for ScriptedRunner {
    fn run(&self, _candidate: &Candidate, _problem: &Problem) -> ExecutionResult {
        *self.runs.borrow_mut() += 1;
        self.script.borrow_mut().pop().unwrap_or_else(passed)
    }
}

/* ===== fixtures ===== */

fn problem() -> Problem {
    Problem {
        id: "sum_list".into(),
        description: "Sum a list of numbers.".into(),
        entry_point: "sum_list".into(),
        assertions: vec![Assertion {
            inputs: vec![json!([1, 2, 3])],
            expected: json!(6),
        }],
    }
}

fn generation(code: &str) -> Result<Generation, ProviderError> {
    Ok(Generation {
        code: code.into(),
        tests: None,
        usage: TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 10,
            total_tokens: 20,
            cached_tokens: 0,
        },
    })
}

fn passed() -> ExecutionResult {
    ExecutionResult {
        status: ExecStatus::Passed,
        assertions: vec![AssertionResult {
            index: 0,
            passed: true,
            expected: "6".into(),
            actual: "6".into(),
        }],
        output: String::new(),
        duration: Duration::from_millis(5),
    }
}

fn failed_assertion() -> ExecutionResult {
    ExecutionResult {
        status: ExecStatus::AssertionFailure,
        assertions: vec![AssertionResult {
            index: 0,
            passed: false,
            expected: "6".into(),
            actual: "0".into(),
        }],
        output: String::new(),
        duration: Duration::from_millis(5),
    }
}

fn config(max_iterations: u32) -> RunConfig {
    let mut cfg = RunConfig::new(max_iterations, 2, "test-model".into());
    cfg.backoff_base = Duration::from_millis(1);
    cfg
}

fn run(
    cfg: &RunConfig,
    generator: &ScriptedGenerator,
    runner: &ScriptedRunner,
) -> repairbench::controller::Outcome {
    let provider = InertProvider;
    let controller = RepairController::new(
        cfg,
        &provider,
        generator,
        runner,
        Arc::new(AtomicBool::new(false)),
    );
    controller.run(&problem())
}

/* ===== scenarios ===== */

#[test]
fn first_candidate_passing_ends_after_one_iteration() {
    let generator = ScriptedGenerator::new(vec![generation("def sum_list(xs): return sum(xs)")]);
    let runner = ScriptedRunner::new(vec![passed()]);

    let outcome = run(&config(5), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::Passed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(generator.calls(), 1);
    assert_eq!(runner.runs(), 1);
}

#[test]
fn failure_then_success_passes_on_the_second_iteration() {
    let generator = ScriptedGenerator::new(vec![
        generation("def sum_list(xs): return 0"),
        generation("def sum_list(xs): return sum(xs)"),
    ]);
    let runner = ScriptedRunner::new(vec![failed_assertion(), passed()]);

    let outcome = run(&config(5), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::Passed);
    assert_eq!(outcome.iterations, 2);

    // The second generation call must carry the first failure.
    let repairs = generator.seen_repairs.borrow();
    assert!(repairs[0].is_none());
    let ctx = repairs[1].as_ref().unwrap();
    assert_eq!(ctx.failure_kind, "assertion failure");
    assert!(ctx.prior_code.contains("return 0"));
    assert!(ctx.failure_detail.contains("expected 6, got 0"));
}

#[test]
fn iteration_cap_of_one_exhausts_without_a_second_generation() {
    let generator = ScriptedGenerator::new(vec![generation("def sum_list(xs): return 0")]);
    let runner = ScriptedRunner::new(vec![failed_assertion()]);

    let outcome = run(&config(1), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::Exhausted);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(generator.calls(), 1);
}

#[test]
fn zero_iteration_cap_performs_no_rounds() {
    let generator = ScriptedGenerator::new(vec![generation("def sum_list(xs): return sum(xs)")]);
    let runner = ScriptedRunner::new(vec![passed()]);

    let outcome = run(&config(0), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::Exhausted);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(generator.calls(), 0);
    assert_eq!(runner.runs(), 0);
}

#[test]
fn never_exceeds_the_iteration_cap() {
    let cap = 3;
    let generator = ScriptedGenerator::new(vec![
        generation("def sum_list(xs): return 0"),
        generation("def sum_list(xs): return 1"),
        generation("def sum_list(xs): return 2"),
        generation("def sum_list(xs): return 3"),
    ]);
    let runner = ScriptedRunner::new(vec![
        failed_assertion(),
        failed_assertion(),
        failed_assertion(),
        failed_assertion(),
    ]);

    let outcome = run(&config(cap), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::Exhausted);
    assert_eq!(outcome.iterations, cap);
    assert_eq!(runner.runs(), cap);
    assert_eq!(generator.calls(), cap as usize);
}

#[test]
fn persistent_provider_failure_reports_zero_iterations() {
    // Transient errors on every attempt burn the retry budget
    // (provider_retries = 2, so three attempts) and never execute.
    let generator = ScriptedGenerator::new(vec![
        Err(ProviderError::RateLimited),
        Err(ProviderError::RateLimited),
        Err(ProviderError::RateLimited),
    ]);
    let runner = ScriptedRunner::new(vec![]);

    let outcome = run(&config(5), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::ProviderFailed);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(generator.calls(), 3);
    assert_eq!(runner.runs(), 0);
    assert!(outcome.error.is_some());
}

#[test]
fn transient_provider_error_is_retried_then_recovers() {
    let generator = ScriptedGenerator::new(vec![
        Err(ProviderError::Unavailable("connection reset".into())),
        generation("def sum_list(xs): return sum(xs)"),
    ]);
    let runner = ScriptedRunner::new(vec![passed()]);

    let outcome = run(&config(5), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::Passed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(generator.calls(), 2);
}

#[test]
fn non_transient_gateway_error_fails_without_retry() {
    let generator = ScriptedGenerator::new(vec![Err(ProviderError::Gateway {
        status: 401,
        detail: "bad key".into(),
    })]);
    let runner = ScriptedRunner::new(vec![]);

    let outcome = run(&config(5), &generator, &runner);

    assert_eq!(outcome.verdict, Verdict::ProviderFailed);
    assert_eq!(generator.calls(), 1);
}

#[test]
fn pre_cancelled_run_is_skipped_before_any_provider_call() {
    let generator = ScriptedGenerator::new(vec![generation("def sum_list(xs): return sum(xs)")]);
    let runner = ScriptedRunner::new(vec![passed()]);
    let provider = InertProvider;
    let cfg = config(5);

    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::SeqCst);

    let controller = RepairController::new(&cfg, &provider, &generator, &runner, cancel);
    let outcome = controller.run(&problem());

    assert_eq!(outcome.verdict, Verdict::Skipped);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(generator.calls(), 0);
}

#[test]
fn token_usage_accumulates_across_iterations() {
    let generator = ScriptedGenerator::new(vec![
        generation("def sum_list(xs): return 0"),
        generation("def sum_list(xs): return sum(xs)"),
    ]);
    let runner = ScriptedRunner::new(vec![failed_assertion(), passed()]);

    let outcome = run(&config(5), &generator, &runner);

    assert_eq!(outcome.usage.total_tokens, 40);
    assert_eq!(outcome.usage.prompt_tokens, 20);
}
