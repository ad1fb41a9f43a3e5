//! controller.rs
//!
//! Bounded generate-test-repair loop. One candidate per round, one
//! round at a time; execution failures are data that seed the next
//! prompt, never faults of the controller itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::candidate::{Candidate, RepairContext};
use crate::executor::CandidateRunner;
use crate::problem::Problem;
use crate::provider::{CompletionProvider, ProviderError, TokenUsage};
use crate::strategy::Generator;

/// Loop phases. `Repairing` takes no independent action; it exists so
/// the carried failure context is an explicit, testable step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Generating,
    Executing,
    Repairing,
    Accepted,
    Done,
}

/// Terminal verdict for one problem. Written exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Exhausted,
    ProviderFailed,
    Skipped,
}

/// Per-problem terminal record, persisted for later aggregation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Outcome {
    pub problem_id: String,
    pub strategy: String,
    pub model: String,
    pub verdict: Verdict,
    pub iterations: u32,
    pub elapsed_ms: u64,
    pub usage: TokenUsage,
    #[serde(default)]
    pub error: Option<String>,
}

/// Explicit configuration threaded into every controller. There is no
/// default iteration cap; callers must choose one.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub max_iterations: u32,
    pub provider_retries: u32,
    pub backoff_base: Duration,
    pub model: String,
}

impl RunConfig {
    pub fn new(max_iterations: u32, provider_retries: u32, model: String) -> Self {
        Self {
            max_iterations,
            provider_retries,
            backoff_base: Duration::from_millis(350),
            model,
        }
    }
}

struct RunState {
    phase: Phase,
    iteration: u32,
    candidate: Option<Candidate>,
    repair: Option<RepairContext>,
    verdict: Option<Verdict>,
    error: Option<String>,
    usage: TokenUsage,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: Phase::Init,
            iteration: 0,
            candidate: None,
            repair: None,
            verdict: None,
            error: None,
            usage: TokenUsage::default(),
        }
    }
}

pub struct RepairController<'a> {
    config: &'a RunConfig,
    provider: &'a dyn CompletionProvider,
    generator: &'a dyn Generator,
    runner: &'a dyn CandidateRunner,
    cancel: Arc<AtomicBool>,
}

impl<'a> RepairController<'a> {
    pub fn new(
        config: &'a RunConfig,
        provider: &'a dyn CompletionProvider,
        generator: &'a dyn Generator,
        runner: &'a dyn CandidateRunner,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            provider,
            generator,
            runner,
            cancel,
        }
    }

    /// Drive one problem to its terminal verdict.
    pub fn run(&self, problem: &Problem) -> Outcome {
        let started = Instant::now();
        let mut state = RunState::new();

        while state.phase != Phase::Done {
            self.step(&mut state, problem);
        }

        let verdict = state.verdict.unwrap_or(Verdict::Skipped);
        info!(
            problem = %problem.id,
            strategy = self.generator.name(),
            ?verdict,
            iterations = state.iteration,
            "run finished"
        );

        Outcome {
            problem_id: problem.id.clone(),
            strategy: self.generator.name().to_string(),
            model: self.config.model.clone(),
            verdict,
            iterations: state.iteration,
            elapsed_ms: started.elapsed().as_millis() as u64,
            usage: state.usage,
            error: state.error,
        }
    }

    fn step(&self, state: &mut RunState, problem: &Problem) {
        match state.phase {
            Phase::Init => {
                state.iteration = 0;
                // A zero cap allows zero rounds: exhausted before any
                // generation, no provider call, no execution.
                if self.config.max_iterations == 0 {
                    state.verdict = Some(Verdict::Exhausted);
                    state.phase = Phase::Done;
                } else {
                    state.phase = Phase::Generating;
                }
            }
            Phase::Generating => self.generating(state, problem),
            Phase::Executing => self.executing(state, problem),
            Phase::Repairing => {
                // Context was attached in Executing; immediately re-enter
                // generation carrying it forward.
                debug_assert!(state.repair.is_some());
                state.phase = Phase::Generating;
            }
            Phase::Accepted => {
                state.verdict = Some(Verdict::Passed);
                state.phase = Phase::Done;
            }
            Phase::Done => {}
        }
    }

    /// Request a candidate, retrying transient provider failures up to
    /// the provider bound. Provider retries never count as repair
    /// iterations.
    fn generating(&self, state: &mut RunState, problem: &Problem) {
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=self.config.provider_retries {
            if self.cancel.load(Ordering::SeqCst) {
                state.error = Some("cancelled".into());
                state.verdict = Some(Verdict::Skipped);
                state.phase = Phase::Done;
                return;
            }

            match self
                .generator
                .generate(self.provider, problem, state.repair.as_ref())
            {
                Ok(generation) => {
                    state.usage.absorb(generation.usage);
                    state.candidate = Some(Candidate {
                        id: Candidate::compute_id(
                            &problem.id,
                            self.generator.name(),
                            state.iteration,
                        ),
                        code: generation.code,
                        tests: generation.tests,
                        strategy: self.generator.name().to_string(),
                        model: self.config.model.clone(),
                        iteration: state.iteration,
                        usage: generation.usage,
                    });
                    state.phase = Phase::Executing;
                    return;
                }
                Err(e) if e.is_transient() && attempt < self.config.provider_retries => {
                    warn!(problem = %problem.id, attempt, error = %e, "provider retry");
                    std::thread::sleep(self.config.backoff_base * (attempt + 1));
                    last_err = Some(e);
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        state.error = last_err.map(|e| e.to_string());
        state.verdict = Some(Verdict::ProviderFailed);
        state.phase = Phase::Done;
    }

    fn executing(&self, state: &mut RunState, problem: &Problem) {
        let candidate = state
            .candidate
            .as_ref()
            .expect("Executing entered without a candidate");

        let result = self.runner.run(candidate, problem);
        state.iteration += 1;

        if result.passed() {
            state.phase = Phase::Accepted;
            return;
        }

        info!(
            problem = %problem.id,
            iteration = state.iteration,
            kind = result.kind_label(),
            "candidate failed"
        );

        if state.iteration >= self.config.max_iterations {
            state.verdict = Some(Verdict::Exhausted);
            state.phase = Phase::Done;
            return;
        }

        state.repair = Some(RepairContext {
            prior_code: candidate.code.clone(),
            failure_kind: result.kind_label().to_string(),
            failure_detail: result.failure_detail(),
        });
        state.phase = Phase::Repairing;
    }
}

/// Terminal record for a problem that never reached the loop.
pub fn skipped_outcome(
    problem_id: &str,
    strategy: &str,
    model: &str,
    reason: &str,
) -> Outcome {
    Outcome {
        problem_id: problem_id.to_string(),
        strategy: strategy.to_string(),
        model: model.to_string(),
        verdict: Verdict::Skipped,
        iterations: 0,
        elapsed_ms: 0,
        usage: TokenUsage::default(),
        error: Some(reason.to_string()),
    }
}
