// Materializes a candidate against a problem's assertions and runs it
// in an isolated subprocess. Classification only; no retries, no LLM.

use std::fs;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::candidate::Candidate;
use crate::problem::Problem;

const OUTPUT_LIMIT: usize = 4_000;
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const PIPE_GRACE: Duration = Duration::from_millis(250);

/// Derived failure classification, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Passed,
    AssertionFailure,
    CrashError,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct AssertionResult {
    pub index: usize,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
}

/// Outcome of running exactly one candidate. Immutable.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub assertions: Vec<AssertionResult>,
    pub output: String,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn passed(&self) -> bool {
        self.status == ExecStatus::Passed
    }

    pub fn kind_label(&self) -> &'static str {
        match self.status {
            ExecStatus::Passed => "passed",
            ExecStatus::AssertionFailure => "assertion failure",
            ExecStatus::CrashError => "crash",
            ExecStatus::Timeout => "timeout",
        }
    }

    /// Bounded failure summary carried into the next repair prompt.
    pub fn failure_detail(&self) -> String {
        let mut s = String::new();

        for a in self.assertions.iter().filter(|a| !a.passed) {
            s.push_str(&format!(
                "assertion {}: expected {}, got {}\n",
                a.index, a.expected, a.actual
            ));
        }

        if !self.output.trim().is_empty() {
            s.push_str(self.output.trim());
        }

        truncate_output(&s)
    }
}

/// Runs one candidate against one problem. Failure is data, not an
/// error; this call is infallible by contract.
pub trait CandidateRunner {
    fn run(&self, candidate: &Candidate, problem: &Problem) -> ExecutionResult;
}

/// Subprocess-based executor for Python candidates.
pub struct PythonExecutor {
    pub interpreter: String,
    pub timeout: Duration,
}

impl PythonExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout,
        }
    }
}

impl CandidateRunner for PythonExecutor {
    fn run(&self, candidate: &Candidate, problem: &Problem) -> ExecutionResult {
        let scratch = ScratchDir::create();

        let harness_path = scratch.path.join("harness.py");
        let harness = render_harness(&candidate.code, problem);
        if let Err(e) = fs::write(&harness_path, &harness) {
            return ExecutionResult {
                status: ExecStatus::CrashError,
                assertions: Vec::new(),
                output: format!("failed to materialize candidate: {e}"),
                duration: Duration::ZERO,
            };
        }

        debug!(candidate = %candidate.id, path = %harness_path.display(), "running candidate");

        let raw = run_with_timeout(
            Command::new(&self.interpreter)
                .arg(&harness_path)
                .current_dir(&scratch.path),
            self.timeout,
        );

        classify(raw, problem.assertions.len())
    }
}

/* ============================================================
   Harness

   One machine-parsable line per assertion. Every assertion runs
   regardless of earlier failures; a per-case exception is recorded,
   never propagated.
   ============================================================ */

fn render_harness(code: &str, problem: &Problem) -> String {
    let cases: Vec<Value> = problem
        .assertions
        .iter()
        .map(|a| Value::Array(vec![Value::Array(a.inputs.clone()), a.expected.clone()]))
        .collect();
    let cases_json = serde_json::to_string(&Value::Array(cases)).unwrap_or_else(|_| "[]".into());

    format!(
        r#"import json

{code}

CASES = json.loads({cases_literal})

failures = 0
for i, (args, expected) in enumerate(CASES):
    try:
        actual = {entry}(*args)
        if actual == expected:
            print("RB-CASE %d PASS" % i)
        else:
            failures += 1
            print("RB-CASE %d FAIL expected=%s actual=%s" % (
                i, json.dumps(expected), json.dumps(actual, default=str)))
    except Exception as e:
        failures += 1
        print("RB-CASE %d FAIL expected=%s actual=%s" % (
            i, json.dumps(expected), json.dumps("%s: %s" % (type(e).__name__, e))))

raise SystemExit(1 if failures else 0)
"#,
        code = code,
        entry = problem.entry_point,
        cases_literal = python_string_literal(&cases_json),
    )
}

fn python_string_literal(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/* ============================================================
   Subprocess with enforced wall-clock timeout
   ============================================================ */

/// Captured result of one timed subprocess run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Spawn, poll, and hard-kill at the deadline. The candidate leads its
/// own process group so any subprocesses it spawned die with it, and
/// the pipes are drained from dedicated threads so a grandchild that
/// inherited stdout can never block the caller past the timeout.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> CommandOutput {
    let started = Instant::now();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return CommandOutput {
                stdout: String::new(),
                stderr: e.to_string(),
                success: false,
                timed_out: false,
                duration: started.elapsed(),
            }
        }
    };

    let stdout_drain = spawn_drain(child.stdout.take());
    let stderr_drain = spawn_drain(child.stderr.take());

    let mut timed_out = false;
    let mut exit_ok = false;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                exit_ok = status.success();
                break;
            }
            Ok(None) => {
                if started.elapsed() >= timeout {
                    timed_out = true;
                    kill_process_tree(&mut child);
                    let _ = child.wait();
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_process_tree(&mut child);
                let _ = child.wait();
                return CommandOutput {
                    stdout: String::new(),
                    stderr: e.to_string(),
                    success: false,
                    timed_out: false,
                    duration: started.elapsed(),
                };
            }
        }
    }

    // Bounded flush. A drain still running past the grace period means
    // something the candidate left behind is holding a pipe open; kill
    // the group and take whatever was captured instead of waiting.
    wait_for_drains(&stdout_drain, &stderr_drain, PIPE_GRACE);
    if !(stdout_drain.finished() && stderr_drain.finished()) {
        kill_process_tree(&mut child);
        wait_for_drains(&stdout_drain, &stderr_drain, PIPE_GRACE);
    }

    CommandOutput {
        stdout: stdout_drain.snapshot(),
        stderr: stderr_drain.snapshot(),
        success: !timed_out && exit_ok,
        timed_out,
        duration: started.elapsed(),
    }
}

/// Kill the candidate's whole process group, then the child itself as
/// a fallback. The group id equals the child pid because the child was
/// made a group leader at spawn.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .args(["-9", "--", &format!("-{}", child.id())])
            .status();
    }
    let _ = child.kill();
}

/// Continuously reads one pipe into a shared buffer. Never joined
/// unconditionally: a blocked reader is abandoned, not waited on.
struct PipeDrain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl PipeDrain {
    fn finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    fn snapshot(&self) -> String {
        self.buf
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> PipeDrain {
    let buf = Arc::new(Mutex::new(Vec::new()));

    let handle = pipe.map(|mut reader| {
        let sink = Arc::clone(&buf);
        std::thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut b) = sink.lock() {
                            b.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        })
    });

    PipeDrain { buf, handle }
}

fn wait_for_drains(a: &PipeDrain, b: &PipeDrain, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !(a.finished() && b.finished()) && Instant::now() < deadline {
        std::thread::sleep(POLL_INTERVAL);
    }
}

/* ============================================================
   Classification
   ============================================================ */

fn classify(raw: CommandOutput, expected_cases: usize) -> ExecutionResult {
    let assertions = parse_case_lines(&raw.stdout);
    let output = combine_output(&raw.stdout, &raw.stderr);
    let duration = raw.duration;

    if raw.timed_out {
        return ExecutionResult {
            status: ExecStatus::Timeout,
            assertions,
            output,
            duration,
        };
    }

    if assertions.is_empty() {
        // The harness always prints case lines; none means the candidate
        // never got that far (import error, syntax error, hard exit).
        return ExecutionResult {
            status: ExecStatus::CrashError,
            assertions,
            output,
            duration,
        };
    }

    if assertions.len() < expected_cases {
        // Hard crash mid-run (sys.exit, segfault): incomplete case list.
        return ExecutionResult {
            status: ExecStatus::CrashError,
            assertions,
            output,
            duration,
        };
    }

    if assertions.iter().any(|a| !a.passed) {
        return ExecutionResult {
            status: ExecStatus::AssertionFailure,
            assertions,
            output,
            duration,
        };
    }

    // Every assertion passed but the process still exited dirty:
    // something outside the case loop went wrong.
    let status = if raw.success {
        ExecStatus::Passed
    } else {
        ExecStatus::CrashError
    };

    ExecutionResult {
        status,
        assertions,
        output,
        duration,
    }
}

fn parse_case_lines(stdout: &str) -> Vec<AssertionResult> {
    let re = Regex::new(r"^RB-CASE (\d+) (PASS|FAIL)(?: expected=(.*) actual=(.*))?$").unwrap();

    stdout
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim_end())?;
            let index = caps[1].parse().ok()?;
            let passed = &caps[2] == "PASS";

            Some(AssertionResult {
                index,
                passed,
                expected: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
                actual: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut s = String::new();
    // Case lines are structured results, not diagnostics.
    for line in stdout.lines().filter(|l| !l.starts_with("RB-CASE ")) {
        s.push_str(line);
        s.push('\n');
    }
    if !stderr.trim().is_empty() {
        s.push_str(stderr.trim());
    }
    truncate_output(&s)
}

fn truncate_output(s: &str) -> String {
    if s.chars().count() <= OUTPUT_LIMIT {
        return s.trim_end().to_string();
    }

    let tail: String = s
        .chars()
        .rev()
        .take(OUTPUT_LIMIT)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("...truncated...\n{}", tail.trim_end())
}

/* ============================================================
   Scratch directory with guaranteed cleanup
   ============================================================ */

struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create() -> Self {
        let path = std::env::temp_dir().join(format!("repairbench-{}", Uuid::new_v4()));
        let _ = fs::create_dir_all(&path);
        Self { path }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
