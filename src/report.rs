//! report.rs
//!
//! Persistence and aggregation of terminal outcomes. Runs are saved as
//! timestamped JSON files; reporting folds every file in the results
//! directory into per strategy/model summaries.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::info;

use crate::controller::{Outcome, Verdict};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("results io: {0}")]
    Io(#[from] std::io::Error),

    #[error("results file is not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),
}

/// Outcomes aggregate per (strategy, model) pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub strategy: String,
    pub model: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupSummary {
    pub passed: usize,
    pub exhausted: usize,
    pub provider_failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub iterations: u64,
    pub total_tokens: u64,
}

impl GroupSummary {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    /// Mean repair iterations over attempted runs. Skipped and
    /// provider-failed runs report zero iterations and are excluded.
    pub fn mean_iterations(&self) -> f64 {
        let attempted = self.passed + self.exhausted;
        if attempted == 0 {
            0.0
        } else {
            self.iterations as f64 / attempted as f64
        }
    }
}

/// Fold outcomes into per-group summaries. Empty input yields an empty
/// map, never a division by zero downstream.
pub fn summarize(outcomes: &[Outcome]) -> BTreeMap<GroupKey, GroupSummary> {
    let mut groups: BTreeMap<GroupKey, GroupSummary> = BTreeMap::new();

    for o in outcomes {
        let entry = groups
            .entry(GroupKey {
                strategy: o.strategy.clone(),
                model: o.model.clone(),
            })
            .or_default();

        entry.total += 1;
        entry.iterations += u64::from(o.iterations);
        entry.total_tokens += o.usage.total_tokens;

        match o.verdict {
            Verdict::Passed => entry.passed += 1,
            Verdict::Exhausted => entry.exhausted += 1,
            Verdict::ProviderFailed => entry.provider_failed += 1,
            Verdict::Skipped => entry.skipped += 1,
        }
    }

    groups
}

/// Persist one run's outcomes as a timestamped JSON file and return
/// the path written.
pub fn save_outcomes(dir: &Path, outcomes: &[Outcome]) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(dir)?;

    let path = dir.join(format!(
        "run-{}.json",
        Local::now().format("%Y%m%d-%H%M%S")
    ));
    fs::write(&path, serde_json::to_string_pretty(outcomes)?)?;

    info!(path = %path.display(), count = outcomes.len(), "outcomes saved");
    Ok(path)
}

/// Load every saved run from a results directory, in filename order.
pub fn load_outcomes(dir: &Path) -> Result<Vec<Outcome>, ReportError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    paths.sort();

    let mut all = Vec::new();
    for path in paths {
        let raw = fs::read_to_string(&path)?;
        let mut run: Vec<Outcome> = serde_json::from_str(&raw)?;
        all.append(&mut run);
    }

    Ok(all)
}

/// Plain-text comparison table, one row per (strategy, model) group.
pub fn render_table(groups: &BTreeMap<GroupKey, GroupSummary>) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:<12} {:<34} {:>6} {:>6} {:>9} {:>10} {:>12}",
        "strategy", "model", "pass", "total", "rate", "avg iters", "tokens"
    );

    for (key, s) in groups {
        let _ = writeln!(
            out,
            "{:<12} {:<34} {:>6} {:>6} {:>8.1}% {:>10.2} {:>12}",
            key.strategy,
            key.model,
            s.passed,
            s.total,
            s.pass_rate() * 100.0,
            s.mean_iterations(),
            s.total_tokens
        );
    }

    if groups.is_empty() {
        out.push_str("(no outcomes)\n");
    }

    out
}
