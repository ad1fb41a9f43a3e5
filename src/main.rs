use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use repairbench::controller::{skipped_outcome, Outcome, RepairController, RunConfig};
use repairbench::executor::PythonExecutor;
use repairbench::problem::Problem;
use repairbench::provider::client::{GatewayClient, GatewayConfig};
use repairbench::report;
use repairbench::strategy;

#[derive(Parser)]
#[command(
    name = "repairbench",
    version,
    about = "Compare prompting strategies for code generation under a bounded generate-test-repair loop."
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run a problem set through one or more strategies
    Run(RunArgs),
    /// Aggregate saved outcomes into a comparison table
    Report(ReportArgs),
    /// Store the gateway API key in the user config file
    Config(ConfigArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON problem set to load
    #[arg(long)]
    problems: PathBuf,

    /// Model slug sent to the gateway
    #[arg(long, default_value = "deepseek/deepseek-chat-v3")]
    model: String,

    /// Strategies to compare (cot, stepwise, tdd); repeatable
    #[arg(long, default_values_t = vec!["cot".to_string()])]
    strategy: Vec<String>,

    /// Candidate rounds per problem, counting the first attempt
    #[arg(long, default_value_t = 5)]
    max_iterations: u32,

    /// Retries per provider call on transient failures
    #[arg(long, default_value_t = 3)]
    provider_retries: u32,

    /// Base backoff between provider retries, in milliseconds
    #[arg(long, default_value_t = 350)]
    backoff_ms: u64,

    /// Wall-clock limit per candidate execution, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Directory for saved outcome files
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,
}

#[derive(clap::Args)]
struct ReportArgs {
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,
}

#[derive(clap::Args)]
struct ConfigArgs {
    #[arg(long)]
    api_key: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    match Cli::parse().command {
        CliCommand::Run(args) => run(args),
        CliCommand::Report(args) => show_report(args),
        CliCommand::Config(args) => {
            GatewayConfig::store(&args.api_key)?;
            println!("API key saved.");
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let generators = args
        .strategy
        .iter()
        .map(|s| strategy::build(s))
        .collect::<Result<Vec<_>, _>>()?;

    let cfg = GatewayConfig::from_env()?;
    let provider = GatewayClient::new(cfg, args.model.clone());
    let runner = PythonExecutor::new(Duration::from_secs(args.timeout_secs));

    let mut run_config = RunConfig::new(args.max_iterations, args.provider_retries, args.model);
    run_config.backoff_base = Duration::from_millis(args.backoff_ms);

    // Cancellation flag threaded into every controller. Nothing in the
    // CLI sets it today; callers embedding the library flip it to stop
    // a run between provider calls.
    let cancel = Arc::new(AtomicBool::new(false));

    let problems = Problem::load_each(&args.problems)?;
    info!(
        problems = problems.len(),
        strategies = generators.len(),
        "run starting"
    );

    let mut outcomes: Vec<Outcome> = Vec::new();

    for generator in &generators {
        let controller =
            RepairController::new(&run_config, &provider, generator.as_ref(), &runner, cancel.clone());

        for (idx, loaded) in problems.iter().enumerate() {
            let problem = match loaded {
                Ok(p) => p,
                Err(e) => {
                    // One malformed problem never sinks the run.
                    warn!(index = idx, error = %e, "skipping malformed problem");
                    outcomes.push(skipped_outcome(
                        &format!("problem_{idx}"),
                        generator.name(),
                        &run_config.model,
                        &e.to_string(),
                    ));
                    continue;
                }
            };

            if cancel.load(Ordering::SeqCst) {
                outcomes.push(skipped_outcome(
                    &problem.id,
                    generator.name(),
                    &run_config.model,
                    "cancelled",
                ));
                continue;
            }

            outcomes.push(controller.run(problem));
        }
    }

    let path = report::save_outcomes(&args.results_dir, &outcomes)?;
    println!("Saved {} outcomes to {}", outcomes.len(), path.display());
    print!("{}", report::render_table(&report::summarize(&outcomes)));

    Ok(())
}

fn show_report(args: ReportArgs) -> Result<(), Box<dyn Error>> {
    let outcomes = report::load_outcomes(&args.results_dir)?;
    print!("{}", report::render_table(&report::summarize(&outcomes)));
    Ok(())
}
