use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use testing_framework_core::scenario::{Deployer as _, RunReport, Scenario, ScenarioBuilder};
use testing_framework_runner_local::LocalDeployer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "testnet-runner", about = "Launch a local parachain test network and run its steps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start every node, run all steps and report the outcome.
    Run(RunArgs),
    /// Validate a topology file and print the resolved plan.
    Check {
        /// Topology file (YAML).
        topology: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Topology file (YAML).
    topology: PathBuf,
    /// Write the JSON run report to this path.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Override the run-level deadline.
    #[arg(long, value_name = "SECS")]
    run_timeout: Option<u64>,
    /// Skip waiting for node metrics endpoints before the first step.
    #[arg(long)]
    no_readiness: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Check { topology } => check(&topology).map(|()| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILED),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(topology: &Path, args: Option<&RunArgs>) -> Result<Scenario> {
    let mut builder = ScenarioBuilder::from_file(topology)
        .with_context(|| format!("failed to load topology {}", topology.display()))?;
    if let Some(args) = args {
        if let Some(secs) = args.run_timeout {
            builder = builder.with_run_timeout(Duration::from_secs(secs));
        }
        if args.no_readiness {
            builder = builder.with_readiness(false);
        }
    }
    builder
        .build()
        .with_context(|| format!("invalid topology {}", topology.display()))
}

/// Returns whether every step passed; errors mean nothing ran.
async fn run(args: RunArgs) -> Result<bool> {
    let scenario = load(&args.topology, Some(&args))?;

    info!(topology = %args.topology.display(), "deploying local nodes");
    let runner = LocalDeployer::new()
        .deploy(&scenario)
        .await
        .context("deploying local nodes failed")?;

    info!("running steps");
    let report = tokio::select! {
        report = runner.run(&scenario) => report,
        interrupted = tokio::signal::ctrl_c() => {
            // The runner is dropped with the select, which stops every node.
            if let Err(err) = interrupted {
                warn!(error = %err, "failed to listen for interrupt");
            }
            warn!("interrupted, nodes stopped");
            return Ok(false);
        }
    };

    print!("{report}");
    if let Some(path) = &args.report {
        write_report(&report, path)?;
    }
    Ok(report.passed())
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = report.to_json().context("failed to serialize run report")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write run report to {}", path.display()))?;
    info!(path = %path.display(), "run report written");
    Ok(())
}

fn check(topology: &Path) -> Result<()> {
    let scenario = load(topology, None)?;
    let settings = scenario.settings();

    println!(
        "topology {}: {} validators, {} collators, run timeout {}s",
        topology.display(),
        scenario.topology().validators().count(),
        scenario.topology().collators().count(),
        settings.run_timeout.as_secs()
    );
    for node in scenario.topology().nodes() {
        println!(
            "  node {} ({}{}) command={} rpc={} prometheus={}",
            node.name,
            node.role.label(),
            node.para_id
                .map(|id| format!(", para {id}"))
                .unwrap_or_default(),
            node.command,
            node.rpc_port,
            node.prometheus_port
        );
    }

    let plan = scenario.plan();
    for step in plan.steps() {
        let after = if step.after.is_empty() {
            String::new()
        } else {
            format!(" after [{}]", step.after.join(", "))
        };
        println!(
            "  step {} ({}s){after}: {}",
            step.id,
            step.timeout.as_secs(),
            step.line
        );
    }
    Ok(())
}
