//! Deploy Planner - Standalone Binary
//!
//! Synthesizes delegation grants and the deployment topology from a
//! configuration file and dry-runs the pipeline.
//!
//! ## Usage
//!
//! ```bash
//! # Print outputs, grants and topology as JSON
//! deploy-planner --config deploy.json synth
//!
//! # Validate only
//! deploy-planner --config deploy.json validate
//!
//! # Dry-run the pipeline, approving production automatically
//! deploy-planner --config deploy.json run --auto-approve
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mealplanner_engine::pipeline::{
    AbortSignal, ApprovalGateway, AutoApprove, ChannelApprovals, DryRunApplyEngine, DryRunVerification,
    PipelineRunner, PipelineSettings,
};
use mealplanner_engine::registry::{ParentZone, StaticZoneResolver};
use mealplanner_engine::{
    DelegationGrant, DeploymentConfig, EnvironmentOutputs, PipelineOrchestrator, PipelineTopology,
    SharedResourceRegistry, TopologyStrategy,
};

/// Deploy Planner - cross-account DNS delegation and pipeline topology
#[derive(Parser, Debug)]
#[command(name = "deploy-planner", version, about)]
struct Args {
    /// JSON configuration file; DEPLOY_* variables are used when omitted
    #[arg(long, short = 'c', env = "DEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured topology strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Debug-level logging
    #[arg(long, short = 'v', default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, default_value = "false", env = "DEPLOY_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print registry outputs, grants and topology as JSON
    Synth,
    /// Build everything and print a summary
    Validate,
    /// Dry-run the pipeline and print the run report
    Run {
        /// Approve manual gates without prompting
        #[arg(long, default_value = "false")]
        auto_approve: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Serial,
    WaveParallel,
}

impl From<StrategyArg> for TopologyStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Serial => TopologyStrategy::Serial,
            StrategyArg::WaveParallel => TopologyStrategy::WaveParallel,
        }
    }
}

#[derive(Serialize)]
struct Synthesis<'a> {
    root_domain: &'a str,
    parent_zone: &'a ParentZone,
    outputs: Vec<EnvironmentOutputs>,
    grants: &'a [DelegationGrant],
    topology: &'a PipelineTopology,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs);

    let config = load_config(&args)?;
    let mut settings: PipelineSettings = config.pipeline.clone();
    if let Some(strategy) = args.strategy {
        settings.strategy = strategy.into();
    }

    info!(
        root_domain = %config.root_domain,
        environments = config.environments.len(),
        strategy = %settings.strategy,
        "🚀 Starting Deploy Planner"
    );

    let resolver = StaticZoneResolver::new(&config.zones);
    let registry = SharedResourceRegistry::build(&config, &resolver).context("Failed to build delegation grants")?;
    let topology = PipelineOrchestrator::new(&registry, &settings)
        .build()
        .context("Failed to build pipeline topology")?;

    match args.command {
        Command::Synth => {
            let synthesis = Synthesis {
                root_domain: registry.root_domain(),
                parent_zone: registry.parent_zone(),
                outputs: registry.outputs(),
                grants: registry.grants(),
                topology: &topology,
            };
            println!("{}", serde_json::to_string_pretty(&synthesis)?);
        }
        Command::Validate => {
            info!("✅ Configuration valid");
            println!(
                "{} grants, {} waves, {} stages: {}",
                registry.grants().len(),
                topology.waves.len(),
                topology.stages().count(),
                topology.execution_order().join(" -> ")
            );
        }
        Command::Run { auto_approve } => {
            let approvals: Arc<dyn ApprovalGateway> = if auto_approve {
                Arc::new(AutoApprove)
            } else {
                Arc::new(stdin_approvals())
            };
            let runner = PipelineRunner::new(Arc::new(DryRunApplyEngine::new()), Arc::new(DryRunVerification), approvals);

            let report = runner
                .run(&topology, &AbortSignal::never())
                .await
                .context("Pipeline topology failed validation")?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.succeeded() {
                error!(run_id = %report.run_id, outcome = ?report.outcome, "❌ Pipeline run did not succeed");
                anyhow::bail!("pipeline run {} finished with outcome {:?}", report.run_id, report.outcome);
            }
            info!(run_id = %report.run_id, "✅ Pipeline run succeeded");
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<DeploymentConfig> {
    match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration file");
            Ok(DeploymentConfig::from_file(path)?.apply_env_overrides())
        }
        None => DeploymentConfig::from_env().context("No --config given and DEPLOY_* variables are incomplete"),
    }
}

/// Prompt on stderr and read `approve` (anything else rejects) from stdin
fn stdin_approvals() -> ChannelApprovals {
    let (approvals, mut handle) = ChannelApprovals::new(1);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(pending) = handle.next().await {
            eprintln!("⏸️  {} requires approval ({}). Type 'approve' to continue:", pending.stage, pending.gate);
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("approve") => pending.approve(),
                Ok(Some(line)) => pending.reject(format!("operator answered '{}'", line.trim())),
                Ok(None) => pending.reject("stdin closed"),
                Err(e) => {
                    warn!(error = %e, "Failed to read approval from stdin");
                    pending.reject(format!("failed to read stdin: {}", e));
                }
            }
        }
    });

    approvals
}
