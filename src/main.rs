//! Hive - 命令行入口
//!
//! hive run <plan.json>：加载配置、构建引擎、运行计划并以 JSON 输出 Outcome；
//! hive validate <plan.json>：只做加载期检查。Ctrl+C 触发请求级中止。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hive::config::load_config;
use hive::core::{EngineBuilder, ExecutionContext, OutcomeStatus, ShutdownManager};
use hive::plan::Plan;

#[derive(Parser)]
#[command(name = "hive")]
#[command(about = "Hive - DAG step execution engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan and print the outcome as JSON
    Run {
        /// Plan file (Planner hand-off JSON)
        plan: PathBuf,

        /// Extra config file layered over config/default.toml
        #[arg(short, long, env = "HIVE_CONFIG")]
        config: Option<PathBuf>,

        /// Override engine.pool_capacity
        #[arg(short, long)]
        pool: Option<usize>,
    },

    /// Check a plan for duplicate ids, unknown dependencies and cycles
    Validate {
        /// Plan file (Planner hand-off JSON)
        plan: PathBuf,
    },
}

fn read_plan(path: &PathBuf) -> anyhow::Result<Plan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let plan = Plan::from_json(&raw).context("Failed to parse plan")?;
    plan.validate().context("Plan rejected")?;
    Ok(plan)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    hive::observability::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { plan } => {
            let plan = read_plan(&plan)?;
            println!(
                "plan ok: {} steps, {} edges, {} required",
                plan.len(),
                plan.edges().len(),
                plan.required.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { plan, config, pool } => {
            let plan = read_plan(&plan)?;
            let config = load_config(config).context("Failed to load config")?;

            let mut builder = EngineBuilder::new(config);
            if let Some(capacity) = pool {
                builder = builder.with_pool_capacity(capacity);
            }
            let scheduler = builder.build().context("Failed to build engine")?;

            let ctx = ExecutionContext::with_tracing(scheduler.engine().enable_tracing);
            let shutdown = Arc::new(ShutdownManager::new(ctx.abort().clone()));
            shutdown.install_signal_handlers();

            let outcome = scheduler
                .run_in(plan, ctx)
                .await
                .context("Plan rejected")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("Failed to encode outcome")?
            );

            Ok(match outcome.status {
                OutcomeStatus::Failure => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
    }
}
