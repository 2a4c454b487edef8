//! Tron Cluster Coordinator

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tron_cluster::{Config, Coordinator};
use tron_core::{RunId, TaskSpec, TaskState};

/// Tron cluster coordinator - launch and track tasks on a compute cluster
#[derive(Parser)]
#[command(name = "tron-cluster")]
#[command(about = "Launch and track tasks on a compute cluster", long_about = None)]
struct Cli {
    /// Cluster address (any controller; the leader is looked up)
    #[arg(short, long)]
    cluster: String,

    /// Controller port used for leader lookup
    #[arg(long)]
    master_port: Option<u16>,

    /// Directory receiving task output
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator until interrupted
    Watch,

    /// Launch one task and wait for its outcome
    Run {
        /// Action run identity
        #[arg(long)]
        run_id: String,

        /// Command to execute
        #[arg(long)]
        command: String,

        #[arg(long, default_value_t = 0.1)]
        cpus: f64,

        /// Memory in MB
        #[arg(long, default_value_t = 128.0)]
        mem: f64,

        /// Container image
        #[arg(long)]
        image: Option<String>,

        /// Environment variable as KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
    },
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    // Load config
    let mut config = Config::from_env()?;
    if let Some(port) = cli.master_port {
        config.master_port = port;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    info!(
        cluster = %cli.cluster,
        framework = %config.framework_name(),
        "Starting Tron cluster coordinator"
    );

    let coordinator = Coordinator::connect(cli.cluster, config.clone()).await?;

    let code = match cli.command {
        Commands::Watch => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
            ExitCode::SUCCESS
        }
        Commands::Run {
            run_id,
            command,
            cpus,
            mem,
            image,
            env,
        } => {
            let run_id = RunId::new(run_id);
            let mut spec = TaskSpec::new(command, cpus, mem);
            spec.image = image;
            spec.environment.extend(env);

            let serializer = config.serializer_for(&run_id)?;
            let task = coordinator.create_task(run_id, spec, serializer);
            let mut handle = coordinator.submit(task).await;
            info!(task_id = %handle.task_id(), "Task submitted, waiting for outcome");

            let finished = tokio::select! {
                state = handle.wait_done() => Some(state),
                _ = tokio::signal::ctrl_c() => None,
            };
            let state = finished.unwrap_or_else(|| {
                info!("Interrupted");
                handle.state()
            });

            match state {
                TaskState::Succeeded => {
                    info!(task_id = %handle.task_id(), "Task succeeded");
                    ExitCode::SUCCESS
                }
                other => {
                    error!(task_id = %handle.task_id(), state = %other, "Task did not succeed");
                    ExitCode::FAILURE
                }
            }
        }
    };

    coordinator.shutdown().await;
    Ok(code)
}
