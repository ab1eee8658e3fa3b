use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vanguard::analysis::Normalizer;
use vanguard::config::VanguardConfig;
use vanguard::context::WorkUnit;
use vanguard::pipeline::{JsonReportSink, Orchestrator};
use vanguard::task::TaskExecutor;

#[derive(Parser)]
#[command(name = "vanguard")]
#[command(version, about = "Automated change-set review pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory holding .vanguard/vanguard.toml
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one work unit through the retrying executor
    Run {
        /// Path to the work unit JSON
        #[arg(short, long)]
        input: PathBuf,

        /// Working tree for sandbox validation; omit for review-only
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Directory for the report and patch set
        #[arg(long, default_value = ".vanguard/reports")]
        output: PathBuf,
    },
    /// Normalize the work unit's tool outputs and print the analysis
    Analyze {
        /// Path to the work unit JSON
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Inspect or scaffold .vanguard/vanguard.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default .vanguard/vanguard.toml
    Init,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "vanguard=debug" } else { "vanguard=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_work_unit(path: &PathBuf) -> Result<WorkUnit> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read work unit from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid work unit JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            input,
            repo,
            output,
        } => {
            let config = VanguardConfig::load(&project_dir)?;
            let work_unit = load_work_unit(input)?;
            let sink = Arc::new(JsonReportSink::new(project_dir.join(output)));
            let orchestrator = Orchestrator::new(&config, sink);
            let executor = TaskExecutor::new(config.task.clone(), orchestrator);

            let run = executor.dispatch(work_unit, repo.clone()).await?;
            println!("{}", serde_json::to_string_pretty(&run.summary)?);
        }
        Commands::Analyze { input } => {
            let work_unit = load_work_unit(input)?;
            let report =
                Normalizer::normalize(&work_unit.linter_outputs, &work_unit.test_outputs);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = VanguardConfig::load(&project_dir)?;
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigCommands::Init => {
                let config_dir = project_dir.join(".vanguard");
                let config_path = config_dir.join("vanguard.toml");
                if config_path.exists() {
                    anyhow::bail!("{} already exists", config_path.display());
                }
                std::fs::create_dir_all(&config_dir)
                    .with_context(|| format!("Failed to create {}", config_dir.display()))?;
                std::fs::write(&config_path, VanguardConfig::default_toml())
                    .with_context(|| format!("Failed to write {}", config_path.display()))?;
                println!("Wrote {}", config_path.display());
            }
        },
    }

    Ok(())
}
