use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use aaflow_core::config::AppConfig;
use aaflow_core::error::Result as FlowResult;
use aaflow_core::types::Update;
use aaflow_engine::{BuildEnv, FlowDefinition, Plugin, Runner};

const DEFAULT_CONFIG: &str = "aaflow.toml";

#[derive(Parser)]
#[command(name = "aaflow", version, about = "Run agent workflows defined as node graphs")]
struct Cli {
    /// Path to config file (defaults to ./aaflow.toml when present)
    #[arg(short, long, env = "AAFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow definition once and print the result
    Run {
        /// Flow definition file (.toml or .json)
        file: PathBuf,
        /// Persist and restore the context under this id
        #[arg(long)]
        context_id: Option<String>,
        /// Print streamed tokens to stderr as they arrive
        #[arg(long)]
        stream: bool,
    },
    /// Print the nodes and transitions of a flow definition
    Inspect {
        /// Flow definition file (.toml or .json)
        file: PathBuf,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Writes every streaming update to stderr as it arrives.
struct StderrStream;

impl Plugin for StderrStream {
    fn name(&self) -> &str {
        "stderr-stream"
    }

    fn setup(&self, runner: &mut Runner) -> FlowResult<()> {
        runner.set_update_handler(std::sync::Arc::new(|update: Update| {
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "{}", update.content());
            let _ = err.flush();
        }));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aaflow=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "aaflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            context_id,
            stream,
        } => {
            let succeeded = run(&config, &file, context_id.as_deref(), stream).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
        Commands::Inspect { file } => {
            let definition = FlowDefinition::load(&file)?;
            let flow = definition.build(&build_env(&config))?;
            println!("{}", serde_json::to_string_pretty(&flow.describe())?);
        }
        Commands::Config => {
            let mut shown = config.clone();
            if shown.model.api_key.is_some() {
                shown.model.api_key = Some("********".to_string());
            }
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// An explicit config path must exist; the default one is optional.
fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            AppConfig::load(path)?
        }
        None => AppConfig::load_or_default(Path::new(DEFAULT_CONFIG))?,
    };
    Ok(config)
}

fn build_env(config: &AppConfig) -> BuildEnv {
    BuildEnv::new().with_llm(aaflow_llm::create_client(&config.model), config.model.clone())
}

/// Run a flow file once. Returns whether the flow succeeded.
async fn run(
    config: &AppConfig,
    file: &Path,
    context_id: Option<&str>,
    stream: bool,
) -> anyhow::Result<bool> {
    let definition = FlowDefinition::load(file)?;
    let flow = definition.build(&build_env(config))?;
    let mut ctx = definition.initial_context();

    let store = aaflow_store::open_store(&config.store)?;
    let mut runner = Runner::from_config(&config.runner).with_store(store);
    if stream {
        runner.register_plugin(Box::new(StderrStream));
    }

    info!(flow_id = %flow.id(), file = %file.display(), "Running flow");
    let result = runner.run_flow(&flow, &mut ctx, context_id).await?;
    if stream {
        eprintln!();
    }
    debug!(data_keys = ctx.data.len(), history = ctx.conversation_history.len(), "Final context");

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.is_success())
}
