use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis_agents::greeter;
use trellis_core::config::{AppConfig, CheckpointBackend};
use trellis_core::types::ThreadId;
use trellis_core::TrellisError;
use trellis_graph::{Checkpointer, CompiledGraph, MemorySaver, RunConfig, SqliteSaver, StateUpdate};
use trellis_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "trellis", version, about = "Run stateful graph workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "trellis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the greeter graph and print its reply
    Greet {
        /// Text to greet
        #[arg(trailing_var_arg = true, required = true)]
        words: Vec<String>,
        /// Checkpoint the run under this thread id
        #[arg(long)]
        thread: Option<String>,
    },
    /// List thread ids in the checkpoint store
    Threads,
    /// Print every checkpoint of a thread
    History {
        #[arg(long)]
        thread: String,
    },
    /// Delete every checkpoint of a thread
    Forget {
        #[arg(long)]
        thread: String,
    },
    /// List built-in tools
    Tools,
    /// Execute a built-in tool with JSON input
    CallTool {
        /// Tool name
        name: String,
        /// Tool input, e.g. '{"a": 2, "b": 3}'
        input: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Checkpoint backend selected by config.
enum Store {
    Memory(Arc<MemorySaver>),
    Sqlite(Arc<SqliteSaver>),
}

impl Store {
    fn open(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(match config.checkpoint.backend {
            CheckpointBackend::Memory => Self::Memory(Arc::new(MemorySaver::new())),
            CheckpointBackend::Sqlite => {
                let path = config.checkpoint_path();
                info!(path = %path.display(), "Opening checkpoint store");
                Self::Sqlite(Arc::new(SqliteSaver::open(&path)?))
            }
        })
    }

    fn checkpointer(&self) -> Arc<dyn Checkpointer> {
        match self {
            Self::Memory(saver) => saver.clone(),
            Self::Sqlite(saver) => saver.clone(),
        }
    }

    fn list_threads(&self) -> trellis_core::Result<Vec<ThreadId>> {
        match self {
            Self::Memory(saver) => saver.list_threads(),
            Self::Sqlite(saver) => saver.list_threads(),
        }
    }

    fn delete_thread(&self, thread_id: &ThreadId) -> trellis_core::Result<usize> {
        match self {
            Self::Memory(saver) => saver.delete_thread(thread_id),
            Self::Sqlite(saver) => saver.delete_thread(thread_id),
        }
    }

    fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Memory(_))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trellis=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "trellis", &mut std::io::stdout());
        return Ok(());
    }

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(TrellisError::ConfigNotFound(path)) => {
            info!(path = %path, "No config file, using defaults");
            AppConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    match cli.command {
        Commands::Greet { words, thread } => {
            let store = Store::open(&config)?;
            let graph = compile_greeter(&config, &store)?;

            let mut run = RunConfig::new();
            if let Some(thread) = thread {
                run = run.thread(thread);
            }
            let input = StateUpdate::new().set_str(greeter::MESSAGE, words.join(" "));
            let result = graph.run(input, &run).await?;

            if let Some(seq) = result.resumed_from {
                info!(seq, "Resumed thread");
            }
            println!(
                "{}",
                result.state.get_str(greeter::MESSAGE).unwrap_or_default()
            );
        }
        Commands::Threads => {
            let store = Store::open(&config)?;
            warn_if_ephemeral(&store);
            let threads = store.list_threads()?;
            if threads.is_empty() {
                println!("No threads.");
            }
            for thread in threads {
                println!("{}", thread);
            }
        }
        Commands::History { thread } => {
            let store = Store::open(&config)?;
            warn_if_ephemeral(&store);
            let thread_id = ThreadId::from(thread);
            let history = store.checkpointer().history(&thread_id).await?;
            if history.is_empty() {
                println!("No checkpoints for thread {}.", thread_id);
            }
            for cp in history {
                println!(
                    "{:>4}  {}  {}",
                    cp.seq,
                    cp.created_at.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_string(&cp.state)?
                );
            }
        }
        Commands::Forget { thread } => {
            let store = Store::open(&config)?;
            warn_if_ephemeral(&store);
            let thread_id = ThreadId::from(thread);
            let removed = store.delete_thread(&thread_id)?;
            println!("Removed {} checkpoint(s) from thread {}.", removed, thread_id);
        }
        Commands::Tools => {
            let tools = build_tools(&config);
            for def in tools.definitions() {
                println!("  {:<12} {}", def.name, def.description);
            }
        }
        Commands::CallTool { name, input } => {
            let tools = build_tools(&config);
            let input: serde_json::Value = serde_json::from_str(&input)?;
            let result = tools.execute(&name, input).await?;
            if result.is_error {
                anyhow::bail!("{}: {}", name, result.content);
            }
            println!("{}", result.content);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

fn compile_greeter(config: &AppConfig, store: &Store) -> anyhow::Result<CompiledGraph> {
    let mut graph = greeter::graph()?.compile_with_checkpointer(store.checkpointer())?;
    if let Some(limit) = config.engine.step_limit {
        graph = graph.with_step_limit(limit);
    }
    Ok(graph)
}

fn build_tools(config: &AppConfig) -> ToolRegistry {
    let mut tools = ToolRegistry::with_builtins();
    tools.set_timeout_secs(config.engine.tool_timeout_secs);
    tools
}

fn warn_if_ephemeral(store: &Store) {
    if store.is_ephemeral() {
        warn!("Checkpoint backend is 'memory'; threads do not outlive the process");
    }
}
