use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod handler;
mod tui;
mod ui;

use app::App;
use config::{ClientConfig, DEFAULT_TURNS};
use parley_core::{FileStore, HttpBackend, KeyValueStore, MemoryStore, Provider};
use tui::EventHandler;

const LOG_ENV: &str = "PARLEY_LOG";

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Watch AI agents hold a conversation, one turn at a time", version)]
struct Cli {
    /// Base URL of the agent backend
    #[arg(long, env = "PARLEY_BACKEND_URL", global = true)]
    backend_url: Option<String>,

    /// Directory for saved settings (defaults to the user config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Keep settings in memory only for this session
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive terminal UI (default)
    Tui,
    /// List the agents the backend offers
    Agents,
    /// Run a conversation and print it
    Run {
        /// Scene or seed prompt for the first agent
        prompt: String,
        /// Comma-separated agents in speaking order (default: all)
        #[arg(short, long, value_delimiter = ',')]
        agents: Vec<String>,
        /// Number of turns
        #[arg(short, long, default_value_t = DEFAULT_TURNS)]
        turns: u32,
        /// Provider: ollama, openai or github
        #[arg(long, default_value = "ollama", value_parser = parse_provider)]
        api: Provider,
    },
    /// Check that the backend can reach a provider
    Test {
        #[arg(value_parser = parse_provider)]
        provider: Provider,
    },
    /// Make every agent forget past conversations
    ClearMemory,
    /// Show or change provider settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings (secrets masked)
    Show,
    /// Set one field, e.g. `settings set ollamaModel llama3`
    Set { field: String, value: String },
    /// Restore defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn parse_provider(s: &str) -> Result<Provider, String> {
    Provider::from_str(&s.to_lowercase())
        .ok_or_else(|| format!("unknown provider '{}' (expected ollama, openai or github)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tui);

    let interactive = matches!(command, Commands::Tui);
    init_logging(interactive)?;

    let store = open_store(cli.config_dir, cli.ephemeral)?;
    let config = ClientConfig::load(store.as_ref());
    let backend_url = config.resolve_backend_url(cli.backend_url.as_deref());
    let backend = Arc::new(
        HttpBackend::new(&backend_url)
            .with_context(|| format!("invalid backend URL '{}'", backend_url))?,
    );
    tracing::info!(backend = %backend_url, "parley starting");

    match command {
        Commands::Tui => run_tui(backend, store).await?,
        Commands::Agents => cli::list_agents(&backend).await?,
        Commands::Run {
            prompt,
            agents,
            turns,
            api,
        } => {
            let args = cli::RunArgs {
                agents,
                prompt,
                turns,
                api,
            };
            cli::run_conversation(backend, store, args).await?
        }
        Commands::Test { provider } => cli::test_connection(&backend, store, provider).await?,
        Commands::ClearMemory => cli::clear_memory(backend).await?,
        Commands::Settings { action } => match action {
            SettingsAction::Show => cli::show_settings(store)?,
            SettingsAction::Set { field, value } => cli::set_setting(store, &field, &value)?,
            SettingsAction::Reset { yes } => cli::reset_settings(store, yes)?,
        },
    }

    Ok(())
}

fn open_store(config_dir: Option<PathBuf>, ephemeral: bool) -> Result<Arc<dyn KeyValueStore>> {
    if ephemeral {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = match config_dir {
        Some(dir) => FileStore::new(dir),
        None => FileStore::in_config_dir()?,
    };
    Ok(Arc::new(store))
}

/// The TUI owns the terminal, so it logs to a file; subcommands log to stderr.
fn init_logging(interactive: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    if interactive {
        let log_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley");
        std::fs::create_dir_all(&log_dir)?;
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("parley.log"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Arc::new(log_file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

async fn run_tui(backend: Arc<HttpBackend>, store: Arc<dyn KeyValueStore>) -> Result<()> {
    let mut events = EventHandler::new();
    let mut app = App::new(backend, store, events.sender());
    app.load_agents();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            if let Some(event) = events.next().await {
                handler::handle_event(&mut app, event);
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}
