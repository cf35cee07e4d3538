use anyhow::{anyhow, bail, Result};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::sync::Arc;

use parley_core::{
    AgentRegistry, ConnectionStatus, ConnectionTester, ConversationDriver, ConversationEvent,
    HttpBackend, KeyValueStore, MemoryClear, Provider, SettingsField, SettingsStore, StartRequest,
    SYSTEM_SPEAKER,
};

use crate::app::failure_message;
use crate::config::ClientConfig;

pub async fn list_agents(backend: &HttpBackend) -> Result<()> {
    let mut registry = AgentRegistry::new();
    registry
        .refresh(backend)
        .await
        .map_err(|e| anyhow!(failure_message("Failed to load agents", &e.to_string())))?;

    println!("\n{}", "Available Agents".bold().blue());
    println!("{}", "=".repeat(30).dimmed());

    if registry.is_empty() {
        println!("{}", "The backend has no agents configured".yellow());
        return Ok(());
    }

    for entry in registry.entries() {
        match &entry.agent.persona {
            Some(persona) => println!("  • {} {}", entry.agent.name.green(), persona.dimmed()),
            None => println!("  • {}", entry.agent.name.green()),
        }
    }

    Ok(())
}

pub struct RunArgs {
    pub agents: Vec<String>,
    pub prompt: String,
    pub turns: u32,
    pub api: Provider,
}

/// Run one conversation and print each turn as it arrives. Agents default to
/// the backend's full roster when none are named.
pub async fn run_conversation(
    backend: Arc<HttpBackend>,
    store: Arc<dyn KeyValueStore>,
    args: RunArgs,
) -> Result<()> {
    let agents = if args.agents.is_empty() {
        let mut registry = AgentRegistry::new();
        registry
            .refresh(backend.as_ref())
            .await
            .map_err(|e| anyhow!(failure_message("Failed to load agents", &e.to_string())))?;
        registry.selected()
    } else {
        args.agents
    };

    let settings = SettingsStore::new(Arc::clone(&store)).load().with_env_credentials();

    let mut config = ClientConfig::load(store.as_ref());
    config.api = Some(args.api.as_str().to_string());
    config.turns = args.turns;
    if let Err(e) = config.save(store.as_ref()) {
        tracing::warn!(error = %e, "could not save client config");
    }

    let driver = ConversationDriver::new(backend);
    let request = StartRequest {
        agents,
        prompt: args.prompt,
        turns: args.turns,
        api: Some(args.api),
    };

    let summary = driver
        .start(request, settings, |event| print_event(&event))
        .await?;

    match summary.failure {
        Some(failure) => bail!(
            "Conversation stopped at turn {} ({}): {}",
            failure.turn + 1,
            failure.agent,
            failure.reason
        ),
        None => Ok(()),
    }
}

fn print_event(event: &ConversationEvent) {
    match event {
        ConversationEvent::Started { agents, turns } => {
            println!(
                "\n{} {} with {}\n",
                "💬 Starting conversation:".bold().blue(),
                format!("{} turns", turns).bold(),
                agents.join(", ").cyan()
            );
        }
        ConversationEvent::Turn { turn, agent, reply } => {
            println!(
                "{} {}",
                format!("[{}]", turn + 1).dimmed(),
                format!("{}:", agent).bold().yellow()
            );
            println!("{}\n", reply);
        }
        ConversationEvent::TurnFailed { turn, agent, reason } => {
            println!(
                "{} {}",
                format!("[{}]", turn + 1).dimmed(),
                format!("{}:", SYSTEM_SPEAKER).bold().red()
            );
            println!("{}\n", format!("Error with {}: {}", agent, reason).red());
        }
        ConversationEvent::Finished(summary) => {
            println!("{}", "=".repeat(50).dimmed());
            println!(
                "{} of {} turns completed",
                summary.completed_turns.to_string().bold(),
                summary.requested_turns
            );
        }
    }
}

pub async fn test_connection(
    backend: &HttpBackend,
    store: Arc<dyn KeyValueStore>,
    provider: Provider,
) -> Result<()> {
    let settings = SettingsStore::new(store).load();

    println!("🔌 Testing {}...", provider.display_name().bold().magenta());

    let status = ConnectionTester::new(backend).test(provider, &settings).await;
    match &status {
        ConnectionStatus::Connected(message) => {
            println!("{} {}", "✓".green().bold(), message);
            Ok(())
        }
        _ => {
            println!("{} {}", "✗".red().bold(), status.message());
            bail!("connection test failed for {}", provider)
        }
    }
}

pub async fn clear_memory(backend: Arc<HttpBackend>) -> Result<()> {
    let driver = ConversationDriver::new(backend);
    match driver
        .clear_memory()
        .await
        .map_err(|e| anyhow!(failure_message("Failed to clear memory", &e.to_string())))?
    {
        MemoryClear::Cleared => {
            println!("{}", parley_core::transcript::MEMORY_CLEARED_STATUS.green());
        }
        MemoryClear::Skipped => {
            println!("{}", "A conversation is in progress, nothing cleared".yellow());
        }
    }
    Ok(())
}

pub fn show_settings(store: Arc<dyn KeyValueStore>) -> Result<()> {
    let settings = SettingsStore::new(store).load();

    println!("\n{}", "Provider Settings".bold().blue());
    println!("{}", "=".repeat(40).dimmed());

    for provider in Provider::all() {
        let source = match provider.credential_source(&settings) {
            Some("env") => "(env var)".dimmed(),
            Some("settings") => "(configured)".dimmed(),
            Some("local") => "(local)".dimmed(),
            _ => "(needs key)".red(),
        };
        println!("\n{} {}", provider.display_name().bold().green(), source);
        for field in provider.fields() {
            println!(
                "  {:<16} {}",
                field.key(),
                field.display_value(&settings).cyan()
            );
        }
    }

    Ok(())
}

pub fn set_setting(store: Arc<dyn KeyValueStore>, key: &str, value: &str) -> Result<()> {
    let field = SettingsField::from_key(key).ok_or_else(|| {
        let known: Vec<&str> = SettingsField::all().iter().map(|f| f.key()).collect();
        anyhow!("Unknown setting '{}'. Known settings: {}", key, known.join(", "))
    })?;

    let settings_store = SettingsStore::new(store);
    let mut settings = settings_store.load();
    field.set(&mut settings, value.to_string());
    let saved = settings_store.save(&settings)?;

    println!(
        "{} {} = {}",
        "Saved".green().bold(),
        field.key(),
        field.display_value(&saved)
    );
    Ok(())
}

pub fn reset_settings(store: Arc<dyn KeyValueStore>, assume_yes: bool) -> Result<()> {
    let settings_store = SettingsStore::new(store);
    let mut prompt_error = None;
    let reset = settings_store.reset(|| {
        if assume_yes {
            return true;
        }
        match Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Reset all settings to defaults?")
            .default(false)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                prompt_error = Some(e);
                false
            }
        }
    })?;

    if let Some(e) = prompt_error {
        return Err(e.into());
    }

    if reset {
        println!("{}", "Settings reset to defaults".green());
    } else {
        println!("{}", "Settings unchanged".dimmed());
    }
    Ok(())
}
