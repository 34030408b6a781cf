//! Tun Client - Gate and classify traffic to a local service.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use tun_client::config::{Cli, Command, JsonConfigStore, PluginsCommand, ServeArgs, Settings};
use tun_client::gate::GateConfig;
use tun_client::plugins::{ClassificationEngine, PluginRegistry};
use tun_client::proxy::{self, MediationState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let _ = FmtSubscriber::builder()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .try_init();

    let (settings, source) = Settings::resolve(cli.config.as_deref())?;
    if let Some(path) = &source {
        info!("Using settings from {}", path.display());
    }

    let mut registry = PluginRegistry::discover(
        settings.plugin_directory().as_deref(),
        settings.request_plugins.as_deref(),
    );
    let store = JsonConfigStore::for_source(source.as_deref());

    match cli.command {
        Command::Serve(args) => {
            match store {
                Ok(store) => registry = registry.with_store(Arc::new(store)),
                Err(e) => warn!("Plugin settings will not be saved: {}", e),
            }
            serve(args, settings, registry).await
        }
        Command::Plugins(command) => {
            let store = store?;
            info!("Plugin settings file: {}", store.path().display());
            plugins(command, registry.with_store(Arc::new(store)))
        }
    }
}

async fn serve(args: ServeArgs, settings: Settings, registry: PluginRegistry) -> Result<()> {
    info!("Starting tun-client v{}", env!("CARGO_PKG_VERSION"));

    let policy = args.magic_auth.or(settings.magic_auth.clone());
    let gate_config = GateConfig::from_policy(policy.as_deref());
    if gate_config.required {
        if gate_config.allowed_patterns.is_empty() {
            info!("Magic auth enabled for any valid email address");
        } else {
            info!("Magic auth enabled for: {}", gate_config.allowed_patterns.join(", "));
        }
    }
    info!("Request plugins: {}", registry.enabled_ids().join(", "));

    let state = MediationState::new(
        gate_config,
        ClassificationEngine::new(registry),
        settings.max_logged_requests(),
        args.target,
    );
    proxy::serve(args.listen, Arc::new(state)).await
}

fn plugins(command: PluginsCommand, mut registry: PluginRegistry) -> Result<()> {
    let mut enabled = registry.enabled_ids();

    match command {
        PluginsCommand::List => {
            for plugin in registry.all() {
                println!(
                    "[{}] {:<24} {:<24} {}",
                    if plugin.enabled { "x" } else { " " },
                    plugin.id,
                    plugin.title,
                    plugin.origin
                );
            }
            return Ok(());
        }
        PluginsCommand::Enable { ids } => {
            for id in ids {
                if !registry.contains(&id) {
                    anyhow::bail!("Unknown plugin '{}'", id);
                }
                if !enabled.contains(&id) {
                    enabled.push(id);
                }
            }
        }
        PluginsCommand::Disable { ids } => enabled.retain(|id| !ids.contains(id)),
    }

    let saved = registry.modify_plugin_configuration(&enabled)?;
    println!("Enabled plugins: {}", saved.join(", "));
    Ok(())
}
