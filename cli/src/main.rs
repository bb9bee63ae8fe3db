// onionnet: onion-routed message relay network
//
// One binary runs every role: the registry (directory service), relays, and
// users. `launch` runs a whole local network in one process.

mod config;
mod http;
mod keyfile;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use onionnet_core::crypto::encode_public_key;
use onionnet_core::{KeyPair, NodeId};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::http::{HttpClient, SendRequest};

#[derive(Parser)]
#[command(name = "onionnet")]
#[command(about = "onionnet: layered-encryption message relays", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "onionnet_core=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay registry
    Registry,
    /// Run one relay
    Relay {
        #[arg(long)]
        id: NodeId,
        /// Key file written by `keygen`; a fresh pair is generated otherwise
        #[arg(long)]
        key: Option<PathBuf>,
    },
    /// Run one user endpoint
    User {
        #[arg(long)]
        id: NodeId,
    },
    /// Run a registry, relays and users in one process
    Launch {
        #[arg(long, default_value = "3")]
        relays: u64,
        #[arg(long, default_value = "2")]
        users: u64,
    },
    /// Ask a running user to send a message to another user
    Send {
        #[arg(long)]
        from: NodeId,
        #[arg(long)]
        to: NodeId,
        message: String,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate a relay key pair and write it to a new key file
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log filter: {}", level))?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Registry => cmd_registry(&config).await,
        Commands::Relay { id, key } => cmd_relay(&config, id, key.as_deref()).await,
        Commands::User { id } => cmd_user(&config, id).await,
        Commands::Launch { relays, users } => cmd_launch(&config, relays, users).await,
        Commands::Send { from, to, message } => cmd_send(&config, from, to, message).await,
        Commands::Config { action } => cmd_config(config, action),
        Commands::Keygen { out } => cmd_keygen(&out).await,
    }
}

async fn cmd_registry(config: &Config) -> Result<()> {
    println!("{}", "onionnet registry".bold());
    println!("  Listening on {}", config.registry_address().bright_cyan());

    let handle = server::spawn_registry(config).await?;
    handle.await.context("Registry server stopped")?;
    Ok(())
}

async fn cmd_relay(config: &Config, relay_id: NodeId, key: Option<&Path>) -> Result<()> {
    let keys = key.map(keyfile::load).transpose()?;
    let (node, handle) = server::spawn_relay(config, relay_id, keys).await?;
    let descriptor = node.descriptor()?;

    println!("{} Relay {} registered", "✓".green(), relay_id);
    println!("  Address:  {}", descriptor.network_address.bright_cyan());
    println!("  Registry: {}", config.registry_address());

    handle.await.context("Relay server stopped")?;
    Ok(())
}

async fn cmd_user(config: &Config, user_id: NodeId) -> Result<()> {
    let (_, handle) = server::spawn_user(config, user_id).await?;

    println!("{} User {} listening", "✓".green(), user_id);
    let port = config.user_port(user_id)?;
    println!("  Address:  {}:{}", config.host, port.to_string().bright_cyan());

    handle.await.context("User server stopped")?;
    Ok(())
}

async fn cmd_launch(config: &Config, relays: u64, users: u64) -> Result<()> {
    println!("{}", "onionnet: starting local network...".bold());
    println!();

    let _handles = server::launch(config, relays, users).await?;

    println!("  {} Registry  {}", "✓".green(), config.registry_address().bright_cyan());
    for relay_id in 0..relays {
        let port = config.relay_port(relay_id)?;
        println!("  {} Relay {}   {}:{}", "✓".green(), relay_id, config.host, port);
    }
    for user_id in 0..users {
        let port = config.user_port(user_id)?;
        println!("  {} User {}    {}:{}", "✓".green(), user_id, config.host, port);
    }
    println!();
    println!("{}", "Try:".bold());
    println!("  {}", "onionnet send --from 0 --to 1 \"hello\"".bright_green());
    println!();
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    println!("Shutting down...");
    Ok(())
}

async fn cmd_send(config: &Config, from: NodeId, to: NodeId, message: String) -> Result<()> {
    let http = HttpClient::new(config.request_timeout());
    let url = format!("http://{}:{}/sendMessage", config.host, config.user_port(from)?);

    let request = SendRequest {
        message,
        destination_user_id: to,
    };
    let reply = http
        .post_json(&url, &request)
        .await
        .with_context(|| format!("User {} did not accept the message", from))?;
    let reply: serde_json::Value =
        serde_json::from_slice(&reply).context("Malformed reply from user")?;

    println!("{} Sent from user {} to user {}", "✓".green(), from, to);
    if let Some(circuit) = reply.get("circuitId").and_then(|v| v.as_str()) {
        println!("  Circuit: {}", circuit.bright_cyan());
    }
    if let Some(relays) = reply.get("relays") {
        println!("  Relays:  {}", relays);
    }
    Ok(())
}

fn cmd_config(mut config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

async fn cmd_keygen(out: &Path) -> Result<()> {
    let keys = tokio::task::spawn_blocking(KeyPair::generate)
        .await
        .context("Key generation task failed")?
        .context("Failed to generate key pair")?;
    keyfile::save(out, &keys)?;

    println!("{} RSA-2048 key pair written to {}", "✓".green(), out.display());
    println!();
    println!("Fingerprint: {}", keys.public_key().fingerprint().bright_cyan());
    println!("Public key:");
    println!("{}", encode_public_key(keys.public_key())?.bright_yellow());
    println!();
    println!("Run a relay with it: onionnet relay --id <n> --key {}", out.display());
    println!("{}", "⚠️  Keep the key file secret!".bright_red().bold());

    Ok(())
}
