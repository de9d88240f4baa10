use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use jsrdbg_config::DebuggerConfig;
use jsrdbg_debug::wire::{ConnectionEvent, Payload};
use jsrdbg_debug::DebugSession;
use tokio::sync::broadcast::error::RecvError;

/// Poke a running jsrdbg engine from the command line.
#[derive(Debug, Parser)]
#[command(name = "jsrdbg-probe", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `JSRDBG_CONFIG` is used as a fallback. When neither are
    /// provided the probe uses in-memory defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine host, overriding the config.
    #[arg(long)]
    host: Option<String>,

    /// Engine debugger port, overriding the config.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: ProbeCommand,
}

#[derive(Debug, Subcommand)]
enum ProbeCommand {
    /// Refresh and print the engine's JS contexts.
    Contexts,
    /// Print the engine's version string.
    Version,
    /// Print unsolicited engine messages until interrupted.
    Watch,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DebuggerConfig::resolve(cli.config, |err| {
        eprintln!("jsrdbg-probe: failed to load config: {err}; continuing with defaults");
    });
    if let Some(host) = cli.host {
        config.connection.host = host;
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    jsrdbg_config::init_tracing_with_config(&config.logging);

    let mut session = DebugSession::connect(&config)
        .await
        .with_context(|| format!("connecting to {}", config.connection.address()))?;

    let outcome = match cli.command {
        ProbeCommand::Contexts => print_contexts(&mut session).await,
        ProbeCommand::Version => print_version(&session).await,
        ProbeCommand::Watch => watch(&session).await,
    };

    session.disconnect().await;
    outcome
}

async fn print_contexts(session: &mut DebugSession) -> anyhow::Result<()> {
    let contexts = session.refresh_contexts().await?;
    if contexts.is_empty() {
        println!("no contexts");
    }
    for context in contexts {
        let state = if context.paused { "paused" } else { "running" };
        println!("{}\t{}\t{state}", context.id, context.name);
    }
    Ok(())
}

async fn print_version(session: &DebugSession) -> anyhow::Result<()> {
    let version = session.connection().server_version().await?;
    println!("{version}");
    Ok(())
}

async fn watch(session: &DebugSession) -> anyhow::Result<()> {
    let mut events = session.connection().subscribe_events();
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => event,
        };
        match event {
            Ok(ConnectionEvent::Paused(response)) => match response.payload()? {
                Payload::Paused(location) => println!(
                    "paused\tcontext={}\t{}:{}",
                    response.context_id.unwrap_or_default(),
                    location.url.unwrap_or_default(),
                    location.line.unwrap_or_default(),
                ),
                other => println!("paused\t{}", other.kind()),
            },
            Ok(ConnectionEvent::Response(response)) => {
                let subtype = response.subtype.as_ref().map(|s| s.as_str()).unwrap_or("-");
                println!("{subtype}\t{}", serde_json::Value::Object(response.content));
            }
            Ok(ConnectionEvent::Closed) => {
                println!("connection closed");
                return Ok(());
            }
            Err(RecvError::Lagged(skipped)) => eprintln!("jsrdbg-probe: skipped {skipped} events"),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
