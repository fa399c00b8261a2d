//! # switchboard
//!
//! `generate` scans a project for handler modules and writes the manifest
//! plus the Rust registration module. `serve` wires settings, logging,
//! metrics, the session store and a route table into a running server.

#![deny(unsafe_code)]

mod demo;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use switchboard_core::MemoryStore;
use switchboard_registry::{RouteTable, ScanOptions};
use switchboard_server::SwitchboardServer;
use switchboard_settings::Settings;

/// Remote-call and room broadcast server.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Remote-call and room broadcast server")]
struct Cli {
    /// Settings file (defaults to ./switchboard.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the route manifest and registration module.
    Generate(GenerateArgs),
    /// Run the server.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Project root the registry paths are relative to.
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Register the demo routes.
    #[arg(long)]
    demo: bool,
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let path = path.unwrap_or_else(switchboard_settings::settings_path);
    switchboard_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn generate(settings: &Settings, args: &GenerateArgs) -> Result<()> {
    let registry = &settings.registry;
    let options = ScanOptions {
        source_dir: registry.source_dir.clone(),
        functions_dir: registry.functions_dir.clone(),
    };
    let manifest = switchboard_registry::scan(&args.root, &options)
        .with_context(|| format!("Failed to scan {}", args.root.display()))?;
    switchboard_registry::write_outputs(&args.root, &manifest, &registry.manifest_path, &registry.module_path)
        .context("Failed to write generated outputs")?;

    tracing::info!(
        apis = manifest.apis.len(),
        syncs = manifest.syncs.len(),
        functions = manifest.functions.len(),
        manifest = %registry.manifest_path,
        module = %registry.module_path,
        "registry generated"
    );
    Ok(())
}

async fn serve(mut settings: Settings, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let metrics = switchboard_server::metrics::install_recorder().context("Failed to install metrics recorder")?;
    let table = if args.demo { demo::table()? } else { RouteTable::default() };
    let route_count = table.len();

    let store = Arc::new(MemoryStore::new());
    let server = SwitchboardServer::from_settings(&settings, table, store).with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("switchboard listening on ws://{addr}/ws ({route_count} routes registered)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown().drain(handle, None).await {
        tracing::warn!("Some sessions did not close in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config)?;
    logging::init(&settings.logging);

    match cli.command {
        Command::Generate(args) => generate(&settings, &args),
        Command::Serve(args) => serve(settings, args).await,
    }
}
