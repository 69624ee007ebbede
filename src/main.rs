use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::sync::Arc;

mod cli;
mod logging;

use cli::Cli;
use cli::commands::Commands;
use guac_tunnel::config::Config;
use guac_tunnel::connector::GuacdConnector;
use guac_tunnel::http::{Multiplexer, TunnelRegistry};
use guac_tunnel::protocol::ERROR_MESSAGE_PARAMETER;
use guac_tunnel::server;

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => run_server(config, None).await,
        Some(Commands::Serve { bind }) => run_server(config, bind.clone()).await,
        Some(Commands::Config) => print_config(&config),
    }
}

async fn run_server(config: Config, bind: Option<String>) -> Result<()> {
    let config = Arc::new(config);
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    let registry = Arc::new(TunnelRegistry::new().with_remove_hook(|tunnel| {
        match tunnel.configuration().parameter(ERROR_MESSAGE_PARAMETER) {
            Some(message) => info!("Tunnel {} ended by guacd: {}", tunnel.id(), message),
            None => info!("Tunnel {} ended", tunnel.id()),
        }
    }));
    let multiplexer = Arc::new(
        Multiplexer::new(GuacdConnector::new(config.clone()))
            .with_registry(registry.clone())
            .with_write_chunk_size(config.tunnel.write_chunk_size)
            .with_connect_hook(|tunnel| info!("Tunnel {} opened", tunnel.id())),
    );
    let reaper = registry.spawn_reaper(config.tunnel.reap_interval(), config.tunnel.idle_timeout());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .context(format!("Failed to bind {}", bind))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;

    info!("Listening on {}{}", local_addr, config.server.path);
    println!(
        "{} http://{}{} {} {}:{}",
        "Tunnel listening on".green(),
        local_addr,
        config.server.path,
        "-> guacd at".cyan(),
        config.guacd.host,
        config.guacd.port
    );

    server::serve(listener, multiplexer, &config.server.path, shutdown_signal())
        .await
        .context("Server failed")?;

    reaper.abort();
    println!("{}", "Tunnel server stopped".yellow());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, closing tunnels");
}

fn print_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging before loading so config diagnostics are visible
    let log_target = logging::setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    logging::apply(
        &log_target,
        config.log_level.as_deref(),
        config.log_file.as_deref(),
        cli.is_verbose(),
    )
    .context("Failed to apply logging configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
