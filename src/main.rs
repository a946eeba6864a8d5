use clap::Parser;
use network_broker::bus::SystemBus;
use network_broker::config::cli::{print_default_config, CliArgs};
use network_broker::config::{config_path, load_configuration, AppConfig};
use network_broker::error::AppError;
use network_broker::listeners::{DhclientListener, NetworkdListener};
use network_broker::network::{KernelWatcher, Network};
use network_broker::routing::RtNetlinkRouteManager;
use network_broker::scripts::ScriptRunner;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print_default_config();
        return Ok(());
    }

    let config = load_configuration(&cli)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !Path::new(config_path(&cli)).exists() {
        warn!("Configuration file '{}' not found, using defaults", config_path(&cli));
    }

    if cli.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    info!("Starting Network Broker");
    run(Arc::new(config)).await?;
    info!("Shutting down Network Broker");

    Ok(())
}

async fn run(config: Arc<AppConfig>) -> Result<(), AppError> {
    let scripts = ScriptRunner::new(&config.script_dir);
    if let Err(e) = scripts.ensure_state_dirs().await {
        warn!("{}", e);
    }

    let network = Arc::new(Network::new(RtNetlinkRouteManager::new()?));
    // Nothing works without a link table
    network.acquire_links().await?;
    info!("Tracking {} link(s)", network.link_count().await);

    let bus = match SystemBus::connect().await {
        Ok(bus) => Some(bus),
        Err(e) => {
            warn!("Running without system bus: {}", e);
            None
        }
    };

    let mut tasks = KernelWatcher::new(Arc::clone(&network), Arc::clone(&config)).spawn();

    if config.use_networkd() {
        let listener = NetworkdListener::new(Arc::clone(&network), Arc::clone(&config), scripts, bus);
        tasks.push(tokio::spawn(listener.run()));
    } else {
        let listener = DhclientListener::new(Arc::clone(&network), Arc::clone(&config), scripts, bus);
        tasks.push(tokio::spawn(listener.run()));
    }

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }

    // Installed routes and rules stay in the kernel
    for task in tasks {
        task.abort();
    }

    Ok(())
}
