use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use forcesync_core::config::SyncConfig;
use forcesync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use forcesync_core::model::{ForceHandle, ForceId, GameSystem};
use forcesync_core::shutdown::{install_signal_handlers, LifecycleCoordinator};
use forcesync_core::ForceSyncEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_DATA_DIR: &str = "~/.forcesync";

#[derive(Parser, Debug)]
#[command(name = "forcesync")]
#[command(author, version, about = "Local-first force rosters with cloud sync", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sync service endpoint (host:port)
    #[arg(long)]
    endpoint: Option<String>,

    /// Directory for local force files
    #[arg(long)]
    data_dir: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Client identity announced to the service
    #[arg(long)]
    identity: Option<String>,

    /// Seconds to wait for the service before working offline
    #[arg(long, default_value_t = 3)]
    connect_wait: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List local and remote forces, newest first
    List,
    /// Print a force as JSON
    Show { id: String },
    /// Create a force with one group of units
    Create {
        name: String,
        /// Game system (classic, as)
        #[arg(long, default_value = "classic")]
        system: String,
        /// Unit designation; repeatable
        #[arg(short, long = "unit")]
        units: Vec<String>,
    },
    /// Copy a force under fresh identities
    Clone { id: String },
    /// Delete a force locally and remotely
    Delete { id: String },
    /// Stay connected and follow remote updates until interrupted
    Sync,
    /// Write the effective configuration to a file
    InitConfig { path: PathBuf },
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SyncConfig::default(),
    };
    config.apply_env(|key| std::env::var(format!("FORCESYNC_{}", key)).ok())?;

    if let Some(endpoint) = &args.endpoint {
        config.server.endpoint = endpoint.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.to_lowercase();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    match &args.data_dir {
        Some(dir) => config.store.data_dir = Some(expand(dir)),
        None if config.store.data_dir.is_none() => config.store.data_dir = Some(expand(DEFAULT_DATA_DIR)),
        None => {}
    }

    config.validate()?;
    Ok(config)
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

async fn connect(args: &Args, config: SyncConfig) -> Result<ForceSyncEngine> {
    let engine = ForceSyncEngine::from_config(config).await?;
    if let Some(identity) = &args.identity {
        engine.set_identity(identity.clone());
    }
    engine.start();
    if !engine.wait_ready(Duration::from_secs(args.connect_wait)).await {
        warn!(endpoint = %engine.config().server.endpoint, "sync service unreachable, working offline");
    }
    Ok(engine)
}

async fn run(args: &Args, engine: &ForceSyncEngine) -> Result<()> {
    match &args.command {
        Command::List => {
            for force in engine.list_forces().await? {
                let location = match (force.local, force.remote) {
                    (true, true) => "synced",
                    (true, false) => "local",
                    _ => "remote",
                };
                println!(
                    "{}  {:<24} {:<8} {:>3} units  {:<7} {}",
                    force.instance_id,
                    force.name,
                    force.game_system,
                    force.unit_count,
                    location,
                    force.timestamp.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Show { id } => {
            let Some(force) = engine.load_force(&ForceId::new(id.as_str())).await? else {
                bail!("no force with id {}", id);
            };
            let snapshot = force.lock().await.build_snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Create { name, system, units } => {
            let system: GameSystem = system.parse().map_err(anyhow::Error::msg)?;
            let mut force = system.new_force(name.as_str());
            if !units.is_empty() {
                let group = force.add_group("Main");
                for unit in units {
                    force.add_unit(&group, system.new_unit(unit.as_str()))?;
                }
            }
            let handle = ForceHandle::new(force);
            let outcome = engine.save_force(&handle).await?.wait().await;
            let id = handle.instance_id().await.context("saved force has no id")?;
            println!("{}  {:?}", id, outcome);
        }
        Command::Clone { id } => {
            let Some(source) = engine.load_force(&ForceId::new(id.as_str())).await? else {
                bail!("no force with id {}", id);
            };
            let (copy, ticket) = engine.clone_force(&source).await?;
            let outcome = ticket.wait().await;
            let copy_id = copy.instance_id().await.context("clone has no id")?;
            println!("{}  {:?}", copy_id, outcome);
        }
        Command::Delete { id } => {
            if !engine.delete_force(&ForceId::new(id.as_str())).await? {
                warn!(instance_id = %id, "no local copy to delete");
            }
        }
        Command::Sync => follow(engine).await?,
        Command::InitConfig { .. } => {}
    }
    Ok(())
}

/// Keep every local force live until SIGINT/SIGTERM
async fn follow(engine: &ForceSyncEngine) -> Result<()> {
    let lifecycle = Arc::new(LifecycleCoordinator::new());
    install_signal_handlers(lifecycle.clone());
    let watcher = engine.watch_lifecycle(lifecycle.subscribe());

    let mut live = Vec::new();
    for summary in engine.list_forces().await?.into_iter().filter(|s| s.local) {
        if let Some(force) = engine.load_force(&summary.instance_id).await? {
            engine.subscribe_to_updates(&force).await?;
            engine.track(&force).await;
            live.push(force);
        }
    }
    info!(forces = live.len(), "following forces, Ctrl+C to stop");

    lifecycle.wait_for_teardown().await;
    watcher.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if let Command::InitConfig { path } = &args.command {
        config.save_to_file(path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    forcesync_core::metrics::init_metrics();
    info!(level = %LogLevel::parse(&config.logging.level).unwrap_or_default(), "forcesync started");

    let engine = connect(&args, config).await?;
    let result = run(&args, &engine).await;
    if !matches!(args.command, Command::Sync) {
        engine.teardown().await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_arguments() {
        let args = Args::try_parse_from([
            "forcesync", "--endpoint", "sync.example.net:7420", "create", "Recon Lance", "--system", "as",
            "-u", "Locust", "-u", "Commando",
        ])
        .unwrap();
        match args.command {
            Command::Create { name, system, units } => {
                assert_eq!(name, "Recon Lance");
                assert_eq!(system, "as");
                assert_eq!(units, vec!["Locust", "Commando"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::try_parse_from([
            "forcesync", "--endpoint", "10.1.1.1:9000", "--data-dir", "/tmp/forces", "-l", "DEBUG", "list",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.server.endpoint, "10.1.1.1:9000");
        assert_eq!(config.store.data_dir, Some(PathBuf::from("/tmp/forces")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_data_dir_is_expanded() {
        let args = Args::try_parse_from(["forcesync", "list"]).unwrap();
        let config = load_config(&args).unwrap();
        let dir = config.store.data_dir.unwrap();
        assert!(!dir.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let args = Args::try_parse_from(["forcesync", "-l", "loud", "list"]).unwrap();
        assert!(load_config(&args).is_err());
    }
}
