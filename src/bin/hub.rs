use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleetwatch::{
    SystemId, SystemType, Transport,
    config::{Config, StorageConfig, read_config_file},
    exec::ansible::AnsibleExecutor,
    inventory::{Credentials, YamlFileStore},
    observability::TracingSink,
    orchestrator::{Collaborators, Orchestrator},
    storage::{MemoryBackend, StorageBackend, SystemFilter},
    synchronizer::ProvisionRequest,
    util::{get_config_path, get_host_password, get_inventory_override},
};
use serde::Serialize;
use tracing::{debug, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "fleetwatch-hub", about = "Fleet status and remote collection orchestrator")]
struct Args {
    /// Config file (defaults to $FLEETWATCH_CONFIG or ./fleetwatch.json)
    #[arg(short, long, global = true)]
    file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run every periodic task until Ctrl-C
    Run,

    /// Register a system and add it to the inventory
    Provision {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        system_type: SystemType,
        #[arg(long)]
        address: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        transport: Option<Transport>,
        #[arg(long)]
        version: Option<String>,
        /// Privilege escalation method for ssh hosts (sudo, su)
        #[arg(long)]
        become_method: Option<String>,
        /// Ping the host once it is in the inventory
        #[arg(long)]
        verify: bool,
    },

    /// Remove a system from the inventory and the database
    Decommission { id: SystemId },

    /// Run one collection job now
    Collect {
        #[arg(value_name = "TYPE")]
        system_type: SystemType,
    },

    /// Reclassify every system now
    Sweep,

    /// Show one system, or all of them
    Status { id: Option<SystemId> },

    /// Run one module against a host pattern
    Adhoc {
        pattern: String,
        #[arg(short, long, default_value = "command")]
        module: String,
        #[arg(short, long, default_value = "")]
        args: String,
    },
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetwatch", LevelFilter::DEBUG),
        ("fleetwatch_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(file: Option<&str>) -> anyhow::Result<Config> {
    match file {
        Some(path) => read_config_file(path),
        None => {
            let path = get_config_path();
            if Path::new(&path).exists() {
                read_config_file(&path)
            } else {
                debug!("no config at {path}, using defaults");
                Ok(Config::default())
            }
        }
    }
}

async fn open_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend = fleetwatch::storage::sqlite::SqliteBackend::new(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("built without the storage-sqlite feature")
        }
    }
}

/// Start the orchestrator; retention only runs for the long-lived `run`
async fn start(config: &Config, with_retention: bool) -> anyhow::Result<Orchestrator> {
    let storage = open_storage(&config.storage).await?;
    let inventory_path = get_inventory_override().unwrap_or_else(|| config.inventory_path.clone());
    let executor = Arc::new(AnsibleExecutor::new(&inventory_path, &config.playbooks_dir));

    let collaborators = Collaborators {
        storage,
        inventory_store: Arc::new(YamlFileStore::new(inventory_path)),
        executor: executor.clone(),
        probe: executor,
        sink: Arc::new(TracingSink),
    };

    let retention = if with_retention {
        config.storage.retention()
    } else {
        None
    };

    Ok(Orchestrator::start(&config.schedule, retention, collaborators))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = load_config(args.file.as_deref())?;
    let orchestrator = start(&config, matches!(args.command, Command::Run)).await?;

    let result = execute(&orchestrator, args.command).await;
    orchestrator.shutdown().await?;
    result
}

async fn execute(orchestrator: &Orchestrator, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run => {
            info!("running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("shutting down");
        }

        Command::Provision {
            name,
            system_type,
            address,
            user,
            port,
            transport,
            version,
            become_method,
            verify,
        } => {
            let mut request = ProvisionRequest::new(name, system_type, address, user);
            if let Some(port) = port {
                request.profile.port = port;
            }
            if let Some(transport) = transport {
                request.profile.transport = transport;
            }
            request.version = version;
            request.credentials = Credentials {
                password: get_host_password(),
                become_method,
            };
            request.verify = verify;

            print_json(&orchestrator.provision_system(request).await?)?;
        }

        Command::Decommission { id } => {
            let system = orchestrator.decommission_system(id).await?;
            println!("decommissioned {} ({})", system.name, system.id);
        }

        Command::Collect { system_type } => match orchestrator.trigger_collection(system_type).await? {
            Some(report) => print_json(&report)?,
            None => println!("no {system_type} hosts provisioned"),
        },

        Command::Sweep => print_json(&orchestrator.sweep_now().await?)?,

        Command::Status { id: Some(id) } => print_json(&orchestrator.get_status(id).await?)?,

        Command::Status { id: None } => {
            print_json(&orchestrator.list_systems(SystemFilter::default()).await?)?
        }

        Command::Adhoc {
            pattern,
            module,
            args,
        } => print_json(&orchestrator.run_ad_hoc(&pattern, &module, &args).await?)?,
    }

    Ok(())
}
