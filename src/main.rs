use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use worker_fleet::config::{parse_peers, FleetConfig, PortRange, DEFAULT_HOST_NAME};
use worker_fleet::error::FleetError;
use worker_fleet::node::FleetNode;
use worker_fleet::shutdown::install_shutdown_handler;
use worker_fleet::worker::{Worker, WorkerRecord};

#[derive(Parser, Debug)]
#[command(name = "worker-fleet")]
#[command(version)]
#[command(about = "Worker lifecycle and reconciliation across a fleet of nodes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a fleet node serving worker events from its peers
    Server {
        #[command(flatten)]
        node: NodeArgs,

        /// Port to listen on for gRPC
        #[arg(long, default_value = "50061")]
        port: u16,
    },

    /// Reconcile this node's records against a desired fleet file
    Sync {
        #[command(flatten)]
        node: NodeArgs,

        /// JSON file describing every worker in the fleet
        #[arg(long)]
        file: PathBuf,

        /// Time to let queued fleet events go out before exiting
        #[arg(long, default_value = "1000")]
        drain_ms: u64,
    },

    /// List worker records
    Workers {
        #[command(flatten)]
        node: NodeArgs,

        /// Only workers of this owner
        #[arg(long)]
        owner: Option<u64>,

        /// Only workers placed on this node
        #[arg(long, conflicts_with = "owner")]
        on_node: Option<String>,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Node Arguments (shared by all commands)
// =============================================================================

#[derive(Parser, Debug)]
struct NodeArgs {
    /// Name of this node; workers placed here are applied locally
    #[arg(long, default_value = "default")]
    node_name: String,

    /// Peer nodes (comma-separated, format: "name=host:port")
    /// Example: "edge-2=10.0.0.2:50061,edge-3=10.0.0.3:50061"
    #[arg(long, default_value = "")]
    peers: String,

    /// Root of the workerd tree; code is written under <dir>/worker/<uid>
    #[arg(long, default_value = "workerd")]
    workerd_dir: PathBuf,

    /// SQLite database for worker records (in-memory when omitted)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Host the port allocator binds on
    #[arg(long, default_value = DEFAULT_HOST_NAME)]
    host_name: String,

    /// Lowest port handed out to workers
    #[arg(long, default_value = "10000")]
    port_min: u16,

    /// Highest port handed out to workers
    #[arg(long, default_value = "20000")]
    port_max: u16,
}

impl NodeArgs {
    fn into_config(
        self,
        listen_addr: SocketAddr,
    ) -> Result<FleetConfig, Box<dyn std::error::Error>> {
        Ok(FleetConfig {
            node_name: self.node_name,
            listen_addr,
            peers: parse_peers(&self.peers)?,
            workerd_dir: self.workerd_dir,
            database_path: self.database,
            host_name: self.host_name,
            port_range: PortRange::new(self.port_min, self.port_max),
        })
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Types
// =============================================================================

/// Desired fleet file. Code is given as text.
#[derive(Deserialize)]
struct FleetFile {
    workers: Vec<FleetFileWorker>,
}

#[derive(Deserialize)]
struct FleetFileWorker {
    uid: String,
    name: String,
    owner_id: u64,
    node_name: String,
    #[serde(default)]
    tunnel_id: String,
    #[serde(default)]
    port: u16,
    entry: String,
    code: String,
}

impl From<FleetFileWorker> for Worker {
    fn from(w: FleetFileWorker) -> Self {
        Worker {
            uid: w.uid,
            name: w.name,
            owner_id: w.owner_id,
            node_name: w.node_name,
            tunnel_id: w.tunnel_id,
            port: w.port,
            entry: w.entry,
            code: w.code.into_bytes(),
        }
    }
}

#[derive(Serialize)]
struct WorkerListItem {
    uid: String,
    name: String,
    owner_id: u64,
    node_name: String,
    tunnel_id: String,
    port: u16,
    entry: String,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl From<&WorkerRecord> for WorkerListItem {
    fn from(r: &WorkerRecord) -> Self {
        Self {
            uid: r.worker.uid.clone(),
            name: r.worker.name.clone(),
            owner_id: r.worker.owner_id,
            node_name: r.worker.node_name.clone(),
            tunnel_id: r.worker.tunnel_id.clone(),
            port: r.worker.port,
            entry: r.worker.entry.clone(),
            created_at_ms: r.created_at.timestamp_millis(),
            updated_at_ms: r.updated_at.timestamp_millis(),
        }
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(node: NodeArgs, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    let config = node.into_config(listen_addr)?;
    if config.database_path.is_none() {
        tracing::warn!("No --database given, worker records will not survive a restart");
    }

    let shutdown = install_shutdown_handler()?;
    FleetNode::open(config)?.run(shutdown).await?;
    Ok(())
}

async fn run_sync(
    node: NodeArgs,
    file: PathBuf,
    drain_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read(&file).await?;
    let fleet: FleetFile = serde_json::from_slice(&raw)?;
    let desired: Vec<Worker> = fleet.workers.into_iter().map(Worker::from).collect();

    let config = node.into_config(FleetConfig::default().listen_addr)?;
    let node = FleetNode::open(config)?;
    let result = node.manager.sync_workers(&desired).await;

    // Remote create/delete events are in flight on spawned tasks.
    tokio::time::sleep(Duration::from_millis(drain_ms)).await;

    match result {
        Ok(()) => {
            println!("Fleet converged: {} workers", desired.len());
            Ok(())
        }
        Err(FleetError::PartialFailure) => {
            eprintln!("Fleet converged with failures, see logs for affected workers");
            Err(FleetError::PartialFailure.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_workers(
    node: NodeArgs,
    owner: Option<u64>,
    on_node: Option<String>,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = node.into_config(FleetConfig::default().listen_addr)?;
    let node = FleetNode::open(config)?;
    let store = node.manager.store();
    let records = match (owner, on_node) {
        (Some(owner_id), _) => store.list_by_owner(owner_id)?,
        (None, Some(node_name)) => store.admin_list_by_node(&node_name)?,
        (None, None) => store.admin_list_all()?,
    };

    match output {
        OutputFormat::Json => {
            let items: Vec<WorkerListItem> = records.iter().map(WorkerListItem::from).collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Table => {
            if records.is_empty() {
                println!("No workers found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<20} {:<8} {:<16} {:<6} ENTRY",
                "UID", "NAME", "OWNER", "NODE", "PORT"
            );
            println!("{}", "-".repeat(100));
            for r in &records {
                println!(
                    "{:<38} {:<20} {:<8} {:<16} {:<6} {}",
                    r.worker.uid,
                    r.worker.name,
                    r.worker.owner_id,
                    r.worker.node_name,
                    r.worker.port,
                    r.worker.entry
                );
            }
            println!();
            println!("{} workers", records.len());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server { node, port } => run_server(node, port).await,
        Commands::Sync {
            node,
            file,
            drain_ms,
        } => run_sync(node, file, drain_ms).await,
        Commands::Workers {
            node,
            owner,
            on_node,
            output,
        } => run_workers(node, owner, on_node, output),
    }
}
