//! Node binary

use clap::Parser;
use replikv::common::{local_ip, parse_seed, server_id, NodeConfig, PeerHandle};
use replikv::replica::{NodeServer, Replica, ReplicaOptions, Shutdown, SnapshotFileLog};
use replikv::transport::HttpConnector;
use replikv::Config;
use std::fs::OpenOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replikv-node")]
#[command(about = "replikv node, replicated key-value store with two-phase commit")]
#[command(version)]
struct Cli {
    /// Port to listen on
    port: u16,

    /// Configuration file
    #[arg(long, default_value = "resources/config.toml")]
    config: PathBuf,

    /// Directory for snapshots and the trace log (overrides node.data_dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address peers reach this node on (defaults to the outbound interface)
    #[arg(long)]
    advertise: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        config.node.data_dir = dir;
    }

    let ip = match cli.advertise {
        Some(ip) => ip,
        None => local_ip()?,
    };
    let id = server_id(ip, cli.port);
    init_tracing(&config.node, &id)?;

    let seeds = config
        .discovery
        .seeds()
        .iter()
        .map(|s| parse_seed(s))
        .collect::<replikv::Result<Vec<_>>>()?;
    let options = ReplicaOptions {
        retry_delay: config.node.retry_delay(),
        master: config.discovery.master_handle()?,
    };

    let log = Arc::new(SnapshotFileLog::open(&config.node.data_dir, &id)?);
    let connector = Arc::new(HttpConnector::new(config.node.connect_timeout())?);
    let handle = PeerHandle::new(format!("http://{}", SocketAddr::new(ip, cli.port)));

    let shutdown = Shutdown::new();
    let replica = Arc::new(Replica::open(
        id,
        handle,
        log,
        connector,
        options,
        shutdown.subscribe(),
    )?);

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    NodeServer::new(replica, shutdown, bind_addr, seeds)
        .serve()
        .await?;
    Ok(())
}

/// Log to stdout and to `<data_dir>/<id>_server.log`.
fn init_tracing(node: &NodeConfig, id: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(&node.data_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(node.data_dir.join(format!("{}_server.log", id)))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| node.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}
