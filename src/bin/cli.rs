//! CLI for talking to a replikv node

use clap::{Parser, Subcommand};
use replikv::common::PeerHandle;
use replikv::transport::{HttpConnector, HttpPeer, Peer};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "replikv")]
#[command(about = "replikv replicated key-value store CLI")]
#[command(version)]
struct Cli {
    /// Node URL; any node of the cluster will do
    #[arg(long, default_value = "http://localhost:5000")]
    node: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value, replicated to every node
    Put {
        /// Key
        key: String,

        /// Value
        value: String,
    },

    /// Read a value from the node's local copy
    Get {
        /// Key
        key: String,
    },

    /// Delete a value on every node
    Delete {
        /// Key
        key: String,
    },

    /// Print the node's server id
    Id,

    /// List the node's membership directory
    Members,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let connector = HttpConnector::new(Duration::from_secs(5))?;
    let peer = HttpPeer::new(PeerHandle::new(cli.node), connector.client().clone());

    let response = match cli.command {
        Commands::Put { key, value } => peer.put(&key, &value).await?,
        Commands::Get { key } => peer.get(&key).await?,
        Commands::Delete { key } => peer.delete(&key).await?,
        Commands::Id => {
            println!("{}", peer.server_id().await?);
            return Ok(());
        }
        Commands::Members => {
            for entry in peer.directory().await? {
                println!("{}  {}", entry.id, entry.handle);
            }
            return Ok(());
        }
    };

    println!("{}", response);
    if !response.success {
        anyhow::bail!("{}", response.message);
    }
    Ok(())
}
