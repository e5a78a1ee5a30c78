use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use mini_dht::{
    setup_logging, Client, Contact, DhtError, Identifier, Node, Result, Server, ServerConfig,
};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mini-dht")]
#[command(about = "Host Kademlia DHT nodes behind a single TCP server")]
#[command(version)]
struct Cli {
    /// Default log level (RUST_LOG overrides it)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server hosting one or more nodes
    Serve {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address to bind, overrides the config file
        #[arg(short, long)]
        bind: Option<IpAddr>,
        /// Port to listen on, overrides the config file
        #[arg(short, long)]
        port: Option<u16>,
        /// Number of nodes with random identifiers to host
        #[arg(short, long, default_value = "1")]
        nodes: usize,
        /// Host a node with this hex identifier (repeatable)
        #[arg(long = "node")]
        node_ids: Vec<String>,
    },
    /// Ping a node hosted on a remote server
    Ping {
        /// Server address (host:port)
        #[arg(short, long)]
        addr: SocketAddr,
        /// Hex identifier of the node to ping
        #[arg(long)]
        id: String,
        /// Seconds to wait for the answer
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level: LevelFilter = cli
        .log_level
        .parse()
        .map_err(|_| DhtError::ConfigError(format!("Unknown log level {}", cli.log_level)))?;
    setup_logging(level);

    match cli.command {
        Commands::Serve {
            config,
            bind,
            port,
            nodes,
            node_ids,
        } => {
            let mut config = match config {
                Some(path) => ServerConfig::from_file(path)?,
                None => ServerConfig::default(),
            };
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }

            let mut server = Server::new(config);
            for hex in &node_ids {
                server.add_node(Arc::new(Node::new(Identifier::from_hex(hex)?)));
            }
            for _ in 0..nodes.saturating_sub(node_ids.len()) {
                server.add_node(Arc::new(Node::random()));
            }
            server.add_default_handlers();

            server.start()?;
            for node in server.nodes() {
                info!("Hosting node {}", node.id().to_hex());
            }

            // Server owns its own runtime; this one only waits for Ctrl-C.
            let waiter = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            waiter.block_on(tokio::signal::ctrl_c())?;

            info!("Received Ctrl-C, shutting down");
            server.shutdown();
        }
        Commands::Ping { addr, id, timeout } => {
            let contact = Contact::from_socket_addr(Identifier::from_hex(&id)?, addr);
            let client = Client::new(Duration::from_secs(timeout));

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let answered = runtime.block_on(client.ping(&contact))?;

            if answered != contact.id {
                return Err(DhtError::InvalidResponse(format!(
                    "expected pong from {}, got {}",
                    contact.id.to_hex(),
                    answered.to_hex()
                )));
            }
            println!("Pong from {} at {}", answered.to_hex(), addr);
        }
    }

    Ok(())
}
