//! hostmesh Node -- host registry, heartbeat monitor and peer gossip.
//!
//! Usage:
//!   hostmesh-node                      # Run with default config
//!   hostmesh-node --config path.toml   # Run with custom config
//!   hostmesh-node join --registry 10.0.0.2:25566 --name alice --address 10.0.0.5
//!   hostmesh-node hosts                # List hosts (queries local API)

use clap::{Parser, Subcommand};
use hostmesh_client::{HostClient, HostDescriptor};
use hostmesh_node::config::NodeConfig;
use hostmesh_node::{expand_tilde, load_or_create_token, Node, NodeParams};
use hostmesh_protocol::DEFAULT_GAME_PORT;

const DEFAULT_LOG_FILTER: &str = "hostmesh_node=info,hostmesh_registry=info,hostmesh_api=info";

#[derive(Parser)]
#[command(name = "hostmesh-node", about = "hostmesh host registry and failover node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.hostmesh/config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry node (default)
    Run,
    /// Register this machine with a registry and heartbeat until Ctrl-C
    Join {
        /// Registry address, host:port
        #[arg(long)]
        registry: String,
        /// Host name to register as
        #[arg(long)]
        name: String,
        /// Address players should connect to
        #[arg(long)]
        address: String,
        /// Game server port
        #[arg(long, default_value_t = DEFAULT_GAME_PORT)]
        game_port: u16,
    },
    /// Show node status (queries local API)
    Status,
    /// List or edit known hosts
    Hosts {
        #[command(subcommand)]
        action: Option<HostsAction>,
    },
    /// List or edit gossip peers
    Peers {
        #[command(subcommand)]
        action: Option<PeersAction>,
    },
}

#[derive(Subcommand)]
enum HostsAction {
    /// List every known host
    List,
    /// Add a host record by hand
    Add {
        name: String,
        address: String,
        #[arg(default_value_t = DEFAULT_GAME_PORT)]
        port: u16,
    },
    /// Forget a host
    Remove { name: String },
}

#[derive(Subcommand)]
enum PeersAction {
    /// List configured peers and their sessions
    List,
    /// Add a peer address (host or host:port)
    Add { addr: String },
    /// Remove a peer address
    Remove { addr: String },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Run) | None => {
            run_node(cfg).await?;
        }
        Some(Commands::Join {
            registry,
            name,
            address,
            game_port,
        }) => {
            join_registry(registry, name, address, game_port).await?;
        }
        Some(Commands::Status) => {
            cli_api_call(&cfg, "/api/v1/status", "{}").await?;
        }
        Some(Commands::Hosts { action }) => match action {
            Some(HostsAction::List) | None => {
                cli_api_call(&cfg, "/api/v1/hosts", "{}").await?;
            }
            Some(HostsAction::Add {
                name,
                address,
                port,
            }) => {
                let body = serde_json::json!({ "name": name, "address": address, "port": port });
                cli_api_call(&cfg, "/api/v1/hosts/add", &body.to_string()).await?;
            }
            Some(HostsAction::Remove { name }) => {
                let body = serde_json::json!({ "name": name });
                cli_api_call(&cfg, "/api/v1/hosts/remove", &body.to_string()).await?;
            }
        },
        Some(Commands::Peers { action }) => match action {
            Some(PeersAction::List) | None => {
                cli_api_call(&cfg, "/api/v1/peers", "{}").await?;
            }
            Some(PeersAction::Add { addr }) => {
                let body = serde_json::json!({ "addr": addr });
                cli_api_call(&cfg, "/api/v1/peers/add", &body.to_string()).await?;
            }
            Some(PeersAction::Remove { addr }) => {
                let body = serde_json::json!({ "addr": addr });
                cli_api_call(&cfg, "/api/v1/peers/remove", &body.to_string()).await?;
            }
        },
    }

    Ok(())
}

/// Make a POST request to the local node API and print the JSON response.
async fn cli_api_call(cfg: &NodeConfig, path: &str, body: &str) -> anyhow::Result<()> {
    let url = format!("http://{}{}", cfg.node.api_addr, path);

    let token_path = expand_tilde(&cfg.node.token_path);
    let token = if token_path.exists() {
        std::fs::read_to_string(&token_path)?.trim().to_string()
    } else {
        String::new()
    };

    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", token))
        .body(body.to_string())
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;

    if status.is_success() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            println!("{}", text);
        }
    } else {
        eprintln!("Error ({}): {}", status, text);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        listen = %cfg.network.listen_addr,
        api_addr = %cfg.node.api_addr,
        peers = cfg.network.peers.len(),
        "network config"
    );

    // Load bearer token
    let token_path = expand_tilde(&cfg.node.token_path);
    let bearer_token = load_or_create_token(&token_path)?;

    let mut node = Node::start(NodeParams::from_config(&cfg), None).await?;
    node.serve_api(&cfg.node.api_addr, bearer_token).await?;

    tracing::info!("all tasks spawned, press Ctrl-C to stop");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}

async fn join_registry(
    registry: String,
    name: String,
    address: String,
    game_port: u16,
) -> anyhow::Result<()> {
    let mut client = HostClient::new(registry);
    client
        .connect(HostDescriptor {
            name: name.clone(),
            address,
            port: game_port,
        })
        .await?;
    tracing::info!(
        host = %name,
        registry = client.registry_addr(),
        "joined registry, heartbeating until Ctrl-C"
    );

    tokio::signal::ctrl_c().await?;
    client.disconnect().await;
    tracing::info!(host = %name, "left registry");
    Ok(())
}
