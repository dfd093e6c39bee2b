// embermesh-cli — Desktop CLI for the Embermesh node
//
// Identity management, blocklist administration, and a local demo mesh.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use embermesh_core::mesh::MeshNode;
use embermesh_core::peer::Blocklist;
use embermesh_core::store::{SledStorage, StorageBackend};
use embermesh_core::transport::LocalHub;
use embermesh_core::{DeviceIdentity, IdentityManager, MeshConfig, SenderId};
use tokio::time::timeout;

#[derive(Parser)]
#[command(name = "embermesh")]
#[command(about = "Embermesh — flood-routed encrypted mesh messaging", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new device identity
    Init,
    /// Show identity information
    Identity {
        #[command(subcommand)]
        action: Option<IdentityAction>,
    },
    /// Set the nickname announced to the mesh
    Nickname { name: String },
    /// Block a sender (AA:BB:CC:DD:EE:FF or bare hex)
    Block { sender: String },
    /// Unblock a sender
    Unblock { sender: String },
    /// List blocked senders
    Blocklist,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run a local demo mesh and flood messages across it
    Demo {
        /// Number of nodes in the line topology
        #[arg(short, long, default_value = "4")]
        nodes: usize,
        /// TTL stamped on the demo message
        #[arg(short, long, default_value = "7")]
        ttl: u8,
        /// Message to broadcast
        #[arg(short, long, default_value = "hello from embermesh")]
        message: String,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    Show,
    Export,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => cmd_init(),
        Commands::Identity { action } => cmd_identity(action),
        Commands::Nickname { name } => cmd_nickname(name),
        Commands::Block { sender } => cmd_block(&sender, true),
        Commands::Unblock { sender } => cmd_block(&sender, false),
        Commands::Blocklist => cmd_blocklist(),
        Commands::Config { action } => cmd_config(action),
        Commands::Demo {
            nodes,
            ttl,
            message,
        } => cmd_demo(nodes, ttl, message).await,
    }
}

fn open_backend() -> Result<Arc<dyn StorageBackend>> {
    let data_dir = config::Config::data_dir()?;
    let storage = SledStorage::open(data_dir.join("storage"))
        .context("Failed to open storage")?;
    Ok(Arc::new(storage))
}

fn load_identity() -> Result<(IdentityManager, DeviceIdentity)> {
    let mut manager = IdentityManager::with_backend(open_backend()?)
        .context("Failed to open identity store")?;
    let identity = manager
        .initialize()
        .context("Failed to initialize identity")?
        .clone();
    Ok((manager, identity))
}

fn cmd_init() -> Result<()> {
    println!("{}", "Initializing Embermesh...".bold());
    println!();

    let _config = config::Config::load()?;
    println!("  {} Configuration", "✓".green());

    let data_dir = config::Config::data_dir()?;
    println!("  {} Data directory: {}", "✓".green(), data_dir.display());

    let (_, identity) = load_identity()?;
    println!("  {} Identity ready", "✓".green());
    println!();

    println!("{}", "Identity Information:".bold());
    println!("  Sender ID:  {}", identity.sender_id().to_string().bright_cyan());
    println!(
        "  Device ID:  {}",
        identity.device_id.to_string().bright_yellow()
    );
    println!();

    println!("{}", "Next steps:".bold());
    println!("  • Set a nickname: {}", "embermesh nickname <name>".bright_green());
    println!("  • Try the demo:   {}", "embermesh demo".bright_green());

    Ok(())
}

fn cmd_identity(action: Option<IdentityAction>) -> Result<()> {
    let (_, identity) = load_identity()?;

    match action {
        None | Some(IdentityAction::Show) => {
            println!("{}", "Identity Information".bold());
            println!("  Sender ID:  {}", identity.sender_id().to_string().bright_cyan());
            println!("  Device ID:  {}", identity.device_id);
            if let Some(nickname) = &identity.nickname {
                println!("  Nickname:   {}", nickname.bright_cyan());
            }
        }
        Some(IdentityAction::Export) => {
            println!("{}", "Export Identity (public keys)".bold());
            println!();
            println!("Sender ID:      {}", identity.sender_id());
            println!(
                "Signing Key:    {}",
                hex::encode(identity.signing_public_key()).bright_yellow()
            );
            println!(
                "Agreement Key:  {}",
                hex::encode(identity.agreement_public_key()).bright_yellow()
            );
        }
    }

    Ok(())
}

fn cmd_nickname(name: String) -> Result<()> {
    let (mut manager, _) = load_identity()?;
    manager
        .set_nickname(name.clone())
        .context("Failed to save nickname")?;
    println!("{} Nickname set: {}", "✓".green(), name.bright_cyan());
    Ok(())
}

fn parse_sender(raw: &str) -> Result<SenderId> {
    SenderId::parse(raw)
        .with_context(|| format!("Invalid sender id: {raw} (expected 6 hex bytes)"))
}

fn cmd_block(raw: &str, block: bool) -> Result<()> {
    let sender = parse_sender(raw)?;
    let blocklist = Blocklist::open(open_backend()?)?;
    if block {
        if blocklist.block(sender)? {
            println!("{} Blocked {}", "✓".green(), sender.to_string().bright_red());
        } else {
            println!("{}", format!("{sender} was already blocked").dimmed());
        }
    } else if blocklist.unblock(&sender)? {
        println!("{} Unblocked {}", "✓".green(), sender.to_string().bright_cyan());
    } else {
        println!("{}", format!("{sender} was not blocked").dimmed());
    }
    Ok(())
}

fn cmd_blocklist() -> Result<()> {
    let blocklist = Blocklist::open(open_backend()?)?;
    let blocked = blocklist.list();
    if blocked.is_empty() {
        println!("{}", "No blocked senders.".dimmed());
    } else {
        println!("{} ({} total)", "Blocked Senders".bold(), blocked.len());
        for sender in blocked {
            println!("  {} {}", "•".bright_red(), sender);
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} {key} = {value}", "✓".green());
        }
        ConfigAction::Get { key } => {
            println!("{}", config.get(&key)?);
        }
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

/// Spin up a line of in-process nodes, flood a public message from one
/// end, and send a private message to the far end.
async fn cmd_demo(nodes: usize, ttl: u8, message: String) -> Result<()> {
    anyhow::ensure!(nodes >= 2, "demo needs at least 2 nodes");
    anyhow::ensure!(ttl >= 1, "TTL must be at least 1");

    println!(
        "{}",
        format!("Demo mesh: {nodes} nodes in a line, TTL {ttl}").bold()
    );

    let hub = LocalHub::new();
    let mesh_config = MeshConfig {
        default_ttl: ttl,
        ..MeshConfig::default()
    };

    let mut mesh = Vec::new();
    let mut endpoints = Vec::new();
    for _ in 0..nodes {
        let (endpoint, events) = hub.join();
        endpoints.push(endpoint.clone());
        let node = MeshNode::new(
            mesh_config.clone(),
            DeviceIdentity::generate(),
            Arc::new(endpoint),
            Arc::new(embermesh_core::store::MemoryStorage::new()),
        )?;
        node.start(events);
        mesh.push(node);
    }

    let mut inboxes: Vec<_> = mesh.iter().map(|n| n.subscribe_messages()).collect();
    for pair in endpoints.windows(2) {
        hub.link(&pair[0], &pair[1]);
    }
    // Let announces flood and links connect.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let origin = &mesh[0];
    println!(
        "  {} broadcasting from {}",
        "→".bright_green(),
        origin.sender_id().to_string().bright_cyan()
    );
    origin.send_public(message.as_bytes()).await?;

    for (i, inbox) in inboxes.iter_mut().enumerate().skip(1) {
        match timeout(Duration::from_secs(2), inbox.recv()).await {
            Ok(Ok(msg)) => println!(
                "  {} node {} got {:?} after {} hop(s)",
                "✓".green(),
                i,
                String::from_utf8_lossy(&msg.content),
                msg.hops
            ),
            _ => println!(
                "  {} node {} got nothing (TTL exhausted)",
                "✗".red(),
                i
            ),
        }
    }

    let far = mesh.last().context("mesh is empty")?;
    println!(
        "  {} private message to {}",
        "→".bright_green(),
        far.sender_id().to_string().bright_cyan()
    );
    origin
        .send_private(far.sender_id(), b"for the far end only")
        .await?;
    let mut far_inbox = inboxes.pop().context("missing inbox")?;
    match timeout(Duration::from_secs(2), far_inbox.recv()).await {
        Ok(Ok(msg)) => println!(
            "  {} far end decrypted {:?}",
            "✓".green(),
            String::from_utf8_lossy(&msg.content)
        ),
        _ => println!("  {} private message lost", "✗".red()),
    }

    println!();
    println!("{}", "Peers seen by node 0".bold());
    for peer in origin.peers() {
        let sender = peer
            .sender
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".into());
        let rssi = peer
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {} {} [{}] rssi {}",
            peer.connection, sender, peer.state, rssi
        );
    }

    println!();
    println!("{}", "Metrics".bold());
    for (i, node) in mesh.iter().enumerate() {
        let m = node.metrics();
        println!(
            "  node {}: sent {} received {} forwarded {} duplicates {}",
            i, m.sent, m.received, m.forwarded, m.duplicates_dropped
        );
    }

    for node in &mesh {
        node.stop().await?;
    }
    Ok(())
}
