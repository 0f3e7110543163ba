//! CLI entry point for the NexPing node.
//!
//! This binary runs a node (optionally with an interactive prompt), probes
//! the public address, and manages configuration files.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use nexping::{
    network::AddressResolver,
    utils::{NexpingConfig, DEFAULT_CONFIG_FILE},
    ContactStore, HttpRelay, MemoryContactStore, Node,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

/// NexPing - peer-to-peer messaging on the local network and beyond
#[derive(Parser)]
#[command(name = "nexping")]
#[command(about = "A peer-to-peer messaging node with LAN discovery and relay fallback")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node until interrupted
    Run {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Display name announced to peers
        #[arg(short, long)]
        name: Option<String>,
        /// Enable interactive mode
        #[arg(short, long)]
        interactive: bool,
    },
    /// Resolve and print this host's public address
    Resolve,
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show current configuration
    Show {
        /// Show only specific section
        #[arg(short, long)]
        section: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = NexpingConfig::load(cli.config.as_deref())?;

    // Initialize logging
    setup_logging(cli.verbose, cli.quiet, &config.logging.level);

    match cli.command {
        Commands::Run {
            port,
            name,
            interactive,
        } => handle_run_command(port, name, interactive, config).await,
        Commands::Resolve => handle_resolve_command(&config).await,
        Commands::Config { action } => handle_config_commands(action, &config),
    }
}

fn setup_logging(verbose: u8, quiet: bool, configured: &str) {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();
}

async fn handle_run_command(
    port: Option<u16>,
    name: Option<String>,
    interactive: bool,
    mut config: NexpingConfig,
) -> Result<()> {
    // Override config with command line options
    if let Some(port) = port {
        config.network.listen_port = port;
        config.validate()?;
    }

    let store = Arc::new(MemoryContactStore::new());
    let relay = HttpRelay::new(&config.relay)?;
    if relay.endpoints().is_empty() {
        info!("No relay endpoints configured; relay delivery disabled");
    }

    let mut node = Node::new(config, store.clone(), Arc::new(relay));
    if let Some(name) = name {
        node = node.with_display_name(name);
    }

    node.start().await?;
    println!("✓ Node {} ({}) started", node.display_name(), node.node_id());
    if let Some(live) = node.live_address() {
        println!("  Advertised address: {live}");
    }

    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    if interactive {
        println!("Interactive mode. Type 'help' for commands.");
        tokio::select! {
            result = run_interactive(&node, &store) => result?,
            () = shutdown_signal => {}
        }
    } else {
        shutdown_signal.await;
    }

    info!("Shutting down gracefully...");
    node.stop().await;
    Ok(())
}

async fn run_interactive(node: &Node, store: &MemoryContactStore) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "" => {}
            "help" => print_help(),
            "peers" => {
                let peers = node.peers().await;
                if peers.is_empty() {
                    println!("No peers discovered yet");
                }
                for peer in peers {
                    println!(
                        "  {} {} local={} public={} last_seen={}",
                        peer.node_id,
                        peer.display_name,
                        peer.local_address.map_or_else(|| "-".to_string(), |a| a.to_string()),
                        peer.public_address.map_or_else(|| "-".to_string(), |a| a.to_string()),
                        peer.last_seen.format("%H:%M:%S")
                    );
                }
            }
            "send" => {
                let Some((peer_id, content)) = rest.trim().split_once(' ') else {
                    println!("Usage: send <node_id> <message>");
                    continue;
                };
                match node.deliver(peer_id, content).await {
                    Ok(path) => {
                        println!("✓ Sent via {path}");
                        record_outgoing(store, peer_id, content);
                    }
                    Err(e) => println!("✗ {e}"),
                }
            }
            "connect" => {
                let peer_id = rest.trim();
                if peer_id.is_empty() {
                    println!("Usage: connect <node_id>");
                } else if node.connect(peer_id).await {
                    println!("✓ Connect request sent to {peer_id}");
                } else {
                    println!("✗ Could not reach {peer_id}");
                }
            }
            "contacts" => {
                for contact in store.contacts()? {
                    let messages = store.messages(contact.id)?.len();
                    println!(
                        "  [{}] {} {} ({} messages)",
                        if contact.is_online { "online" } else { "offline" },
                        contact.name,
                        contact.node_id,
                        messages
                    );
                }
            }
            "status" => {
                println!(
                    "{} peers online, {} known",
                    node.online_count().await,
                    node.peers().await.len()
                );
            }
            "quit" | "exit" => break,
            other => println!("Unknown command '{other}'. Type 'help' for commands."),
        }
    }

    Ok(())
}

fn record_outgoing(store: &MemoryContactStore, peer_id: &str, content: &str) {
    let result = store.find_contact_by_node_id(peer_id).and_then(|contact| match contact {
        Some(contact) => store.record_message(contact.id, content).map(|_| ()),
        None => Ok(()),
    });
    if let Err(e) = result {
        warn!("Could not record outgoing message: {}", e);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  peers                      list discovered peers");
    println!("  send <node_id> <message>   send a message");
    println!("  connect <node_id>          send a connect request");
    println!("  contacts                   list stored contacts");
    println!("  status                     show liveness summary");
    println!("  quit                       stop the node");
}

async fn handle_resolve_command(config: &NexpingConfig) -> Result<()> {
    let resolver = AddressResolver::new(&config.resolver, config.network.listen_port);
    let live = resolver.resolve().await;
    println!("{live}");
    Ok(())
}

fn handle_config_commands(action: ConfigCommands, config: &NexpingConfig) -> Result<()> {
    match action {
        ConfigCommands::Generate { output } => {
            let default_config = NexpingConfig::default();
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

            default_config.save(&output_path)?;
            println!("✓ Configuration generated: {}", output_path.display());
        }
        ConfigCommands::Validate { file } => {
            let config_to_validate = match file {
                Some(path) => NexpingConfig::from_file(path)?,
                None => config.clone(),
            };

            config_to_validate.validate()?;
            println!("✓ Configuration is valid");
        }
        ConfigCommands::Show { section } => {
            let config_str = config.to_toml_string()?;

            match section {
                Some(section_name) => {
                    let table: toml::Table = config_str.parse()?;
                    let value = table
                        .get(&section_name)
                        .ok_or_else(|| anyhow!("Unknown section: {}", section_name))?;
                    println!("[{section_name}]");
                    println!("{}", toml::to_string(value)?);
                }
                None => println!("{config_str}"),
            }
        }
    }
    Ok(())
}
