//! VoidSync CLI
//!
//! Room-scoped peer-to-peer file transfer

mod config;
mod progress;

use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use voidsync_core::{
    DeviceIdentity, FileIdentityProvider, IdentityProvider, Node, NodeEvent, NodeHandle,
    OutgoingFile, TransferStatus, TransferUpdate, generate_room_id,
};
use voidsync_transport::{MemoryNetwork, Transport};

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration};

/// VoidSync - share files with devices in the same room
#[derive(Parser)]
#[command(name = "voidsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the persisted device identity
    Identity {
        /// Replace the identity with a freshly generated one
        #[arg(long)]
        reset: bool,
    },

    /// Generate a room token
    Room,

    /// Send a file between two in-process nodes and write the received copy
    Demo {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Room token (generated when omitted)
        #[arg(short, long)]
        room: Option<String>,

        /// Directory for the received copy
        #[arg(short, long, default_value = "received")]
        output: PathBuf,
    },

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        })
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    match cli.command {
        Commands::Identity { reset } => {
            show_identity(reset, &config)?;
        }
        Commands::Room => {
            println!("{}", generate_room_id());
        }
        Commands::Demo { file, room, output } => {
            run_demo(file, room, output, &config, cli.verbose).await?;
        }
        Commands::Config { init } => {
            show_config(init, &config_path, &config)?;
        }
    }

    Ok(())
}

/// Print (and optionally regenerate) the device identity
fn show_identity(reset: bool, config: &Config) -> anyhow::Result<()> {
    let provider = FileIdentityProvider::new(&config.device.identity_file);
    let identity = if reset {
        provider.create()?
    } else {
        provider.load_or_create()?
    };

    println!("{} {}", identity.emoji, identity.name);
    println!("Device ID: {}", identity.id);
    println!("Stored at: {}", provider.path().display());
    Ok(())
}

/// Print the effective configuration, writing it out with `--init`
fn show_config(init: bool, path: &Path, config: &Config) -> anyhow::Result<()> {
    if init {
        config.save(path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Loopback transfer between two nodes on an in-process network
async fn run_demo(
    file: PathBuf,
    room: Option<String>,
    output: PathBuf,
    config: &Config,
    verbose: bool,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {:?}", file);
    }

    let node_config = config.to_node_config()?;
    let identity = FileIdentityProvider::new(&config.device.identity_file).load_or_create()?;
    let room = room
        .or_else(|| config.device.room.clone())
        .unwrap_or_else(generate_room_id);
    let outgoing = OutgoingFile::from_path(&file).await?;
    let file_size = outgoing.data.len() as u64;
    let file_name = outgoing.name.clone();

    tracing::info!("Demo transfer of {:?} in room {}", file, room);
    println!("Room: {room}");
    println!("File: {} ({})", file.display(), format_bytes(file_size));

    let transport: Arc<dyn Transport> = Arc::new(MemoryNetwork::new());
    let sender = Node::spawn(Arc::clone(&transport), identity, &room, node_config.clone())?;
    let receiver = Node::spawn(transport, DeviceIdentity::generate(), &room, node_config)?;

    let sender_id = sender.initialize().await?;
    let receiver_id = receiver.initialize().await?;
    println!("Sender:   {sender_id}");
    println!("Receiver: {receiver_id}");

    sender.dial(&receiver_id).await?;
    let peer = sender.wait_for_peer(&receiver_id).await?;
    receiver.wait_for_peer(&sender_id).await?;
    println!("Connected to {} {}", peer.emoji, peer.name);

    let group = MultiProgress::new();
    let send_bar = TransferProgress::new(&group, file_size, "Sending", &file_name)?;
    let receive_bar = TransferProgress::new(&group, file_size, "Receiving", &file_name)?;
    let sender_events = sender.subscribe();
    let receiver_events = receiver.subscribe();

    let started = Instant::now();
    let file_id = sender.send_file(&receiver_id, outgoing).await?;
    let send_watch = tokio::spawn(track_progress(
        sender.clone(),
        sender_events,
        file_id.clone(),
        send_bar,
    ));
    let receive_watch = tokio::spawn(track_progress(
        receiver.clone(),
        receiver_events,
        file_id.clone(),
        receive_bar,
    ));

    let received = receiver.wait_for_transfer(&file_id).await?;
    sender.wait_for_transfer(&file_id).await?;
    let _ = tokio::join!(send_watch, receive_watch);
    let elapsed = started.elapsed();

    if verbose {
        println!("\nActivity:");
        for line in sender.logs().await?.iter().rev() {
            println!("  {line}");
        }
    }

    sender.shutdown().await?;
    receiver.shutdown().await?;

    if received.status() == TransferStatus::Error {
        anyhow::bail!(
            "Transfer failed: {}",
            received.error().unwrap_or("unknown error")
        );
    }
    let Some(result) = received.result() else {
        anyhow::bail!("Transfer {} finished without content", file_id);
    };

    std::fs::create_dir_all(&output)?;
    let safe_name = Path::new(&result.file_name)
        .file_name()
        .map_or_else(|| PathBuf::from(&file_id), PathBuf::from);
    let destination = output.join(safe_name);
    std::fs::write(&destination, result.bytes())?;

    println!(
        "\nReceived {} from {} {} in {}",
        format_bytes(result.len() as u64),
        result.sender_emoji,
        result.sender_name,
        format_duration(elapsed)
    );
    println!("Saved to {}", destination.display());
    Ok(())
}

/// Drive one progress bar from node events until the transfer ends
///
/// Returns the terminal status, or `None` if the record vanished first.
async fn track_progress(
    node: NodeHandle,
    mut events: broadcast::Receiver<NodeEvent>,
    file_id: String,
    bar: TransferProgress,
) -> Option<TransferStatus> {
    loop {
        let update = match events.recv().await {
            Ok(NodeEvent::Transfer(update)) if update.file_id() == file_id => update,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Progress for {} lagged by {} events", file_id, skipped);
                match node.transfer(&file_id).await {
                    Ok(Some(record)) => match record.status() {
                        TransferStatus::Transferring => {
                            bar.update(record.progress());
                            continue;
                        }
                        TransferStatus::Complete => {
                            bar.finish_with_message("Complete".to_string());
                            return Some(TransferStatus::Complete);
                        }
                        TransferStatus::Error => {
                            let reason = record.error().unwrap_or("unknown error");
                            bar.abandon_with_message(format!("Failed: {reason}"));
                            return Some(TransferStatus::Error);
                        }
                    },
                    Ok(None) | Err(_) => return None,
                }
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        };
        match update {
            TransferUpdate::Progress { progress, .. } => bar.update(progress),
            TransferUpdate::Completed { .. } => {
                bar.finish_with_message("Complete".to_string());
                return Some(TransferStatus::Complete);
            }
            TransferUpdate::Failed { reason, .. } => {
                bar.abandon_with_message(format!("Failed: {reason}"));
                return Some(TransferStatus::Error);
            }
            TransferUpdate::Removed { .. } => return None,
            TransferUpdate::Started { .. } | TransferUpdate::Received(_) => {}
        }
    }
}
