//! relaymail CLI
//!
//! Thin wrapper around relaymail-core for inspecting and maintaining the
//! local state of a client: configuration, aliases, synced conversations
//! and the persisted session.
//!
//! ## Usage
//!
//! ```bash
//! # Write a config file with defaults
//! relaymail config init --network testnet
//!
//! # Show the effective configuration and sponsor allowlist
//! relaymail config show
//! relaymail policy
//!
//! # Manage aliases of an identity
//! relaymail --identity 0x... alias set 0xabc... "Alice"
//! relaymail --identity 0x... alias list
//!
//! # Browse synced conversations
//! relaymail --identity 0x... conversations
//! relaymail --identity 0x... messages <conversation_id>
//! relaymail --identity 0x... read <conversation_id>
//!
//! # Inspect or drop the persisted session
//! relaymail --identity 0x... session show
//! relaymail --identity 0x... session clear
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaymail_core::chat::{load_conversation_views, load_messages, relative_time};
use relaymail_core::config::CONFIG_FILE_NAME;
use relaymail_core::{
    is_valid_address, AliasDirectory, ClientContext, ConversationId, MailConfig, Network,
    SessionCredential, SponsorPolicy, Storage,
};

/// relaymail - encrypted messaging with sponsored writes
#[derive(Parser)]
#[command(name = "relaymail")]
#[command(version)]
#[command(about = "relaymail - local state of a ledger-backed messaging client")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.relaymail/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/relaymail.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured network
    #[arg(long, global = true)]
    network: Option<Network>,

    /// Owning identity (0x-prefixed address) for per-identity commands
    #[arg(short, long, global = true)]
    identity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the call targets the sponsor relay will pay for
    Policy,

    /// Alias management
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },

    /// List synced conversations, most recent first
    Conversations,

    /// Show the messages of a conversation, newest first
    Messages {
        /// Conversation id
        conversation_id: String,

        /// Maximum number of messages to show
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Show the newest messages across all conversations
    Recent {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Mark every message of a conversation as read
    Read {
        /// Conversation id
        conversation_id: String,
    },

    /// Persisted session management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Delete all synced records (conversations and watermarks stay)
    ClearCache,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a config file with defaults (plus any overrides)
    Init {
        /// Sponsor relay base URL
        #[arg(long)]
        sponsor_url: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum AliasAction {
    /// Add or rename an alias
    Set { address: String, alias: String },
    /// Remove an alias
    Remove { address: String },
    /// List all aliases
    List,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show the persisted session of the identity
    Show,
    /// Delete the persisted session (log out)
    Clear,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.relaymail/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relaymail")
        .join("data")
}

fn open_storage(data_dir: &Path) -> Result<Storage> {
    let path = MailConfig::database_path(data_dir);
    Storage::new(&path).with_context(|| format!("Failed to open database at {}", path.display()))
}

fn require_context(identity: Option<&str>, network: Network) -> Result<ClientContext> {
    let identity = identity.context("This command needs --identity <ADDRESS>")?;
    if !is_valid_address(identity) {
        anyhow::bail!("Invalid identity '{}': expected 0x followed by 64 hex characters", identity);
    }
    Ok(ClientContext::new(identity.trim().to_ascii_lowercase(), network)?)
}

fn format_time(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
    let mut config = MailConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    tracing::debug!(
        data_dir = %data_dir.display(),
        config = %config_path.display(),
        network = %config.network,
        "Starting relaymail"
    );
    let identity = cli.identity.as_deref();
    let now = chrono::Utc::now().timestamp_millis();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("Config file: {}", config_path.display());
                println!("Data directory: {}", data_dir.display());
                println!();
                println!("{}", serde_json::to_string_pretty(&config)?);
            }

            ConfigAction::Init { sponsor_url, force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "Config file {} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                if let Some(url) = sponsor_url {
                    config.sponsor_url = url;
                }
                config.save(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
        },

        Commands::Policy => {
            let policy = SponsorPolicy::for_package(&config.messaging_package)
                .with_targets(config.extra_call_targets.iter().cloned());
            println!("Sponsor: {} ({})", config.sponsor_url, config.network);
            println!("Allowed call targets:");
            for target in policy.targets() {
                println!("  {}", target);
            }
        }

        Commands::Alias { action } => {
            let ctx = require_context(identity, config.network)?;
            let storage = open_storage(&data_dir)?;
            let directory = AliasDirectory::open(storage, &ctx)?;

            match action {
                AliasAction::Set { address, alias } => {
                    directory.set_alias(&address, &alias)?;
                    println!("Alias saved: {} -> {}", address.trim(), alias.trim());
                }

                AliasAction::Remove { address } => {
                    if directory.remove(&address)? {
                        println!("Alias removed: {}", address.trim());
                    } else {
                        println!("No alias for {}", address.trim());
                    }
                }

                AliasAction::List => {
                    let aliases = directory.list();
                    if aliases.is_empty() {
                        println!("No aliases.");
                    } else {
                        println!("Aliases ({}):", aliases.len());
                        for (address, alias) in &aliases {
                            println!("  {}  {}", address, alias);
                        }
                    }
                }
            }
        }

        Commands::Conversations => {
            let ctx = require_context(identity, config.network)?;
            let storage = open_storage(&data_dir)?;
            let aliases = AliasDirectory::open(storage.clone(), &ctx)?.list();
            let views = load_conversation_views(&storage, ctx.identity(), &aliases)?;

            if views.is_empty() {
                println!("No conversations.");
            } else {
                println!("Conversations ({}):", views.len());
                for view in &views {
                    let kind = match view.kind {
                        Some(kind) => kind.to_string(),
                        None => "unregistered".to_string(),
                    };
                    println!(
                        "  {} [{}] {} - {} message(s), {} unread, {}",
                        view.id,
                        kind,
                        view.display_name(),
                        view.len(),
                        view.unread,
                        relative_time(view.last_activity, now)
                    );
                    if let Some(preview) = view.preview() {
                        println!("      {}", preview);
                    }
                }
            }
        }

        Commands::Messages {
            conversation_id,
            limit,
        } => {
            let ctx = require_context(identity, config.network)?;
            let storage = open_storage(&data_dir)?;
            let id = ConversationId::new(conversation_id.trim());
            if storage.load_conversation(&id)?.is_none() && storage.list_by_conversation(&id)?.is_empty() {
                anyhow::bail!("Unknown conversation {}", id);
            }
            let aliases = AliasDirectory::open(storage.clone(), &ctx)?.list();
            let messages = load_messages(&storage, &id, ctx.identity(), &aliases)?;

            if messages.is_empty() {
                println!("No messages in {}.", id);
            } else {
                println!("Messages in {} ({}):", id, messages.len());
                for msg in messages.iter().take(limit) {
                    let marker = if msg.is_pending {
                        "~"
                    } else if msg.is_read {
                        " "
                    } else {
                        "*"
                    };
                    println!(
                        "{} [{}] {}: {}",
                        marker,
                        format_time(msg.timestamp),
                        msg.display_sender(),
                        msg.content
                    );
                    for name in &msg.attachments {
                        println!("      attachment: {}", name);
                    }
                }
            }
        }

        Commands::Recent { limit } => {
            let storage = open_storage(&data_dir)?;
            let records = storage.list_recent(limit)?;
            if records.is_empty() {
                println!("No messages.");
            } else {
                for record in &records {
                    println!(
                        "[{}] {} {}: {}",
                        format_time(record.timestamp),
                        record.conversation_id.short(),
                        relaymail_core::shorten_address(&record.sender),
                        record.text()
                    );
                }
            }
        }

        Commands::Read { conversation_id } => {
            let storage = open_storage(&data_dir)?;
            let id = ConversationId::new(conversation_id.trim());
            let flipped = storage.mark_conversation_read(&id)?;
            println!("Marked {} message(s) as read in {}", flipped, id);
        }

        Commands::Session { action } => {
            let ctx = require_context(identity, config.network)?;
            let storage = open_storage(&data_dir)?;

            match action {
                SessionAction::Show => match storage.load_session(ctx.identity())? {
                    None => println!("No session for {}.", ctx.identity()),
                    Some(blob) => match SessionCredential::from_json(&blob) {
                        Ok(credential) => {
                            let state = if credential.is_expired(now) {
                                "expired".to_string()
                            } else {
                                format!(
                                    "valid, {} min left",
                                    credential.remaining_ms(now) / 60_000
                                )
                            };
                            println!("Session:");
                            println!("  Owner: {}", credential.owner());
                            println!("  Fingerprint: {}", credential.fingerprint());
                            println!("  Created: {}", format_time(credential.created_at()));
                            println!("  Expires: {}", format_time(credential.expires_at()));
                            println!("  State: {}", state);
                            println!("  Scope: {}", credential.scope().join(", "));
                        }
                        Err(e) => println!("Stored session is unreadable: {}", e),
                    },
                },

                SessionAction::Clear => {
                    storage.delete_session(ctx.identity())?;
                    println!("Session cleared for {}", ctx.identity());
                }
            }
        }

        Commands::ClearCache => {
            let storage = open_storage(&data_dir)?;
            storage.clear_records()?;
            println!("Cleared synced records in {}", data_dir.display());
        }
    }

    Ok(())
}
