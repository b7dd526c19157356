#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

mod utils;

use chatlink::config::{load_credentials, save_credentials, ChatConfig, Credentials};
use chatlink::events::{ChatEvent, TransportMode};
use chatlink::models::{Conversation, DeliveryStatus, Message};
use chatlink::session::ChatSession;
use chatlink::store::{HttpStore, MemoryStore, PersistentStore};
use chatlink::xmpp::XmppChannel;

/// Command line arguments for chatlink
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatlink: a terminal chat client with live delivery and a polling fallback."
)]
struct Args {
    /// Room to join
    #[arg(long, value_name = "ID", conflicts_with = "direct", required_unless_present = "direct")]
    room: Option<String>,

    /// User to chat with directly
    #[arg(long, value_name = "PEER")]
    direct: Option<String>,

    /// Configuration file (defaults to config.json in the config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// Prompts the user for login credentials
fn prompt_credentials() -> Result<Credentials> {
    eprintln!("Enter XMPP server domain (e.g., example.com):");
    let server = utils::read_line()?.unwrap_or_default();

    eprintln!("Enter username (without domain part):");
    let username = utils::read_line()?.unwrap_or_default();

    eprintln!("Enter password:");
    let password = utils::read_line()?.unwrap_or_default();

    if server.is_empty() || username.is_empty() {
        return Err(anyhow!("Server and username are required"));
    }
    Ok(Credentials::new(&server, &username, &password))
}

/// Environment first, then the saved credentials file, then a prompt.
fn resolve_credentials() -> Result<(Credentials, bool)> {
    if let Some(credentials) = Credentials::from_env() {
        return Ok((credentials, false));
    }
    if let Some(credentials) = load_credentials()? {
        info!("Using cached credentials for {}", credentials.username);
        if credentials.get_password().is_some() {
            return Ok((credentials, false));
        }
        eprintln!("Enter password for {}@{}:", credentials.username, credentials.server);
        let password = utils::read_line()?.unwrap_or_default();
        return Ok((
            Credentials::new(&credentials.server, &credentials.username, &password),
            true,
        ));
    }
    Ok((prompt_credentials()?, true))
}

fn print_message(message: &Message) {
    let marker = match message.delivery_status {
        DeliveryStatus::Failed => " (failed)",
        _ => "",
    };
    println!(
        "[{}] <{}> {}{}",
        message.timestamp.format("%H:%M:%S"),
        message.sender_id,
        message.body,
        marker
    );
}

async fn next_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(utils::read_line).await?
}

async fn run_commands(session: &ChatSession) -> Result<()> {
    while let Some(line) = next_line().await? {
        match line.as_str() {
            "" => continue,
            "/quit" => break,
            "/typing" => session.set_typing(true),
            "/read" => {
                let unread: Vec<String> = session
                    .messages()
                    .into_iter()
                    .filter(|m| m.sender_id != session.user_id() && m.delivery_status != DeliveryStatus::Read)
                    .map(|m| m.id)
                    .collect();
                session.mark_as_read(&unread).await?;
                println!("Marked {} messages as read", unread.len());
            }
            "/history" => {
                for message in session.get_history(20).await? {
                    print_message(&message);
                }
                if session.has_more() {
                    println!("(more history available, /history again)");
                }
            }
            "/reconnect" => match session.reconnect().await {
                Ok(TransportMode::Live) => println!("Live channel connected"),
                Ok(TransportMode::Fallback) => println!("Still polling, live channel unavailable"),
                Err(e) => println!("Reconnect failed: {}", e),
            },
            "/roster" => {
                for contact in session.roster() {
                    let presence = session
                        .presence_of(chatlink::xmpp::local_part(&contact.jid))
                        .map(|p| if p.available { "online" } else { "offline" })
                        .unwrap_or("unknown");
                    println!(
                        "{} ({}) {:?} [{}]",
                        contact.name.as_deref().unwrap_or(&contact.jid),
                        contact.jid,
                        contact.subscription,
                        presence
                    );
                }
            }
            command if command.starts_with('/') => println!("Unknown command: {}", command),
            text => {
                session.set_typing(false);
                if let Err(e) = session.send_message(text).await {
                    println!("Could not send: {}", e);
                }
            }
        }
        if let Some(summary) = session.typing_summary() {
            println!("({})", summary);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = utils::parse_level(&args.log_level)?;
    let log_file = args.log_file.as_ref().and_then(|p| p.to_str());
    utils::setup_logging(log_file, level)?;
    info!("chatlink starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    let config = ChatConfig::load(args.config.as_deref())?;
    let (credentials, save_after_connect) = resolve_credentials()?;

    let store: Arc<dyn PersistentStore> = if config.store.base_url.is_some() {
        Arc::new(HttpStore::new(&config.store)?)
    } else {
        warn!("No store URL configured, history is kept in memory only");
        Arc::new(MemoryStore::new())
    };

    let conversation = match (&args.room, &args.direct) {
        (Some(room), _) => Conversation::room(room.clone()),
        (None, Some(peer)) => Conversation::direct(peer.clone()),
        (None, None) => return Err(anyhow!("Either --room or --direct is required")),
    };

    let session = ChatSession::builder()
        .live_channel(Arc::new(XmppChannel::new(&config)))
        .store(store)
        .credentials(credentials.clone())
        .conversation(conversation)
        .config(config)
        .build()?;

    let _events = session.subscribe_events(|event| match event {
        ChatEvent::Message(message) => print_message(message),
        ChatEvent::Transport(TransportMode::Live) => println!("* live delivery restored"),
        ChatEvent::Transport(TransportMode::Fallback) => println!("* live channel lost, polling for messages"),
        ChatEvent::Delivery { id, status } => info!("Message {} is now {}", id, status.as_str()),
        _ => {}
    });

    println!("Connecting as {}... please wait...\n", credentials.jid());
    let mode = match session.initialize().await {
        Ok(mode) => mode,
        Err(e) => {
            error!("Could not start session: {}", e);
            eprintln!("Failed to start session for {}: {}", credentials.jid(), e);
            return Err(e.into());
        }
    };
    match mode {
        TransportMode::Live => {
            println!("Connected to {} (live)", session.conversation_key());
            if save_after_connect {
                if let Err(e) = save_credentials(&credentials) {
                    eprintln!("Warning: Failed to save credentials: {}", e);
                }
            }
        }
        TransportMode::Fallback => println!(
            "Live channel unavailable, polling {} for new messages",
            session.conversation_key()
        ),
    }
    println!("Commands: /typing /read /history /reconnect /roster /quit");

    let result = run_commands(&session).await;
    session.close().await?;
    info!("chatlink shut down");
    result
}
