//! Pairlink Client - Interactive test peer
//!
//! Creates or joins a room and walks through the offer/answer exchange with
//! placeholder session descriptions, so a server can be exercised end-to-end
//! without a media stack.

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::rustls::pki_types::ServerName;

use pairlink::call::{CallAction, EndReason, JoinRejection};
use pairlink::config::resolve_log_level;
use pairlink::protocol::{read_frame, write_frame, WireEvent, MAX_FRAME_BYTES};
use pairlink::{tls, CallSession, ClientConfig, ClientEvent, MediaKind, RoomId, ServerEvent};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "pairlink-client")]
#[command(about = "Pairlink test peer - create or join a room and negotiate")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/client.toml")]
    config: PathBuf,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Connect with TLS
    #[arg(long)]
    tls: bool,

    /// Join an existing room instead of creating one
    #[arg(short, long)]
    join: Option<String>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Some(ClientConfig::from_file(&args.config)?)
    } else {
        None
    };
    let found_config = config.is_some();
    let config = config.unwrap_or_default();

    // Initialize logging
    let log_level = resolve_log_level(args.log_level.as_deref(), &config.log_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if !found_config {
        info!("Config file {} not found, using defaults", args.config.display());
    }

    let host = args.host.unwrap_or(config.server_host.clone());
    let port = args.port.unwrap_or(config.port);
    let first_request = match args.join {
        Some(code) => ClientEvent::JoinRoom {
            room_id: RoomId::from(code.as_str()),
        },
        None => ClientEvent::CreateRoom,
    };

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("🔌 Connecting to {}...", addr);
    let stream = TcpStream::connect(addr).await?;

    if args.tls || config.tls {
        let connector = tls::connector(config.ca_certfile.as_deref())?;
        let server_name = ServerName::try_from(host.clone())?;
        let tls_stream = connector.connect(server_name, stream).await?;
        println!("✅ Connected over TLS");
        run(tls_stream, first_request).await
    } else {
        println!("✅ Connected");
        run(stream, first_request).await
    }
}

async fn run<S>(stream: S, first_request: ClientEvent) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();

    let server_task = tokio::spawn(handle_server_events(read_half, event_tx));
    let input_task = tokio::spawn(handle_user_input(cmd_tx));

    let mut session = CallSession::new();
    write_frame(&mut write_half, &first_request).await?;
    print_help();

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    println!("Server connection lost");
                    break;
                };
                describe(&event);
                for action in session.on_event(event) {
                    for request in respond(&session, action) {
                        write_frame(&mut write_half, &request).await?;
                    }
                }
                prompt();
            }
            Some(command) = cmd_rx.recv() => {
                let parts: Vec<&str> = command.split_whitespace().collect();
                let Some(name) = parts.first() else {
                    prompt();
                    continue;
                };

                let request = match name.to_lowercase().as_str() {
                    "create" => Some(session.create_room()),
                    "join" => match parts.get(1) {
                        Some(code) => Some(session.join_room(RoomId::from(*code))),
                        None => {
                            println!("Usage: join <room-code>");
                            None
                        }
                    },
                    "hangup" => session.hangup(),
                    "mute" => session.status(MediaKind::Audio, false),
                    "unmute" => session.status(MediaKind::Audio, true),
                    "video" => match parts.get(1).copied() {
                        Some("on") => session.status(MediaKind::Video, true),
                        Some("off") => session.status(MediaKind::Video, false),
                        _ => {
                            println!("Usage: video on|off");
                            None
                        }
                    },
                    "react" => match parts.get(1) {
                        Some(token) => session.reaction(json!(token)),
                        None => {
                            println!("Usage: react <token>");
                            None
                        }
                    },
                    "state" => {
                        println!(
                            "State: {:?}, role: {:?}, room: {}",
                            session.state(),
                            session.role(),
                            session.room().map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
                        );
                        None
                    }
                    "help" => {
                        print_help();
                        None
                    }
                    "quit" | "exit" => {
                        println!("👋 Goodbye!");
                        break;
                    }
                    other => {
                        println!("Unknown command: {}. Type 'help' for available commands.", other);
                        None
                    }
                };

                if let Some(request) = request {
                    write_frame(&mut write_half, &request).await?;
                }
                prompt();
            }
        }
    }

    input_task.abort();
    server_task.abort();
    Ok(())
}

/// Requests the media layer would send for `action`
fn respond(session: &CallSession, action: CallAction) -> Vec<ClientEvent> {
    match action {
        CallAction::SendReady => session.ready().into_iter().collect(),
        CallAction::CreateOffer => {
            println!("📤 Sending offer");
            [
                session.offer(placeholder_description("offer")),
                session.candidate(placeholder_candidate()),
            ]
            .into_iter()
            .flatten()
            .collect()
        }
        CallAction::CreateAnswer { offer } => {
            println!("📥 Offer received: {}", offer);
            [
                session.answer(placeholder_description("answer")),
                session.candidate(placeholder_candidate()),
            ]
            .into_iter()
            .flatten()
            .collect()
        }
        CallAction::ApplyAnswer { answer } => {
            println!("🤝 Answer applied: {}", answer);
            Vec::new()
        }
        CallAction::AddCandidate { candidate } => {
            println!("🧭 Candidate added: {}", candidate);
            Vec::new()
        }
        CallAction::PeerStatus { kind, enabled } => {
            let state = if enabled { "on" } else { "off" };
            println!("🎛️ Peer turned {:?} {}", kind, state);
            Vec::new()
        }
        CallAction::PeerReaction { payload } => {
            println!("✨ Peer reacted: {}", payload);
            Vec::new()
        }
        CallAction::JoinRejected { room_id, reason } => {
            match reason {
                JoinRejection::NotFound => println!("❌ Room {} not found", room_id),
                JoinRejection::Full => println!("❌ Room {} is full", room_id),
            }
            Vec::new()
        }
        CallAction::Ended(reason) => {
            match reason {
                EndReason::LocalHangup => println!("📴 Call ended"),
                EndReason::PeerHangup(peer) => println!("📴 Peer {} hung up", peer),
                EndReason::PeerDisconnected(peer) => println!("🔴 Peer {} disconnected", peer),
            }
            println!("Use 'create' or 'join <room-code>' to start a new call");
            Vec::new()
        }
        CallAction::ServerError(message) => {
            println!("❌ Server error: {}", message);
            Vec::new()
        }
    }
}

fn describe(event: &ServerEvent) {
    match event {
        ServerEvent::RoomCreated { room_id } => {
            println!("🏠 Room created: {} (share this code with your peer)", room_id)
        }
        ServerEvent::RoomJoined { room_id } => println!("🎉 Joined room {}", room_id),
        ServerEvent::PeerJoined { sender_id } => println!("🟢 Peer {} joined", sender_id),
        ServerEvent::Ready { sender_id } => println!("✅ Peer {} is ready", sender_id),
        _ => {}
    }
}

fn placeholder_description(kind: &str) -> Value {
    json!({
        "type": kind,
        "sdp": format!(
            "v=0\r\no=pairlink-client {} 0 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n",
            rand::random::<u32>()
        ),
    })
}

fn placeholder_candidate() -> Value {
    json!({
        "candidate": "candidate:1 1 UDP 2130706431 127.0.0.1 9 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 0,
    })
}

async fn handle_server_events<R>(mut reader: R, event_tx: mpsc::UnboundedSender<ServerEvent>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader, MAX_FRAME_BYTES).await {
            Ok(Some(body)) => match ServerEvent::from_bytes(&body) {
                Ok(event) => {
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Invalid event from server: {}", e),
            },
            Ok(None) => break,
            Err(e) => {
                error!("Error receiving event: {}", e);
                break;
            }
        }
    }
}

async fn handle_user_input(cmd_tx: mpsc::UnboundedSender<String>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if cmd_tx.send(line).is_err() {
            break;
        }
    }
    Ok(())
}

fn print_help() {
    println!();
    println!("💬 Commands:");
    println!("  create            - Create a new room");
    println!("  join <room-code>  - Join a room");
    println!("  hangup            - End the current call");
    println!("  mute | unmute     - Toggle audio");
    println!("  video on|off      - Toggle video");
    println!("  react <token>     - Send a reaction");
    println!("  state             - Show negotiation state");
    println!("  quit              - Exit client");
    println!();
    prompt();
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
