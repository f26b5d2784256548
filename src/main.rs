//! Stealthchat - encrypted peer-to-peer chat
//!
//! CLI front-end: gathers a role, a display name, a port, and certificate
//! material, then hands everything to the session core. Run with `listen`
//! or `connect` for direct use, or with no subcommand for the interactive
//! menu.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stealthchat::config::{
    validate_port, Credentials, Identity, PeerAddr, Profile, Role, SessionConfig, DEFAULT_HOST,
    PORT_MAX, PORT_MIN,
};
use stealthchat::{establish, run_session, Console};

/// Stealthchat - encrypted peer-to-peer chat
///
/// Both peers authenticate each other with certificates before any message
/// is exchanged. Type 'EXIT' during a chat to end it.
#[derive(Parser)]
#[command(name = "stealthchat")]
#[command(version)]
#[command(about = "Encrypted peer-to-peer chat over mutually-authenticated TLS")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a peer to connect (responder role)
    Listen {
        /// Port to listen on (1024-65535)
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Connect to a waiting peer (initiator role)
    Connect {
        /// Peer host name or address
        #[arg(long)]
        host: Option<String>,

        /// Peer port (1024-65535)
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Your display name, shown before each of your messages
    #[arg(short, long)]
    name: Option<String>,

    /// Path to your certificate (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to your private key (PEM)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Path to the trust anchor the peer must verify against (PEM)
    #[arg(long)]
    trust_anchor: Option<PathBuf>,

    /// Save these settings as defaults for future sessions
    #[arg(long)]
    save_profile: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = Profile::load().unwrap_or_else(|e| {
        eprintln!("Ignoring saved profile: {e}");
        Profile::default()
    });

    let config = match cli.command {
        Some(Commands::Listen { port, common }) => {
            let port = resolve_port(port, &profile)?;
            let (identity, credentials) = resolve_common(common, &profile, Role::Responder, port)?;
            SessionConfig {
                identity,
                peer: PeerAddr::Listen { port },
                credentials,
            }
        }
        Some(Commands::Connect { host, port, common }) => {
            let host = host
                .or_else(|| profile.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string());
            let port = resolve_port(port, &profile)?;
            let (identity, credentials) = resolve_common(common, &profile, Role::Initiator, port)?;
            SessionConfig {
                identity,
                peer: PeerAddr::Connect { host, port },
                credentials,
            }
        }
        None => match main_menu()? {
            Some(config) => config,
            None => return Ok(()),
        },
    };

    run_chat(config).await
}

/// Establish the channel, run the session, report the result. Ending a chat
/// returns here; the process is never exited from the session.
async fn run_chat(config: SessionConfig) -> Result<()> {
    match &config.peer {
        PeerAddr::Listen { port } => {
            println!("Awaiting peer connection on port {port}...");
        }
        PeerAddr::Connect { host, port } => {
            println!("Connecting to {host}:{port}...");
        }
    }

    let channel = establish(&config)
        .await
        .context("could not establish the secure channel")?;

    println!("Handshake complete. Encrypted chat active.");
    println!("Connected to peer at {}!", channel.peer_addr());
    println!("Type 'EXIT' to end the chat.");
    println!();

    let console = Arc::new(Console::stdout(config.identity.name()));
    let report = run_session(channel, config.identity, console)
        .await
        .context("session failed")?;

    println!();
    println!("Session over: {}.", report.outcome);
    println!(
        "{} message(s) sent, {} received.",
        report.messages_sent, report.messages_received
    );
    Ok(())
}

/// Interactive menu, for running without arguments.
fn main_menu() -> Result<Option<SessionConfig>> {
    println!("Welcome to Stealthchat!");
    println!("Where you can have confidence your conversations stay private.");

    let role = loop {
        println!();
        println!("Choose from the following options:");
        println!("1. Wait for a peer (listen)");
        println!("2. Connect to a peer");
        println!("3. Quit");
        println!("Type 'EXIT' during a chat to end it at any point.");

        match prompt_line("> ")?.as_str() {
            "1" => break Role::Responder,
            "2" => break Role::Initiator,
            "3" => return Ok(None),
            _ => println!("Invalid choice, please select again."),
        }
    };

    let identity = prompt_name()?;
    let port = prompt_port()?;
    let credentials = Credentials::default_for(role);

    let peer = match role {
        Role::Responder => PeerAddr::Listen { port },
        Role::Initiator => PeerAddr::Connect {
            host: DEFAULT_HOST.to_string(),
            port,
        },
    };

    Ok(Some(SessionConfig {
        identity,
        peer,
        credentials,
    }))
}

/// Fill in name and certificate paths from arguments, the saved profile,
/// the role's conventional defaults, or a prompt, in that order.
fn resolve_common(
    common: CommonArgs,
    profile: &Profile,
    role: Role,
    port: u16,
) -> Result<(Identity, Credentials)> {
    let identity = match common.name.or_else(|| profile.display_name.clone()) {
        Some(name) => Identity::new(name)?,
        None => prompt_name()?,
    };

    let defaults = Credentials::default_for(role);
    let credentials = Credentials {
        cert: common
            .cert
            .or_else(|| profile.cert.clone())
            .unwrap_or(defaults.cert),
        key: common
            .key
            .or_else(|| profile.key.clone())
            .unwrap_or(defaults.key),
        trust_anchor: common
            .trust_anchor
            .or_else(|| profile.trust_anchor.clone())
            .unwrap_or(defaults.trust_anchor),
    };

    if common.save_profile {
        let saved = Profile {
            display_name: Some(identity.name().to_string()),
            port: Some(port),
            host: profile.host.clone(),
            cert: Some(credentials.cert.clone()),
            key: Some(credentials.key.clone()),
            trust_anchor: Some(credentials.trust_anchor.clone()),
        };
        saved.save().context("failed to save profile")?;
        println!("Profile saved.");
    }

    Ok((identity, credentials))
}

/// Use the given port if valid, else the saved one, else prompt.
fn resolve_port(arg: Option<u16>, profile: &Profile) -> Result<u16> {
    match arg.or(profile.port) {
        Some(port) => {
            validate_port(port)?;
            Ok(port)
        }
        None => prompt_port(),
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        bail!("input closed");
    }
    Ok(line.trim().to_string())
}

fn prompt_name() -> Result<Identity> {
    loop {
        match Identity::new(prompt_line("Enter your name: ")?) {
            Ok(identity) => return Ok(identity),
            Err(e) => println!("{e}"),
        }
    }
}

fn prompt_port() -> Result<u16> {
    loop {
        println!("Please select a port number between {PORT_MIN} - {PORT_MAX}");
        let input = prompt_line("Port number: ")?;
        match input.parse::<u16>() {
            Ok(port) if validate_port(port).is_ok() => return Ok(port),
            _ => println!("Invalid port number. Please select again."),
        }
    }
}
