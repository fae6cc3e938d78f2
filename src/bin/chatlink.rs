//! Terminal chat client for chatlink.
//!
//! Each stdin line is sent to the active model. Lines starting with `/` are
//! commands: `/model <name>`, `/status`, `/quit`. Replies and status changes
//! are printed to stdout; logs go to stderr.

use chatlink::{ConnectionState, SessionConfig, SessionCore, SessionError, SessionEvent};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Chat with a local model backend from the terminal.
#[derive(Parser)]
#[command(name = "chatlink", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the chat backend (overrides the config file).
    #[arg(long)]
    server_url: Option<String>,

    /// Model to chat with (overrides the config file).
    #[arg(short, long)]
    model: Option<String>,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    SelectModel(String),
    Status,
    Quit,
    Help,
    Blank,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Blank;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_owned());
    };
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, a)| (n, a.trim()));
    match name {
        "model" => Input::SelectModel(arg.to_owned()),
        "status" => Input::Status,
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        _ => Input::Message(line.to_owned()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout is the transcript; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatlink=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if let Some(model) = cli.model {
        config.default_model = model;
    }

    run_chat(config).await
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<SessionConfig> {
    if let Some(path) = path {
        return Ok(SessionConfig::from_file(path)?);
    }
    let default_path = SessionConfig::default_path();
    if default_path.exists() {
        info!(path = %default_path.display(), "loading config");
        Ok(SessionConfig::from_file(&default_path)?)
    } else {
        Ok(SessionConfig::default())
    }
}

async fn run_chat(config: SessionConfig) -> anyhow::Result<()> {
    println!("chatlink v{} - {}", env!("CARGO_PKG_VERSION"), config.server_url);

    let session = SessionCore::new(config)?;
    let mut events = session.subscribe();
    session.start()?;

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event printer lagged; some events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Handle Ctrl+C
    let ctrl_c_session = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            ctrl_c_session.shutdown();
            std::process::exit(0);
        }
    });

    println!(
        "Chatting with {}. Type /help for commands.\n",
        session.active_model()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Blank => {}
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Status => {
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.refresh_status().await {
                        println!("! could not fetch model status: {e}");
                    }
                });
            }
            Input::SelectModel(name) => match session.select_model(&name) {
                Ok(_) => {}
                Err(e) => println!("! {e}"),
            },
            Input::Message(text) => {
                // Fallback sends wait for the HTTP response; keep stdin responsive.
                let session = session.clone();
                tokio::spawn(async move {
                    match session.send_user_message(&text).await {
                        Ok(_) => {}
                        Err(SessionError::PullInProgress(model)) => {
                            println!("! please wait, {model} is still downloading");
                        }
                        Err(e) => println!("! {e}"),
                    }
                });
            }
        }
    }

    session.shutdown();
    printer.abort();
    Ok(())
}

fn print_help() {
    println!("  /model <name>  switch model (downloaded on first message if missing)");
    println!("  /status        refresh installed models");
    println!("  /quit          exit");
}

/// Terminal rendering of a session event. `None` for events with no output.
fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::UserEcho(_) => None,
        SessionEvent::BotMessage(text) => Some(format!("bot> {text}")),
        SessionEvent::AwaitingReply { active: true } => Some("...".to_owned()),
        SessionEvent::AwaitingReply { active: false } => None,
        SessionEvent::PullStarted { text, .. } => Some(format!("[downloading] {text}")),
        SessionEvent::PullResolved { text, .. } => Some(format!("bot> {text}")),
        SessionEvent::InputAvailability { enabled } => Some(if *enabled {
            "[input enabled]".to_owned()
        } else {
            "[input disabled until the download finishes]".to_owned()
        }),
        SessionEvent::ModelSetUpdated { models, .. } => {
            let list = models
                .iter()
                .map(|m| {
                    let label = chatlink::ModelLabel::for_installed(m.installed);
                    format!("{} {label}", m.name)
                })
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!("[models] {list}"))
        }
        SessionEvent::ActiveModelLabel { name, label } => Some(format!("[model] {name} {label}")),
        SessionEvent::ModelSelected { name, installed } => Some(match installed {
            Some(false) => {
                format!("[model] {name} selected; it will be downloaded when you send a message")
            }
            _ => format!("[model] {name} selected"),
        }),
        SessionEvent::TransportStateChanged(state) => match state {
            ConnectionState::Open => Some("[connected]".to_owned()),
            ConnectionState::Closed => Some("[disconnected; retrying]".to_owned()),
            ConnectionState::Connecting => None,
        },
    }
}
