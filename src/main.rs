//! ClawBridge - single-user web chat relay for a local OpenClaw agent
//!
//! `serve` runs the relay and web UI, `chat` is a terminal client for a
//! running relay.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clawbridge::{
    client::{
        ChatController, ChatHistory, ChatView, FileStore, ReplCommand, TerminalView,
        TransportClient,
    },
    config::{BridgeConfig, InflightPolicy, SlotPolicy},
    relay::RelayServerBuilder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clawbridge")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Web chat relay for a local OpenClaw agent")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CLAWBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server and web UI
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Directory with the web UI assets
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Agent executable
        #[arg(long)]
        agent_command: Option<String>,

        /// Agent name passed as --agent
        #[arg(long)]
        agent_name: Option<String>,

        /// What to do when a second browser connects
        #[arg(long, value_parser = parse_slot_policy)]
        slot_policy: Option<SlotPolicy>,

        /// What to do with messages sent while the agent is busy
        #[arg(long, value_parser = parse_inflight_policy)]
        inflight_policy: Option<InflightPolicy>,
    },

    /// Chat with a running relay from the terminal
    Chat {
        /// Origin the relay is served from
        #[arg(long)]
        url: Option<String>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

fn parse_slot_policy(value: &str) -> std::result::Result<SlotPolicy, String> {
    match value {
        "displace" => Ok(SlotPolicy::Displace),
        "reject" => Ok(SlotPolicy::Reject),
        other => Err(format!("unknown slot policy '{}' (displace, reject)", other)),
    }
}

fn parse_inflight_policy(value: &str) -> std::result::Result<InflightPolicy, String> {
    match value {
        "concurrent" => Ok(InflightPolicy::Concurrent),
        "reject" => Ok(InflightPolicy::Reject),
        "queue" => Ok(InflightPolicy::Queue),
        other => Err(format!(
            "unknown inflight policy '{}' (concurrent, reject, queue)",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stderr keeps stdout free for the chat
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clawbridge={},tower_http=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    match cli.command {
        Commands::Serve {
            host,
            port,
            static_dir,
            agent_command,
            agent_name,
            slot_policy,
            inflight_policy,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = static_dir {
                config.server.static_dir = dir;
            }
            if let Some(command) = agent_command {
                config.agent.command = command;
            }
            if let Some(name) = agent_name {
                config.agent.agent_name = name;
            }
            if let Some(policy) = slot_policy {
                config.server.slot_policy = policy;
            }
            if let Some(policy) = inflight_policy {
                config.server.inflight_policy = policy;
            }
            run_serve(config).await?;
        }
        Commands::Chat { url } => {
            let mut config = config;
            if let Some(url) = url {
                config.client.url = url;
            }
            run_chat(config).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_serve(config: BridgeConfig) -> Result<()> {
    tracing::info!("Starting ClawBridge relay");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    if !config.server.static_dir.is_dir() {
        tracing::warn!(
            static_dir = %config.server.static_dir.display(),
            "Static directory not found, web UI will not be served"
        );
    }

    let server = RelayServerBuilder::new()
        .config(config.server)
        .agent(config.agent)
        .build();

    tracing::info!("ClawBridge is running on http://{}. Press Ctrl+C to stop.", addr);

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
        })
        .await?;

    Ok(())
}

async fn run_chat(config: BridgeConfig) -> Result<()> {
    let transport = Arc::new(TransportClient::from_config(&config.client)?);
    let store = FileStore::open(&config.history.data_dir).with_context(|| {
        format!(
            "Failed to open history directory {}",
            config.history.data_dir.display()
        )
    })?;
    let history = ChatHistory::with_config(store, &config.history);

    let mut events = transport.subscribe();
    let mut controller = ChatController::new(
        TerminalView::new(std::io::stdout()),
        history,
        transport.clone(),
    );
    controller.start();
    controller.view_mut().print_help();

    // The transport only reconnects by itself once it has connected once
    let delay = Duration::from_millis(config.client.reconnect_delay_ms);
    let connector = {
        let transport = transport.clone();
        tokio::spawn(async move {
            while let Err(e) = transport.connect().await {
                tracing::debug!("Initial connect failed: {}", e);
                tokio::time::sleep(delay).await;
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = ReplCommand::parse(&line) else { continue };
                match command {
                    ReplCommand::Send(text) => {
                        if !controller.send_message(&text) {
                            controller.view_mut().show_error("Not connected, message not sent");
                        }
                    }
                    ReplCommand::NewChat => controller.new_chat(),
                    ReplCommand::List => controller.view_mut().print_history(),
                    ReplCommand::Load(arg) => match controller.view().resolve(&arg) {
                        Some(id) => {
                            controller.load_chat(&id);
                        }
                        None => controller
                            .view_mut()
                            .show_error(&format!("No conversation '{}'", arg)),
                    },
                    ReplCommand::Delete(arg) => match controller.view().resolve(&arg) {
                        Some(id) => controller.delete_chat(&id),
                        None => controller
                            .view_mut()
                            .show_error(&format!("No conversation '{}'", arg)),
                    },
                    ReplCommand::Help => controller.view_mut().print_help(),
                    ReplCommand::Quit => break,
                }
            }
            event = events.recv() => match event {
                Ok(event) => controller.handle_event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Chat lagged behind transport events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.unload();
    connector.abort();
    transport.close();
    Ok(())
}

fn show_config(config: Option<&BridgeConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    println!("{}", config.to_toml()?);
    Ok(())
}
