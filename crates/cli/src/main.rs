use bridge::ami::{AmiClient, OriginateRequest};
use bridge::dispatch::{Dispatcher, Outcome};
use bridge::ntfy::InboundMessage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ntfy-bridge")]
#[command(about = "Bridge ntfy alerts to PBX calls and webhooks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Subscribe to the ntfy topic and trigger actions for high-priority alerts (default).
    Run {
        /// Config file path (default: NTFY_BRIDGE_CONFIG or ~/.ntfy-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Place a single test call through AMI using the configured call settings.
    Call {
        /// Config file path (default: NTFY_BRIDGE_CONFIG or ~/.ntfy-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Dispatch a synthetic alert as if it had arrived from ntfy.
    Notify {
        /// Config file path (default: NTFY_BRIDGE_CONFIG or ~/.ntfy-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Alert title
        #[arg(long)]
        title: Option<String>,

        /// ntfy priority (1-5)
        #[arg(long, short, default_value_t = 5)]
        priority: u8,

        /// Alert body
        message: String,
    },

    /// Print the resolved settings (secrets masked).
    Config {
        /// Config file path (default: NTFY_BRIDGE_CONFIG or ~/.ntfy-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let level = std::env::var("LOG_LEVEL").ok();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(bridge::config::log_filter(level.as_deref())),
    )
    .init();

    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Run { config: None }) {
        Commands::Version => {
            println!("ntfy-bridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run { config } => run(config).await,
        Commands::Call { config } => run_call(config).await,
        Commands::Notify {
            config,
            title,
            priority,
            message,
        } => run_notify(config, title, priority, message).await,
        Commands::Config { config } => run_config(config),
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = Arc::new(bridge::config::load_settings(config_path)?);
    let (shutdown_tx, shutdown_rx) = bridge::signal::shutdown_channel();
    tokio::spawn(async move {
        bridge::signal::os_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });
    bridge::bridge::run_bridge(settings, shutdown_rx).await
}

async fn run_call(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = bridge::config::load_settings(config_path)?;
    let ami = settings
        .ami
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("AMI is disabled (AMI_HOST is empty)"))?;
    let client = AmiClient::new(ami);
    let request = OriginateRequest::from_settings(&settings.call);
    log::info!("placing test call to {} via {}", request.channel, client.addr());
    let ack = client.originate(&request).await?;
    println!(
        "originate accepted ({}): {}",
        ack.action_id,
        ack.message.unwrap_or_default()
    );
    Ok(())
}

async fn run_notify(
    config_path: Option<PathBuf>,
    title: Option<String>,
    priority: u8,
    message: String,
) -> anyhow::Result<()> {
    let settings = bridge::config::load_settings(config_path)?;
    let msg = InboundMessage::new(title, message, priority);
    if !msg.qualifies(settings.bridge.min_priority) {
        println!(
            "priority {} is below threshold {}; no action taken",
            msg.priority, settings.bridge.min_priority
        );
        return Ok(());
    }
    let report = Dispatcher::from_settings(&settings).dispatch(&msg).await;
    println!("call: {}", describe(&report.call));
    println!("webhook: {}", describe(&report.webhook));
    if !report.all_ok() {
        anyhow::bail!("one or more actions failed");
    }
    Ok(())
}

fn run_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = bridge::config::load_settings(config_path)?;
    println!("{}", serde_json::to_string_pretty(&settings.describe())?);
    Ok(())
}

fn describe<T>(outcome: &Outcome<T>) -> String {
    match outcome {
        Outcome::Skipped => "skipped (not configured)".to_string(),
        Outcome::Completed(_) => "ok".to_string(),
        Outcome::Failed(e) => format!("failed: {}", e),
    }
}
