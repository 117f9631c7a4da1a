use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;
use uartcam::CamResult;
use uartcam::config::Settings;
use uartcam::supervisor::SystemSupervisor;

#[derive(Parser)]
#[command(name = "uartcam")]
#[command(about = "UART-controlled USB camera recording service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recording service
    Run {
        /// Path to the configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Path to the configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> CamResult<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        std::process::exit(1);
    }

    if cli.debug {
        debug!("Debug mode enabled");
    }

    match cli.command {
        Commands::Run { config } => run_service(config.as_deref()).await,
        Commands::Config { action } => handle_config_command(action),
    }
}

async fn run_service(config_path: Option<&std::path::Path>) -> CamResult<()> {
    info!("uartcam starting up");
    let settings = Settings::load(config_path);

    let mut supervisor = SystemSupervisor::new(settings);
    if let Err(e) = supervisor.start().await {
        error!("Failed to start camera control system: {e}");
        std::process::exit(1);
    }

    supervisor.run().await;
    Ok(())
}

fn handle_config_command(action: ConfigAction) -> CamResult<()> {
    match action {
        ConfigAction::Show { config } => {
            let settings = Settings::load(config.as_deref());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}
