mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::queue_handlers;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gdprq")]
#[command(version = "0.1.0")]
#[command(about = "Resumable GDPR download and deletion queues")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Path to configuration file (default: <config dir>/gdprq/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a queue from its first action
    ///
    /// Runs until the queue finishes or needs the browser to visit the
    /// authorization server. Redirects back into the application are
    /// followed automatically.
    ///
    /// Examples:
    ///   gdprq start downloadProfile
    ///   gdprq start removeServiceConnection --service berth
    Start {
        /// Queue name (downloadProfile, deleteProfile, removeServiceConnection)
        queue: String,

        /// Service to remove (removeServiceConnection only)
        #[arg(short, long)]
        service: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Continue a stored queue on a page load
    ///
    /// Example:
    ///   gdprq resume downloadProfile --url "http://localhost:3000/gdpr-callback?code=...&state=..."
    Resume {
        /// Queue name
        queue: String,

        /// URL of the page being loaded, usually the authorization callback
        #[arg(short, long)]
        url: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the stored state of a queue
    Status {
        /// Queue name
        queue: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Discard the stored state of a queue
    Reset {
        /// Queue name
        queue: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List the available queues and their actions
    Queues {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file with default values
    Config {
        /// Create the file (existing values are kept)
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Start {
            queue,
            service,
            json,
        } => {
            queue_handlers::handle_start(config, queue, service, json).await?;
        }
        Commands::Resume { queue, url, json } => {
            queue_handlers::handle_resume(config, queue, url, json).await?;
        }
        Commands::Status { queue, json } => {
            queue_handlers::handle_status(config, queue, json)?;
        }
        Commands::Reset { queue, json } => {
            queue_handlers::handle_reset(config, queue, json)?;
        }
        Commands::Queues { json } => {
            queue_handlers::handle_queues(config, json)?;
        }
        Commands::Config { init } => {
            if init {
                queue_handlers::handle_config_init(config)?;
            } else {
                println!("Config command requires --init flag");
                println!("Usage: gdprq config --init [--config PATH]");
            }
        }
    }

    Ok(())
}
