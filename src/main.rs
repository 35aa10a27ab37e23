use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stashd::config;
use stashd::ObjectStoreClient;

mod cli;

#[derive(Parser)]
#[command(name = "stashd")]
#[command(version, about = "Client for S3-compatible object storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (falls back to environment variables)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Put {
        /// Local file to upload
        file: PathBuf,

        /// Destination object key
        key: String,

        /// Content type stored with the object
        #[arg(long, conflicts_with = "stream")]
        content_type: Option<String>,

        /// Treat the file as a stream of unknown length (multipart above 10 MiB,
        /// stored as application/octet-stream)
        #[arg(long)]
        stream: bool,
    },

    /// Download an object
    Get {
        /// Object key
        key: String,

        /// Output file (stdout when omitted)
        output: Option<PathBuf>,
    },

    /// Remove objects
    Rm {
        /// Object keys
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show object info
    Stat {
        /// Object key
        key: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether an object exists (exit status 1 when it does not)
    Exists {
        /// Object key
        key: String,
    },

    /// Print a presigned download URL
    Presign {
        /// Object key
        key: String,

        /// Lifetime in minutes (default 15, at most 60)
        #[arg(long)]
        minutes: Option<i64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Commands run one request at a time
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let exists = runtime.block_on(async_main(cli))?;
    if !exists {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns false only for `exists` on a missing key
async fn async_main(cli: Cli) -> Result<bool> {
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let storage = config
        .get_profile(cli.profile.as_deref())
        .context("No storage profile selected: pass --profile or set default_profile")?;

    let client = ObjectStoreClient::connect(storage).await?;

    match cli.command {
        Commands::Put {
            file,
            key,
            content_type,
            stream,
        } => {
            cli::commands::cmd_put(&client, &file, &key, content_type.as_deref(), stream).await?;
        }
        Commands::Get { key, output } => {
            cli::commands::cmd_get(&client, &key, output.as_deref()).await?;
        }
        Commands::Rm { keys } => {
            cli::commands::cmd_rm(&client, &keys).await?;
        }
        Commands::Stat { key, json } => {
            cli::commands::cmd_stat(&client, &key, json).await?;
        }
        Commands::Exists { key } => {
            return cli::commands::cmd_exists(&client, &key).await;
        }
        Commands::Presign { key, minutes } => {
            cli::commands::cmd_presign(&client, &key, minutes)?;
        }
    }

    Ok(true)
}
