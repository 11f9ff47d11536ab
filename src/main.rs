//! # Pulse Relay CLI (`pulse`)
//!
//! ## Usage
//!
//! ```bash
//! pulse --config ./config/pulse.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pulse serve` | Start the HTTP server |
//! | `pulse extract <path>` | Print the text extracted from a local file |
//!
//! Secrets come from the environment (or a `.env` file): the upstream API key
//! variable named by `upstream.api_key_env` and the SMTP passwords named by
//! `mail.*.password_env`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pulse_relay::config;
use pulse_relay::extract::extract_text;
use pulse_relay::models::MediaType;
use pulse_relay::server;

/// Pulse Relay: document-context chat relay and form mailer.
#[derive(Parser)]
#[command(name = "pulse", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pulse.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/pulse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Refuses to start when the upstream API key is not set.
    Serve,

    /// Extract text from a local file and print it.
    ///
    /// Runs the same extraction used for uploads. Handy for checking how a
    /// document will look to the model.
    Extract {
        /// File to extract.
        path: PathBuf,

        /// Declared media type. Inferred from the extension when omitted.
        #[arg(long)]
        media_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_relay=info,pulse=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Extract { path, media_type } => {
            run_extract(&path, media_type.as_deref()).await?;
        }
    }

    Ok(())
}

async fn run_extract(path: &std::path::Path, media_type: Option<&str>) -> Result<()> {
    let declared = match media_type {
        Some(m) => m.to_string(),
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaType::mime_for_extension)
            .with_context(|| {
                format!(
                    "cannot infer media type of {}; pass --media-type",
                    path.display()
                )
            })?
            .to_string(),
    };
    let media_type = MediaType::from_mime(&declared).map_err(|e| anyhow::anyhow!("{}", e))?;

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let size = bytes.len();
    let text = tokio::task::spawn_blocking(move || extract_text(bytes, media_type)).await??;

    println!("{}", text);
    eprintln!(
        "extracted {} chars from {} ({} bytes, {})",
        text.chars().count(),
        path.display(),
        size,
        media_type
    );
    Ok(())
}
