//! # Doc Relay CLI (`relay`)
//!
//! ## Usage
//!
//! ```bash
//! relay --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `relay ingest <ARCHIVE>` | Unpack a zip archive and send its documents to the remote index |
//! | `relay serve` | Start the HTTP API (uploads, audit log, undo) |
//!
//! ## Examples
//!
//! ```bash
//! # Show tiers, chunk counts and planned calls without sending anything
//! relay ingest papers.zip --collection research --doc-type paper --dry-run
//!
//! # Also print the start of every chunk
//! relay ingest papers.zip --collection research --doc-type paper --dry-run --preview
//!
//! # Send, recording the calls for user alice
//! relay ingest papers.zip --collection research --doc-type paper --user alice
//!
//! # Serve the HTTP API
//! relay serve --config ./config/relay.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use doc_relay::config;
use doc_relay::ingest;
use doc_relay::progress::ProgressMode;
use doc_relay::server;

/// Doc Relay CLI: chunk documents and push them to a remote semantic index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/relay.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "relay",
    about = "Doc Relay: chunk documents and push them to a remote semantic index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack a zip archive and dispatch every document in it.
    ///
    /// Small documents are sent as single concurrent calls. Medium and large
    /// documents are sent as ordered sub-batches with a pause in between.
    Ingest {
        /// Path to the zip archive.
        archive: PathBuf,

        /// Target collection in the remote index.
        #[arg(long)]
        collection: String,

        /// Document type label sent with every call.
        #[arg(long)]
        doc_type: String,

        /// User recorded in the audit log. Defaults to `[audit].default_user`.
        #[arg(long)]
        user: Option<String>,

        /// Show tiers, chunk counts and planned calls without calling the remote.
        #[arg(long)]
        dry_run: bool,

        /// With --dry-run, print the first 300 characters of every chunk.
        #[arg(long, requires = "dry_run")]
        preview: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("doc_relay=info,relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            archive,
            collection,
            doc_type,
            user,
            dry_run,
            preview,
            progress,
        } => {
            let progress = match progress.as_deref() {
                Some(mode) => ProgressMode::parse(mode).ok_or_else(|| {
                    anyhow::anyhow!("--progress must be off, human or json, got '{}'", mode)
                })?,
                None => ProgressMode::default_for_tty(),
            };
            // A dry run never calls the remote, so it works without a config
            // file. A config file that exists must still be valid.
            let cfg = if dry_run && !cli.config.exists() {
                config::Config::minimal()
            } else {
                config::load_config(&cli.config)?
            };
            ingest::run_ingest(
                &cfg,
                &archive,
                &collection,
                &doc_type,
                user.as_deref(),
                dry_run,
                preview,
                progress,
            )
            .await?;
        }
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
