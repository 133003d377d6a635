//! CLI for the yadl audio download manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use yadl_core::config;

use commands::{run_batch, run_clear, run_completions, run_config, run_status};

/// Top-level CLI for the yadl audio download manager.
#[derive(Debug, Parser)]
#[command(name = "yadl")]
#[command(about = "yadl: batch YouTube audio downloader with durable resume", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Process a source list: download audio for every URL in the file.
    Run {
        /// Text file with one video/playlist URL per line.
        file: PathBuf,

        /// Output directory for audio files (default: ~/Music, else cwd).
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Target audio format (mp3, m4a, opus, flac, wav, vorbis).
        #[arg(short, long, value_name = "FMT")]
        format: Option<String>,

        /// Target audio quality in kbps.
        #[arg(short, long, value_name = "KBPS")]
        quality: Option<String>,

        /// Expand playlist URLs into one item per entry.
        #[arg(long)]
        playlist: bool,

        /// Download up to N items concurrently.
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,

        /// Continue an interrupted batch from its ledger.
        #[arg(long)]
        resume: bool,

        /// Discard any existing ledger for this file and start over.
        #[arg(long, conflicts_with = "resume")]
        fresh: bool,
    },

    /// Show every stored batch ledger and its per-state item counts.
    Status,

    /// Show the effective configuration and the path it was loaded from.
    Config,

    /// Delete the stored ledger for a source list.
    Clear {
        /// The source list the ledger was created from.
        file: PathBuf,
    },

    /// Generate shell completions to stdout.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Run {
                file,
                output_dir,
                format,
                quality,
                playlist,
                jobs,
                resume,
                fresh,
            } => {
                let mut cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                if let Some(dir) = output_dir {
                    cfg.output_dir = Some(dir);
                }
                if let Some(fmt) = format {
                    cfg.audio_format = fmt.parse()?;
                }
                if let Some(q) = quality {
                    cfg.audio_quality = q;
                }
                if playlist {
                    cfg.expand_playlists = true;
                }
                if let Some(n) = jobs {
                    cfg.max_concurrent_items = n;
                }
                run_batch(cfg, &file, resume, fresh).await?;
            }
            CliCommand::Status => run_status()?,
            CliCommand::Config => run_config()?,
            CliCommand::Clear { file } => run_clear(&file)?,
            CliCommand::Completions { shell } => run_completions(shell),
        }

        Ok(())
    }
}
