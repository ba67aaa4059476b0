//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::application::OutputFormat;
use crate::domain::{AppError, Result};

/// Repo Mirror - keep a local, paged copy of a remote repository listing.
#[derive(Parser, Debug)]
#[command(name = "repo-mirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format: table or json.
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Use this configuration file instead of the default one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a remote page and merge it into the local mirror.
    Sync {
        /// Remote page to fetch (1 refreshes from the start).
        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// Show a window of the local mirror.
    List {
        /// First position to show (0-based).
        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Number of rows to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Hide forked repositories.
        #[arg(long)]
        no_forks: bool,
    },

    /// Show statistics about the local mirror.
    Stats,

    /// Delete every locally stored repository.
    Clear,

    /// Show the paths being used.
    Paths,

    /// Write a default configuration file if none exists.
    InitConfig,
}

impl Cli {
    /// Parse the output format argument.
    ///
    /// # Errors
    /// Returns `AppError::InvalidData` for an unknown format name.
    pub fn output_format(&self) -> Result<OutputFormat> {
        self.format
            .parse::<OutputFormat>()
            .map_err(|message| AppError::InvalidData { message })
    }
}
