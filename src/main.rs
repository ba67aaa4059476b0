//! Repo Mirror - keep a local, paged copy of a remote repository listing.
//!
//! Fetches pages of repositories from the configured endpoint, merges them
//! into a local `SQLite` mirror and shows windows of the mirrored listing.
//!
//! Quick start:
//!   repo-mirror init-config             # Write ~/.repo-mirror/config.toml
//!   repo-mirror sync                    # Refresh from the first page
//!   repo-mirror sync --page 2           # Fetch the next page
//!   repo-mirror list --limit 10         # Show the first 10 mirrored repos
//!   repo-mirror list --no-forks -f json # Sources only, as JSON

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repo_mirror::application::{
    format_repos_json, format_stats, format_window_table, OutputFormat, PagedView, SyncFacade,
};
use repo_mirror::cli::{Cli, Commands};
use repo_mirror::domain::{self, AppConfig, FetchOutcome, PageRequest, RepoFilter};
use repo_mirror::infrastructure::{
    config_file_path, ensure_config_exists, load_config, load_config_from_file, HttpRepoFetcher,
    RepoStore,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(cli: Cli) -> domain::Result<()> {
    let format = cli.output_format()?;

    if matches!(cli.command, Commands::InitConfig) {
        return cmd_init_config(cli.config);
    }

    let config = match &cli.config {
        Some(path) => load_config_from_file(path)?,
        None => load_config()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Sync { page } => cmd_sync(&config, page).await?,
        Commands::List {
            offset,
            limit,
            no_forks,
        } => cmd_list(&config, offset, limit, no_forks, format)?,
        Commands::Stats => cmd_stats(&config)?,
        Commands::Clear => cmd_clear(&config)?,
        Commands::Paths => cmd_paths(&config),
        Commands::InitConfig => {}
    }

    Ok(())
}

/// Fetch one remote page and merge it.
async fn cmd_sync(config: &AppConfig, page: u32) -> domain::Result<()> {
    let store = RepoStore::open(&config.storage_db_path())?;
    let fetcher = HttpRepoFetcher::new(&config.remote)?;
    let facade = SyncFacade::new(store, fetcher, config)?;

    let request = if page <= 1 {
        facade.refresh()
    } else {
        facade
            .coordinator()
            .request_sync(PageRequest::new(page, config.sync.per_page))
    };

    match request.wait().await {
        Some(FetchOutcome::Success(items)) => {
            println!(
                "{} Merged {} repositories from page {}",
                "✓".green().bold(),
                items.len(),
                page.max(1)
            );
        }
        Some(FetchOutcome::Failure(failure)) => {
            println!("{} Sync failed: {}", "✗".red().bold(), failure);
        }
        None => {}
    }

    let store = facade.store();
    println!();
    println!(
        "{}",
        format_stats(
            store.count()?,
            store.count_filtered(RepoFilter::Fork(false))?,
            store.storage_size()?,
            &facade.sync_state(),
        )
    );

    Ok(())
}

/// Show a window of the mirror.
fn cmd_list(
    config: &AppConfig,
    offset: usize,
    limit: usize,
    no_forks: bool,
    format: OutputFormat,
) -> domain::Result<()> {
    let store = RepoStore::open(&config.storage_db_path())?;
    let filter = if no_forks {
        RepoFilter::Fork(false)
    } else {
        RepoFilter::All
    };

    let view = PagedView::new(store, filter, config.paging)?;
    let window = view.get_window(offset, limit)?;

    match format {
        OutputFormat::Table => {
            println!("{}", format_window_table(&window));
            println!(
                "Showing {}-{} of {}",
                window.start + 1,
                window.end(),
                window.total
            );
        }
        OutputFormat::Json => {
            let repos: Vec<_> = window.records().cloned().collect();
            println!(
                "{}",
                format_repos_json(&repos).map_err(domain::AppError::json_parse)?
            );
        }
    }

    Ok(())
}

/// Show statistics command.
fn cmd_stats(config: &AppConfig) -> domain::Result<()> {
    let store = RepoStore::open(&config.storage_db_path())?;

    println!(
        "{}",
        format_stats(
            store.count()?,
            store.count_filtered(RepoFilter::Fork(false))?,
            store.storage_size()?,
            &domain::SyncState::default(),
        )
    );

    Ok(())
}

/// Clear the local mirror.
fn cmd_clear(config: &AppConfig) -> domain::Result<()> {
    let store = RepoStore::open(&config.storage_db_path())?;
    let removed = store.clear()?;

    println!("{} Removed {} repositories", "✓".green().bold(), removed);

    Ok(())
}

/// Show paths command.
fn cmd_paths(config: &AppConfig) {
    println!("{}", "📂 Repo Mirror Paths".bold());
    println!();
    println!("  Data dir:  {}", config.data_dir().display());
    println!("  Database:  {}", config.storage_db_path().display());
    println!("  Config:    {}", config.config_file_path().display());
    println!("  Remote:    {}", config.remote.repos_url);
}

/// Write the default configuration file.
fn cmd_init_config(path: Option<std::path::PathBuf>) -> domain::Result<()> {
    let path = path.unwrap_or_else(config_file_path);

    if ensure_config_exists(&path)? {
        println!("{} Created {}", "✓".green().bold(), path.display());
    } else {
        println!("Configuration already exists at {}", path.display());
    }

    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
