//! Output formatting for mirrored repositories.
//!
//! Supports a table view for terminals and JSON for programmatic use.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::{RepoRecord, SyncState};

use super::paged_view::{PageWindow, WindowItem};

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Compact table listing.
    #[default]
    Table,
    /// JSON format for programmatic use.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: table, json")),
        }
    }
}

/// Formats a window as a table; placeholders show as an ellipsis row.
pub fn format_window_table(window: &PageWindow) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "ID", "Name", "Fork", "Stars", "Language", "Description"]);

    for (offset, item) in window.items.iter().enumerate() {
        let position = (window.start + offset + 1).to_string();
        match item {
            WindowItem::Loaded(repo) => {
                table.add_row(vec![
                    position,
                    repo.id.to_string(),
                    repo.name.clone(),
                    if repo.fork { "yes".into() } else { String::new() },
                    repo.stargazers_count.to_string(),
                    repo.language.clone().unwrap_or_default(),
                    truncate(repo.description_or_default(), 50),
                ]);
            }
            WindowItem::Placeholder => {
                table.add_row(vec![position, "…".into()]);
            }
        }
    }

    table.to_string()
}

/// Formats repositories as pretty JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_repos_json(repos: &[RepoRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(repos)
}

/// Formats store and sync statistics.
pub fn format_stats(total: usize, sources: usize, storage_bytes: u64, state: &SyncState) -> String {
    let mut out = String::new();

    out.push_str(&format!("{}\n", "📊 Mirror Statistics".bold()));
    out.push_str(&format!("   Repositories:  {}\n", total.to_string().cyan()));
    out.push_str(&format!("   Sources:       {sources}\n"));
    out.push_str(&format!("   Forks:         {}\n", total.saturating_sub(sources)));
    out.push_str(&format!("   Storage:       {}\n", format_bytes(storage_bytes)));
    out.push_str(&format!(
        "   Sync:          {}\n",
        if state.is_fetch_in_progress {
            "in progress".yellow()
        } else {
            "idle".green()
        }
    ));

    if let Some(err) = &state.last_error {
        out.push_str(&format!("   Last error:    {}\n", err.to_string().red()));
    }

    out
}

/// Truncates a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}

/// Format bytes as human readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
