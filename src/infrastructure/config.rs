//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files.

use std::fs;
use std::path::Path;

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# repo-mirror configuration
# Auto-generated - edit as needed

[remote]
# Listing endpoint; page and per_page are appended as query parameters
repos_url = "https://api.github.com/orgs/rust-lang/repos"

# Optional API token (sent as a bearer token)
# token = "ghp_..."

# Request timeout in seconds
timeout_secs = 30

[sync]
# Remote page size
per_page = 30

# Fetch the next remote page when the view reaches the end of local data
fetch_on_end = true

[paging]
# Rows per local page
page_size = 20

# Rows loaded ahead of the requested window
prefetch_distance = 20

# Rows loaded around the anchor when the view is rebuilt
initial_load_size = 60

# Maximum resident pages (0 = unbounded)
max_loaded_pages = 16

[paths]
# Custom data directory (optional, defaults to ~/.repo-mirror)
# data_dir = "/custom/path"
"#;

/// Load configuration from file or create default.
///
/// # Errors
/// Returns error if file exists but cannot be read, parsed or validated.
pub fn load_config() -> Result<AppConfig> {
    let config_path = config_file_path();

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read, parsed or validated.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })?;
    config.validate()?;

    Ok(config)
}

/// Create default configuration file if it doesn't exist.
///
/// Returns `true` when a new file was written.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %path.display(), "Created default configuration");

    Ok(true)
}

/// Get the path to the default configuration file.
#[must_use]
pub fn config_file_path() -> std::path::PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.sync.per_page, 30);
        assert_eq!(config.paging.page_size, 20);
        assert_eq!(config.paging.max_loaded_pages, 16);
        assert!(config.remote.token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialized_config_loads_back() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.data_dir = Some(dir.path().to_path_buf());
        config.sync.per_page = 50;
        fs::write(
            config.config_file_path(),
            toml::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let loaded = load_config_from_file(&config.config_file_path()).unwrap();

        assert_eq!(loaded.sync.per_page, 50);
        assert_eq!(loaded.paging, config.paging);
        assert_eq!(loaded.data_dir(), dir.path());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync]\nper_page = 10\n").unwrap();

        let config = load_config_from_file(&path).unwrap();

        assert_eq!(config.sync.per_page, 10);
        assert!(config.sync.fetch_on_end);
        assert_eq!(config.paging.prefetch_distance, 20);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[paging]\npage_size = 0\n").unwrap();

        assert!(matches!(
            load_config_from_file(&path),
            Err(AppError::Config { .. })
        ));
    }

    #[test]
    fn test_ensure_config_exists_writes_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        assert!(ensure_config_exists(&path).unwrap());
        assert!(!ensure_config_exists(&path).unwrap());
        assert!(load_config_from_file(&path).is_ok());
    }
}
