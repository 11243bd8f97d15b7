//! Configuration loading
//!
//! Resolution order (highest priority first):
//! 1. Explicit config file passed on the command line (or via environment)
//! 2. `config.toml` in the working directory, layered over `config-portable.toml`
//! 3. `<user config dir>/jukebox/config.toml`
//! 4. Compiled defaults
//!
//! Files are layered key-by-key, so a file only needs the keys it changes.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Portable config shipped next to the binary
pub const PORTABLE_CONFIG_FILE: &str = "config-portable.toml";

/// Local config overriding the portable one
pub const LOCAL_CONFIG_FILE: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file
    pub db_file: PathBuf,
    /// Player executable
    pub mpv_path: String,
    /// Metadata resolver executable
    pub yt_dlp_path: String,
    /// Screen the player goes fullscreen on
    pub screen_number: u32,
    /// IPC socket (or named pipe) path; platform default when unset
    pub ipc_path: Option<PathBuf>,
    /// Active entries allowed per non-privileged user
    pub user_limit: i64,
    /// Users treated as privileged by the HTTP surface
    pub admin_users: Vec<String>,
    /// Let users swap their own entries
    pub allow_self_swap: bool,
    /// HTTP listen address
    pub bind_addr: String,
    /// Where preview/loading images are written
    pub temp_dir: PathBuf,
    /// Image copied to the preview path when staging
    pub preview_template: PathBuf,
    /// Image copied to the loading path when staging
    pub loading_template: PathBuf,
    /// Start gate timeout, in seconds
    pub playback_timeout_secs: u64,
    pub idle_poll_ms: u64,
    pub unpause_poll_ms: u64,
    pub countdown_ms: u64,
    pub finish_poll_ms: u64,
    /// Upcoming entries handed to the asset renderer
    pub upcoming_count: i64,
    /// OSD font size while the countdown is shown
    pub osd_font_size: i64,
    pub socket_connect_retries: u32,
    pub socket_retry_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from("queue.sqlite"),
            mpv_path: "mpv".to_string(),
            yt_dlp_path: "yt-dlp".to_string(),
            screen_number: 0,
            ipc_path: None,
            user_limit: 1,
            admin_users: Vec::new(),
            allow_self_swap: false,
            bind_addr: "127.0.0.1:5780".to_string(),
            temp_dir: PathBuf::from("temp"),
            preview_template: PathBuf::from("assets/preview.jpg"),
            loading_template: PathBuf::from("assets/loading.jpg"),
            playback_timeout_secs: 60,
            idle_poll_ms: 1000,
            unpause_poll_ms: 200,
            countdown_ms: 250,
            finish_poll_ms: 200,
            upcoming_count: 10,
            osd_font_size: 24,
            socket_connect_retries: 5,
            socket_retry_delay_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration following the documented resolution order
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading config from {}", path.display());
            let overlay = read_table(path)?;
            return Self::layered(&[overlay]);
        }

        let mut layers = Vec::new();
        for name in [PORTABLE_CONFIG_FILE, LOCAL_CONFIG_FILE] {
            let path = Path::new(name);
            if path.exists() {
                info!("Loading config from {}", path.display());
                layers.push(read_table(path)?);
            }
        }

        if layers.is_empty() {
            if let Some(path) = user_config_file().filter(|p| p.exists()) {
                info!("Loading config from {}", path.display());
                layers.push(read_table(&path)?);
            } else {
                debug!("No config file found, using defaults");
            }
        }

        Self::layered(&layers)
    }

    /// Apply TOML layers in order over the compiled defaults
    pub fn layered(layers: &[toml::Table]) -> Result<Self> {
        let mut base = match toml::Value::try_from(Self::default()) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(Error::Config("Defaults are not a table".to_string())),
            Err(e) => return Err(Error::Config(format!("Failed to serialize defaults: {}", e))),
        };
        for layer in layers {
            merge_tables(&mut base, layer.clone());
        }
        let config: Self = toml::Value::Table(base)
            .try_into()
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.playback_timeout_secs == 0 {
            return Err(Error::Config("playback_timeout_secs must be > 0".to_string()));
        }
        if self.socket_connect_retries == 0 {
            return Err(Error::Config("socket_connect_retries must be > 0".to_string()));
        }
        if self.upcoming_count < 0 {
            return Err(Error::Config("upcoming_count must be >= 0".to_string()));
        }
        Ok(())
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_secs)
    }

    /// IPC endpoint, falling back to the platform default
    pub fn ipc_path(&self) -> PathBuf {
        self.ipc_path.clone().unwrap_or_else(default_ipc_path)
    }

    pub fn preview_path(&self) -> PathBuf {
        self.temp_dir.join("preview.jpg")
    }

    pub fn loading_path(&self) -> PathBuf {
        self.temp_dir.join("loading.jpg")
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.iter().any(|u| u == user_id)
    }
}

/// Platform default IPC endpoint
pub fn default_ipc_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from(r"\\.\pipe\mpvsocket")
    } else {
        PathBuf::from("/tmp/mpvsocket")
    }
}

fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("jukebox").join("config.toml"))
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Recursively overlay `overlay` onto `base`
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.db_file, PathBuf::from("queue.sqlite"));
        assert_eq!(config.user_limit, 1);
        assert_eq!(config.playback_timeout(), Duration::from_secs(60));
        assert!(!config.allow_self_swap);
    }

    #[test]
    fn test_merge_tables_keeps_untouched_keys() {
        let mut base: toml::Table = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Table = toml::from_str("b = 3").unwrap();
        merge_tables(&mut base, overlay);
        assert_eq!(base["a"].as_integer(), Some(1));
        assert_eq!(base["b"].as_integer(), Some(3));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let layer: toml::Table = toml::from_str("playback_timeout_secs = 0").unwrap();
        assert!(matches!(AppConfig::layered(&[layer]), Err(Error::Config(_))));
    }
}
