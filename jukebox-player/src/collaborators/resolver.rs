//! Metadata lookup for submitted URLs

use async_trait::async_trait;
use jukebox_common::db::Song;
use jukebox_common::{Error, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

/// Resolve a user-supplied URL into catalog metadata
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Canonical URL, title, duration (whole seconds) and thumbnail for `url`
    ///
    /// Not retried; a failure aborts the submission.
    async fn resolve(&self, url: &str) -> Result<Song>;
}

/// Resolver backed by the `yt-dlp` executable
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    executable: String,
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    webpage_url: String,
    duration: f64,
    thumbnail: String,
}

impl From<YtDlpInfo> for Song {
    fn from(info: YtDlpInfo) -> Self {
        Song {
            url: info.webpage_url,
            title: info.title,
            duration: info.duration.round() as i64,
            thumbnail: info.thumbnail,
        }
    }
}

impl YtDlpResolver {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl MetadataResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Result<Song> {
        debug!("Resolving {} with {}", url, self.executable);
        let output = Command::new(&self.executable)
            // `--` keeps a submitted "URL" like `--exec=..` from parsing as an option
            .args(["--print-json", "--no-playlist", "--skip-download", "--", url])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Resolver(format!("Failed to run {}: {}", self.executable, e)))?;

        if !output.status.success() {
            return Err(Error::Resolver(format!(
                "{} exited with {}: {}",
                self.executable,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let song = parse_info(&output.stdout)?;
        info!("Resolved {} to '{}' ({}s)", url, song.title, song.duration);
        Ok(song)
    }
}

/// Parse the first JSON document printed by `--print-json`
fn parse_info(stdout: &[u8]) -> Result<Song> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::Resolver("Resolver printed nothing".to_string()))?;
    let info: YtDlpInfo = serde_json::from_str(line)
        .map_err(|e| Error::Resolver(format!("Unexpected resolver output: {}", e)))?;
    Ok(info.into())
}
