//! Preview and loading images shown while an entry is staged

use async_trait::async_trait;
use jukebox_common::db::QueueEntry;
use jukebox_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the renderer writes its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    pub preview: PathBuf,
    pub loading: PathBuf,
}

#[async_trait]
pub trait AssetRenderer: Send + Sync {
    /// Write the preview image (current entry plus what follows) and the
    /// loading image for `current`. Completes before the files are used.
    async fn render(
        &self,
        current: &QueueEntry,
        upcoming: &[QueueEntry],
        paths: &AssetPaths,
    ) -> Result<()>;
}

/// Renderer that copies fixed template images into place
#[derive(Debug, Clone)]
pub struct StaticAssetRenderer {
    preview_template: PathBuf,
    loading_template: PathBuf,
}

impl StaticAssetRenderer {
    pub fn new(preview_template: impl Into<PathBuf>, loading_template: impl Into<PathBuf>) -> Self {
        Self {
            preview_template: preview_template.into(),
            loading_template: loading_template.into(),
        }
    }
}

async fn copy_into_place(template: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(template, target).await.map_err(|e| {
        Error::Internal(format!(
            "Failed to copy {} to {}: {}",
            template.display(),
            target.display(),
            e
        ))
    })?;
    Ok(())
}

#[async_trait]
impl AssetRenderer for StaticAssetRenderer {
    async fn render(
        &self,
        current: &QueueEntry,
        upcoming: &[QueueEntry],
        paths: &AssetPaths,
    ) -> Result<()> {
        debug!(
            "Rendering assets for {} ({} upcoming)",
            current.slug,
            upcoming.len()
        );
        copy_into_place(&self.preview_template, &paths.preview).await?;
        copy_into_place(&self.loading_template, &paths.loading).await?;
        Ok(())
    }
}
