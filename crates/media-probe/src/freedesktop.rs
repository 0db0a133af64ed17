//! Lookup in the freedesktop.org shared thumbnail cache
//!
//! File managers already render thumbnails for local videos into
//! `$XDG_CACHE_HOME/thumbnails/{large,normal}/<md5(file uri)>.png`. Reusing
//! them is far cheaper than decoding the video again.

use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use url::Url;

/// Size buckets of the shared cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedThumbnailSize {
    /// 128px
    Normal,
    /// 256px
    Large,
}

impl SharedThumbnailSize {
    pub fn directory_name(&self) -> &'static str {
        match self {
            SharedThumbnailSize::Normal => "normal",
            SharedThumbnailSize::Large => "large",
        }
    }
}

/// Reader over an existing shared thumbnail directory
#[derive(Debug, Clone)]
pub struct FreedesktopThumbnails {
    root: Option<PathBuf>,
}

impl Default for FreedesktopThumbnails {
    fn default() -> Self {
        let root = std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .or_else(dirs::cache_dir)
            .map(|cache| cache.join("thumbnails"));
        Self { root }
    }
}

impl FreedesktopThumbnails {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }

    /// Path the shared cache would use for `file`, if it can be expressed as a URI.
    pub fn thumbnail_path(&self, file: &Path, size: SharedThumbnailSize) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let uri = Url::from_file_path(file).ok()?;
        let digest = md5::compute(uri.as_str().as_bytes());
        Some(
            root.join(size.directory_name())
                .join(format!("{:x}.png", digest)),
        )
    }

    /// Load the shared thumbnail for `file`. `Ok(None)` when none exists.
    pub async fn load(
        &self,
        file: &Path,
        size: SharedThumbnailSize,
    ) -> Result<Option<DynamicImage>> {
        let Some(path) = self.thumbnail_path(file, size) else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read shared thumbnail {}", path.display()))
            }
        };
        let img = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode shared thumbnail {}", path.display()))?;
        Ok(Some(img))
    }
}
