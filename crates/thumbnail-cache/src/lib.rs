//! Video thumbnail generation and caching for reelthumbs
//!
//! This crate turns media catalog entries into small decoded images for grid
//! and list views. Lookups go through a memory LRU tier, then a persistent
//! disk tier, and only then to generation, with at most one generation per
//! key in flight. Folder-level prefetch warms the tiers in the background.
//!
//! # Features
//!
//! - **Metadata keys**: size/mtime/duration fingerprints for local files, locators for streams
//! - **Dual caching**: Cost-bounded in-memory LRU + one canonical JPEG per item on disk
//! - **Single-flight generation**: Concurrent requests for a key share one computation
//! - **Strategy fallback**: In-process frame decode first, platform thumbnails after
//! - **Folder prefetch**: Resumable background warming, bounded to a few folders at once
//! - **Ready notifications**: Broadcast of keys that just became available

pub mod cache;
pub mod disk;
pub mod generate;
pub mod key;
pub mod lru;
pub mod memory;
pub mod prefetch;
pub mod source;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, ThumbnailRepository};
pub use disk::DiskStore;
pub use generate::{ExtractionStrategy, GenerationEngine};
pub use key::{disk_cache_key, folder_signature, thumbnail_key, CacheKey, MediaItem};
pub use lru::LruCache;
pub use memory::MemoryStore;
pub use source::{FrameExtractor, PlatformThumbnails, RotationReader, ThumbnailSources};

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A decoded thumbnail, shared between the memory tier and every caller
pub type Thumbnail = Arc<DynamicImage>;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "REELTHUMBS_";

/// Runtime configuration for the thumbnail pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub cache_dir: PathBuf,
    /// Square bound of the single on-disk rendition
    pub disk_dimension: u32,
    pub jpeg_quality: u8,
    /// Memory tier gets one sixth of this
    pub max_heap_bytes: u64,
    pub max_folder_jobs: usize,
    pub ready_channel_capacity: usize,
    /// Whether thumbnails are produced for network streams at all
    pub network_thumbnails: bool,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub exiftool_path: PathBuf,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            disk_dimension: 512,
            jpeg_quality: 100,
            max_heap_bytes: 1024 * 1024 * 1024, // 1GB
            max_folder_jobs: 3,
            ready_channel_capacity: 64,
            network_thumbnails: true,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            exiftool_path: PathBuf::from("exiftool"),
        }
    }
}

impl ThumbnailConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Apply `REELTHUMBS_*` environment overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}{}: {:?}", ENV_PREFIX, name, value))
        }

        if let Some(v) = var("CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = var("DISK_DIMENSION") {
            self.disk_dimension = parse("DISK_DIMENSION", v)?;
        }
        if let Some(v) = var("JPEG_QUALITY") {
            self.jpeg_quality = parse("JPEG_QUALITY", v)?;
        }
        if let Some(v) = var("MAX_HEAP_BYTES") {
            self.max_heap_bytes = parse("MAX_HEAP_BYTES", v)?;
        }
        if let Some(v) = var("MAX_FOLDER_JOBS") {
            self.max_folder_jobs = parse("MAX_FOLDER_JOBS", v)?;
        }
        if let Some(v) = var("READY_CHANNEL_CAPACITY") {
            self.ready_channel_capacity = parse("READY_CHANNEL_CAPACITY", v)?;
        }
        if let Some(v) = var("NETWORK_THUMBNAILS") {
            self.network_thumbnails = parse("NETWORK_THUMBNAILS", v)?;
        }
        if let Some(v) = var("FFMPEG") {
            self.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = var("FFPROBE") {
            self.ffprobe_path = PathBuf::from(v);
        }
        if let Some(v) = var("EXIFTOOL") {
            self.exiftool_path = PathBuf::from(v);
        }
        Ok(self)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reelthumbs")
        .join("thumbnails")
}
