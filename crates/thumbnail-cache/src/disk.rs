//! Persistent disk tier
//!
//! One JPEG per item at the canonical disk dimension, named by the 128-bit
//! digest of its disk cache key. Writes go through a temp file in the same
//! directory and are renamed into place, so readers never observe a partial
//! file.

use crate::key::{disk_cache_key, MediaItem};
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::{debug, warn};

/// In-progress writes; never counted as stored thumbnails
const TEMP_PREFIX: &str = ".tmp-";
const EXTENSION: &str = "jpg";

#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    disk_dimension: u32,
    quality: u8,
}

impl DiskStore {
    /// Directory creation is best effort; a store whose directory cannot be
    /// created simply misses on every load.
    pub fn new(dir: impl Into<PathBuf>, disk_dimension: u32, quality: u8) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "thumbnail disk cache unavailable");
        }
        Self {
            dir,
            disk_dimension,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn disk_dimension(&self) -> u32 {
        self.disk_dimension
    }

    /// Get the disk cache path for an item
    pub fn path_for(&self, item: &MediaItem) -> PathBuf {
        let key = disk_cache_key(item, self.disk_dimension);
        self.dir.join(format!("{}.{}", key.digest_hex(), EXTENSION))
    }

    /// Absent and undecodable files are both misses.
    pub fn load(&self, item: &MediaItem) -> Option<DynamicImage> {
        let path = self.path_for(item);
        if !path.is_file() {
            return None;
        }
        match decode_file(&path) {
            Ok(img) => Some(img),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "discarding unreadable disk thumbnail");
                None
            }
        }
    }

    /// Encode as JPEG and atomically replace the item's file.
    pub fn store(&self, item: &MediaItem, thumbnail: &DynamicImage) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;

        let path = self.path_for(item);
        let tmp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)
            .with_context(|| format!("Failed to create temp file in {}", self.dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            let encoder = JpegEncoder::new_with_quality(&mut writer, self.quality);
            DynamicImage::ImageRgb8(thumbnail.to_rgb8())
                .write_with_encoder(encoder)
                .context("Failed to encode JPEG")?;
            writer.flush()?;
        }
        tmp.persist(&path)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;
        Ok(())
    }

    /// Delete the item's file if present.
    pub fn remove(&self, item: &MediaItem) {
        let path = self.path_for(item);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove cached thumbnail");
            }
        }
    }

    /// Delete every file in the cache directory, including abandoned temp
    /// files. Returns how many thumbnails were removed.
    pub fn clear(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) if is_thumbnail_file(&path) => removed += 1,
                Ok(()) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove cached thumbnail")
                }
            }
        }
        removed
    }

    /// Completed thumbnails only
    pub fn file_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| {
                        let path = e.path();
                        path.is_file() && is_thumbnail_file(&path)
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

fn is_thumbnail_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == EXTENSION)
}

fn decode_file(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    Ok(img)
}
