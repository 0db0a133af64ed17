//! Collaborators the generation engine pulls pixels and metadata from
//!
//! Each trait is one external capability. Errors are allowed to escape the
//! implementations; the engine turns them into "no result" at the call site.

use crate::key::MediaItem;
use crate::ThumbnailConfig;
use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;
use media_probe::{
    ExiftoolRotation, FfmpegFrames, FrameRequest, FreedesktopThumbnails, SharedThumbnailSize,
};
use std::path::Path;
use std::sync::Arc;

/// In-process decode of one frame, the primary strategy.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Decode the frame at `position_secs`, scaled to fit a `dimension`
    /// square, using a software decoder.
    async fn extract_frame(
        &self,
        locator: &str,
        position_secs: f64,
        dimension: u32,
    ) -> Result<Option<DynamicImage>>;
}

/// Platform thumbnail services for local files, tried in declaration order.
#[async_trait]
pub trait PlatformThumbnails: Send + Sync {
    /// Current provider API
    async fn modern(&self, item: &MediaItem, dimension: u32) -> Result<Option<DynamicImage>>;

    /// Older provider API, fixed small size
    async fn legacy(&self, item: &MediaItem) -> Result<Option<DynamicImage>>;

    /// Direct frame retrieval from the file, last resort
    async fn retrieve_frame(
        &self,
        item: &MediaItem,
        dimension: u32,
    ) -> Result<Option<DynamicImage>>;
}

/// Container orientation metadata
#[async_trait]
pub trait RotationReader: Send + Sync {
    /// Clockwise degrees: 0, 90, 180 or 270
    async fn rotation_degrees(&self, locator: &str) -> Result<u32>;
}

/// Handles to every collaborator
#[derive(Clone)]
pub struct ThumbnailSources {
    pub frames: Arc<dyn FrameExtractor>,
    pub platform: Arc<dyn PlatformThumbnails>,
    pub rotation: Arc<dyn RotationReader>,
}

impl ThumbnailSources {
    /// ffmpeg, the freedesktop shared cache and exiftool, with tool paths from `config`.
    pub fn system(config: &ThumbnailConfig) -> Self {
        let ffmpeg = FfmpegFrames::new(&config.ffmpeg_path);
        Self {
            frames: Arc::new(ffmpeg.clone()),
            platform: Arc::new(DesktopPlatform {
                shared: FreedesktopThumbnails::default(),
                ffmpeg,
            }),
            rotation: Arc::new(ExiftoolRotation::new(&config.exiftool_path)),
        }
    }
}

impl std::fmt::Debug for ThumbnailSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailSources").finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrames {
    async fn extract_frame(
        &self,
        locator: &str,
        position_secs: f64,
        dimension: u32,
    ) -> Result<Option<DynamicImage>> {
        self.extract(&FrameRequest {
            locator,
            position_secs,
            dimension,
            software_only: true,
        })
        .await
    }
}

#[async_trait]
impl RotationReader for ExiftoolRotation {
    async fn rotation_degrees(&self, locator: &str) -> Result<u32> {
        ExiftoolRotation::rotation_degrees(self, locator).await
    }
}

/// Desktop stand-in for the platform provider: the shared thumbnail cache
/// (large, then normal) and an ffmpeg grab of the opening frame.
struct DesktopPlatform {
    shared: FreedesktopThumbnails,
    ffmpeg: FfmpegFrames,
}

#[async_trait]
impl PlatformThumbnails for DesktopPlatform {
    // Always the largest bucket; callers downscale to the requested size.
    async fn modern(&self, item: &MediaItem, _dimension: u32) -> Result<Option<DynamicImage>> {
        self.shared
            .load(Path::new(&item.path), SharedThumbnailSize::Large)
            .await
    }

    async fn legacy(&self, item: &MediaItem) -> Result<Option<DynamicImage>> {
        self.shared
            .load(Path::new(&item.path), SharedThumbnailSize::Normal)
            .await
    }

    async fn retrieve_frame(
        &self,
        item: &MediaItem,
        dimension: u32,
    ) -> Result<Option<DynamicImage>> {
        self.ffmpeg
            .extract(&FrameRequest {
                locator: &item.path,
                position_secs: 0.0,
                dimension,
                software_only: false,
            })
            .await
    }
}
