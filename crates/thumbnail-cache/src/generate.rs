//! Thumbnail generation with strategy fallback and rotation correction
//!
//! The primary strategy decodes a frame in-process at a sampled position.
//! When it yields nothing for an item, the item's fingerprint is remembered
//! and every later request for it goes straight to the platform chain
//! (local files only). Successful output is rotated according to the
//! container's orientation tag.

use crate::key::MediaItem;
use crate::source::ThumbnailSources;
use dashmap::DashSet;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use std::fmt;
use tracing::debug;

/// Local clips shorter than this are sampled from their first frame
const SHORT_CLIP_MS: i64 = 20_000;
const LOCAL_SAMPLE_SECS: f64 = 3.0;
const REMOTE_SAMPLE_SECS: f64 = 2.0;
/// Remote seeks stay this far before the reported end
const REMOTE_END_MARGIN_SECS: f64 = 0.1;

/// One way of producing a thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// In-process frame decode at the sample position
    NativeFrame,
    /// Platform provider, current API
    PlatformModern,
    /// Platform provider, legacy API
    PlatformLegacy,
    /// Platform frame retrieval straight from the file
    PlatformRetriever,
}

/// Platform chain in the order it is tried
pub const FALLBACK_CHAIN: [ExtractionStrategy; 3] = [
    ExtractionStrategy::PlatformModern,
    ExtractionStrategy::PlatformLegacy,
    ExtractionStrategy::PlatformRetriever,
];

impl ExtractionStrategy {
    /// Run this strategy once. Errors are logged and reported as `None`.
    pub async fn attempt(
        self,
        sources: &ThumbnailSources,
        item: &MediaItem,
        dimension: u32,
    ) -> Option<DynamicImage> {
        let result = match self {
            ExtractionStrategy::NativeFrame => {
                sources
                    .frames
                    .extract_frame(&item.path, sample_position_secs(item), dimension)
                    .await
            }
            ExtractionStrategy::PlatformModern => sources.platform.modern(item, dimension).await,
            ExtractionStrategy::PlatformLegacy => sources.platform.legacy(item).await,
            ExtractionStrategy::PlatformRetriever => {
                sources.platform.retrieve_frame(item, dimension).await
            }
        };

        match result {
            Ok(Some(img)) => Some(img),
            Ok(None) => {
                debug!(strategy = %self, path = %item.path, "no thumbnail produced");
                None
            }
            Err(e) => {
                debug!(
                    strategy = %self,
                    path = %item.path,
                    error = %e,
                    "thumbnail strategy failed"
                );
                None
            }
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStrategy::NativeFrame => write!(f, "native-frame"),
            ExtractionStrategy::PlatformModern => write!(f, "platform-modern"),
            ExtractionStrategy::PlatformLegacy => write!(f, "platform-legacy"),
            ExtractionStrategy::PlatformRetriever => write!(f, "platform-retriever"),
        }
    }
}

/// Seek position for the primary strategy. Skips dark intros without
/// seeking past short clips or streams of unknown length.
pub fn sample_position_secs(item: &MediaItem) -> f64 {
    if item.is_remote() {
        if item.duration_ms > 0 {
            let last = (item.duration_ms as f64 / 1000.0 - REMOTE_END_MARGIN_SECS).max(0.0);
            REMOTE_SAMPLE_SECS.clamp(0.0, last)
        } else {
            REMOTE_SAMPLE_SECS
        }
    } else if item.duration_ms < SHORT_CLIP_MS {
        0.0
    } else {
        LOCAL_SAMPLE_SECS
    }
}

/// Produces thumbnails and remembers which items the primary strategy fails on.
pub struct GenerationEngine {
    sources: ThumbnailSources,
    /// Fingerprints whose primary extraction already failed
    primary_failed: DashSet<String>,
}

impl GenerationEngine {
    pub fn new(sources: ThumbnailSources) -> Self {
        Self {
            sources,
            primary_failed: DashSet::new(),
        }
    }

    /// Generate a thumbnail bounded by `dimension`. `None` means every
    /// applicable strategy came up empty.
    pub async fn generate(&self, item: &MediaItem, dimension: u32) -> Option<DynamicImage> {
        let fingerprint = item.fingerprint();
        let mut result = None;

        if !self.primary_failed.contains(&fingerprint) {
            result = ExtractionStrategy::NativeFrame
                .attempt(&self.sources, item, dimension)
                .await;
            if result.is_none() {
                self.primary_failed.insert(fingerprint);
            }
        }

        if result.is_none() && !item.is_remote() {
            for strategy in FALLBACK_CHAIN {
                result = strategy.attempt(&self.sources, item, dimension).await;
                if result.is_some() {
                    break;
                }
            }
        }

        let img = result?;
        let degrees = match self.sources.rotation.rotation_degrees(&item.path).await {
            Ok(degrees) => degrees,
            Err(e) => {
                debug!(path = %item.path, error = %e, "rotation unavailable, assuming 0");
                0
            }
        };
        Some(apply_rotation(img, degrees))
    }

    /// Whether the primary strategy is skipped for this item.
    pub fn primary_disabled(&self, item: &MediaItem) -> bool {
        self.primary_failed.contains(&item.fingerprint())
    }

    /// Forget every remembered primary failure.
    pub fn reset(&self) {
        self.primary_failed.clear();
    }
}

impl fmt::Debug for GenerationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationEngine")
            .field("primary_failed", &self.primary_failed.len())
            .finish()
    }
}

/// Rotate clockwise by a quarter-turn multiple; other angles are ignored.
pub fn apply_rotation(img: DynamicImage, degrees: u32) -> DynamicImage {
    match degrees % 360 {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

/// Shrink to fit within `max_width` x `max_height` preserving aspect ratio.
/// Never upscales.
pub fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if max_width == 0 || max_height == 0 || (width <= max_width && height <= max_height) {
        return img;
    }

    let ratio = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);

    img.resize_exact(new_width, new_height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::local_item;
    use crate::testing::MockSources;
    use image::{GenericImageView, Rgba};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_local_sample_position() {
        let mut item = local_item(1, "/v/a.mp4", 10);
        item.duration_ms = 60_000;
        assert_eq!(sample_position_secs(&item), 3.0);
        item.duration_ms = 19_999;
        assert_eq!(sample_position_secs(&item), 0.0);
        item.duration_ms = 20_000;
        assert_eq!(sample_position_secs(&item), 3.0);
        item.duration_ms = 0;
        assert_eq!(sample_position_secs(&item), 0.0);
    }

    #[test]
    fn test_remote_sample_position() {
        let mut item = local_item(1, "https://cdn/v.mp4", 0);
        item.duration_ms = 0;
        assert_eq!(sample_position_secs(&item), 2.0);
        item.duration_ms = 60_000;
        assert_eq!(sample_position_secs(&item), 2.0);
        item.duration_ms = 1_500;
        assert!((sample_position_secs(&item) - 1.4).abs() < 1e-9);
        item.duration_ms = 50;
        assert_eq!(sample_position_secs(&item), 0.0);
    }

    #[test]
    fn test_apply_rotation() {
        let img = DynamicImage::new_rgb8(40, 20);
        assert_eq!(apply_rotation(img.clone(), 0).dimensions(), (40, 20));
        assert_eq!(apply_rotation(img.clone(), 90).dimensions(), (20, 40));
        assert_eq!(apply_rotation(img.clone(), 180).dimensions(), (40, 20));
        assert_eq!(apply_rotation(img.clone(), 270).dimensions(), (20, 40));

        let mut marked = DynamicImage::new_rgba8(2, 1);
        marked.as_mut_rgba8().unwrap().put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let rotated = apply_rotation(marked, 90);
        // top-left moves to top-right on a clockwise quarter turn
        assert_eq!(rotated.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_fit_within() {
        let img = DynamicImage::new_rgb8(1000, 800);
        let resized = fit_within(img, 300, 300);
        assert_eq!(resized.dimensions(), (300, 240));

        let tall = DynamicImage::new_rgb8(400, 1000);
        assert_eq!(fit_within(tall, 320, 180).dimensions(), (72, 180));

        let small = DynamicImage::new_rgb8(100, 80);
        assert_eq!(fit_within(small, 300, 300).dimensions(), (100, 80));
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let mock = MockSources::new();
        let engine = GenerationEngine::new(mock.sources());
        let item = local_item(1, "/v/a.mp4", 10);

        let img = engine.generate(&item, 64).await.expect("thumbnail");
        assert_eq!(img.dimensions(), (64, 36));
        assert_eq!(mock.frames.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.platform.total_calls(), 0);
        assert!(!engine.primary_disabled(&item));
    }

    #[tokio::test]
    async fn test_fallback_chain_order() {
        let mock = MockSources::new();
        mock.frames.fail.store(true, Ordering::SeqCst);
        mock.platform.modern_errors.store(true, Ordering::SeqCst);
        mock.platform.legacy_empty.store(true, Ordering::SeqCst);
        let engine = GenerationEngine::new(mock.sources());
        let item = local_item(1, "/v/a.mp4", 10);

        let img = engine.generate(&item, 64).await;
        assert!(img.is_some());
        assert_eq!(mock.platform.modern_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.platform.legacy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.platform.retriever_calls.load(Ordering::SeqCst), 1);
        assert!(engine.primary_disabled(&item));
    }

    #[tokio::test]
    async fn test_remote_never_uses_platform() {
        let mock = MockSources::new();
        mock.frames.fail.store(true, Ordering::SeqCst);
        let engine = GenerationEngine::new(mock.sources());
        let item = local_item(1, "rtsp://camera/live", 0);

        assert!(engine.generate(&item, 64).await.is_none());
        assert_eq!(mock.platform.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_fingerprint_skips_primary() {
        let mock = MockSources::new();
        mock.frames.fail.store(true, Ordering::SeqCst);
        let engine = GenerationEngine::new(mock.sources());
        let item = local_item(1, "/v/a.mp4", 10);

        engine.generate(&item, 64).await;
        mock.frames.fail.store(false, Ordering::SeqCst);
        engine.generate(&item, 128).await;
        assert_eq!(mock.frames.calls.load(Ordering::SeqCst), 1);

        engine.reset();
        engine.generate(&item, 64).await;
        assert_eq!(mock.frames.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rotation_applied_and_errors_ignored() {
        let mock = MockSources::new();
        mock.rotation.degrees.store(90, Ordering::SeqCst);
        let engine = GenerationEngine::new(mock.sources());
        let item = local_item(1, "/v/a.mp4", 10);
        assert_eq!(engine.generate(&item, 64).await.unwrap().dimensions(), (36, 64));

        mock.rotation.fail.store(true, Ordering::SeqCst);
        assert_eq!(engine.generate(&item, 64).await.unwrap().dimensions(), (64, 36));
    }
}
