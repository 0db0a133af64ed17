//! Scripted collaborators for pipeline tests

use crate::key::MediaItem;
use crate::source::{FrameExtractor, PlatformThumbnails, RotationReader, ThumbnailSources};
use crate::{ThumbnailConfig, ThumbnailRepository};
use anyhow::{bail, Result};
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// 16:9 frame fitted into a `dimension` square
fn frame(dimension: u32) -> DynamicImage {
    let height = (dimension * 9 / 16).max(1);
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(dimension, height, Rgba([200, 40, 40, 255])))
}

pub struct MockFrames {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
    gate: Semaphore,
}

#[async_trait]
impl FrameExtractor for MockFrames {
    async fn extract_frame(
        &self,
        _locator: &str,
        _position_secs: f64,
        dimension: u32,
    ) -> Result<Option<DynamicImage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(frame(dimension)))
    }
}

#[derive(Default)]
pub struct MockPlatform {
    pub modern_calls: AtomicUsize,
    pub legacy_calls: AtomicUsize,
    pub retriever_calls: AtomicUsize,
    pub modern_errors: AtomicBool,
    pub legacy_empty: AtomicBool,
    pub all_fail: AtomicBool,
}

impl MockPlatform {
    pub fn total_calls(&self) -> usize {
        self.modern_calls.load(Ordering::SeqCst)
            + self.legacy_calls.load(Ordering::SeqCst)
            + self.retriever_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformThumbnails for MockPlatform {
    async fn modern(&self, _item: &MediaItem, dimension: u32) -> Result<Option<DynamicImage>> {
        self.modern_calls.fetch_add(1, Ordering::SeqCst);
        if self.modern_errors.load(Ordering::SeqCst) {
            bail!("content provider unavailable");
        }
        if self.all_fail.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(frame(dimension)))
    }

    async fn legacy(&self, _item: &MediaItem) -> Result<Option<DynamicImage>> {
        self.legacy_calls.fetch_add(1, Ordering::SeqCst);
        if self.legacy_empty.load(Ordering::SeqCst) || self.all_fail.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(frame(96)))
    }

    async fn retrieve_frame(
        &self,
        _item: &MediaItem,
        dimension: u32,
    ) -> Result<Option<DynamicImage>> {
        self.retriever_calls.fetch_add(1, Ordering::SeqCst);
        if self.all_fail.load(Ordering::SeqCst) {
            bail!("retriever could not open file");
        }
        Ok(Some(frame(dimension)))
    }
}

#[derive(Default)]
pub struct MockRotation {
    pub degrees: AtomicU32,
    pub fail: AtomicBool,
}

#[async_trait]
impl RotationReader for MockRotation {
    async fn rotation_degrees(&self, _locator: &str) -> Result<u32> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("no metadata");
        }
        Ok(self.degrees.load(Ordering::SeqCst))
    }
}

#[derive(Clone)]
pub struct MockSources {
    pub frames: Arc<MockFrames>,
    pub platform: Arc<MockPlatform>,
    pub rotation: Arc<MockRotation>,
}

impl MockSources {
    /// Frame extraction runs freely
    pub fn new() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Every frame extraction blocks until `release` hands out a permit
    pub fn gated() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            frames: Arc::new(MockFrames {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
                gate: Semaphore::new(permits),
            }),
            platform: Arc::new(MockPlatform::default()),
            rotation: Arc::new(MockRotation::default()),
        }
    }

    pub fn release(&self, permits: usize) {
        self.frames.gate.add_permits(permits);
    }

    pub fn sources(&self) -> ThumbnailSources {
        ThumbnailSources {
            frames: self.frames.clone(),
            platform: self.platform.clone(),
            rotation: self.rotation.clone(),
        }
    }
}

pub fn test_config(cache_dir: &Path) -> ThumbnailConfig {
    ThumbnailConfig {
        cache_dir: cache_dir.to_path_buf(),
        disk_dimension: 64,
        max_heap_bytes: 64 * 1024 * 1024,
        ..ThumbnailConfig::default()
    }
}

pub fn test_repository(mock: &MockSources, cache_dir: &Path) -> ThumbnailRepository {
    ThumbnailRepository::new(test_config(cache_dir), mock.sources())
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
