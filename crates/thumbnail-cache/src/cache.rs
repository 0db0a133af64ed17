//! Request coordinator that ties the memory tier, disk tier and generation together
//!
//! `ThumbnailRepository` is the single entry point for thumbnail lookups. A
//! lookup checks memory, joins an in-flight computation for the same key if
//! one exists, and otherwise registers a new computation that tries disk and
//! then generation. Computations run as their own tasks, so a caller giving
//! up never strands the other waiters.

use crate::disk::DiskStore;
use crate::generate::{fit_within, GenerationEngine};
use crate::key::{thumbnail_key, CacheKey, MediaItem};
use crate::memory::MemoryStore;
use crate::prefetch::PrefetchScheduler;
use crate::source::ThumbnailSources;
use crate::{Thumbnail, ThumbnailConfig};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use image::DynamicImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

type SharedResult = Shared<BoxFuture<'static, Option<Thumbnail>>>;

/// One registered computation
struct InFlight {
    id: u64,
    result: SharedResult,
    abort: AbortHandle,
}

/// Thumbnail cache manager, cheap to clone
#[derive(Clone)]
pub struct ThumbnailRepository {
    pub(crate) inner: Arc<RepositoryInner>,
}

pub(crate) struct RepositoryInner {
    pub(crate) config: ThumbnailConfig,
    memory: MemoryStore,
    disk: DiskStore,
    engine: GenerationEngine,
    in_flight: DashMap<CacheKey, InFlight>,
    next_flight_id: AtomicU64,
    /// Bumped by `clear_all`; computations from an older epoch do not publish
    epoch: AtomicU64,
    network_thumbnails: AtomicBool,
    ready_tx: broadcast::Sender<CacheKey>,
    pub(crate) prefetch: PrefetchScheduler,
}

/// Removes its own in-flight registration when the computation ends, is
/// aborted or panics.
struct FlightGuard {
    inner: Arc<RepositoryInner>,
    key: CacheKey,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

impl ThumbnailRepository {
    /// Create a repository. The disk directory is created eagerly but a
    /// failure only disables the disk tier.
    pub fn new(config: ThumbnailConfig, sources: ThumbnailSources) -> Self {
        let memory = MemoryStore::new(config.max_heap_bytes);
        let disk = DiskStore::new(&config.cache_dir, config.disk_dimension, config.jpeg_quality);
        let (ready_tx, _) = broadcast::channel(config.ready_channel_capacity.max(1));
        let prefetch = PrefetchScheduler::new(config.max_folder_jobs);

        info!(
            cache_dir = %config.cache_dir.display(),
            memory_budget_kb = memory.budget_kb(),
            "thumbnail repository ready"
        );

        Self {
            inner: Arc::new(RepositoryInner {
                network_thumbnails: AtomicBool::new(config.network_thumbnails),
                config,
                memory,
                disk,
                engine: GenerationEngine::new(sources),
                in_flight: DashMap::new(),
                next_flight_id: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                ready_tx,
                prefetch,
            }),
        }
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.inner.config
    }

    pub fn network_thumbnails(&self) -> bool {
        self.inner.network_thumbnails.load(Ordering::SeqCst)
    }

    pub fn set_network_thumbnails(&self, enabled: bool) {
        self.inner.network_thumbnails.store(enabled, Ordering::SeqCst);
    }

    /// Keys that just became available in the memory tier. Slow receivers
    /// lose the oldest keys rather than blocking producers.
    pub fn subscribe_ready(&self) -> broadcast::Receiver<CacheKey> {
        self.inner.ready_tx.subscribe()
    }

    /// Look up or produce the thumbnail for `item` fitted to `width` x `height`.
    /// `None` is a normal outcome and should be shown as a placeholder.
    pub async fn get_thumbnail(
        &self,
        item: &MediaItem,
        width: u32,
        height: u32,
    ) -> Option<Thumbnail> {
        if self.blocked_by_network_policy(item) {
            return None;
        }

        let key = thumbnail_key(item, width, height);
        if let Some(thumbnail) = self.inner.memory.get(&key) {
            return Some(thumbnail);
        }

        let result = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(flight) => flight.get().result.clone(),
            Entry::Vacant(slot) => {
                // A computation may have published and deregistered since the first check.
                if let Some(thumbnail) = self.inner.memory.get(&key) {
                    return Some(thumbnail);
                }

                let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                let handle = tokio::spawn(compute(
                    Arc::clone(&self.inner),
                    key.clone(),
                    id,
                    item.clone(),
                    width,
                    height,
                ));
                let abort = handle.abort_handle();
                let result = handle.map(|joined| joined.ok().flatten()).boxed().shared();
                slot.insert(InFlight {
                    id,
                    result: result.clone(),
                    abort,
                });
                result
            }
        };

        result.await
    }

    /// Memory then disk, never generating.
    pub async fn get_cached_thumbnail(
        &self,
        item: &MediaItem,
        width: u32,
        height: u32,
    ) -> Option<Thumbnail> {
        if self.blocked_by_network_policy(item) {
            return None;
        }

        let key = thumbnail_key(item, width, height);
        if let Some(thumbnail) = self.inner.memory.get(&key) {
            return Some(thumbnail);
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let img = load_from_disk(&self.inner.disk, item).await?;
        let thumbnail: Thumbnail = Arc::new(fit_within(img, width, height));
        self.inner.remember(&key, Arc::clone(&thumbnail), epoch);
        Some(thumbnail)
    }

    /// Memory tier only, never suspends.
    pub fn peek_memory(&self, item: &MediaItem, width: u32, height: u32) -> Option<Thumbnail> {
        self.inner.memory.get(&thumbnail_key(item, width, height))
    }

    /// Cancel all background work and drop every cached artifact.
    pub async fn clear_all(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.prefetch.clear();
        self.abort_in_flight();
        self.inner.engine.reset();
        self.inner.memory.evict_all();

        let disk = self.inner.disk.clone();
        let removed = tokio::task::spawn_blocking(move || disk.clear())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "disk cache clear did not complete");
                0
            });
        info!(removed_files = removed, "thumbnail cache cleared");
    }

    /// Stop background work but keep everything already cached.
    pub fn shutdown(&self) {
        self.inner.prefetch.cancel_all();
        self.abort_in_flight();
        info!("thumbnail repository shut down");
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_items: self.inner.memory.len(),
            memory_cost_kb: self.inner.memory.cost_kb(),
            memory_budget_kb: self.inner.memory.budget_kb(),
            in_flight: self.inner.in_flight.len(),
            folder_jobs: self.inner.prefetch.live_jobs(),
            disk_files: self.inner.disk.file_count(),
        }
    }

    fn blocked_by_network_policy(&self, item: &MediaItem) -> bool {
        item.is_remote() && !self.network_thumbnails()
    }

    fn abort_in_flight(&self) {
        // Abort and unregister under the same shard lock
        self.inner.in_flight.retain(|_, flight| {
            flight.abort.abort();
            false
        });
    }
}

impl std::fmt::Debug for ThumbnailRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailRepository")
            .field("memory", &self.inner.memory)
            .field("disk", &self.inner.disk)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl RepositoryInner {
    /// Insert into memory and announce, unless a clear happened since `epoch`.
    fn remember(&self, key: &CacheKey, thumbnail: Thumbnail, epoch: u64) -> bool {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        self.memory.put(key.clone(), thumbnail);
        // A clear that raced the insert has already bumped the epoch.
        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.memory.remove(key);
            return false;
        }
        true
    }

    fn announce(&self, key: CacheKey) {
        // No subscribers is fine
        let _ = self.ready_tx.send(key);
    }
}

/// Body of one registered computation: disk, then generation.
async fn compute(
    inner: Arc<RepositoryInner>,
    key: CacheKey,
    id: u64,
    item: MediaItem,
    width: u32,
    height: u32,
) -> Option<Thumbnail> {
    // Created on first poll, after the registration it removes is in place.
    let guard = FlightGuard {
        inner: Arc::clone(&inner),
        key: key.clone(),
        id,
    };
    let epoch = inner.epoch.load(Ordering::SeqCst);

    if let Some(img) = load_from_disk(&inner.disk, &item).await {
        let thumbnail: Thumbnail = Arc::new(fit_within(img, width, height));
        if inner.remember(&key, Arc::clone(&thumbnail), epoch) {
            inner.announce(key);
        }
        return Some(thumbnail);
    }

    // The preference may have flipped while this request waited.
    if item.is_remote() && !inner.network_thumbnails.load(Ordering::SeqCst) {
        return None;
    }

    let generated = inner.engine.generate(&item, inner.disk.disk_dimension()).await?;
    let thumbnail: Thumbnail = Arc::new(fit_within(generated.clone(), width, height));
    if inner.remember(&key, Arc::clone(&thumbnail), epoch) {
        inner.announce(key.clone());
        store_to_disk(&inner, item, generated, epoch).await;
    }
    debug!(key = %key, "thumbnail generated");

    drop(guard);
    Some(thumbnail)
}

async fn load_from_disk(disk: &DiskStore, item: &MediaItem) -> Option<DynamicImage> {
    let disk = disk.clone();
    let item = item.clone();
    tokio::task::spawn_blocking(move || disk.load(&item))
        .await
        .ok()
        .flatten()
}

async fn store_to_disk(
    inner: &Arc<RepositoryInner>,
    item: MediaItem,
    img: DynamicImage,
    epoch: u64,
) {
    let disk = inner.disk.clone();
    let written = tokio::task::spawn_blocking(move || {
        let result = disk.store(&item, &img);
        (disk, item, result)
    })
    .await;

    match written {
        Ok((disk, item, Ok(()))) => {
            // Cleared while writing: the file must not outlive the clear.
            if inner.epoch.load(Ordering::SeqCst) != epoch {
                disk.remove(&item);
            }
        }
        Ok((_, item, Err(e))) => {
            warn!(path = %item.path, error = %e, "failed to persist thumbnail");
        }
        Err(e) => warn!(error = %e, "thumbnail persist task failed"),
    }
}

/// Cache statistics for monitoring and debugging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_items: usize,
    pub memory_cost_kb: usize,
    pub memory_budget_kb: usize,
    pub in_flight: usize,
    pub folder_jobs: usize,
    pub disk_files: usize,
}

impl CacheStats {
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_budget_kb == 0 {
            0.0
        } else {
            (self.memory_cost_kb as f64 / self.memory_budget_kb as f64) * 100.0
        }
    }
}
