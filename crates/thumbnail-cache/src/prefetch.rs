//! Folder-level background prefetch
//!
//! Each folder gets at most one background job that walks its items in order
//! and warms the cache through the normal lookup path. Progress is kept per
//! folder so a relaunched job resumes where the previous one stopped, as long
//! as the folder's contents and the target size are unchanged. Only a few
//! folders are warmed at once; admitting another evicts an existing one.

use crate::cache::ThumbnailRepository;
use crate::key::{folder_signature, MediaItem};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Resume state and running job for one folder
struct FolderEntry {
    signature: String,
    /// Index of the next item to process. Each launch gets a fresh counter
    /// so a cancelled job can never move its successor's cursor.
    cursor: Arc<AtomicUsize>,
    job: Option<FolderJob>,
}

struct FolderJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FolderJob {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Table of folder jobs owned by one repository
pub(crate) struct PrefetchScheduler {
    folders: Mutex<HashMap<String, FolderEntry>>,
    max_jobs: usize,
}

impl PrefetchScheduler {
    pub(crate) fn new(max_jobs: usize) -> Self {
        Self {
            folders: Mutex::new(HashMap::new()),
            max_jobs: max_jobs.max(1),
        }
    }

    /// Number of folder jobs still running
    pub(crate) fn live_jobs(&self) -> usize {
        self.folders
            .lock()
            .values()
            .filter(|entry| entry.job.as_ref().is_some_and(FolderJob::is_live))
            .count()
    }

    /// Cancel every job but keep resume state
    pub(crate) fn cancel_all(&self) {
        for entry in self.folders.lock().values_mut() {
            if let Some(job) = entry.job.take() {
                job.cancel();
            }
        }
    }

    /// Cancel every job and forget all resume state
    pub(crate) fn clear(&self) {
        let mut folders = self.folders.lock();
        for (_, entry) in folders.drain() {
            if let Some(job) = entry.job {
                job.cancel();
            }
        }
    }
}

impl ThumbnailRepository {
    /// Warm the cache for every item of a folder in the background.
    ///
    /// Must be called from within a Tokio runtime. Returns immediately.
    pub fn start_folder_prefetch(
        &self,
        folder_id: &str,
        items: &[MediaItem],
        width: u32,
        height: u32,
    ) {
        let network = self.network_thumbnails();
        let items: Vec<MediaItem> = items
            .iter()
            .filter(|item| network || !item.is_remote())
            .cloned()
            .collect();
        if items.is_empty() {
            return;
        }

        let scheduler = &self.inner.prefetch;
        let mut folders = scheduler.folders.lock();

        // Reap finished and cancelled jobs
        for entry in folders.values_mut() {
            if entry.job.as_ref().is_some_and(|job| !job.is_live()) {
                entry.job = None;
            }
        }

        let has_job = folders
            .get(folder_id)
            .is_some_and(|entry| entry.job.is_some());
        let live = folders.values().filter(|entry| entry.job.is_some()).count();
        if !has_job && live >= scheduler.max_jobs {
            let victim = folders
                .iter()
                .find(|(id, entry)| entry.job.is_some() && id.as_str() != folder_id)
                .map(|(id, _)| id.clone());
            if let Some(victim) = victim {
                if let Some(evicted) = folders.remove(&victim) {
                    if let Some(job) = evicted.job {
                        job.cancel();
                    }
                }
                info!(folder = %victim, "evicted folder prefetch to admit {}", folder_id);
            }
        }

        let signature = folder_signature(&items, width, height);
        let entry = folders
            .entry(folder_id.to_string())
            .or_insert_with(|| FolderEntry {
                signature: signature.clone(),
                cursor: Arc::new(AtomicUsize::new(0)),
                job: None,
            });

        let start = if entry.signature == signature {
            entry.cursor.load(Ordering::SeqCst)
        } else {
            entry.signature = signature;
            0
        };

        if let Some(job) = entry.job.take() {
            job.cancel();
        }

        let cursor = Arc::new(AtomicUsize::new(start));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_folder_job(
            self.clone(),
            folder_id.to_string(),
            items,
            width,
            height,
            Arc::clone(&cursor),
            cancel.clone(),
        ));
        entry.cursor = cursor;
        entry.job = Some(FolderJob { cancel, handle });
    }

    /// Stop the folder's job, keeping its progress for the next launch.
    pub fn cancel_folder_prefetch(&self, folder_id: &str) {
        let mut folders = self.inner.prefetch.folders.lock();
        if let Some(job) = folders.get_mut(folder_id).and_then(|entry| entry.job.take()) {
            job.cancel();
        }
    }

    /// Resume cursor of a folder, `None` if the folder has no prefetch state.
    pub fn folder_cursor(&self, folder_id: &str) -> Option<usize> {
        self.inner
            .prefetch
            .folders
            .lock()
            .get(folder_id)
            .map(|entry| entry.cursor.load(Ordering::SeqCst))
    }
}

async fn run_folder_job(
    repo: ThumbnailRepository,
    folder_id: String,
    items: Vec<MediaItem>,
    width: u32,
    height: u32,
    cursor: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let start = cursor.load(Ordering::SeqCst);
    debug!(folder = %folder_id, start, total = items.len(), "folder prefetch started");

    for item in items.iter().skip(start) {
        if cancel.is_cancelled() {
            debug!(folder = %folder_id, "folder prefetch cancelled");
            return;
        }
        // Giving up on the wait leaves the generation itself running for other callers.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(folder = %folder_id, "folder prefetch cancelled");
                return;
            }
            _ = repo.get_thumbnail(item, width, height) => {}
        }
        cursor.fetch_add(1, Ordering::SeqCst);
    }

    debug!(folder = %folder_id, "folder prefetch finished");
}
