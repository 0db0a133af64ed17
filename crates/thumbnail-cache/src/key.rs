//! Media identity and cache key derivation
//!
//! Keys are built from cheap metadata rather than content hashes: a local
//! file is identified by size, modification time and duration, a stream by
//! its locator. Two items that agree on those fields share cached artifacts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Locator prefixes treated as network streams
const REMOTE_SCHEMES: &[&str] = &["http://", "https://", "rtmp://", "rtsp://", "ftp://", "sftp://"];

/// Marker appended to remote disk keys; remote frames are always sampled at 2s
const REMOTE_SAMPLE_TAG: &str = "t=2s";

/// A video known to the media catalog. Never mutated by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    /// Absolute path or stream URI
    pub path: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
    /// Milliseconds, 0 when unknown
    pub duration_ms: i64,
    pub display_name: String,
}

impl MediaItem {
    /// Whether the item is fetched over the network rather than read from disk.
    pub fn is_remote(&self) -> bool {
        is_remote_locator(&self.path)
    }

    /// Identity portion of every key derived from this item.
    pub fn fingerprint(&self) -> String {
        if self.is_remote() {
            format!("{}|network", self.path)
        } else {
            format!("{}|{}|{}", self.size, self.last_modified, self.duration_ms)
        }
    }
}

/// Case-insensitive scheme check
pub fn is_remote_locator(locator: &str) -> bool {
    REMOTE_SCHEMES.iter().any(|scheme| {
        locator
            .get(..scheme.len())
            .map(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .unwrap_or(false)
    })
}

/// Key of one cached thumbnail
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 128-bit digest as 32 lowercase hex chars, safe as a file name.
    pub fn digest_hex(&self) -> String {
        let result = Sha256::digest(self.0.as_bytes());
        hex::encode(&result[..16])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key for the memory tier and for ready notifications.
pub fn thumbnail_key(item: &MediaItem, width: u32, height: u32) -> CacheKey {
    CacheKey(format!("{}|{}|{}", item.fingerprint(), width, height))
}

/// Key for the disk tier. Every requested size collapses onto the canonical
/// `disk_dimension`, so one artifact exists per item.
pub fn disk_cache_key(item: &MediaItem, disk_dimension: u32) -> CacheKey {
    let base = format!("{}|{}|{}", item.fingerprint(), disk_dimension, disk_dimension);
    if item.is_remote() {
        CacheKey(format!("{}|{}", base, REMOTE_SAMPLE_TAG))
    } else {
        CacheKey(base)
    }
}

/// Digest over the ordered folder contents and target size. A change means
/// prefetch progress for the folder is stale.
pub fn folder_signature(items: &[MediaItem], width: u32, height: u32) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(item.size.to_le_bytes());
        hasher.update(item.last_modified.to_le_bytes());
    }
    hasher.update(width.to_le_bytes());
    hasher.update(height.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) fn local_item(id: i64, path: &str, size: u64) -> MediaItem {
    MediaItem {
        id,
        path: path.to_string(),
        size,
        last_modified: 1_700_000_000_000,
        duration_ms: 60_000,
        display_name: path.rsplit('/').next().unwrap_or(path).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_classification() {
        for locator in [
            "http://host/a.mp4",
            "HTTPS://host/a.mp4",
            "rtmp://live/stream",
            "Rtsp://cam/1",
            "ftp://files/a.mkv",
            "sftp://box/a.mkv",
        ] {
            assert!(is_remote_locator(locator), "{locator}");
        }
        for locator in ["/sdcard/a.mp4", "file:///a.mp4", "content://media/1", "http:/x", "ht"] {
            assert!(!is_remote_locator(locator), "{locator}");
        }
    }

    #[test]
    fn test_local_key_ignores_name_and_path() {
        let a = local_item(1, "/movies/a.mp4", 4096);
        let mut renamed = a.clone();
        renamed.path = "/movies/renamed.mp4".to_string();
        renamed.display_name = "renamed.mp4".to_string();
        renamed.id = 99;

        assert_eq!(thumbnail_key(&a, 320, 180), thumbnail_key(&a, 320, 180));
        assert_eq!(thumbnail_key(&a, 320, 180), thumbnail_key(&renamed, 320, 180));
        assert_eq!(thumbnail_key(&a, 320, 180).as_str(), "4096|1700000000000|60000|320|180");
    }

    #[test]
    fn test_local_key_breaks_on_metadata_change() {
        let a = local_item(1, "/movies/a.mp4", 4096);
        let mut touched = a.clone();
        touched.last_modified += 1;
        let mut longer = a.clone();
        longer.duration_ms += 1;

        assert_ne!(thumbnail_key(&a, 320, 180), thumbnail_key(&touched, 320, 180));
        assert_ne!(thumbnail_key(&a, 320, 180), thumbnail_key(&longer, 320, 180));
        assert_ne!(thumbnail_key(&a, 320, 180), thumbnail_key(&a, 160, 90));
    }

    #[test]
    fn test_remote_key_ignores_duration() {
        let mut stream = local_item(2, "https://cdn/x.m3u8", 0);
        let k1 = thumbnail_key(&stream, 320, 180);
        stream.duration_ms = 0;
        assert_eq!(k1, thumbnail_key(&stream, 320, 180));
        assert_eq!(k1.as_str(), "https://cdn/x.m3u8|network|320|180");
    }

    #[test]
    fn test_disk_key_collapses_sizes() {
        let a = local_item(1, "/movies/a.mp4", 4096);
        let stream = local_item(2, "https://cdn/x.m3u8", 0);

        assert_eq!(disk_cache_key(&a, 512).as_str(), "4096|1700000000000|60000|512|512");
        assert_eq!(
            disk_cache_key(&stream, 512).as_str(),
            "https://cdn/x.m3u8|network|512|512|t=2s"
        );

        let digest = disk_cache_key(&a, 512).digest_hex();
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(digest, disk_cache_key(&stream, 512).digest_hex());
    }

    #[test]
    fn test_folder_signature() {
        let items = vec![local_item(1, "/f/a.mp4", 10), local_item(2, "/f/b.mp4", 20)];
        let sig = folder_signature(&items, 320, 180);

        assert_eq!(sig, folder_signature(&items, 320, 180));
        assert_ne!(sig, folder_signature(&items, 160, 90));
        assert_ne!(sig, folder_signature(&items[..1], 320, 180));

        let mut reordered = items.clone();
        reordered.reverse();
        assert_ne!(sig, folder_signature(&reordered, 320, 180));
    }
}
