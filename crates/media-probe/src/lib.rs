//! External media tooling for reelthumbs
//!
//! Thin async wrappers around the command-line tools the thumbnail pipeline
//! leans on: ffmpeg for single-frame extraction, ffprobe for durations,
//! exiftool for rotation metadata, plus a reader for the freedesktop.org
//! shared thumbnail cache. Everything here reports failure through
//! `anyhow::Result`; deciding what a failure means is left to the caller.

pub mod catalog;
pub mod freedesktop;
pub mod frame;
pub mod rotation;

pub use catalog::{probe_duration_ms, probe_durations, scan_folder, VIDEO_EXTENSIONS};
pub use freedesktop::{FreedesktopThumbnails, SharedThumbnailSize};
pub use frame::{FfmpegFrames, FrameRequest};
pub use rotation::{normalize_rotation, ExiftoolRotation};
