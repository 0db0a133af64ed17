//! Folder scanning and duration probing for building a media catalog

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Supported video file extensions
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "m4v", "ts", "m2ts", "flv", "wmv", "3gp", "mpg", "mpeg",
];

/// List video files directly inside `folder`, sorted by path.
pub fn scan_folder(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(folder)
        .with_context(|| format!("Failed to read folder: {}", folder.display()))?;

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_video = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_video {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Container duration in milliseconds via ffprobe, `None` if it cannot be determined.
pub fn probe_duration_ms(ffprobe: &Path, file: &Path) -> Option<i64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(file)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_duration_ms(&String::from_utf8_lossy(&output.stdout))
}

/// Probe many files in parallel, preserving input order.
pub fn probe_durations(ffprobe: &Path, files: &[PathBuf]) -> Vec<Option<i64>> {
    files
        .par_iter()
        .map(|file| probe_duration_ms(ffprobe, file))
        .collect()
}

fn parse_duration_ms(stdout: &str) -> Option<i64> {
    let secs: f64 = stdout.lines().next()?.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0).round() as i64)
}
