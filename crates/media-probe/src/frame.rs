//! Single-frame extraction through ffmpeg
//!
//! ffmpeg is asked to seek, decode exactly one frame, scale it to fit a square
//! bounding box and write it as MJPEG to stdout. The bytes are then decoded
//! with the `image` crate.

use anyhow::{Context, Result, bail};
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Parameters for one frame grab.
#[derive(Debug, Clone)]
pub struct FrameRequest<'a> {
    /// Local path or stream URL handed to ffmpeg's `-i`
    pub locator: &'a str,
    /// Seek position in seconds
    pub position_secs: f64,
    /// Longest edge of the output frame
    pub dimension: u32,
    /// Force the software decoder (`-hwaccel none`)
    pub software_only: bool,
}

/// ffmpeg-backed frame grabber
#[derive(Debug, Clone)]
pub struct FfmpegFrames {
    ffmpeg: PathBuf,
}

impl Default for FfmpegFrames {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegFrames {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    /// Grab one frame. `Ok(None)` means ffmpeg ran but produced no picture
    /// (seek past the end, audio-only input and the like).
    pub async fn extract(&self, request: &FrameRequest<'_>) -> Result<Option<DynamicImage>> {
        let args = build_args(request);
        debug!(locator = request.locator, position = request.position_secs, "ffmpeg frame grab");

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run ffmpeg on {}", request.locator))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ffmpeg failed for {}: {}", request.locator, stderr.trim());
        }

        if output.stdout.is_empty() {
            return Ok(None);
        }

        let img = ImageReader::new(Cursor::new(&output.stdout))
            .with_guessed_format()?
            .decode()
            .with_context(|| format!("Failed to decode ffmpeg frame for {}", request.locator))?;

        Ok(Some(img))
    }
}

fn build_args(request: &FrameRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    if request.software_only {
        args.push("-hwaccel".to_string());
        args.push("none".to_string());
    }
    // Rotation is corrected by the caller from container metadata.
    args.push("-noautorotate".to_string());
    if request.position_secs > 0.0 {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", request.position_secs));
    }
    args.extend([
        "-i".to_string(),
        request.locator.to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        format!(
            "scale={d}:{d}:force_original_aspect_ratio=decrease",
            d = request.dimension.max(1)
        ),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-vcodec".to_string(),
        "mjpeg".to_string(),
        "-".to_string(),
    ]);
    args
}
