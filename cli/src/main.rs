use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::DynamicImage;
use media_probe::{probe_durations, scan_folder};
use rayon::prelude::*;
use thumbnail_cache::{MediaItem, ThumbnailConfig, ThumbnailRepository, ThumbnailSources};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reelthumbs")]
#[command(about = "Video thumbnail cache for media library browsers")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that take precedence over the config file and environment
#[derive(Args)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the on-disk thumbnails
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Square bound of the stored rendition
    #[arg(long, global = true)]
    disk_dimension: Option<u32>,

    /// Skip network streams entirely
    #[arg(long, global = true)]
    no_network: bool,

    /// Path to the ffmpeg binary
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe binary
    #[arg(long, global = true)]
    ffprobe: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and cache thumbnails for every video in a folder
    Warm {
        /// Folder containing video files
        path: PathBuf,

        /// Target thumbnail width
        #[arg(long, default_value = "320")]
        width: u32,

        /// Target thumbnail height
        #[arg(long, default_value = "180")]
        height: u32,

        /// Write the scanned catalog to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Produce the thumbnail for a single file or stream URL
    Get {
        /// Local file path or network locator
        source: String,

        #[arg(long, default_value = "320")]
        width: u32,

        #[arg(long, default_value = "180")]
        height: u32,

        /// Where to write the image (format follows the extension)
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Delete every cached thumbnail
    Clear,

    /// Print cache statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.overrides)?;
    let repo = ThumbnailRepository::new(config.clone(), ThumbnailSources::system(&config));

    let result = match cli.command {
        Commands::Warm { path, width, height, output } => {
            warm_folder(&repo, &config, &path, width, height, output).await
        }
        Commands::Get { source, width, height, out } => {
            get_thumbnail(&repo, &source, width, height, &out).await
        }
        Commands::Clear => {
            repo.clear_all().await;
            println!("Cleared thumbnail cache at {}", config.cache_dir.display());
            Ok(())
        }
        Commands::Stats => {
            let stats = repo.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("memory usage: {:.1}%", stats.memory_usage_percent());
            Ok(())
        }
    };

    repo.shutdown();
    result
}

/// Defaults, then the JSON file, then `REELTHUMBS_*` variables, then flags.
fn load_config(args: &ConfigArgs) -> Result<ThumbnailConfig> {
    let config = match &args.config {
        Some(path) => ThumbnailConfig::from_json_file(path)?,
        None => ThumbnailConfig::default(),
    };
    let mut config = config.apply_env()?;

    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(dimension) = args.disk_dimension {
        config.disk_dimension = dimension;
    }
    if args.no_network {
        config.network_thumbnails = false;
    }
    if let Some(ffmpeg) = &args.ffmpeg {
        config.ffmpeg_path = ffmpeg.clone();
    }
    if let Some(ffprobe) = &args.ffprobe {
        config.ffprobe_path = ffprobe.clone();
    }
    Ok(config)
}

async fn warm_folder(
    repo: &ThumbnailRepository,
    config: &ThumbnailConfig,
    folder: &Path,
    width: u32,
    height: u32,
    output: Option<PathBuf>,
) -> Result<()> {
    let files = scan_folder(folder)?;
    if files.is_empty() {
        println!("No video files found in {}", folder.display());
        return Ok(());
    }
    info!(folder = %folder.display(), files = files.len(), "scanning catalog");

    let items = build_catalog(&config.ffprobe_path, &files);
    if let Some(output) = output {
        let json = serde_json::to_string_pretty(&items).context("Failed to serialize catalog")?;
        std::fs::write(&output, json)
            .with_context(|| format!("Failed to write catalog to {}", output.display()))?;
        println!("Catalog written to {}", output.display());
    }

    let folder_id = folder.to_string_lossy().to_string();
    repo.start_folder_prefetch(&folder_id, &items, width, height);

    let total = items.len();
    let mut reported = 0;
    loop {
        let done = repo.folder_cursor(&folder_id).unwrap_or(total);
        if done != reported {
            info!(done, total, "warming thumbnails");
            reported = done;
        }
        if done >= total || repo.stats().folder_jobs == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let cached = items
        .iter()
        .filter(|item| repo.peek_memory(item, width, height).is_some())
        .count();
    println!("Cached {} of {} thumbnails ({}x{})", cached, total, width, height);
    if cached < total {
        println!("{} files produced no thumbnail", total - cached);
    }
    Ok(())
}

/// File metadata plus probed durations, in scan order.
fn build_catalog(ffprobe: &Path, files: &[PathBuf]) -> Vec<MediaItem> {
    let durations = probe_durations(ffprobe, files);
    files
        .par_iter()
        .zip(durations.into_par_iter())
        .enumerate()
        .map(|(index, (path, duration_ms))| {
            let (size, last_modified) = match std::fs::metadata(path) {
                Ok(meta) => {
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as i64)
                        .unwrap_or(0);
                    (meta.len(), mtime)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read file metadata");
                    (0, 0)
                }
            };
            if duration_ms.is_none() {
                warn!(path = %path.display(), "could not probe duration");
            }
            MediaItem {
                id: index as i64,
                path: path.to_string_lossy().to_string(),
                size,
                last_modified,
                duration_ms: duration_ms.unwrap_or(0),
                display_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

async fn get_thumbnail(
    repo: &ThumbnailRepository,
    source: &str,
    width: u32,
    height: u32,
    out: &Path,
) -> Result<()> {
    let item = if thumbnail_cache::key::is_remote_locator(source) {
        MediaItem {
            id: 0,
            path: source.to_string(),
            size: 0,
            last_modified: 0,
            duration_ms: 0,
            display_name: source.to_string(),
        }
    } else {
        let path = PathBuf::from(source);
        build_catalog(&repo.config().ffprobe_path, std::slice::from_ref(&path))
            .pop()
            .context("Failed to build media item")?
    };

    let thumbnail = repo
        .get_thumbnail(&item, width, height)
        .await
        .with_context(|| format!("No thumbnail could be produced for {}", source))?;

    DynamicImage::ImageRgb8(thumbnail.to_rgb8())
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "Wrote {}x{} thumbnail to {}",
        thumbnail.width(),
        thumbnail.height(),
        out.display()
    );
    Ok(())
}
