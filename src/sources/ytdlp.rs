use async_trait::async_trait;
use serde::Deserialize;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use super::{MediaRetriever, ResolvedMedia};
use crate::error::{FetchError, ResolutionError};

/// Retriever backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpRetriever {
    binary: PathBuf,
    scratch_dir: PathBuf,
    max_duration: Duration,
}

/// Subset of `yt-dlp -j` output we care about
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    webpage_url: Option<String>,
    original_url: Option<String>,
}

impl YtDlpRetriever {
    pub fn new(scratch_dir: impl Into<PathBuf>, max_duration: Duration) -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            scratch_dir: scratch_dir.into(),
            max_duration,
        }
    }

    #[allow(dead_code)]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Where `fetch` writes the media with this id
    pub fn scratch_path(&self, id: &str) -> PathBuf {
        self.scratch_dir.join(format!("{}.media", sanitize_id(id)))
    }
}

/// URLs go to yt-dlp as-is; anything else becomes a single-result search.
fn search_target(locator: &str) -> String {
    let locator = locator.trim();
    match Url::parse(locator) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url.to_string(),
        _ => format!("ytsearch1:{}", locator),
    }
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_info(stdout: &[u8], locator: &str) -> Result<ResolvedMedia, ResolutionError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ResolutionError::NotFound(locator.to_string()))?;

    let info: YtDlpInfo =
        serde_json::from_str(line).map_err(|e| ResolutionError::Malformed(e.to_string()))?;

    let webpage_url = info
        .webpage_url
        .or(info.original_url)
        .unwrap_or_else(|| locator.to_string());

    Ok(ResolvedMedia {
        id: info.id,
        title: info.title,
        webpage_url,
        duration: info
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64),
    })
}

fn check_duration(media: &ResolvedMedia, limit: Duration) -> Result<(), ResolutionError> {
    match media.duration {
        Some(duration) if duration > limit => Err(ResolutionError::TooLong {
            title: media.title.clone(),
            duration,
            limit,
        }),
        _ => Ok(()),
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim().to_string()
}

#[async_trait]
impl MediaRetriever for YtDlpRetriever {
    async fn resolve(&self, locator: &str) -> Result<ResolvedMedia, ResolutionError> {
        let target = search_target(locator);
        debug!("🔍 Resolving `{}`", target);

        let output = Command::new(&self.binary)
            .args(["-j", "--no-playlist", "--quiet", "--no-warnings"])
            .arg(&target)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ResolutionError::Unavailable)?;

        if !output.status.success() {
            warn!(
                "❌ yt-dlp could not resolve `{}`: {}",
                locator,
                stderr_excerpt(&output.stderr)
            );
            return Err(ResolutionError::NotFound(locator.to_string()));
        }

        let media = parse_info(&output.stdout, locator)?;
        check_duration(&media, self.max_duration)?;

        info!("🔗 Resolved `{}` to {} ({})", locator, media.title, media.id);
        Ok(media)
    }

    async fn fetch(&self, media: &ResolvedMedia) -> Result<PathBuf, FetchError> {
        let path = self.scratch_path(&media.id);
        info!("⬇️ Downloading {} to {}", media.id, path.display());

        let output = Command::new(&self.binary)
            .args([
                "-f",
                "bestaudio/best",
                "--no-playlist",
                "--no-part",
                "--force-overwrites",
                "--quiet",
                "--no-warnings",
                "-o",
            ])
            .arg(&path)
            .arg(&media.webpage_url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(FetchError::Spawn)?;

        if !output.status.success() {
            remove_scratch(&path).await;
            return Err(FetchError::Download {
                id: media.id.clone(),
                reason: stderr_excerpt(&output.stderr),
            });
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(FetchError::Missing {
                id: media.id.clone(),
            }),
        }
    }
}

/// Deletes a scratch file, ignoring files that are already gone.
pub async fn remove_scratch(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("🗑️ Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}
