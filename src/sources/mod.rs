//! Media lookup and download.
//!
//! A [`MediaRetriever`] turns a user-supplied locator (URL or search words)
//! into [`ResolvedMedia`], then downloads it to a scratch file for the
//! transcoder. The scratch file belongs to the caller once returned.

pub mod ytdlp;

use async_trait::async_trait;
use std::{path::PathBuf, time::Duration};

use crate::error::{FetchError, ResolutionError};

pub use ytdlp::YtDlpRetriever;

/// Media found for a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    /// Stable id of the media at its source; used as the cache key
    pub id: String,
    pub title: String,
    pub webpage_url: String,
    pub duration: Option<Duration>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaRetriever: Send + Sync {
    /// Looks the locator up without downloading anything.
    async fn resolve(&self, locator: &str) -> Result<ResolvedMedia, ResolutionError>;

    /// Downloads the best audio stream of `media` and returns the file path.
    async fn fetch(&self, media: &ResolvedMedia) -> Result<PathBuf, FetchError>;
}

/// Checks that the external tools used for retrieval and decoding run.
pub async fn verify_dependencies() -> anyhow::Result<()> {
    for (tool, flag) in [("yt-dlp", "--version"), ("ffmpeg", "-version")] {
        let output = async_process::Command::new(tool)
            .arg(flag)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("{} is not available: {}", tool, e))?;

        if !output.status.success() {
            anyhow::bail!("{} exited with {}", tool, output.status);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        tracing::debug!("✅ {} {}", tool, version.lines().next().unwrap_or("").trim());
    }
    Ok(())
}
