pub mod decrypt;
pub mod range;
pub mod segment;
pub mod segmented;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::download::progress::ProgressTracker;
use crate::download::{parse_url, RangeSource};
use crate::error::Result;
use crate::options::Options;

use segmented::{SegmentedVideo, Video};

/// One encrypted video to fetch: where it lives, where its key lives, and
/// where the plaintext goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub content_url: Url,
    pub key_url: Url,
    pub destination: PathBuf,
}

impl DownloadTarget {
    pub fn parse(content_url: &str, key_url: &str, destination: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            content_url: parse_url(content_url)?,
            key_url: parse_url(key_url)?,
            destination: destination.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The destination already existed; nothing was requested.
    Skipped,
    Completed { bytes: u64 },
}

/// Run one download session: probe, fetch every range, merge, decrypt.
pub async fn download_video(
    source: Arc<dyn RangeSource>,
    target: &DownloadTarget,
    options: &Options,
) -> Result<SessionOutcome> {
    let destination = &target.destination;

    if destination.exists() {
        info!(destination = %destination.display(), "file already exists, skipping download");
        return Ok(SessionOutcome::Skipped);
    }

    let video = Video::probe(source.as_ref(), target.content_url.clone(), destination.clone()).await?;
    let key = decrypt::fetch_key(source.as_ref(), &target.key_url).await?;

    create_parent_dirs(destination)?;

    let segmented = SegmentedVideo::new(video, options.segment_count);
    info!(
        destination = %destination.display(),
        size = segmented.video().size,
        segments = segmented.segments().len(),
        "downloading"
    );

    let progress = Arc::new(ProgressTracker::new(segmented.video().size, options.show_progress));
    let fetched = segmented
        .download(Arc::clone(&source), Arc::clone(&progress), options)
        .await;

    match fetched {
        Ok(()) => progress.finish("downloaded"),
        Err(err) => {
            progress.finish("failed");
            return Err(err);
        }
    }

    segmented.combine()?;

    match decrypt::decrypt_file(destination, &key).await {
        Ok(bytes) => Ok(SessionOutcome::Completed { bytes }),
        Err(err) => {
            set_aside(destination);
            Err(err)
        }
    }
}

/// Create the destination's parent (and with it the grandparent). Existing
/// directories are fine.
fn create_parent_dirs(destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Move a merged file that could not be decrypted out of the destination path,
/// so the next run does not mistake it for a finished download.
fn set_aside(destination: &Path) {
    let mut kept = destination.as_os_str().to_owned();
    kept.push(".encrypted");

    match std::fs::rename(destination, &kept) {
        Ok(()) => warn!(kept = %Path::new(&kept).display(), "kept undecrypted file"),
        Err(err) => warn!(error = %err, "could not move undecrypted file aside"),
    }
}
