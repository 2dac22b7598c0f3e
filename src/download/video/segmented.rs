use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::range::plan_ranges;
use super::segment::{segment_path, VideoSegment};
use crate::download::progress::ProgressTracker;
use crate::download::RangeSource;
use crate::error::{DownloadError, Result};
use crate::options::Options;

/// The remote resource and where it ends up.
#[derive(Debug)]
pub struct Video {
    pub url: Url,
    pub destination: PathBuf,
    pub size: u64,
}

impl Video {
    pub async fn probe<S>(source: &S, url: Url, destination: PathBuf) -> Result<Self>
    where
        S: RangeSource + ?Sized,
    {
        let size = source.content_length(&url).await?;
        info!(%url, size, "probed video size");

        Ok(Self { url, destination, size })
    }
}

/// The plan the segment files on disk were cut for. Leftovers from a
/// different plan cover different byte ranges and cannot be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PlanMarker {
    size: u64,
    segments: usize,
}

fn marker_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let folder = destination.parent().unwrap_or_else(|| Path::new(""));

    folder.join(format!(".{}.plan", name))
}

pub struct SegmentedVideo {
    video: Arc<Video>,
    segments: Vec<VideoSegment>,
}

impl SegmentedVideo {
    pub fn new(video: Video, segment_count: usize) -> Self {
        let segments = plan_ranges(video.size, segment_count)
            .into_iter()
            .map(|range| VideoSegment::new(range, &video.destination))
            .collect::<Vec<_>>();

        debug!(count = segments.len(), "planned segments");

        Self {
            video: Arc::new(video),
            segments,
        }
    }

    pub fn segments(&self) -> &[VideoSegment] {
        &self.segments
    }

    pub fn video(&self) -> &Video {
        &self.video
    }

    /// Fetch every segment concurrently and wait for all of them.
    ///
    /// The first fatal error aborts the remaining fetch tasks; their partial
    /// segment files are left on disk for the next run.
    pub async fn download(
        &self,
        source: Arc<dyn RangeSource>,
        progress: Arc<ProgressTracker>,
        options: &Options,
    ) -> Result<()> {
        let permits = options
            .max_parallel_downloads
            .unwrap_or(self.segments.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        self.discard_stale_segments()?;

        let mut tasks = JoinSet::new();

        for segment in self.segments.iter().cloned() {
            let video = Arc::clone(&self.video);
            let source = Arc::clone(&source);
            let progress = Arc::clone(&progress);
            let semaphore = Arc::clone(&semaphore);
            let retry = options.retry;
            let timeout = options.timeout;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

                segment
                    .download(source.as_ref(), &video.url, video.size, &progress, retry, timeout)
                    .await?;

                Ok::<_, DownloadError>(segment.ordinal())
            });
        }

        let total_segments = tasks.len();
        let mut finished = 0;

        // completion order, so a fatal error is seen while other segments still retry
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(ordinal)) => {
                    finished += 1;
                    debug!(ordinal, "{} / {} segments done", finished, total_segments);
                    Ok(())
                }
                Ok(Err(err)) => Err(err),
                Err(err) => Err(DownloadError::Join(err)),
            };

            if let Err(err) = outcome {
                tasks.abort_all();
                return Err(err);
            }
        }

        Ok(())
    }

    /// Drop segment files left by a run with another plan, then record ours.
    fn discard_stale_segments(&self) -> Result<()> {
        let destination = &self.video.destination;
        let marker = marker_path(destination);
        let current = PlanMarker {
            size: self.video.size,
            segments: self.segments.len(),
        };

        let recorded = match std::fs::read(&marker) {
            Ok(raw) => serde_json::from_slice::<PlanMarker>(&raw).ok(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        match recorded {
            Some(plan) if plan == current => {}
            Some(plan) => {
                warn!(
                    old_size = plan.size,
                    old_segments = plan.segments,
                    size = current.size,
                    segments = current.segments,
                    "leftover segments were cut for another plan, starting over"
                );
                for ordinal in 0..plan.segments.max(current.segments) {
                    match std::fs::remove_file(segment_path(destination, ordinal)) {
                        Ok(()) => {}
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            None => {
                if self.segments.iter().any(|s| s.path.exists()) {
                    warn!("resuming segment files with no recorded plan; they must come from a run with the same --segments");
                }
            }
        }

        let raw = serde_json::to_vec(&current)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(&marker, raw)?;

        Ok(())
    }

    /// Concatenate the segment files in ordinal order into the destination,
    /// deleting each one once it has been copied. Returns the merged length.
    pub fn combine(&self) -> Result<u64> {
        let destination = &self.video.destination;

        // refuse before writing anything if the session is incomplete
        if let Some(missing) = self.segments.iter().find(|s| !s.path.exists()) {
            return Err(DownloadError::MergeIo {
                path: missing.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "segment file missing"),
            });
        }

        let merged = self.append_segments();

        let merged = match merged {
            Ok(len) => len,
            Err(err) => {
                let _ = std::fs::remove_file(destination);
                return Err(err);
            }
        };

        if merged != self.video.size {
            let _ = std::fs::remove_file(destination);
            return Err(DownloadError::SizeMismatch {
                expected: self.video.size,
                actual: merged,
            });
        }

        match std::fs::remove_file(marker_path(destination)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        info!(destination = %destination.display(), bytes = merged, "merged segments");

        Ok(merged)
    }

    fn append_segments(&self) -> Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.video.destination)?;

        let mut merged = 0;

        for segment in &self.segments {
            let merge_failed = |source| DownloadError::MergeIo {
                path: segment.path.clone(),
                source,
            };

            let mut seg_file = std::fs::File::open(&segment.path).map_err(merge_failed)?;
            merged += std::io::copy(&mut seg_file, &mut file).map_err(merge_failed)?;
            drop(seg_file);

            std::fs::remove_file(&segment.path).map_err(merge_failed)?;
        }

        file.sync_all()?;

        Ok(merged)
    }
}
