use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info};

use crate::download::video::{download_video, DownloadTarget, SessionOutcome};
use crate::download::RangeSource;
use crate::error::{DownloadError, Result};
use crate::options::Options;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEntity {
    pub url: String,
    pub key_url: String,
    pub output: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn read_batch(file: &Path) -> Result<Vec<DownloadEntity>> {
    let reader = std::io::BufReader::new(std::fs::File::open(file)?);

    serde_json::from_reader(reader).map_err(|source| DownloadError::Batch {
        path: file.to_path_buf(),
        source,
    })
}

pub async fn download_file(source: Arc<dyn RangeSource>, file: &Path, options: &Options) -> Result<BatchSummary> {
    let downloads = read_batch(file)?;
    info!(file = %file.display(), entries = downloads.len(), "read download list");

    Ok(download_all(source, downloads, options).await)
}

/// Download each entry in turn. A failed entry is logged and the batch moves on.
pub async fn download_all(
    source: Arc<dyn RangeSource>,
    downloads: impl IntoIterator<Item = DownloadEntity>,
    options: &Options,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for download in downloads {
        let outcome = match DownloadTarget::parse(&download.url, &download.key_url, &download.output) {
            Ok(target) => download_video(Arc::clone(&source), &target, options).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(SessionOutcome::Completed { bytes }) => {
                info!(output = %download.output, bytes, "finished downloading");
                summary.completed += 1;
            }
            Ok(SessionOutcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                error!(url = %download.url, output = %download.output, "error downloading: {}", err);
                summary.failed += 1;
            }
        }
    }

    info!(
        completed = summary.completed,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch finished"
    );

    summary
}
