//! Segmented, resumable downloader for encrypted transport-stream videos.
//!
//! A video is split into byte ranges that are fetched concurrently into
//! per-range files next to the destination, merged in order, and finally
//! decrypted with AES-128-CBC using a key fetched from a second URL.

pub mod download;
pub mod error;
pub mod file;
pub mod logging;
pub mod options;

pub use download::video::{download_video, DownloadTarget, SessionOutcome};
pub use download::{DownloadClient, RangeSource};
pub use error::{DownloadError, Result};
pub use options::{Options, RetryPolicy};
