use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

const BAR_STYLE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

const BAR_CHARS: &str = "█▓▒░  ";

/// Byte counter shared by every fetch task of one session.
///
/// Fetchers report deltas, never absolute positions, so a retried segment
/// cannot be counted twice.
pub struct ProgressTracker {
    transferred: AtomicU64,
    total: u64,
    bar: ProgressBar,
}

impl ProgressTracker {
    pub fn new(total: u64, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(BAR_STYLE) {
                bar.set_style(style.progress_chars(BAR_CHARS));
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            transferred: AtomicU64::new(0),
            total,
            bar,
        }
    }

    pub fn hidden(total: u64) -> Self {
        Self::new(total, false)
    }

    pub fn advance(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.transferred.fetch_add(delta, Ordering::Relaxed);
        self.bar.inc(delta);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn finish(&self, message: &'static str) {
        self.bar.finish_with_message(message);
    }
}
