//! Transfer progress display with progress bars.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";

/// One bar per transfer direction, driven by fractional progress
pub struct TransferProgress {
    bar: ProgressBar,
    total_bytes: u64,
}

impl TransferProgress {
    /// Add a bar for a transfer of `total_bytes` to `group`
    ///
    /// # Errors
    ///
    /// Returns an error if the bar template is rejected.
    pub fn new(
        group: &MultiProgress,
        total_bytes: u64,
        label: &str,
        filename: &str,
    ) -> anyhow::Result<Self> {
        let bar = group.add(ProgressBar::new(total_bytes));
        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)?
                .progress_chars("#>-"),
        );
        bar.set_message(format!("{label}: {filename}"));
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(Self { bar, total_bytes })
    }

    /// Move the bar to `progress` (0 to 1) of the total
    pub fn update(&self, progress: f64) {
        let position = (self.total_bytes as f64 * progress.clamp(0.0, 1.0)) as u64;
        self.bar.set_position(position);
    }

    /// Fill the bar and replace its message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.set_position(self.total_bytes);
        self.bar.finish_with_message(msg);
    }

    /// Stop the bar where it is (for errors)
    pub fn abandon_with_message(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }
}

/// Format bytes in human-readable format
///
/// # Example
///
/// ```ignore
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();

    if secs == 0 {
        format!("{millis}ms")
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
