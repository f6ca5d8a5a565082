use std::sync::Arc;

use b2_client::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{msg:.bold} [{bar:40.green/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// A byte progress bar on stderr, or a hidden one when progress is off.
pub fn transfer_bar(enabled: bool, action: &str, name: &str, total: u64) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let bar = ProgressBar::new(total).with_style(style);
    bar.set_message(format!("{action} {name}"));
    bar
}

/// Feeds engine progress into `bar`. The total is taken from the engine since a download only
/// learns it from the first response.
pub fn bar_callback(bar: &ProgressBar) -> ProgressCallback {
    let bar = bar.clone();
    Arc::new(move |_delta, completed, total| {
        if bar.length() != Some(total) {
            bar.set_length(total);
        }
        bar.set_position(completed);
    })
}
