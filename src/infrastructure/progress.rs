//! Fixed waits shown as a progress bar.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::sleep;

const WAIT_TEMPLATE: &str = "{msg} {bar:40.cyan/blue} {pos}/{len}s";
const PROGRESS_CHARS: &str = "█▓▒░ ";
const TICK: Duration = Duration::from_secs(1);

fn wait_bar(seconds: u64, message: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(seconds);
    let style = ProgressStyle::default_bar()
        .template(WAIT_TEMPLATE)
        .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars(PROGRESS_CHARS));
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar
}

/// Sleep for `duration`, advancing a bar once per second.
pub async fn wait_with_progress(duration: Duration, message: &str, visible: bool) {
    let seconds = duration.as_secs();
    let bar = wait_bar(seconds, message, visible);
    for _ in 0..seconds {
        sleep(TICK).await;
        bar.inc(1);
    }
    let rest = duration.saturating_sub(Duration::from_secs(seconds));
    if !rest.is_zero() {
        sleep(rest).await;
    }
    bar.finish_and_clear();
}
