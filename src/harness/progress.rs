//! Live status line

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use super::stats::RunStats;

/// Single overwritten status line on stderr
pub struct StatusLine {
    bar: ProgressBar,
    started: Instant,
}

impl StatusLine {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Batch-mode status: progress towards `total` planned calls
    pub fn batch(&self, stats: &RunStats, total: u64) {
        self.bar.set_message(batch_status(stats, total, self.elapsed()));
    }

    pub fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// `42.0% | 420/1000 calls | 210 calls/s | success 97.6% | errors 10`
pub fn batch_status(stats: &RunStats, total: u64, elapsed: Duration) -> String {
    let pct = if total > 0 {
        stats.calls as f64 / total as f64 * 100.0
    } else {
        100.0
    };
    let secs = elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        stats.calls as f64 / secs
    } else {
        0.0
    };
    format!(
        "{:.1}% | {}/{} calls | {:.0} calls/s | success {:.1}% | errors {}",
        pct,
        stats.calls,
        total,
        throughput,
        stats.success_rate(),
        stats.errors
    )
}

/// Sustained-mode status for the last reporting window
pub fn sustained_status(stats: &RunStats, window_calls: u64, window: Duration, in_flight: usize) -> String {
    let per_sec = if window.as_secs_f64() > 0.0 {
        window_calls as f64 / window.as_secs_f64()
    } else {
        0.0
    };
    format!(
        "Calls: {} | {:.0}/s | Success: {:.1}% | Errors: {} | In-flight: {}",
        stats.calls,
        per_sec,
        stats.success_rate(),
        stats.errors,
        in_flight
    )
}
