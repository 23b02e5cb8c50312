//! Progress bar utilities using indicatif for terminal output
//!
//! The search command drives one bar per run, advanced once per completed
//! iteration; spinners cover the short store lookups of the other commands.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::services::IterationReport;

const PROGRESS_TEMPLATE: &str =
    "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg} (ETA: {eta})";
const SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:.green} {msg}";

const PROGRESS_CHARS: &str = "█▓▒░ ";
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Create a standard progress bar with ETA calculation
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(PROGRESS_CHARS);
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a spinner for indeterminate operations
pub fn create_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_CHARS);
    spinner.set_style(style);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Progress bar that never draws, for JSON mode
pub fn create_hidden_progress_bar(total: u64) -> ProgressBar {
    ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::hidden())
}

/// One-line summary of an iteration for the progress bar message
pub fn iteration_message(report: &IterationReport, best_so_far: Option<f64>) -> String {
    let origin = report
        .parent_id
        .map_or_else(|| "root".to_string(), |id| format!("parent #{id}"));
    let best = best_so_far.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
    format!(
        "{origin}: {}/{} extracted, {} evaluated, {} stored | best {best}",
        report.extracted, report.generated, report.evaluated, report.persisted
    )
}
