use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use std::sync::Arc;

use crate::transfer::RunSummary;

/// Try to enable ANSI escape sequence support on Windows consoles.
/// Returns true if enabling succeeded, false otherwise.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

// Terminals elsewhere handle ANSI already; colours are still decided by the caller.
#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    false
}

fn colors_enabled() -> bool {
    cfg!(not(windows)) || try_enable_ansi_on_windows()
}

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

fn total_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// MultiProgress with a one-line header above a byte-count bar. When `show`
/// is false both bars are hidden, but still count, so callers never branch.
pub fn init_progress(show: bool, total: u64) -> (Arc<MultiProgress>, ProgressBar, ProgressBar) {
    if !show {
        let mp = Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        return (mp, ProgressBar::hidden(), ProgressBar::hidden());
    }
    let mp = Arc::new(MultiProgress::new());
    let header = mp.add(ProgressBar::new_spinner());
    header.set_style(
        ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    let total_pb = mp.add(ProgressBar::new(total));
    total_pb.set_style(total_style());
    (mp, total_pb, header)
}

/// Fields are: Action, Worker, Part, Backoff, each aligned and separated by 4 spaces.
pub fn set_startup_header(
    header: &ProgressBar,
    action: &str,
    worker_count: usize,
    part_size: u64,
    backoff_ms: u64,
) {
    let action_field = format!("{:<14}", format!("Action:{}", action));
    let conc_field = format!("{:<10}", format!("Worker:{}", worker_count));
    let part_field = format!("{:<16}", format!("Part:{}", human_bytes(part_size)));
    let backoff_field = format!("{:<14}", format!("Backoff:{}ms", backoff_ms));
    let msg = if colors_enabled() {
        format!(
            "{}    {}    {}    {}",
            action_field.green(),
            conc_field.cyan(),
            part_field.magenta(),
            backoff_field.yellow()
        )
    } else {
        format!("{}    {}    {}    {}", action_field, conc_field, part_field, backoff_field)
    };
    header.set_message(msg);
}

/// One summary line on stdout; average rate counts only bytes actually sent.
pub fn print_summary(summary: &RunSummary) {
    let secs = summary.elapsed.as_secs_f64();
    let rate = if secs > 0.0 { summary.bytes as f64 / 1024.0 / 1024.0 / secs } else { 0.0 };
    let line = format!(
        "{} file(s): {} uploaded, {} skipped, {} failed, {} cancelled | {} in {:.2}s ({:.2} MiB/s)",
        summary.files,
        summary.uploaded,
        summary.skipped,
        summary.failed,
        summary.cancelled,
        human_bytes(summary.bytes),
        secs,
        rate
    );
    if !summary.is_success() {
        if colors_enabled() {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    } else {
        println!("{}", line);
    }
}
