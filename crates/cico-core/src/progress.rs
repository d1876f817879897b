//! Bulk export progress: percentage, gauge, elapsed time, ETA.

use tokio::time::Instant;

pub const BAR_CELLS: usize = 10;
const BAR_FILLED: char = '▓';
const BAR_EMPTY: char = '░';

/// Derived view of an export's progress; recomputed on demand, never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
    pub bar: String,
    /// Milliseconds since the export started.
    pub elapsed_ms: f64,
    /// Estimated milliseconds left; may be non-finite in degenerate inputs.
    pub eta_ms: f64,
}

impl ProgressSnapshot {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }
}

/// `floor(100 * completed / total)`, clamped to 100; 0 for an empty job.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (completed.min(total) as u128 * 100) / total as u128;
    pct as u8
}

/// Ten-cell textual gauge.
pub fn bar(percent: u8) -> String {
    let filled = (usize::from(percent) / 10).min(BAR_CELLS);
    let mut out = String::with_capacity(BAR_CELLS * 3);
    out.extend(std::iter::repeat(BAR_FILLED).take(filled));
    out.extend(std::iter::repeat(BAR_EMPTY).take(BAR_CELLS - filled));
    out
}

pub fn snapshot(completed: usize, total: usize, start: Instant, now: Instant) -> ProgressSnapshot {
    let pct = percent(completed, total);
    let elapsed_ms = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
    let rate = if completed > 0 {
        elapsed_ms / completed as f64
    } else {
        0.0
    };
    let eta_ms = rate * total.saturating_sub(completed) as f64;

    ProgressSnapshot {
        completed,
        total,
        percent: pct,
        bar: bar(pct),
        elapsed_ms,
        eta_ms,
    }
}

/// `"<m>m <s>s"`, or a placeholder when the value is not a usable duration.
pub fn format_time(ms: f64) -> String {
    if !ms.is_finite() || ms < 0.0 {
        return "Calculating...".to_string();
    }
    let secs = (ms / 1000.0).floor() as u64;
    format!("{}m {}s", secs / 60, secs % 60)
}

/// HTML status message for a running export.
pub fn render_progress_html(s: &ProgressSnapshot) -> String {
    format!(
        "📥 <b>Uploading Attendance Data</b>\n\n\
         {} <b>{}%</b>\n\n\
         ✅ <b>Completed:</b> {}/{}\n\
         ⏳ <b>Left:</b> {}\n\
         ⏱ <b>Time Taken:</b> {}\n\
         🚀 <b>ETA:</b> {}",
        s.bar,
        s.percent,
        s.completed,
        s.total,
        s.remaining(),
        format_time(s.elapsed_ms),
        format_time(s.eta_ms),
    )
}

pub fn render_done_html(s: &ProgressSnapshot) -> String {
    format!("{}\n\n✅ <b>Done!</b>", render_progress_html(s))
}

pub fn render_cancelled_html(completed: usize, total: usize) -> String {
    format!("🚫 <b>Upload Cancelled</b>\n\nCompleted: {completed}/{total}")
}

pub fn render_failed_html(completed: usize, total: usize) -> String {
    format!("❌ <b>Upload Failed</b>\n\nCompleted: {completed}/{total}")
}
