//! Product-facing progress output.
//!
//! Tracing is for diagnostics; the `[ralph]` lines here are the
//! product. [`ProgressReporter`] is a [`ProgressObserver`] that renders
//! iteration log lines and the final summary block to a writer, shared
//! behind a mutex so wave workers can interleave whole lines safely.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::beads_bridge::Bead;
use crate::observer::ProgressObserver;
use crate::types::{BeadResult, RunSummary};

/// Humanise a duration: `450ms`, `12.3s`, `5m30s`, `2h0m5s`.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }
    if d < Duration::from_secs(60) {
        return format!("{:.1}s", d.as_secs_f64());
    }
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let rem = secs % 60;
    if hours > 0 {
        format!("{hours}h{mins}m{rem}s")
    } else {
        format!("{mins}m{rem}s")
    }
}

/// Render the end-of-run summary block.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("[ralph] ========================================\n");
    out.push_str(&format!(
        "[ralph] run finished: {} in {}\n",
        summary.stop_reason,
        format_duration(summary.duration)
    ));
    out.push_str(&format!(
        "[ralph] iterations {} | succeeded {} | questions {} | failed {} | timed out {} | skipped {}\n",
        summary.iterations,
        summary.succeeded,
        summary.questions,
        summary.failed,
        summary.timed_out,
        summary.skipped
    ));
    out
}

/// Observer that renders the iteration log.
pub struct ProgressReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ProgressReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn line(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

impl ProgressObserver for ProgressReporter {
    fn on_loop_start(&self, root: &Path) {
        self.line(&format!(
            "[ralph] {} starting in {}",
            chrono::Local::now().format("%H:%M:%S"),
            root.display()
        ));
    }

    fn on_iteration_start(&self, iteration: u32) {
        self.line(&format!("[ralph] --- iteration {iteration} ---"));
    }

    fn on_bead_start(&self, bead: &Bead) {
        self.line(&format!("[ralph] bead {}: {}", bead.id, bead.title));
    }

    fn on_bead_complete(&self, result: &BeadResult) {
        self.line(&format!(
            "[ralph] {} -> {} in {}: {}",
            result.bead.id,
            result.outcome,
            format_duration(result.duration),
            result.summary
        ));
        if let Some(msg) = &result.error_message {
            self.line(&format!("[ralph]   agent error: {msg}"));
        }
    }

    fn on_loop_end(&self, summary: &RunSummary) {
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        let _ = out.write_all(render_summary(summary).as_bytes());
        let _ = out.flush();
    }
}
