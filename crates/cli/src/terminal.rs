use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use sitescan_queue::RunSummary;

use crate::prober::HttpReport;

struct Colors;

impl Colors {
    const OK: Color = Color::Green;
    const FAILED: Color = Color::Red;
    const WARN: Color = Color::Yellow;
    const DIM: Color = Color::DarkGrey;
}

/// Overwrite the current stderr line with `line`.
pub fn print_status_line(line: &str) {
    let mut stderr = io::stderr();
    let _ = execute!(
        stderr,
        Print("\r"),
        Clear(ClearType::CurrentLine),
        SetForegroundColor(Colors::DIM),
        Print(line),
        ResetColor,
    );
}

/// Terminate the status line so later output starts on a fresh line.
pub fn finish_status_line() {
    let _ = execute!(io::stderr(), Print("\n"));
}

/// Human-readable summary on stdout.
pub fn print_summary(summary: &RunSummary<HttpReport>) -> Result<()> {
    let mut out = io::stdout();

    for task in &summary.completed {
        let Some(report) = &task.result else { continue };
        execute!(
            out,
            SetForegroundColor(Colors::OK),
            Print(format!("{:>4} ", report.status)),
            ResetColor,
            Print(&task.url),
            SetForegroundColor(Colors::DIM),
            Print(format!("  {}ms", report.elapsed_ms)),
            ResetColor,
            Print("\n"),
        )?;
    }

    for failed in &summary.failed {
        execute!(
            out,
            SetForegroundColor(Colors::FAILED),
            Print("FAIL "),
            ResetColor,
            Print(&failed.url),
            SetForegroundColor(Colors::DIM),
            Print(format!("  after {} attempt(s): {}", failed.attempts, failed.error)),
            ResetColor,
            Print("\n"),
        )?;
    }

    let stats = &summary.stats;
    let color = if summary.is_success() {
        Colors::OK
    } else if summary.completed.is_empty() {
        Colors::FAILED
    } else {
        Colors::WARN
    };
    execute!(
        out,
        Print("---\n"),
        SetForegroundColor(color),
        Print(format!(
            "{} completed, {} failed of {} in {:.1}s{}\n",
            stats.completed,
            stats.failed,
            stats.total,
            summary.elapsed().as_secs_f64(),
            if summary.cancelled { " (cancelled)" } else { "" }
        )),
        ResetColor,
    )?;
    out.flush()?;
    Ok(())
}

/// JSON summary on stdout.
pub fn print_summary_json(summary: &RunSummary<HttpReport>) -> Result<()> {
    let mut out = io::stdout();
    serde_json::to_writer_pretty(&mut out, summary)?;
    writeln!(out)?;
    Ok(())
}
