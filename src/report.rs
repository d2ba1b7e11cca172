//! Human-readable reports for the one-shot CLI modes.

use std::io::{self, Write};

use colored::*;
use colourado::{ColorPalette, PaletteType};
use itertools::zip;

use crate::job::JobOutcome;
use crate::reconcile::ReconciliationResult;
use crate::scheduler::{FleetReport, ServerStatus};

fn palette(n: usize) -> Vec<colourado::Color> {
    if n == 0 {
        return vec![];
    }
    ColorPalette::new(n as u32, PaletteType::Pastel, false).colors
}

fn outcome_text(result: &ReconciliationResult) -> ColoredString {
    match &result.job {
        None => "cache loaded".green(),
        Some(job) => match &job.outcome {
            JobOutcome::Success => "cache workflow succeeded".green(),
            JobOutcome::TimedOut => "cache workflow still running at deadline".yellow(),
            JobOutcome::StillRunning => "earlier cache workflow still queued, not resubmitted".yellow(),
            JobOutcome::Failed(reason) => format!("cache workflow failed: {}", reason).red(),
            JobOutcome::SubmissionError(reason) => {
                format!("cache workflow not submitted: {}", reason).red()
            }
        },
    }
}

pub fn write_report<W: Write>(out: &mut W, report: &FleetReport) -> io::Result<()> {
    for (result, color) in zip(&report.results, palette(report.results.len())) {
        write!(out, "{} ", result.server.prettify(color))?;
        match result.job.as_ref().and_then(|job| job.job_id.as_ref()) {
            Some(id) => writeln!(
                out,
                "{} (job {}, {} ms)",
                outcome_text(result),
                id,
                result.elapsed_ms
            )?,
            None => writeln!(out, "{}", outcome_text(result))?,
        }
    }
    for skipped in &report.skipped {
        writeln!(out, "{} {}", skipped.server, "skipped, check already in flight".yellow())?;
    }
    writeln!(
        out,
        "[Cachewarden] {} of {} servers had the cache loaded, pass took {} ms.",
        report.ready_count(),
        report.results.len(),
        (report.finished_at - report.started_at).num_milliseconds()
    )
}

pub fn write_statuses<W: Write>(out: &mut W, statuses: &[ServerStatus]) -> io::Result<()> {
    for (status, color) in zip(statuses, palette(statuses.len())) {
        let state = if status.cache_loaded {
            "cache loaded".green()
        } else {
            "cache missing".red()
        };
        writeln!(out, "{:>3} {} {}", status.index, status.server.prettify(color), state)?;
    }
    Ok(())
}
