// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations.

use super::common::BaseApp;
use crate::{ExpectedError, Result, output::OutputWriter};
use camino::Utf8PathBuf;
use clap::Args;
use owo_colors::OwoColorize;
use retry_ledger::{
    aggregator::{ResultAggregator, RunClassification, RunSummary},
    coordination::ExecutionIdCoordinator,
    helpers::plural,
    reporter::{DispatchOutcome, DispatchSummary, FinalReportDispatcher, OutboxReportingService},
    rerun::RerunArtifact,
    service::{FinishOutcome, RetryCoordinationService},
    store::PersistentAttemptStore,
};
use retry_ledger_metadata::{AttemptRecordMap, FinalStatus, LedgerExitCode, LifecycleEvent};
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use swrite::{SWrite, swrite, swriteln};
use tracing::{info, warn};

#[derive(Debug, Args)]
pub(crate) struct IngestOpts {
    /// File with one JSON lifecycle event per line [default: standard input]
    #[arg(value_name = "FILE")]
    events: Option<Utf8PathBuf>,
}

impl IngestOpts {
    /// Applies the events to the retry state of one process invocation.
    ///
    /// If the stream ends without a `run-finished` event, the run is finished at end of input.
    pub(crate) fn exec(self, base: &BaseApp) -> Result<i32> {
        let service = RetryCoordinationService::with_outbox(&base.config, base.flags.clone());
        service
            .begin_run()
            .map_err(|err| ExpectedError::ResetFailed { err })?;

        let (source_name, reader): (String, Box<dyn BufRead>) = match &self.events {
            Some(path) if path.as_str() != "-" => {
                let file =
                    std::fs::File::open(path).map_err(|error| ExpectedError::EventReadError {
                        source_name: path.to_string(),
                        error,
                    })?;
                (path.to_string(), Box::new(BufReader::new(file)))
            }
            _ => ("standard input".to_owned(), Box::new(std::io::stdin().lock())),
        };

        let mut applied = 0_usize;
        let mut outcome = None;
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|error| ExpectedError::EventReadError {
                source_name: source_name.clone(),
                error,
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event: LifecycleEvent =
                serde_json::from_str(line).map_err(|error| ExpectedError::EventParseError {
                    source_name: source_name.clone(),
                    line_number: index + 1,
                    error,
                })?;
            applied += 1;

            if event == LifecycleEvent::RunFinished {
                outcome = Some(service.finish());
                break;
            }
            service.handle(&event);
        }

        let outcome = outcome.unwrap_or_else(|| service.finish());
        info!(
            "applied {} from {source_name}",
            plural(applied, "event", "events")
        );
        report_finish(&base.config.reporting().consolidated_report, outcome)
    }
}

fn report_finish(consolidated_report: &camino::Utf8Path, outcome: FinishOutcome) -> Result<i32> {
    let FinishOutcome { rerun, dispatch } = outcome;
    let run_end = rerun.map_err(|err| ExpectedError::RerunArtifactWriteError { err })?;
    if run_end.retry_pending() {
        info!(
            "{} pending a retry",
            plural(run_end.pending.len(), "scenario", "scenarios")
        );
    }
    if let DispatchOutcome::Dispatched(summary) = dispatch {
        check_dispatch(consolidated_report, &summary)?;
    }
    Ok(LedgerExitCode::OK)
}

fn check_dispatch(consolidated_report: &camino::Utf8Path, summary: &DispatchSummary) -> Result<()> {
    if summary.classification == RunClassification::RetryBearing
        && summary.consolidated_report.is_none()
    {
        return Err(ExpectedError::ConsolidatedReportNotWritten {
            path: consolidated_report.to_owned(),
        });
    }
    if summary.statuses_failed > 0 {
        warn!(
            "{} could not be reported",
            plural(summary.statuses_failed, "final status", "final statuses")
        );
    }
    Ok(())
}

#[derive(Debug, Args)]
pub(crate) struct StatusOpts {
    /// Print the summary and records as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct StatusJson<'a> {
    summary: RunSummary,
    records: &'a AttemptRecordMap,
}

impl StatusOpts {
    pub(crate) fn exec(self, base: &BaseApp, writer: &mut OutputWriter) -> Result<i32> {
        let aggregator = load_aggregator(base);
        let records = aggregator.get_all();
        let summary = aggregator.summary();

        let mut stdout = writer.stdout_writer();
        if self.json {
            serde_json::to_writer_pretty(
                &mut stdout,
                &StatusJson {
                    summary,
                    records: &records,
                },
            )
            .map_err(ExpectedError::write_output)?;
            writeln!(stdout).map_err(ExpectedError::write_output)?;
        } else {
            let out = render_status(base, &records, &summary);
            stdout
                .write_all(out.as_bytes())
                .map_err(ExpectedError::write_output)?;
        }
        stdout.flush().map_err(ExpectedError::write_output)?;
        Ok(LedgerExitCode::OK)
    }
}

fn render_status(base: &BaseApp, records: &AttemptRecordMap, summary: &RunSummary) -> String {
    let styles = base.output.stdout_styles();
    let mut out = String::new();

    for record in records.values() {
        let (label, style) = match record.final_status {
            FinalStatus::Passed if record.is_flaky() => ("FLAKY", styles.flaky),
            FinalStatus::Passed => ("PASS", styles.pass),
            FinalStatus::Failed => ("FAIL", styles.fail),
        };
        swrite!(
            out,
            "{:>5} {} {} ",
            label.style(style),
            record.test_key.as_deref().unwrap_or("-").style(styles.bold),
            record.test_name,
        );
        let attempts = format!(
            "({}, {} failed)",
            plural(record.total_attempts, "attempt", "attempts"),
            record.failed_attempts,
        );
        swriteln!(out, "{}", attempts.style(styles.dimmed));

        if base.output.verbose
            && let Some(message) = &record.last_failure_message
        {
            swriteln!(out, "      last failure: {message}");
        }
    }

    swriteln!(
        out,
        "{}: {} passed ({} flaky), {} failed, {} [{}]",
        plural(summary.tests, "test", "tests").style(styles.bold),
        summary.passed,
        summary.flaky,
        summary.failed,
        plural(summary.total_attempts, "attempt", "attempts"),
        summary.classification,
    );
    out
}

pub(crate) fn exec_classify(base: &BaseApp, writer: &mut OutputWriter) -> Result<i32> {
    let classification = load_aggregator(base).classification();
    let mut stdout = writer.stdout_writer();
    writeln!(stdout, "{classification}").map_err(ExpectedError::write_output)?;
    stdout.flush().map_err(ExpectedError::write_output)?;
    Ok(LedgerExitCode::OK)
}

#[derive(Debug, Args)]
pub(crate) struct RerunOpts {
    /// Exit with code 4 if any scenario is waiting to be relaunched
    #[arg(long)]
    check: bool,
}

impl RerunOpts {
    pub(crate) fn exec(self, base: &BaseApp, writer: &mut OutputWriter) -> Result<i32> {
        let artifact = RerunArtifact::new(base.config.rerun().path.clone());
        let locations = artifact
            .read()
            .map_err(|err| ExpectedError::RerunArtifactReadError { err })?;

        let mut stdout = writer.stdout_writer();
        for location in &locations {
            writeln!(stdout, "{location}").map_err(ExpectedError::write_output)?;
        }
        stdout.flush().map_err(ExpectedError::write_output)?;

        if self.check && !locations.is_empty() {
            Ok(LedgerExitCode::RERUN_PENDING)
        } else {
            Ok(LedgerExitCode::OK)
        }
    }
}

#[derive(Debug, Args)]
pub(crate) struct ExecutionIdOpts {
    /// Create an execution through the outbox if none exists yet
    #[arg(long)]
    create: bool,
}

impl ExecutionIdOpts {
    pub(crate) fn exec(self, base: &BaseApp, writer: &mut OutputWriter) -> Result<i32> {
        let coordinator = coordinator(base);
        let id = if self.create {
            coordinator.get_or_create(&outbox(base))
        } else {
            coordinator.get()
        };

        match id {
            Some(id) => {
                let mut stdout = writer.stdout_writer();
                writeln!(stdout, "{id}").map_err(ExpectedError::write_output)?;
                stdout.flush().map_err(ExpectedError::write_output)?;
            }
            None => info!("no execution id for the current run"),
        }
        Ok(LedgerExitCode::OK)
    }
}

#[derive(Debug, Args)]
pub(crate) struct DispatchOpts {
    /// Treat this invocation as the final attempt even if RETRY_LEDGER_FINAL_ATTEMPT is unset
    #[arg(long)]
    final_attempt: bool,

    /// The harness's per-attempt report to attach [default: reporting.plain-report]
    #[arg(long, value_name = "PATH")]
    plain_report: Option<Utf8PathBuf>,
}

impl DispatchOpts {
    /// Dispatches the final report from the persisted attempt history, for harnesses that can't
    /// hold a retry-ledger process open across the whole run.
    pub(crate) fn exec(self, base: &BaseApp) -> Result<i32> {
        let final_attempt = self.final_attempt || base.flags.final_attempt;
        let mut settings = base.config.reporting().clone();
        if let Some(path) = self.plain_report {
            settings.plain_report = Some(path);
        }
        let consolidated_report = settings.consolidated_report.clone();

        let dispatcher = FinalReportDispatcher::new(settings, final_attempt);
        let outcome = dispatcher.dispatch(&load_aggregator(base), &coordinator(base), &outbox(base));
        match outcome {
            DispatchOutcome::Dispatched(summary) => {
                check_dispatch(&consolidated_report, &summary)?;
            }
            DispatchOutcome::NotFinalAttempt => {
                warn!(
                    "not the final attempt, nothing dispatched \
                     (hint: set RETRY_LEDGER_FINAL_ATTEMPT or pass --final-attempt)"
                );
            }
            DispatchOutcome::AlreadyDispatched => {}
        }
        Ok(LedgerExitCode::OK)
    }
}

/// Removes all retry state: the attempt store, the persisted execution id and the rerun artifact.
pub(crate) fn exec_reset(base: &BaseApp) -> Result<i32> {
    let aggregator = ResultAggregator::new(PersistentAttemptStore::new(base.config.store_dir()));
    aggregator
        .clear()
        .map_err(|err| ExpectedError::ResetFailed { err })?;
    coordinator(base).reset();
    RerunArtifact::new(base.config.rerun().path.clone())
        .remove()
        .map_err(|err| ExpectedError::ResetFailed { err })?;
    info!("cleared retry state in {}", base.config.store_dir());
    Ok(LedgerExitCode::OK)
}

fn load_aggregator(base: &BaseApp) -> ResultAggregator {
    let aggregator = ResultAggregator::new(PersistentAttemptStore::new(base.config.store_dir()));
    aggregator.load();
    aggregator
}

fn coordinator(base: &BaseApp) -> ExecutionIdCoordinator {
    ExecutionIdCoordinator::new(
        base.config.store_dir(),
        base.flags.execution_id.clone(),
        base.config.reporting().summary.clone(),
    )
}

fn outbox(base: &BaseApp) -> OutboxReportingService {
    let reporting = base.config.reporting();
    OutboxReportingService::new(reporting.outbox_dir.clone(), reporting.project.clone())
}
