// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ConsolidatedReport, ReportingService};
use crate::{
    aggregator::{ResultAggregator, RunClassification},
    config::ReportingSettings,
    coordination::{ExecutionId, ExecutionIdCoordinator},
    errors::DisplayErrorChain,
    helpers::plural,
};
use camino::{Utf8Path, Utf8PathBuf};
use retry_ledger_metadata::{
    AttemptRecord, ReportedStatus, TestExecutionReport, TestStatusUpdate,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// The result of [`FinalReportDispatcher::dispatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This isn't the final attempt, so nothing was reported.
    NotFinalAttempt,

    /// The final report was already dispatched by this dispatcher.
    AlreadyDispatched,

    /// The final report was dispatched.
    Dispatched(DispatchSummary),
}

/// What a dispatch did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchSummary {
    /// The execution results were reported into, or `None` if no execution was available.
    pub execution_id: Option<ExecutionId>,

    /// The classification the report was shaped by.
    pub classification: RunClassification,

    /// Where the consolidated report was written, for retry-bearing runs.
    pub consolidated_report: Option<Utf8PathBuf>,

    /// Number of artifacts attached.
    pub attachments: usize,

    /// Number of status updates the service accepted.
    pub statuses_reported: usize,

    /// Number of status updates that failed.
    pub statuses_failed: usize,

    /// Number of tests skipped because they have no external key.
    pub skipped_without_key: usize,
}

/// Reports exactly one final status per test, after the last attempt of a retry sequence.
///
/// For single runs, the harness's plain report is attached as is. For retry-bearing runs, a
/// consolidated report is rendered from the aggregated records and attached along with the plain
/// report, then every test with an external key gets one status update.
///
/// Everything is best-effort: failures are logged and the dispatch carries on. The consolidated
/// report is written before anything is sent, so it reflects the last known state even if the
/// service is unreachable.
#[derive(Debug)]
pub struct FinalReportDispatcher {
    settings: ReportingSettings,
    final_attempt: bool,
    dispatched: AtomicBool,
}

impl FinalReportDispatcher {
    /// Creates a dispatcher. It only dispatches if `final_attempt` is true.
    pub fn new(settings: ReportingSettings, final_attempt: bool) -> Self {
        Self {
            settings,
            final_attempt,
            dispatched: AtomicBool::new(false),
        }
    }

    /// Returns true if this dispatcher runs for this process invocation.
    pub fn is_final_attempt(&self) -> bool {
        self.final_attempt
    }

    /// Dispatches the final report, then resets the shared execution id.
    ///
    /// Runs at most once per dispatcher.
    pub fn dispatch(
        &self,
        aggregator: &ResultAggregator,
        coordinator: &ExecutionIdCoordinator,
        service: &dyn ReportingService,
    ) -> DispatchOutcome {
        if !self.final_attempt {
            return DispatchOutcome::NotFinalAttempt;
        }
        if self.dispatched.swap(true, Ordering::SeqCst) {
            return DispatchOutcome::AlreadyDispatched;
        }

        let records = aggregator.get_all();
        let classification = aggregator.classification();
        let mut summary = DispatchSummary {
            execution_id: None,
            classification,
            consolidated_report: None,
            attachments: 0,
            statuses_reported: 0,
            statuses_failed: 0,
            skipped_without_key: 0,
        };

        if classification == RunClassification::RetryBearing {
            let path = &self.settings.consolidated_report;
            match ConsolidatedReport::new(&self.settings.summary, &records).write(path) {
                Ok(()) => {
                    info!(path = %path, "wrote consolidated report");
                    summary.consolidated_report = Some(path.clone());
                }
                Err(error) => warn!(
                    "failed to write consolidated report: {}",
                    DisplayErrorChain::new(&error),
                ),
            }
        }

        let Some(execution_id) = coordinator.get_or_create(service) else {
            warn!("no execution available, skipping final report");
            coordinator.reset();
            return DispatchOutcome::Dispatched(summary);
        };
        summary.execution_id = Some(execution_id.clone());

        if let Some(path) = &summary.consolidated_report {
            summary.attachments += self.attach(service, &execution_id, path);
        }
        if let Some(path) = &self.settings.plain_report {
            summary.attachments += self.attach(service, &execution_id, path);
        }

        if classification == RunClassification::RetryBearing {
            for record in records.values() {
                if record.total_attempts == 0 {
                    continue;
                }
                let Some(test_key) = &record.test_key else {
                    summary.skipped_without_key += 1;
                    continue;
                };
                let report = TestExecutionReport {
                    test_execution_key: execution_id.to_string(),
                    tests: vec![TestStatusUpdate {
                        test_key: test_key.clone(),
                        status: ReportedStatus::from(record.final_status),
                        comment: Some(status_comment(record)),
                        defects: Vec::new(),
                    }],
                };
                match service.report_status(&report) {
                    Ok(()) => summary.statuses_reported += 1,
                    Err(error) => {
                        summary.statuses_failed += 1;
                        warn!(
                            test_key = test_key.as_str(),
                            attempt = record.total_attempts,
                            execution_id = %execution_id,
                            "failed to report final status: {}",
                            DisplayErrorChain::new(&error),
                        );
                    }
                }
            }
        }

        info!(
            execution_id = %execution_id,
            "dispatched final report ({}, {})",
            classification,
            plural(summary.statuses_reported, "status update", "status updates"),
        );
        coordinator.reset();
        DispatchOutcome::Dispatched(summary)
    }

    fn attach(
        &self,
        service: &dyn ReportingService,
        execution_id: &ExecutionId,
        path: &Utf8Path,
    ) -> usize {
        match service.attach_artifact(execution_id, path) {
            Ok(()) => 1,
            Err(error) => {
                warn!(
                    execution_id = %execution_id,
                    "failed to attach {path}: {}",
                    DisplayErrorChain::new(&error),
                );
                0
            }
        }
    }
}

/// Summarizes a record's attempts for the status comment.
pub(crate) fn status_comment(record: &AttemptRecord) -> String {
    let attempts = plural(record.total_attempts, "attempt", "attempts");
    if record.final_status.is_passed() {
        if record.failed_attempts > 0 {
            format!(
                "Passed after {attempts} ({} failed)",
                record.failed_attempts
            )
        } else {
            format!("Passed after {attempts}")
        }
    } else {
        match &record.last_failure_message {
            Some(message) => format!("Failed after {attempts}. Last failure: {message}"),
            None => format!("Failed after {attempts}"),
        }
    }
}
