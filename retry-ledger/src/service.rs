// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single entry point a test harness holds on to for a whole process invocation.

use crate::{
    aggregator::ResultAggregator,
    config::{ControlFlags, LedgerConfig},
    coordination::{ExecutionId, ExecutionIdCoordinator, RetrySuppressionRegistry},
    errors::{DisplayErrorChain, RemoveFileError, RerunArtifactError},
    orchestrator::{EventResponse, RunEnd, ScenarioRetryOrchestrator},
    reporter::{DispatchOutcome, FinalReportDispatcher, OutboxReportingService, ReportingService},
    rerun::RerunArtifact,
    store::PersistentAttemptStore,
};
use retry_ledger_metadata::LifecycleEvent;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What [`RetryCoordinationService::finish`] did.
#[derive(Debug)]
pub struct FinishOutcome {
    /// The state of the rerun list, or the error writing the rerun artifact.
    pub rerun: Result<RunEnd, RerunArtifactError>,

    /// Whether the final report was dispatched.
    pub dispatch: DispatchOutcome,
}

impl FinishOutcome {
    /// Returns true if a retry is pending.
    pub fn retry_pending(&self) -> bool {
        self.rerun.as_ref().is_ok_and(RunEnd::retry_pending)
    }
}

/// Owns every piece of retry coordination for one process invocation: the orchestrator (with its
/// suppression registry and aggregator), the execution id coordinator and the final report
/// dispatcher.
///
/// The harness calls [`begin_run`](Self::begin_run) once, feeds every lifecycle event to
/// [`handle`](Self::handle), and calls [`finish`](Self::finish) when it is done (or sends
/// [`LifecycleEvent::RunFinished`], which does the same).
pub struct RetryCoordinationService {
    flags: ControlFlags,
    orchestrator: ScenarioRetryOrchestrator,
    coordinator: ExecutionIdCoordinator,
    dispatcher: FinalReportDispatcher,
    reporting: Arc<dyn ReportingService>,
}

impl RetryCoordinationService {
    /// Creates a service reporting through `reporting`.
    pub fn new(
        config: &LedgerConfig,
        flags: ControlFlags,
        reporting: Arc<dyn ReportingService>,
    ) -> Self {
        let policy = config.retry_policy(&flags);
        let aggregator = ResultAggregator::new(PersistentAttemptStore::new(config.store_dir()));
        let rerun = RerunArtifact::new(config.rerun().path.clone());
        let orchestrator =
            ScenarioRetryOrchestrator::new(policy, aggregator, rerun, config.rerun().immediate)
                .with_retry_driven(flags.rerun);
        let coordinator = ExecutionIdCoordinator::new(
            config.store_dir(),
            flags.execution_id.clone(),
            config.reporting().summary.clone(),
        );
        let dispatcher = FinalReportDispatcher::new(config.reporting().clone(), flags.final_attempt);

        Self {
            flags,
            orchestrator,
            coordinator,
            dispatcher,
            reporting,
        }
    }

    /// Creates a service reporting into the configured outbox directory.
    pub fn with_outbox(config: &LedgerConfig, flags: ControlFlags) -> Self {
        let reporting = Arc::new(OutboxReportingService::new(
            config.reporting().outbox_dir.clone(),
            config.reporting().project.clone(),
        ));
        Self::new(config, flags, reporting)
    }

    /// Returns the control flags for this invocation.
    pub fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// Returns the orchestrator.
    pub fn orchestrator(&self) -> &ScenarioRetryOrchestrator {
        &self.orchestrator
    }

    /// Returns the suppression registry.
    pub fn registry(&self) -> &RetrySuppressionRegistry {
        self.orchestrator.registry()
    }

    /// Returns the result aggregator.
    pub fn aggregator(&self) -> &ResultAggregator {
        self.orchestrator.aggregator()
    }

    /// Returns the execution id coordinator.
    pub fn coordinator(&self) -> &ExecutionIdCoordinator {
        &self.coordinator
    }

    /// Starts the process invocation.
    ///
    /// Unless this invocation was launched from a rerun artifact, a new logical run begins: the
    /// attempt store and the persisted execution id from any earlier run are removed. An
    /// invocation launched from the artifact empties it instead, and rewrites it as retries are
    /// scheduled. Then the attempt history is loaded. Returns the number of records loaded.
    pub fn begin_run(&self) -> Result<usize, RemoveFileError> {
        if self.flags.rerun {
            debug!("continuing a retry sequence");
        } else {
            self.aggregator().clear()?;
            self.coordinator.reset();
        }
        self.orchestrator.begin_run();
        let loaded = self.aggregator().load();
        if loaded > 0 {
            info!("continuing with history for {} tests", loaded);
        }
        Ok(loaded)
    }

    /// Returns the shared execution id, creating an execution if needed.
    ///
    /// Harnesses that report results as they go use this together with
    /// [`EventResponse::report_now`].
    pub fn execution_id(&self) -> Option<ExecutionId> {
        self.coordinator.get_or_create(self.reporting.as_ref())
    }

    /// Handles one lifecycle event.
    pub fn handle(&self, event: &LifecycleEvent) -> EventResponse {
        match event {
            LifecycleEvent::RunFinished => {
                let outcome = self.finish();
                if let Err(error) = &outcome.rerun {
                    warn!(
                        "failed to update rerun artifact: {}",
                        DisplayErrorChain::new(error),
                    );
                }
                EventResponse::default()
            }
            other => self.orchestrator.handle(other),
        }
    }

    /// Ends the process invocation.
    ///
    /// Writes the rerun list, unless the invocation is retry-driven and already kept it current.
    /// On the final attempt, dispatches the final report (which resets the
    /// execution id). Otherwise the execution id is kept if a retry is pending, so the next
    /// invocation reports into the same execution.
    pub fn finish(&self) -> FinishOutcome {
        let rerun = self.orchestrator.finish_run();
        let retry_pending = match &rerun {
            Ok(end) => end.retry_pending(),
            Err(_) => !self.orchestrator.pending_locations().is_empty(),
        };

        let dispatch = if self.dispatcher.is_final_attempt() {
            self.dispatcher.dispatch(
                self.orchestrator.aggregator(),
                &self.coordinator,
                self.reporting.as_ref(),
            )
        } else {
            self.coordinator.finish_run(retry_pending);
            DispatchOutcome::NotFinalAttempt
        };

        FinishOutcome { rerun, dispatch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::test_helpers::RecordingService;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use retry_ledger_metadata::{FinalStatus, ReportedStatus, SourceLocation, TestIdentity};

    fn config(dir: &Utf8TempDir) -> LedgerConfig {
        let path = dir.path().join("retry-ledger.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                [retries]
                enabled = true
                count = 1

                [reporting]
                plain-report = "plain.xml"
            "#},
        )
        .unwrap();
        LedgerConfig::from_sources(dir.path(), Some(path.as_path())).unwrap()
    }

    fn checkout() -> TestIdentity {
        TestIdentity::new("Checkout")
            .with_key("QA-1")
            .with_location(SourceLocation::new("features/checkout.feature", 5))
    }

    fn login() -> TestIdentity {
        TestIdentity::new("Login")
            .with_key("QA-2")
            .with_location(SourceLocation::new("features/login.feature", 2))
    }

    fn run(service: &RetryCoordinationService, events: &[LifecycleEvent]) -> Vec<EventResponse> {
        events.iter().map(|event| service.handle(event)).collect()
    }

    #[test]
    fn two_invocation_retry_sequence() {
        let dir = Utf8TempDir::new().unwrap();
        let config = config(&dir);
        let reporting = Arc::new(RecordingService::new());

        // First invocation: Checkout fails and is scheduled for a retry.
        let first = RetryCoordinationService::new(
            &config,
            ControlFlags::default(),
            reporting.clone(),
        );
        assert_eq!(first.begin_run().unwrap(), 0);
        let execution_id = first.execution_id().expect("execution created");
        run(
            &first,
            &[
                LifecycleEvent::RunStarted,
                LifecycleEvent::Started { test: checkout() },
                LifecycleEvent::FailedFinished {
                    test: checkout(),
                    duration_millis: 100,
                    message: Some("cart empty".to_owned()),
                    screenshot_path: None,
                    tags: Vec::new(),
                },
                LifecycleEvent::Started { test: login() },
                LifecycleEvent::PassedFinished {
                    test: login(),
                    duration_millis: 50,
                    tags: Vec::new(),
                },
            ],
        );
        assert!(first.registry().is_suppressed("key:QA-1"));
        let outcome = first.finish();
        assert!(outcome.retry_pending());
        assert_eq!(outcome.dispatch, DispatchOutcome::NotFinalAttempt);
        assert_eq!(
            RerunArtifact::new(config.rerun().path.clone()).read().unwrap(),
            vec![SourceLocation::new("features/checkout.feature", 5)]
        );

        // Second invocation: launched from the rerun artifact, and the last one.
        std::fs::write(dir.path().join("plain.xml"), "<testsuites/>").unwrap();
        let flags = ControlFlags {
            rerun: true,
            final_attempt: true,
            ..ControlFlags::default()
        };
        let second = RetryCoordinationService::new(&config, flags, reporting.clone());
        assert_eq!(second.begin_run().unwrap(), 2);
        let responses = run(
            &second,
            &[
                LifecycleEvent::RunStarted,
                LifecycleEvent::Started { test: checkout() },
                LifecycleEvent::PassedFinished {
                    test: checkout(),
                    duration_millis: 80,
                    tags: Vec::new(),
                },
            ],
        );
        assert_eq!(responses[1].attempt, Some(2));
        assert!(!responses[1].report_now, "retry attempts are not reported on start");
        assert_eq!(responses[2].final_status, Some(FinalStatus::Passed));

        let outcome = second.finish();
        assert!(!outcome.retry_pending());
        let DispatchOutcome::Dispatched(summary) = outcome.dispatch else {
            panic!("expected a dispatch");
        };
        assert_eq!(summary.execution_id, Some(execution_id));
        assert_eq!(summary.statuses_reported, 2);
        assert_eq!(summary.attachments, 2);
        assert_eq!(reporting.create_calls(), 1);

        let statuses: Vec<_> = reporting
            .reports()
            .into_iter()
            .map(|r| (r.tests[0].test_key.clone(), r.tests[0].status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("QA-1".to_owned(), ReportedStatus::Passed),
                ("QA-2".to_owned(), ReportedStatus::Passed),
            ]
        );

        // The logical run is over: no execution id, empty rerun artifact.
        assert_eq!(second.coordinator().get(), None);
        assert!(second.orchestrator().rerun_artifact().read().unwrap().is_empty());
    }

    fn failed_checkout() -> LifecycleEvent {
        LifecycleEvent::FailedFinished {
            test: checkout(),
            duration_millis: 10,
            message: Some("cart empty".to_owned()),
            screenshot_path: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn only_fresh_runs_flush_the_rerun_list_at_run_end() {
        let dir = Utf8TempDir::new().unwrap();
        let config = config(&dir);
        let reporting: Arc<dyn ReportingService> = Arc::new(RecordingService::new());
        let artifact = RerunArtifact::new(config.rerun().path.clone());
        assert!(!config.rerun().immediate);

        // A fresh run writes the pending list once, at run end.
        let fresh =
            RetryCoordinationService::new(&config, ControlFlags::default(), reporting.clone());
        fresh.begin_run().unwrap();
        run(&fresh, &[LifecycleEvent::RunStarted, LifecycleEvent::Started { test: checkout() }]);
        fresh.handle(&failed_checkout());
        assert!(!artifact.exists());
        let outcome = fresh.finish();
        assert!(outcome.rerun.as_ref().unwrap().artifact_updated);
        assert_eq!(
            artifact.read().unwrap(),
            vec![SourceLocation::new("features/checkout.feature", 5)]
        );

        // A retry-driven run takes the artifact over and writes it as retries are scheduled.
        let flags = ControlFlags {
            rerun: true,
            ..ControlFlags::default()
        };
        let config = {
            let path = dir.path().join("retry-ledger.toml");
            std::fs::write(&path, "[retries]\nenabled = true\ncount = 3\n").unwrap();
            LedgerConfig::from_sources(dir.path(), Some(path.as_path())).unwrap()
        };
        let retry = RetryCoordinationService::new(&config, flags, reporting);
        assert!(retry.orchestrator().is_retry_driven());
        retry.begin_run().unwrap();
        assert!(artifact.read().unwrap().is_empty());

        run(&retry, &[LifecycleEvent::RunStarted, LifecycleEvent::Started { test: checkout() }]);
        let response = retry.handle(&failed_checkout());
        assert!(response.retry_scheduled);
        assert_eq!(
            artifact.read().unwrap(),
            vec![SourceLocation::new("features/checkout.feature", 5)]
        );

        let outcome = retry.finish();
        let end = outcome.rerun.unwrap();
        assert!(end.retry_pending());
        assert!(!end.artifact_updated);
        assert_eq!(
            artifact.read().unwrap(),
            vec![SourceLocation::new("features/checkout.feature", 5)]
        );
    }

    #[test]
    fn retry_driven_run_with_nothing_pending_leaves_an_empty_artifact() {
        let dir = Utf8TempDir::new().unwrap();
        let config = config(&dir);
        let reporting: Arc<dyn ReportingService> = Arc::new(RecordingService::new());
        let artifact = RerunArtifact::new(config.rerun().path.clone());
        artifact
            .write(&[SourceLocation::new("features/checkout.feature", 5)])
            .unwrap();

        let flags = ControlFlags {
            rerun: true,
            ..ControlFlags::default()
        };
        let service = RetryCoordinationService::new(&config, flags, reporting);
        service.begin_run().unwrap();
        run(
            &service,
            &[
                LifecycleEvent::RunStarted,
                LifecycleEvent::Started { test: checkout() },
                LifecycleEvent::PassedFinished {
                    test: checkout(),
                    duration_millis: 10,
                    tags: Vec::new(),
                },
            ],
        );

        let outcome = service.finish();
        assert!(!outcome.retry_pending());
        assert!(artifact.read().unwrap().is_empty());
    }

    #[test]
    fn fresh_run_discards_previous_history() {
        let dir = Utf8TempDir::new().unwrap();
        let config = config(&dir);
        let reporting: Arc<dyn ReportingService> = Arc::new(RecordingService::new());

        let first = RetryCoordinationService::new(&config, ControlFlags::default(), reporting.clone());
        first.begin_run().unwrap();
        first.handle(&LifecycleEvent::FailedFinished {
            test: checkout(),
            duration_millis: 1,
            message: None,
            screenshot_path: None,
            tags: Vec::new(),
        });

        let second = RetryCoordinationService::new(&config, ControlFlags::default(), reporting);
        assert_eq!(second.begin_run().unwrap(), 0);
        assert!(second.aggregator().get_all().is_empty());
    }

    #[test]
    fn run_finished_event_finishes_the_run() {
        let dir = Utf8TempDir::new().unwrap();
        let config = config(&dir);
        let service = RetryCoordinationService::with_outbox(&config, ControlFlags::default());
        service.begin_run().unwrap();
        run(
            &service,
            &[
                LifecycleEvent::RunStarted,
                LifecycleEvent::FailedFinished {
                    test: checkout(),
                    duration_millis: 1,
                    message: Some("boom".to_owned()),
                    screenshot_path: None,
                    tags: Vec::new(),
                },
                LifecycleEvent::RunFinished,
            ],
        );
        assert_eq!(
            service.orchestrator().rerun_artifact().read().unwrap(),
            vec![SourceLocation::new("features/checkout.feature", 5)]
        );
    }
}
