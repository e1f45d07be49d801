// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry decisions driven by test lifecycle events.
//!
//! Each test key moves through a small state machine:
//!
//! ```text
//! fresh --failed, budget left--> pending retry --started--> retrying --failed, budget left--> ...
//!   |                                                          |
//!   +--passed--> terminal passed          exhausted <--failed--+--passed--> terminal passed
//! ```
//!
//! Retries themselves happen out of process: a pending retry puts the test's location on the
//! rerun list, and a shell driver relaunches the test process with that list. The attempt counter
//! comes from the persisted records, so it keeps counting across invocations.

use crate::{
    aggregator::{AttemptOutcome, ResultAggregator},
    config::{RetryBudget, RetryPolicy},
    coordination::RetrySuppressionRegistry,
    errors::{DisplayErrorChain, RerunArtifactError},
    helpers::{lock, plural},
    rerun::RerunArtifact,
};
use indexmap::{IndexMap, IndexSet};
use retry_ledger_metadata::{
    AttemptRecord, FinalStatus, LifecycleEvent, SourceLocation, TestIdentity,
};
use std::{collections::HashMap, sync::Mutex};
use tracing::{debug, info, warn};

/// Where a tracked test is in its retry cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TestPhase {
    /// The first attempt in this process is running.
    Running,

    /// The test failed and a retry is scheduled.
    PendingRetry,

    /// A retry of a previously failed attempt is running.
    Retrying,
}

/// What the harness should do after an event was handled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventResponse {
    /// The result of this attempt may be reported externally now. False while a retry is pending,
    /// and for every retry attempt, whether it runs in this process or a relaunched one.
    pub report_now: bool,

    /// A retry was scheduled for this test.
    pub retry_scheduled: bool,

    /// The merged status after this attempt, for finish events.
    pub final_status: Option<FinalStatus>,

    /// The attempt number (1-based, across process invocations), for per-test events.
    pub attempt: Option<u32>,
}

/// The state of the rerun list at the end of a process invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunEnd {
    /// Locations still pending a retry.
    pub pending: Vec<SourceLocation>,

    /// The artifact was rewritten at run end (with the pending list, or emptied). Always false for
    /// retry-driven invocations, which keep the artifact current as they go.
    pub artifact_updated: bool,
}

impl RunEnd {
    /// Returns true if a retry is pending, so the shell driver should relaunch.
    pub fn retry_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Decides retry eligibility for failed tests, gates reporting through a
/// [`RetrySuppressionRegistry`], and records every attempt in a [`ResultAggregator`].
#[derive(Debug)]
pub struct ScenarioRetryOrchestrator {
    policy: RetryPolicy,
    registry: RetrySuppressionRegistry,
    aggregator: ResultAggregator,
    rerun: RerunArtifact,
    immediate: bool,
    retry_driven: bool,
    tracking: Mutex<HashMap<String, TestPhase>>,
    // Keyed by storage key, in the order retries were scheduled.
    pending: Mutex<IndexMap<String, SourceLocation>>,
}

impl ScenarioRetryOrchestrator {
    /// Creates a new orchestrator.
    ///
    /// In `immediate` mode the rerun artifact is rewritten every time the pending list changes;
    /// otherwise it is written once when the run finishes.
    pub fn new(
        policy: RetryPolicy,
        aggregator: ResultAggregator,
        rerun: RerunArtifact,
        immediate: bool,
    ) -> Self {
        Self {
            policy,
            registry: RetrySuppressionRegistry::new(),
            aggregator,
            rerun,
            immediate,
            retry_driven: false,
            tracking: Mutex::new(HashMap::new()),
            pending: Mutex::new(IndexMap::new()),
        }
    }

    /// Marks this invocation as launched from the rerun artifact.
    ///
    /// A retry-driven invocation takes the artifact over: it is emptied when the run begins and
    /// rewritten every time the pending list changes, and it is not flushed again at run end.
    pub fn with_retry_driven(mut self, retry_driven: bool) -> Self {
        self.retry_driven = retry_driven;
        self
    }

    /// Returns true if this invocation was launched from the rerun artifact.
    pub fn is_retry_driven(&self) -> bool {
        self.retry_driven
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the suppression registry.
    pub fn registry(&self) -> &RetrySuppressionRegistry {
        &self.registry
    }

    /// Returns the result aggregator.
    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    /// Returns the rerun artifact.
    pub fn rerun_artifact(&self) -> &RerunArtifact {
        &self.rerun
    }

    /// Returns the phase of a tracked test.
    pub fn phase(&self, key: &str) -> Option<TestPhase> {
        lock(&self.tracking).get(key).copied()
    }

    /// Returns the locations pending a retry, in the order retries were scheduled.
    pub fn pending_locations(&self) -> Vec<SourceLocation> {
        unique_locations(&lock(&self.pending))
    }

    /// Handles one lifecycle event.
    pub fn handle(&self, event: &LifecycleEvent) -> EventResponse {
        match event {
            LifecycleEvent::RunStarted => {
                self.begin_run();
                EventResponse::default()
            }
            LifecycleEvent::Started { test } => self.started(test),
            LifecycleEvent::PassedFinished {
                test,
                duration_millis,
                tags,
            } => {
                let outcome =
                    AttemptOutcome::passed(test, *duration_millis).with_tags(tags.clone());
                self.finished(&outcome)
            }
            LifecycleEvent::FailedFinished {
                test,
                duration_millis,
                message,
                screenshot_path,
                tags,
            } => {
                let outcome = AttemptOutcome::failed(test, *duration_millis, message.clone())
                    .with_screenshot(screenshot_path.clone())
                    .with_tags(tags.clone());
                self.finished(&outcome)
            }
            LifecycleEvent::RunFinished => {
                if let Err(error) = self.finish_run() {
                    warn!(
                        "failed to update rerun artifact: {}",
                        DisplayErrorChain::new(&error),
                    );
                }
                EventResponse::default()
            }
        }
    }

    /// Begins the process invocation: forgets per-process state, and for a retry-driven invocation
    /// empties the artifact it was launched from.
    pub fn begin_run(&self) {
        lock(&self.tracking).clear();
        let mut pending = lock(&self.pending);
        pending.clear();
        if self.retry_driven {
            match self.rerun.truncate() {
                Ok(true) => debug!(path = %self.rerun.path(), "took over rerun artifact"),
                Ok(false) => {}
                Err(error) => warn!(
                    "failed to empty rerun artifact: {}",
                    DisplayErrorChain::new(&error),
                ),
            }
        }
        drop(pending);
        debug!(retry_driven = self.retry_driven, "run started");
    }

    /// Ends the process invocation.
    ///
    /// Unless the invocation is retry-driven, writes the pending rerun list, or empties a stale
    /// artifact if nothing is pending.
    pub fn finish_run(&self) -> Result<RunEnd, RerunArtifactError> {
        let pending = lock(&self.pending);
        let locations = unique_locations(&pending);

        let artifact_updated = if self.retry_driven {
            debug!(
                pending = locations.len(),
                "retry-driven run, rerun artifact already current"
            );
            false
        } else if locations.is_empty() {
            let truncated = self.rerun.truncate()?;
            if truncated {
                debug!(path = %self.rerun.path(), "no retries pending, emptied rerun artifact");
            }
            truncated
        } else {
            self.rerun.write(&locations)?;
            info!(
                path = %self.rerun.path(),
                "{} pending retry, wrote rerun artifact",
                plural(locations.len(), "test", "tests"),
            );
            true
        };

        Ok(RunEnd {
            pending: locations,
            artifact_updated,
        })
    }

    fn started(&self, test: &TestIdentity) -> EventResponse {
        let storage_key = test.storage_key();
        let key = storage_key.as_str();
        let attempt = self.aggregator.attempts(key).saturating_add(1);

        let mut tracking = lock(&self.tracking);
        let phase = match tracking.get(key) {
            Some(TestPhase::PendingRetry) | Some(TestPhase::Retrying) => TestPhase::Retrying,
            Some(TestPhase::Running) | None if attempt > 1 => TestPhase::Retrying,
            Some(TestPhase::Running) | None => TestPhase::Running,
        };
        tracking.insert(key.to_owned(), phase);
        debug!(test_key = key, attempt, ?phase, "test started");

        EventResponse {
            // The registry only knows about retries scheduled in this process, so the phase covers
            // retries relaunched from the artifact.
            report_now: phase == TestPhase::Running && !self.registry.is_suppressed(key),
            retry_scheduled: false,
            final_status: None,
            attempt: Some(attempt),
        }
    }

    fn finished(&self, outcome: &AttemptOutcome<'_>) -> EventResponse {
        let test = outcome.test;
        let storage_key = test.storage_key();
        let key = storage_key.as_str();

        if lock(&self.tracking).get(key).is_none() {
            debug!(test_key = key, "finished without started, treating as a fresh attempt");
        }

        let budget = self.policy.budget_for(test);
        let record = self.aggregator.record(outcome, budget);

        match outcome.status {
            FinalStatus::Failed if budget.allows_retry_after(record.total_attempts) => {
                self.schedule_retry(test, &record, budget)
            }
            FinalStatus::Failed => {
                if budget.max_retries() > 0 {
                    warn!(
                        test_key = key,
                        attempt = record.total_attempts,
                        "retries exhausted after {}",
                        plural(record.total_attempts, "attempt", "attempts"),
                    );
                }
                self.settle(key, &record)
            }
            FinalStatus::Passed => self.settle(key, &record),
        }
    }

    fn schedule_retry(
        &self,
        test: &TestIdentity,
        record: &AttemptRecord,
        budget: RetryBudget,
    ) -> EventResponse {
        let storage_key = test.storage_key();
        let key = storage_key.as_str();
        let retry = self.registry.increment(key);
        self.registry.suppress(key);
        lock(&self.tracking).insert(key.to_owned(), TestPhase::PendingRetry);

        info!(
            test_key = key,
            attempt = record.total_attempts,
            "scheduling retry (attempt {} of {})",
            record.total_attempts + 1,
            budget.max_attempts(),
        );

        match &test.location {
            Some(location) => {
                let mut pending = lock(&self.pending);
                pending.insert(key.to_owned(), location.clone());
                if self.writes_immediately() {
                    self.write_pending(&pending, key, record.total_attempts);
                }
            }
            None => {
                warn!(
                    test_key = key,
                    attempt = record.total_attempts,
                    "test has no source location and can't be relaunched",
                );
            }
        }

        debug!(test_key = key, retry, "retry count in this process");
        EventResponse {
            report_now: false,
            retry_scheduled: true,
            final_status: Some(record.final_status),
            attempt: Some(record.total_attempts),
        }
    }

    fn settle(&self, key: &str, record: &AttemptRecord) -> EventResponse {
        lock(&self.tracking).remove(key);
        {
            let mut pending = lock(&self.pending);
            if pending.shift_remove(key).is_some() && self.writes_immediately() {
                self.write_pending(&pending, key, record.total_attempts);
            }
        }
        self.registry.allow(key);
        self.registry.clear(key);

        debug!(
            test_key = key,
            attempt = record.total_attempts,
            status = %record.final_status,
            "test settled",
        );
        EventResponse {
            report_now: true,
            retry_scheduled: false,
            final_status: Some(record.final_status),
            attempt: Some(record.total_attempts),
        }
    }

    fn writes_immediately(&self) -> bool {
        self.immediate || self.retry_driven
    }

    fn write_pending(&self, pending: &IndexMap<String, SourceLocation>, key: &str, attempt: u32) {
        if let Err(error) = self.rerun.write(&unique_locations(pending)) {
            warn!(
                test_key = key,
                attempt,
                "failed to update rerun artifact: {}",
                DisplayErrorChain::new(&error),
            );
        }
    }
}

fn unique_locations(pending: &IndexMap<String, SourceLocation>) -> Vec<SourceLocation> {
    pending
        .values()
        .cloned()
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}
