// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging of per-attempt outcomes into one record per test.

use crate::{
    config::RetryBudget,
    errors::{DisplayErrorChain, RemoveFileError, StoreSaveError},
    helpers::{lock, now_millis},
    store::PersistentAttemptStore,
};
use retry_ledger_metadata::{AttemptRecord, AttemptRecordMap, FinalStatus, TestIdentity};
use serde::Serialize;
use std::{fmt, sync::Mutex};
use tracing::{debug, warn};

/// The outcome of a single attempt of a test, as fed to [`ResultAggregator::record`].
#[derive(Clone, Debug)]
pub struct AttemptOutcome<'a> {
    /// The test that ran.
    pub test: &'a TestIdentity,

    /// Whether this attempt passed.
    pub status: FinalStatus,

    /// How long this attempt took.
    pub duration_millis: u64,

    /// The failure message, for failed attempts.
    pub failure_message: Option<String>,

    /// A screenshot captured by this attempt.
    pub screenshot_path: Option<String>,

    /// Tags attached to the test on this attempt.
    pub tags: Vec<String>,
}

impl<'a> AttemptOutcome<'a> {
    /// A passing attempt.
    pub fn passed(test: &'a TestIdentity, duration_millis: u64) -> Self {
        Self {
            test,
            status: FinalStatus::Passed,
            duration_millis,
            failure_message: None,
            screenshot_path: None,
            tags: Vec::new(),
        }
    }

    /// A failing attempt.
    pub fn failed(test: &'a TestIdentity, duration_millis: u64, message: Option<String>) -> Self {
        Self {
            test,
            status: FinalStatus::Failed,
            duration_millis,
            failure_message: message,
            screenshot_path: None,
            tags: Vec::new(),
        }
    }

    /// Sets the screenshot path.
    pub fn with_screenshot(mut self, path: Option<String>) -> Self {
        self.screenshot_path = path;
        self
    }

    /// Sets the tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Whether a run involved retries, which decides the shape of the final report.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunClassification {
    /// Every test ran exactly once (or nothing ran).
    SingleRun,

    /// At least one test ran more than once.
    RetryBearing,
}

impl RunClassification {
    /// Classifies a set of records.
    ///
    /// A run is retry-bearing only if a persisted store exists and some record has more than one
    /// attempt.
    pub fn of(records: &AttemptRecordMap, store_exists: bool) -> Self {
        if store_exists && records.values().any(AttemptRecord::is_retried) {
            Self::RetryBearing
        } else {
            Self::SingleRun
        }
    }

    /// Returns the classification as printed by the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleRun => "single-run",
            Self::RetryBearing => "retry-bearing",
        }
    }
}

impl fmt::Display for RunClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level statistics computed over the aggregated records.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Number of distinct tests.
    pub tests: usize,

    /// Tests whose final status is passed.
    pub passed: usize,

    /// Tests whose final status is failed.
    pub failed: usize,

    /// Tests that passed after at least one failed attempt.
    pub flaky: usize,

    /// Tests with more than one attempt.
    pub retried: usize,

    /// Attempts across all tests.
    pub total_attempts: u64,

    /// Time spent across all attempts.
    pub total_duration_millis: u64,

    /// Whether the run involved retries.
    pub classification: RunClassification,
}

impl RunSummary {
    /// Computes the summary of `records`.
    pub fn new(records: &AttemptRecordMap, classification: RunClassification) -> Self {
        let mut summary = Self {
            tests: records.len(),
            passed: 0,
            failed: 0,
            flaky: 0,
            retried: 0,
            total_attempts: 0,
            total_duration_millis: 0,
            classification,
        };
        for record in records.values() {
            if record.final_status.is_passed() {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            if record.is_flaky() {
                summary.flaky += 1;
            }
            if record.is_retried() {
                summary.retried += 1;
            }
            summary.total_attempts += u64::from(record.total_attempts);
            summary.total_duration_millis = summary
                .total_duration_millis
                .saturating_add(record.duration_millis);
        }
        summary
    }

    /// Returns true if every test passed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Merges attempt outcomes into one [`AttemptRecord`] per test, writing through to a
/// [`PersistentAttemptStore`] after every change.
///
/// Merge rules, applied by [`record`](Self::record):
///
/// * every attempt adds one to `total_attempts` and its duration to `duration_millis`
/// * a failed attempt adds one to `failed_attempts`, sets the first failure message if there was
///   none, replaces the last failure message and screenshot, and makes the status failed
/// * a passed attempt makes the status passed only if it is within the retry budget
///
/// Persistence failures are logged and never change a verdict.
#[derive(Debug)]
pub struct ResultAggregator {
    records: Mutex<AttemptRecordMap>,
    store: PersistentAttemptStore,
}

impl ResultAggregator {
    /// Creates an aggregator with no records, persisting to `store`.
    pub fn new(store: PersistentAttemptStore) -> Self {
        Self {
            records: Mutex::new(AttemptRecordMap::new()),
            store,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &PersistentAttemptStore {
        &self.store
    }

    /// Merges one attempt into the record for its test, and returns the updated record.
    pub fn record(&self, outcome: &AttemptOutcome<'_>, budget: RetryBudget) -> AttemptRecord {
        let test = outcome.test;
        let storage_key = test.storage_key();
        let key = storage_key.as_str();

        let mut records = lock(&self.records);
        let record = records.entry(storage_key.clone()).or_insert_with(|| {
            AttemptRecord::new(test.key.clone(), test.name.clone(), now_millis())
        });

        record.total_attempts = record.total_attempts.saturating_add(1);
        record.duration_millis = record.duration_millis.saturating_add(outcome.duration_millis);

        match outcome.status {
            FinalStatus::Failed => {
                record.failed_attempts = record.failed_attempts.saturating_add(1);
                if let Some(message) = &outcome.failure_message {
                    if record.first_failure_message.is_none() {
                        record.first_failure_message = Some(message.clone());
                    }
                    record.last_failure_message = Some(message.clone());
                }
                if let Some(path) = &outcome.screenshot_path {
                    record.screenshot_path = Some(path.clone());
                }
                record.final_status = FinalStatus::Failed;
            }
            FinalStatus::Passed => {
                if budget.within_budget(record.total_attempts) {
                    record.final_status = FinalStatus::Passed;
                } else {
                    warn!(
                        test_key = key,
                        attempt = record.total_attempts,
                        max_attempts = budget.max_attempts(),
                        "pass recorded after the retry budget was exhausted, keeping {}",
                        record.final_status,
                    );
                }
            }
        }
        record.extend_tags(outcome.tags.iter().cloned());

        let updated = record.clone();
        debug!(
            test_key = key,
            attempt = updated.total_attempts,
            status = %updated.final_status,
            "recorded attempt",
        );
        self.write_through(&records, key, updated.total_attempts);
        updated
    }

    /// Adds tags to the record for `key`. Unknown keys are ignored.
    ///
    /// Returns true if a record was found.
    pub fn add_tags<I, S>(&self, key: &str, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(key) else {
            debug!(test_key = key, "ignoring tags for unknown test");
            return false;
        };
        if record.extend_tags(tags) > 0 {
            let attempt = record.total_attempts;
            self.write_through(&records, key, attempt);
        }
        true
    }

    /// Returns a snapshot of every record.
    pub fn get_all(&self) -> AttemptRecordMap {
        lock(&self.records).clone()
    }

    /// Returns the record for `key`.
    pub fn get(&self, key: &str) -> Option<AttemptRecord> {
        lock(&self.records).get(key).cloned()
    }

    /// Returns the number of recorded attempts for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        lock(&self.records)
            .get(key)
            .map_or(0, |record| record.total_attempts)
    }

    /// Writes every record to the store.
    pub fn save(&self) -> Result<(), StoreSaveError> {
        let records = lock(&self.records);
        self.store.save(&records)
    }

    /// Merges the persisted records into memory. Records already in memory win.
    ///
    /// An unreadable store is logged and treated as no history. Returns the number of records
    /// taken from the store.
    pub fn load(&self) -> usize {
        let persisted = match self.store.load() {
            Ok(persisted) => persisted,
            Err(error) => {
                warn!(
                    "starting without attempt history: {}",
                    DisplayErrorChain::new(&error),
                );
                return 0;
            }
        };

        let mut records = lock(&self.records);
        let mut loaded = 0;
        for (key, record) in persisted {
            records.entry(key).or_insert_with(|| {
                loaded += 1;
                record
            });
        }
        debug!(path = %self.store.path(), loaded, "loaded attempt history");
        loaded
    }

    /// Forgets every record, in memory and on disk.
    pub fn clear(&self) -> Result<(), RemoveFileError> {
        let mut records = lock(&self.records);
        records.clear();
        self.store.clear()
    }

    /// Classifies the run from the current records.
    pub fn classification(&self) -> RunClassification {
        let records = lock(&self.records);
        RunClassification::of(&records, self.store.exists())
    }

    /// Computes run-level statistics.
    pub fn summary(&self) -> RunSummary {
        let records = lock(&self.records);
        RunSummary::new(&records, RunClassification::of(&records, self.store.exists()))
    }

    fn write_through(&self, records: &AttemptRecordMap, test_key: &str, attempt: u32) {
        if let Err(error) = self.store.save(records) {
            warn!(
                test_key,
                attempt,
                "failed to persist attempt records: {}",
                DisplayErrorChain::new(&error),
            );
        }
    }
}
