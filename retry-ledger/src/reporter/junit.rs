// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The consolidated report: one JUnit test case per test, with its final status after retries.

use crate::{
    errors::ConsolidatedReportError,
    helpers::{create_parent_dir, plural},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::Utf8Path;
use chrono::DateTime;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use retry_ledger_metadata::{AttemptRecord, AttemptRecordMap};
use std::time::Duration;
use swrite::{SWrite, swriteln};

/// Classname used for tests without an external key.
static UNKEYED_CLASSNAME: &str = "unkeyed";

/// Renders aggregated records as a JUnit report.
///
/// Earlier failed attempts become `<rerunFailure>` entries of failed tests and `<flakyFailure>`
/// entries of tests that eventually passed.
#[derive(Clone, Debug)]
pub struct ConsolidatedReport {
    report: Report,
}

impl ConsolidatedReport {
    /// Renders `records` into a report called `name`.
    pub fn new(name: &str, records: &AttemptRecordMap) -> Self {
        let mut test_suite = TestSuite::new(name);
        let mut total = Duration::ZERO;
        let mut earliest = None;

        for record in records.values() {
            // Records with no attempts never ran.
            if record.total_attempts == 0 {
                continue;
            }
            total += Duration::from_millis(record.duration_millis);
            earliest = Some(earliest.map_or(record.timestamp, |e: i64| e.min(record.timestamp)));
            test_suite.add_test_case(test_case(record));
        }

        let mut report = Report::new(name);
        report.set_time(total);
        if let Some(timestamp) = earliest.and_then(DateTime::from_timestamp_millis) {
            report.set_timestamp(timestamp.fixed_offset());
        }
        report.add_test_suite(test_suite);

        Self { report }
    }

    /// Returns the underlying report.
    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Renders the report as an XML string.
    pub fn to_xml(&self) -> Result<String, quick_junit::SerializeError> {
        self.report.to_string()
    }

    /// Writes the report to `path`, replacing any previous report.
    pub fn write(&self, path: &Utf8Path) -> Result<(), ConsolidatedReportError> {
        create_parent_dir(path).map_err(|(dir, error)| ConsolidatedReportError::CreateDir {
            path: dir.to_owned(),
            error,
        })?;
        let file = AtomicFile::new(path, AllowOverwrite);
        file.write(|f| self.report.serialize(f))
            .map_err(|error| ConsolidatedReportError::Write {
                path: path.to_owned(),
                error,
            })
    }
}

fn test_case(record: &AttemptRecord) -> TestCase {
    let earlier_failures = if record.final_status.is_passed() {
        record.failed_attempts
    } else {
        record.failed_attempts.saturating_sub(1)
    };

    let mut status = if record.final_status.is_passed() {
        TestCaseStatus::success()
    } else {
        let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
        status.set_type("test failure");
        if let Some(message) = &record.last_failure_message {
            status.set_message(message.as_str());
        }
        if let Some(message) = &record.first_failure_message {
            status.set_description(message.as_str());
        }
        status
    };

    for index in 0..earlier_failures {
        let mut rerun = TestRerun::new(NonSuccessKind::Failure);
        rerun.set_type("test failure");
        // Only the first and the last failure messages are kept.
        let message = if index == 0 {
            record.first_failure_message.as_deref()
        } else if index + 1 == earlier_failures && record.final_status.is_passed() {
            record.last_failure_message.as_deref()
        } else {
            None
        };
        if let Some(message) = message {
            rerun.set_message(message);
        }
        status.add_rerun(rerun);
    }

    let mut test_case = TestCase::new(record.test_name.as_str(), status);
    test_case
        .set_classname(record.test_key.as_deref().unwrap_or(UNKEYED_CLASSNAME))
        .set_time(Duration::from_millis(record.duration_millis));
    if let Some(timestamp) = DateTime::from_timestamp_millis(record.timestamp) {
        test_case.set_timestamp(timestamp.fixed_offset());
    }

    let mut system_out = String::new();
    swriteln!(
        system_out,
        "{} ({} failed), final status {}",
        plural(record.total_attempts, "attempt", "attempts"),
        record.failed_attempts,
        record.final_status,
    );
    if !record.tags.is_empty() {
        swriteln!(system_out, "tags: {}", record.tags.join(" "));
    }
    if let Some(path) = &record.screenshot_path {
        swriteln!(system_out, "screenshot: {path}");
    }
    test_case.set_system_out(system_out);

    test_case
}
