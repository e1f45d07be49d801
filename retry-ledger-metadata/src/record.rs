// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// The on-disk form of the attempt store: a JSON object from storage key to record.
pub type AttemptRecordMap = BTreeMap<String, AttemptRecord>;

/// The status reported externally for a test once all of its attempts are merged.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    /// The most recent attempt within the retry budget passed.
    Passed,

    /// An attempt failed and no later in-budget attempt passed.
    Failed,
}

impl FinalStatus {
    /// Returns true if this is [`FinalStatus::Passed`].
    pub fn is_passed(self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Returns the status as it is written to disk and sent to the reporting service.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one test, merged across attempts and process invocations.
///
/// Records are created by the aggregator on the first observed attempt and only ever grow:
/// counters and durations increase, `first_failure_message` and `timestamp` never change once
/// set, and `tags` is append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// The external test-management key, if the test has one.
    pub test_key: Option<String>,

    /// The human-readable test name.
    pub test_name: String,

    /// The status to report externally.
    pub final_status: FinalStatus,

    /// Number of attempts recorded, across all process invocations.
    pub total_attempts: u32,

    /// Number of recorded attempts that failed. Never exceeds `total_attempts`.
    pub failed_attempts: u32,

    /// The failure message of the first failed attempt.
    pub first_failure_message: Option<String>,

    /// The failure message of the most recent failed attempt.
    pub last_failure_message: Option<String>,

    /// The screenshot captured by the most recent failing attempt that produced one.
    pub screenshot_path: Option<String>,

    /// Total time spent across attempts.
    pub duration_millis: u64,

    /// Tags seen on any attempt, in first-seen order.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Creation time, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl AttemptRecord {
    /// Creates a record with no attempts yet.
    ///
    /// The status starts out as [`FinalStatus::Failed`]: a record only becomes passing once an
    /// attempt is merged into it.
    pub fn new(test_key: Option<String>, test_name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            test_key,
            test_name: test_name.into(),
            final_status: FinalStatus::Failed,
            total_attempts: 0,
            failed_attempts: 0,
            first_failure_message: None,
            last_failure_message: None,
            screenshot_path: None,
            duration_millis: 0,
            tags: Vec::new(),
            timestamp,
        }
    }

    /// Returns true if the test needed more than one attempt.
    pub fn is_retried(&self) -> bool {
        self.total_attempts > 1
    }

    /// Returns true if the test ended up passing after at least one failed attempt.
    pub fn is_flaky(&self) -> bool {
        self.final_status.is_passed() && self.failed_attempts > 0
    }

    /// Appends tags that aren't already present, preserving first-seen order.
    ///
    /// Returns the number of tags added.
    pub fn extend_tags<I, S>(&mut self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.tags.len();
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self.tags.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_serializes_with_camel_case_fields() {
        let mut record = AttemptRecord::new(Some("QA-12".to_owned()), "Checkout", 1_700_000_000_000);
        record.final_status = FinalStatus::Passed;
        record.total_attempts = 2;
        record.failed_attempts = 1;
        record.first_failure_message = Some("timeout".to_owned());
        record.last_failure_message = Some("timeout".to_owned());
        record.duration_millis = 1500;
        record.extend_tags(["@smoke"]);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "testKey": "QA-12",
                "testName": "Checkout",
                "finalStatus": "PASSED",
                "totalAttempts": 2,
                "failedAttempts": 1,
                "firstFailureMessage": "timeout",
                "lastFailureMessage": "timeout",
                "screenshotPath": null,
                "durationMillis": 1500,
                "tags": ["@smoke"],
                "timestamp": 1_700_000_000_000_i64,
            })
        );

        let back: AttemptRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn tags_are_set_like() {
        let mut record = AttemptRecord::new(None, "Login", 0);
        assert_eq!(record.extend_tags(["@smoke", "@login", "@smoke"]), 2);
        assert_eq!(record.extend_tags(vec!["@login".to_owned(), "@slow".to_owned()]), 1);
        assert_eq!(record.tags, ["@smoke", "@login", "@slow"]);
    }

    #[test]
    fn flaky_requires_pass_after_failure() {
        let mut record = AttemptRecord::new(None, "Search", 0);
        record.total_attempts = 2;
        record.failed_attempts = 1;
        assert!(!record.is_flaky(), "still failing");
        record.final_status = FinalStatus::Passed;
        assert!(record.is_flaky());
        assert!(record.is_retried());
    }
}
