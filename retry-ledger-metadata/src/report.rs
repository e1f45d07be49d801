// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::FinalStatus;
use serde::{Deserialize, Serialize};

/// The payload sent to the test-management service to update test statuses within an execution.
///
/// retry-ledger sends one of these per test, after the last attempt, never one per attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecutionReport {
    /// The execution identifier shared by every test in the run.
    pub test_execution_key: String,

    /// The status updates.
    pub tests: Vec<TestStatusUpdate>,
}

/// One test's status within a [`TestExecutionReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStatusUpdate {
    /// The external test key.
    pub test_key: String,

    /// The status.
    pub status: ReportedStatus,

    /// A human-readable summary of the attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Keys of defects linked to this result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defects: Vec<String>,
}

/// A status understood by the test-management service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedStatus {
    /// The test passed.
    Passed,
    /// The test failed.
    Failed,
    /// The test was not run.
    Skipped,
}

impl From<FinalStatus> for ReportedStatus {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Passed => Self::Passed,
            FinalStatus::Failed => Self::Failed,
        }
    }
}
