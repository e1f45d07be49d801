// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestIdentity;
use serde::{Deserialize, Serialize};

/// A test lifecycle event, as emitted by the test harness.
///
/// This is the closed set of events the retry orchestrator understands. Harnesses written in other
/// languages can emit these as JSON lines and feed them to `retry-ledger ingest`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    /// The test process started running scenarios.
    RunStarted,

    /// A test attempt started.
    Started {
        /// The test.
        test: TestIdentity,
    },

    /// A test attempt finished and passed.
    #[serde(rename_all = "kebab-case")]
    PassedFinished {
        /// The test.
        test: TestIdentity,

        /// How long the attempt took.
        #[serde(default)]
        duration_millis: u64,

        /// Tags attached to the test.
        #[serde(default)]
        tags: Vec<String>,
    },

    /// A test attempt finished and failed.
    #[serde(rename_all = "kebab-case")]
    FailedFinished {
        /// The test.
        test: TestIdentity,

        /// How long the attempt took.
        #[serde(default)]
        duration_millis: u64,

        /// The failure message, if the harness captured one.
        #[serde(default)]
        message: Option<String>,

        /// A screenshot captured on failure.
        #[serde(default)]
        screenshot_path: Option<String>,

        /// Tags attached to the test.
        #[serde(default)]
        tags: Vec<String>,
    },

    /// The test process finished running scenarios.
    RunFinished,
}

impl LifecycleEvent {
    /// The test this event is about, if it is a per-test event.
    pub fn test(&self) -> Option<&TestIdentity> {
        match self {
            Self::Started { test }
            | Self::PassedFinished { test, .. }
            | Self::FailedFinished { test, .. } => Some(test),
            Self::RunStarted | Self::RunFinished => None,
        }
    }
}
