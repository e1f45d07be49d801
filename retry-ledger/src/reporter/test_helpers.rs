// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ReportingService;
use crate::{coordination::ExecutionId, errors::ReportingError, helpers::lock};
use camino::{Utf8Path, Utf8PathBuf};
use retry_ledger_metadata::TestExecutionReport;
use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// An in-memory reporting service that records every call.
#[derive(Debug, Default)]
pub(crate) struct RecordingService {
    create_calls: AtomicUsize,
    create_delay: Duration,
    fail_create: bool,
    fail_status_for: Option<String>,
    reports: Mutex<Vec<TestExecutionReport>>,
    attachments: Mutex<Vec<(ExecutionId, Utf8PathBuf)>>,
}

impl RecordingService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sleeps inside `create_execution`, widening the window for racing callers.
    pub(crate) fn with_create_delay_ms(mut self, ms: u64) -> Self {
        self.create_delay = Duration::from_millis(ms);
        self
    }

    /// Makes `create_execution` fail.
    pub(crate) fn failing(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Makes `report_status` fail for this test key.
    pub(crate) fn failing_status_for(mut self, test_key: &str) -> Self {
        self.fail_status_for = Some(test_key.to_owned());
        self
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn reports(&self) -> Vec<TestExecutionReport> {
        lock(&self.reports).clone()
    }

    pub(crate) fn attachments(&self) -> Vec<(ExecutionId, Utf8PathBuf)> {
        lock(&self.attachments).clone()
    }
}

impl ReportingService for RecordingService {
    fn create_execution(&self, _summary: &str) -> Result<ExecutionId, ReportingError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.create_delay.is_zero() {
            std::thread::sleep(self.create_delay);
        }
        if self.fail_create {
            return Err(ReportingError::Service {
                operation: "create execution",
                message: "service unavailable".to_owned(),
            });
        }
        Ok(ExecutionId::new(format!("EXEC-{n}")).expect("generated id is valid"))
    }

    fn report_status(&self, report: &TestExecutionReport) -> Result<(), ReportingError> {
        let failing = self.fail_status_for.as_deref();
        if report
            .tests
            .iter()
            .any(|test| Some(test.test_key.as_str()) == failing)
        {
            return Err(ReportingError::Service {
                operation: "report status",
                message: "rejected".to_owned(),
            });
        }
        lock(&self.reports).push(report.clone());
        Ok(())
    }

    fn attach_artifact(
        &self,
        execution_id: &ExecutionId,
        path: &Utf8Path,
    ) -> Result<(), ReportingError> {
        if !path.is_file() {
            return Err(ReportingError::ArtifactNotFound {
                path: path.to_owned(),
            });
        }
        lock(&self.attachments).push((execution_id.clone(), path.to_owned()));
        Ok(())
    }
}
