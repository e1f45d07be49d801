// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    coordination::ExecutionId,
    errors::ReportingError,
    helpers::create_parent_dir,
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use retry_ledger_metadata::TestExecutionReport;
use serde::Serialize;
use std::{
    io::Write as _,
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::debug;

/// The external test-management service results are reported to.
///
/// Implementations are shared between test threads. Every error is treated as transient: callers
/// log it and carry on without reporting.
pub trait ReportingService: Send + Sync {
    /// Creates a new test execution and returns its identifier.
    fn create_execution(&self, summary: &str) -> Result<ExecutionId, ReportingError>;

    /// Sends status updates for tests within an execution.
    fn report_status(&self, report: &TestExecutionReport) -> Result<(), ReportingError>;

    /// Attaches a file to an execution.
    fn attach_artifact(
        &self,
        execution_id: &ExecutionId,
        path: &Utf8Path,
    ) -> Result<(), ReportingError>;
}

/// A [`ReportingService`] that writes every call into a directory, for an external uploader to
/// pick up.
///
/// Layout of the outbox directory:
///
/// * `execution-<id>.json`: one per created execution
/// * `status-<id>-<n>.json`: one per status update, numbered in the order they were sent
/// * `attachments/<id>/<file name>`: copies of attached artifacts
#[derive(Debug)]
pub struct OutboxReportingService {
    dir: Utf8PathBuf,
    project: String,
    sequence: AtomicUsize,
}

impl OutboxReportingService {
    /// Creates a service writing to `dir`. Executions are created in `project`.
    pub fn new(dir: impl Into<Utf8PathBuf>, project: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            project: project.into(),
            sequence: AtomicUsize::new(0),
        }
    }

    /// Returns the outbox directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<(), ReportingError> {
        let path = self.dir.join(file_name);
        let contents = serde_json::to_vec_pretty(value).map_err(ReportingError::Serialize)?;
        write_file(&path, &contents)?;
        debug!(path = %path, "wrote outbox entry");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionEntry<'a> {
    project: &'a str,
    summary: &'a str,
    test_execution_key: &'a str,
    created_at: String,
}

impl ReportingService for OutboxReportingService {
    fn create_execution(&self, summary: &str) -> Result<ExecutionId, ReportingError> {
        let now = Utc::now();
        let id = format!("{}-LOCAL-{}", self.project, now.format("%Y%m%d%H%M%S%3f"));
        let id = ExecutionId::new(id).map_err(ReportingError::InvalidExecutionId)?;
        self.write_json(
            &format!("execution-{id}.json"),
            &ExecutionEntry {
                project: &self.project,
                summary,
                test_execution_key: id.as_str(),
                created_at: now.to_rfc3339(),
            },
        )?;
        Ok(id)
    }

    fn report_status(&self, report: &TestExecutionReport) -> Result<(), ReportingError> {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.write_json(
            &format!("status-{}-{n}.json", report.test_execution_key),
            report,
        )
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
        let file_name = path.file_name().unwrap_or("artifact");
        let destination = self
            .dir
            .join("attachments")
            .join(execution_id.as_str())
            .join(file_name);
        let contents = std::fs::read(path).map_err(|error| ReportingError::Io {
            path: path.to_owned(),
            error,
        })?;
        write_file(&destination, &contents)?;
        debug!(path = %path, destination = %destination, "attached artifact");
        Ok(())
    }
}

fn write_file(path: &Utf8Path, contents: &[u8]) -> Result<(), ReportingError> {
    create_parent_dir(path).map_err(|(dir, error)| ReportingError::Io {
        path: dir.to_owned(),
        error,
    })?;
    AtomicFile::new(path, AllowOverwrite)
        .write(|f| f.write_all(contents))
        .map_err(|error| {
            let (atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error)) = error;
            ReportingError::Io {
                path: path.to_owned(),
                error,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use retry_ledger_metadata::{ReportedStatus, TestStatusUpdate};

    #[test]
    fn outbox_round_trip() {
        let dir = Utf8TempDir::new().unwrap();
        let service = OutboxReportingService::new(dir.path().join("outbox"), "QA");

        let id = service.create_execution("nightly").unwrap();
        assert!(id.as_str().starts_with("QA-LOCAL-"), "{id}");
        let entry: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(service.dir().join(format!("execution-{id}.json"))).unwrap(),
        )
        .unwrap();
        assert_eq!(entry["summary"], "nightly");
        assert_eq!(entry["testExecutionKey"], id.as_str());

        let report = TestExecutionReport {
            test_execution_key: id.to_string(),
            tests: vec![TestStatusUpdate {
                test_key: "QA-1".to_owned(),
                status: ReportedStatus::Passed,
                comment: None,
                defects: Vec::new(),
            }],
        };
        service.report_status(&report).unwrap();
        let written: TestExecutionReport = serde_json::from_str(
            &std::fs::read_to_string(service.dir().join(format!("status-{id}-1.json"))).unwrap(),
        )
        .unwrap();
        assert_eq!(written, report);
    }

    #[test]
    fn attach_copies_file_and_rejects_missing() {
        let dir = Utf8TempDir::new().unwrap();
        let service = OutboxReportingService::new(dir.path().join("outbox"), "QA");
        let id = ExecutionId::new("QA-9").unwrap();

        let artifact = dir.path().join("junit.xml");
        std::fs::write(&artifact, "<testsuites/>").unwrap();
        service.attach_artifact(&id, &artifact).unwrap();
        assert_eq!(
            std::fs::read_to_string(service.dir().join("attachments/QA-9/junit.xml")).unwrap(),
            "<testsuites/>"
        );

        let missing = dir.path().join("missing.xml");
        assert!(matches!(
            service.attach_artifact(&id, &missing),
            Err(ReportingError::ArtifactNotFound { .. })
        ));
    }
}
