// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{DisplayErrorChain, ExecutionIdParseError},
    helpers::{create_parent_dir, lock, read, remove_file_if_exists, write},
    reporter::ReportingService,
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fmt,
    io::Write as _,
    str::FromStr,
    sync::{Mutex, RwLock},
};
use tracing::{debug, info, warn};

/// The reporting service's handle for a whole run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// The maximum length of an identifier.
    pub const MAX_LEN: usize = 255;

    /// Validates and wraps an identifier.
    ///
    /// Identifiers are non-empty and consist of ASCII letters, digits, `-`, `_` and `.`.
    pub fn new(id: impl Into<String>) -> Result<Self, ExecutionIdParseError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ExecutionIdParseError::new(id, "identifier is empty"));
        }
        if id.len() > Self::MAX_LEN {
            return Err(ExecutionIdParseError::new(
                id,
                "identifier is longer than 255 characters",
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ExecutionIdParseError::new(
                id,
                "only ASCII letters, digits, `-`, `_` and `.` are allowed",
            ));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ExecutionId {
    type Err = ExecutionIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hands out the single execution identifier shared by every thread and every process invocation
/// of a logical run.
///
/// Lookup order for [`get_or_create`](Self::get_or_create):
///
/// 1. the override passed in at construction (from `RETRY_LEDGER_EXECUTION_ID`)
/// 2. the identifier already held in memory
/// 3. the identifier persisted by an earlier invocation of the same retry sequence
/// 4. a new execution, created through the [`ReportingService`]
///
/// Only one caller ever reaches step 4: the fast path is a read lock, and the slow path re-checks
/// under a creation mutex.
#[derive(Debug)]
pub struct ExecutionIdCoordinator {
    current: RwLock<Option<ExecutionId>>,
    creation: Mutex<()>,
    override_id: Option<ExecutionId>,
    id_file: Utf8PathBuf,
    summary: String,
}

impl ExecutionIdCoordinator {
    /// The name of the file, within the store directory, the identifier is persisted to.
    pub const FILE_NAME: &'static str = "execution-id";

    /// Creates a coordinator persisting to `store_dir`.
    ///
    /// New executions are created with the given `summary`.
    pub fn new(
        store_dir: &Utf8Path,
        override_id: Option<ExecutionId>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            current: RwLock::new(None),
            creation: Mutex::new(()),
            override_id,
            id_file: store_dir.join(Self::FILE_NAME),
            summary: summary.into(),
        }
    }

    /// Returns the path the identifier is persisted to.
    pub fn id_file(&self) -> &Utf8Path {
        &self.id_file
    }

    /// Returns the shared identifier, creating an execution if there isn't one yet.
    ///
    /// Returns `None` if creation failed. Callers skip reporting for the run in that case.
    pub fn get_or_create(&self, service: &dyn ReportingService) -> Option<ExecutionId> {
        if let Some(id) = &self.override_id {
            return Some(id.clone());
        }
        if let Some(id) = read(&self.current).clone() {
            return Some(id);
        }

        let _guard = lock(&self.creation);
        if let Some(id) = read(&self.current).clone() {
            return Some(id);
        }
        if let Some(id) = self.load_persisted() {
            *write(&self.current) = Some(id.clone());
            return Some(id);
        }

        match service.create_execution(&self.summary) {
            Ok(id) => {
                info!(execution_id = %id, "created test execution");
                self.persist(&id);
                *write(&self.current) = Some(id.clone());
                Some(id)
            }
            Err(error) => {
                warn!(
                    "failed to create test execution, results will not be reported: {}",
                    DisplayErrorChain::new(&error),
                );
                None
            }
        }
    }

    /// Installs an externally supplied identifier. It takes precedence over creation.
    pub fn set_external(&self, id: ExecutionId) {
        let _guard = lock(&self.creation);
        debug!(execution_id = %id, "using external execution id");
        self.persist(&id);
        *write(&self.current) = Some(id);
    }

    /// Returns the shared identifier without creating one.
    pub fn get(&self) -> Option<ExecutionId> {
        if let Some(id) = &self.override_id {
            return Some(id.clone());
        }
        if let Some(id) = read(&self.current).clone() {
            return Some(id);
        }
        let id = self.load_persisted()?;
        *write(&self.current) = Some(id.clone());
        Some(id)
    }

    /// Forgets the identifier, both in memory and on disk.
    ///
    /// Called once at the true end of a logical run, never between retry attempts.
    pub fn reset(&self) {
        let _guard = lock(&self.creation);
        *write(&self.current) = None;
        match remove_file_if_exists(&self.id_file) {
            Ok(true) => debug!(path = %self.id_file, "removed persisted execution id"),
            Ok(false) => {}
            Err(error) => warn!(
                path = %self.id_file,
                "failed to remove persisted execution id: {error}",
            ),
        }
    }

    /// Ends the current process invocation: resets unless a retry is pending, in which case the
    /// next invocation must keep reporting into the same execution.
    pub fn finish_run(&self, retry_pending: bool) {
        if retry_pending {
            debug!("retry pending, keeping execution id for the next invocation");
        } else {
            self.reset();
        }
    }

    fn load_persisted(&self) -> Option<ExecutionId> {
        let contents = match std::fs::read_to_string(&self.id_file) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(path = %self.id_file, "failed to read persisted execution id: {error}");
                return None;
            }
        };
        let contents = contents.trim();
        if contents.is_empty() {
            return None;
        }
        match ExecutionId::new(contents) {
            Ok(id) => {
                debug!(execution_id = %id, "reusing persisted execution id");
                Some(id)
            }
            Err(error) => {
                warn!(path = %self.id_file, "ignoring persisted execution id: {error}");
                None
            }
        }
    }

    fn persist(&self, id: &ExecutionId) {
        if let Err((dir, error)) = create_parent_dir(&self.id_file) {
            warn!(path = %dir, "failed to create directory for execution id: {error}");
            return;
        }
        let file = AtomicFile::new(&self.id_file, AllowOverwrite);
        if let Err(error) = file.write(|f| writeln!(f, "{id}")) {
            warn!(
                path = %self.id_file,
                execution_id = %id,
                "failed to persist execution id: {}",
                DisplayErrorChain::new(&error),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::test_helpers::RecordingService;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("QA-1234", true; "plain key")]
    #[test_case("run_2024.10.17", true; "dots and underscores")]
    #[test_case("", false; "empty")]
    #[test_case("QA 1234", false; "space")]
    #[test_case("QA/1234", false; "slash")]
    fn execution_id_validation(input: &str, valid: bool) {
        assert_eq!(input.parse::<ExecutionId>().is_ok(), valid);
    }

    #[test]
    fn execution_id_length_limit() {
        assert!(ExecutionId::new("a".repeat(ExecutionId::MAX_LEN)).is_ok());
        assert!(ExecutionId::new("a".repeat(ExecutionId::MAX_LEN + 1)).is_err());
    }

    #[test_case(1; "single thread")]
    #[test_case(8; "eight threads")]
    #[test_case(32; "thirty-two threads")]
    fn concurrent_callers_share_one_execution(threads: usize) {
        let dir = Utf8TempDir::new().unwrap();
        let service = RecordingService::new().with_create_delay_ms(5);
        let coordinator = ExecutionIdCoordinator::new(dir.path(), None, "nightly");

        let ids: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| s.spawn(|| coordinator.get_or_create(&service)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread didn't panic"))
                .collect()
        });

        assert_eq!(service.create_calls(), 1);
        let first = ids[0].clone().expect("creation succeeded");
        assert!(ids.iter().all(|id| id.as_ref() == Some(&first)));
    }

    #[test]
    fn override_skips_creation() {
        let dir = Utf8TempDir::new().unwrap();
        let service = RecordingService::new();
        let id = ExecutionId::new("QA-900").unwrap();
        let coordinator = ExecutionIdCoordinator::new(dir.path(), Some(id.clone()), "nightly");

        assert_eq!(coordinator.get_or_create(&service), Some(id.clone()));
        assert_eq!(coordinator.get(), Some(id));
        assert_eq!(service.create_calls(), 0);
    }

    #[test]
    fn external_id_takes_precedence() {
        let dir = Utf8TempDir::new().unwrap();
        let service = RecordingService::new();
        let coordinator = ExecutionIdCoordinator::new(dir.path(), None, "nightly");
        let id = ExecutionId::new("QA-42").unwrap();

        coordinator.set_external(id.clone());
        assert_eq!(coordinator.get_or_create(&service), Some(id));
        assert_eq!(service.create_calls(), 0);
    }

    #[test]
    fn creation_failure_returns_none() {
        let dir = Utf8TempDir::new().unwrap();
        let service = RecordingService::new().failing();
        let coordinator = ExecutionIdCoordinator::new(dir.path(), None, "nightly");

        assert_eq!(coordinator.get_or_create(&service), None);
        assert_eq!(coordinator.get(), None);
        assert!(!coordinator.id_file().exists());
    }

    #[test]
    fn persisted_id_survives_process_boundary() {
        let dir = Utf8TempDir::new().unwrap();
        let service = RecordingService::new();

        let first = ExecutionIdCoordinator::new(dir.path(), None, "nightly");
        let id = first.get_or_create(&service).expect("creation succeeded");
        first.finish_run(true);

        // A fresh coordinator models the next process invocation.
        let second = ExecutionIdCoordinator::new(dir.path(), None, "nightly");
        assert_eq!(second.get(), Some(id.clone()));
        assert_eq!(second.get_or_create(&service), Some(id));
        assert_eq!(service.create_calls(), 1);

        second.finish_run(false);
        assert!(!second.id_file().exists());
        assert_eq!(second.get(), None);
    }

    #[test]
    fn reset_then_create_again() {
        let dir = Utf8TempDir::new().unwrap();
        let service = RecordingService::new();
        let coordinator = ExecutionIdCoordinator::new(dir.path(), None, "nightly");

        let first = coordinator.get_or_create(&service).unwrap();
        coordinator.reset();
        let second = coordinator.get_or_create(&service).unwrap();
        assert_ne!(first, second);
        assert_eq!(service.create_calls(), 2);
    }

    #[test]
    fn corrupt_persisted_id_is_ignored() {
        let dir = Utf8TempDir::new().unwrap();
        let coordinator = ExecutionIdCoordinator::new(dir.path(), None, "nightly");
        std::fs::write(coordinator.id_file(), "not a valid id\n").unwrap();
        assert_eq!(coordinator.get(), None);
    }
}
