// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by retry-ledger.

use camino::Utf8PathBuf;
use config::ConfigError;
use retry_ledger_metadata::SourceLocationParseError;
use std::{error::Error as StdError, fmt};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse retry-ledger config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`] that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error("at `{path}`: {error}")]
    DeserializeError {
        /// The key path that failed to deserialize.
        path: String,

        /// The underlying error.
        error: ConfigError,
    },

    /// An `[[overrides]]` entry is invalid.
    #[error("override #{index} is invalid: {reason}")]
    InvalidOverride {
        /// The 1-based position of the override in the file.
        index: usize,

        /// Why the override is invalid.
        reason: &'static str,
    },
}

/// A control flag read from the environment or the command line has an invalid value.
///
/// These are caller mistakes and are reported at startup, before any test runs.
#[derive(Clone, Debug, Error)]
#[error("invalid value `{value}` for `{name}`: {reason}")]
pub struct ControlFlagError {
    name: &'static str,
    value: String,
    reason: String,
}

impl ControlFlagError {
    pub(crate) fn new(name: &'static str, value: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            name,
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// The name of the flag, e.g. `RETRY_LEDGER_MAX_RETRIES`.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// An execution identifier is malformed.
#[derive(Clone, Debug, Error)]
#[error("invalid execution id `{input}`: {reason}")]
pub struct ExecutionIdParseError {
    input: String,
    reason: &'static str,
}

impl ExecutionIdParseError {
    pub(crate) fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self {
            input: input.into(),
            reason,
        }
    }
}

/// Errors that can occur when loading the persisted attempt store.
#[derive(Debug, Error)]
pub enum StoreLoadError {
    /// Error reading the store file.
    #[error("failed to read attempt store at {path}")]
    ReadError {
        /// The path that failed to be read.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// Error deserializing the store.
    #[error("failed to deserialize attempt store at {path}")]
    DeserializeError {
        /// The path that failed to be deserialized.
        path: Utf8PathBuf,
        /// The underlying deserialization error.
        #[source]
        error: serde_json::Error,
    },
}

/// Errors that can occur when saving the persisted attempt store.
#[derive(Debug, Error)]
pub enum StoreSaveError {
    /// Error creating the directory.
    #[error("failed to create directory {path}")]
    CreateDirError {
        /// The directory path that failed to be created.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// Error serializing the store.
    #[error("failed to serialize attempt store")]
    SerializeError {
        /// The underlying serialization error.
        #[source]
        error: serde_json::Error,
    },

    /// Error writing the store to disk.
    #[error("failed to write attempt store to {path}")]
    WriteError {
        /// The path that failed to be written.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error that occurred while removing a durable file (the attempt store, the persisted
/// execution id or the rerun artifact).
#[derive(Debug, Error)]
#[error("failed to remove {path}")]
pub struct RemoveFileError {
    /// The path that failed to be removed.
    pub path: Utf8PathBuf,
    /// The underlying IO error.
    #[source]
    pub error: std::io::Error,
}

/// Errors that can occur when reading or writing the rerun artifact.
#[derive(Debug, Error)]
pub enum RerunArtifactError {
    /// Error reading the artifact.
    #[error("failed to read rerun artifact at {path}")]
    Read {
        /// The artifact path.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// A line in the artifact is not a `path:line` location.
    #[error("rerun artifact {path}, line {line_number}: invalid location")]
    Parse {
        /// The artifact path.
        path: Utf8PathBuf,
        /// The 1-based line in the artifact.
        line_number: usize,
        /// The underlying parse error.
        #[source]
        error: SourceLocationParseError,
    },

    /// Error creating the artifact's parent directory.
    #[error("failed to create directory {path}")]
    CreateDir {
        /// The directory.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// Error writing the artifact.
    #[error("failed to write rerun artifact to {path}")]
    Write {
        /// The artifact path.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error returned by a [`ReportingService`](crate::reporter::ReportingService).
///
/// These are transient by nature: callers log them and carry on without reporting.
#[derive(Debug, Error)]
pub enum ReportingError {
    /// The service rejected or failed the request.
    #[error("{operation} failed: {message}")]
    Service {
        /// What was being attempted, e.g. `create execution`.
        operation: &'static str,
        /// The service's explanation.
        message: String,
    },

    /// The service returned an identifier that isn't valid.
    #[error("service returned an invalid execution id")]
    InvalidExecutionId(#[source] ExecutionIdParseError),

    /// An artifact to attach doesn't exist.
    #[error("artifact not found at {path}")]
    ArtifactNotFound {
        /// The missing artifact.
        path: Utf8PathBuf,
    },

    /// Filesystem access failed.
    #[error("I/O error at {path}")]
    Io {
        /// The path being accessed.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// A payload couldn't be serialized.
    #[error("failed to serialize payload")]
    Serialize(#[source] serde_json::Error),
}

/// An error that occurred while writing the consolidated JUnit report.
#[derive(Debug, Error)]
pub enum ConsolidatedReportError {
    /// Error creating the report's parent directory.
    #[error("failed to create directory {path}")]
    CreateDir {
        /// The directory.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// Error serializing or writing the report.
    #[error("failed to write consolidated report to {path}")]
    Write {
        /// The report path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<quick_junit::SerializeError>,
    },
}

/// Displays an error along with its chain of sources, on a single line.
///
/// Swallowed errors are logged through this so the root cause isn't lost.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: StdError> DisplayErrorChain<E> {
    /// Creates a new chain display.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: StdError> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_includes_sources() {
        let error = StoreLoadError::ReadError {
            path: "target/ledger/attempts.json".into(),
            error: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "failed to read attempt store at target/ledger/attempts.json: access denied"
        );
    }
}
