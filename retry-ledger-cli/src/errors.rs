// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use retry_ledger::errors::{
    ConfigParseError, ControlFlagError, RemoveFileError, RerunArtifactError,
};
use retry_ledger_metadata::LedgerExitCode;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that retry-ledger knows how to report, each with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    CurrentDirFailed { error: std::io::Error },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("invalid control flag")]
    ControlFlagError {
        #[from]
        err: ControlFlagError,
    },
    #[error("failed to reset retry state")]
    ResetFailed { err: RemoveFileError },
    #[error("failed to read events")]
    EventReadError {
        source_name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse event")]
    EventParseError {
        source_name: String,
        line_number: usize,
        #[source]
        error: serde_json::Error,
    },
    #[error("failed to read rerun artifact")]
    RerunArtifactReadError { err: RerunArtifactError },
    #[error("failed to write rerun artifact")]
    RerunArtifactWriteError { err: RerunArtifactError },
    #[error("failed to write consolidated report")]
    ConsolidatedReportNotWritten { path: Utf8PathBuf },
    #[error("failed to write output")]
    WriteOutputError {
        #[source]
        error: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output(error: impl Into<std::io::Error>) -> Self {
        Self::WriteOutputError {
            error: error.into(),
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ControlFlagError { .. }
            | Self::ResetFailed { .. }
            | Self::RerunArtifactReadError { .. } => LedgerExitCode::SETUP_ERROR,
            Self::EventReadError { .. } | Self::EventParseError { .. } => {
                LedgerExitCode::INGEST_FAILED
            }
            Self::RerunArtifactWriteError { .. } | Self::ConsolidatedReportNotWritten { .. } => {
                LedgerExitCode::ARTIFACT_WRITE_FAILED
            }
            Self::WriteOutputError { .. } => LedgerExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { error } => {
                error!("could not determine current directory");
                Some(error as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8 \
                     {}",
                    path.display().style(styles.bold),
                    "(hint: pass in --workspace-root)".style(styles.warning_text),
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ControlFlagError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ResetFailed { err } => {
                error!("failed to reset retry state from an earlier run");
                Some(err as &dyn Error)
            }
            Self::EventReadError { source_name, error } => {
                error!(
                    "failed to read lifecycle events from {}",
                    source_name.style(styles.bold)
                );
                Some(error as &dyn Error)
            }
            Self::EventParseError {
                source_name,
                line_number,
                error,
            } => {
                error!(
                    "{}, line {line_number}: invalid lifecycle event",
                    source_name.style(styles.bold)
                );
                Some(error as &dyn Error)
            }
            Self::RerunArtifactReadError { err } | Self::RerunArtifactWriteError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ConsolidatedReportNotWritten { path } => {
                error!(
                    "retry-bearing run, but the consolidated report could not be written to `{}`",
                    path.style(styles.bold)
                );
                None
            }
            Self::WriteOutputError { error } => {
                error!("failed to write output");
                Some(error as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
