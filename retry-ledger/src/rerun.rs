// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rerun artifact: the list of test locations a shell driver relaunches.
//!
//! The artifact is UTF-8 text with one `path:line` location per line, each line newline
//! terminated. An empty (or missing) artifact means there is nothing to relaunch.

use crate::{
    errors::{RemoveFileError, RerunArtifactError},
    helpers::{create_parent_dir, remove_file_if_exists},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use retry_ledger_metadata::SourceLocation;
use std::io::Write as _;
use swrite::{SWrite, swriteln};

/// Reads and writes the rerun artifact at a fixed path.
#[derive(Clone, Debug)]
pub struct RerunArtifact {
    path: Utf8PathBuf,
}

impl RerunArtifact {
    /// Creates a handle to the artifact at `path`. Nothing is read or written yet.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the artifact path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns true if the artifact exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replaces the artifact contents with `locations`, in order.
    pub fn write<'a, I>(&self, locations: I) -> Result<usize, RerunArtifactError>
    where
        I: IntoIterator<Item = &'a SourceLocation>,
    {
        create_parent_dir(&self.path).map_err(|(path, error)| RerunArtifactError::CreateDir {
            path: path.to_owned(),
            error,
        })?;

        let mut contents = String::new();
        let mut count = 0;
        for location in locations {
            swriteln!(contents, "{location}");
            count += 1;
        }

        let file = AtomicFile::new(&self.path, AllowOverwrite);
        file.write(|f| f.write_all(contents.as_bytes()))
            .map_err(|error| RerunArtifactError::Write {
                path: self.path.clone(),
                error,
            })?;
        Ok(count)
    }

    /// Empties the artifact if it exists, so that shell drivers looping on a non-empty artifact
    /// stop.
    ///
    /// Returns true if there was an artifact to truncate.
    pub fn truncate(&self) -> Result<bool, RerunArtifactError> {
        if !self.exists() {
            return Ok(false);
        }
        self.write(std::iter::empty())?;
        Ok(true)
    }

    /// Removes the artifact. A missing artifact is not an error.
    pub fn remove(&self) -> Result<(), RemoveFileError> {
        remove_file_if_exists(&self.path)
            .map(|_| ())
            .map_err(|error| RemoveFileError {
                path: self.path.clone(),
                error,
            })
    }

    /// Reads the locations listed in the artifact.
    ///
    /// A missing artifact lists nothing. Blank lines are skipped, and surrounding whitespace is
    /// ignored.
    pub fn read(&self) -> Result<Vec<SourceLocation>, RerunArtifactError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(RerunArtifactError::Read {
                    path: self.path.clone(),
                    error,
                });
            }
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                line.trim()
                    .parse()
                    .map_err(|error| RerunArtifactError::Parse {
                        path: self.path.clone(),
                        line_number: index + 1,
                        error,
                    })
            })
            .collect()
    }
}
