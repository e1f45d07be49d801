// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable storage of attempt records across process invocations.

use crate::{
    errors::{RemoveFileError, StoreLoadError, StoreSaveError},
    helpers::{create_parent_dir, remove_file_if_exists},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use retry_ledger_metadata::AttemptRecordMap;
use std::{fs, io::Write as _};

/// Manages persistence of attempt records.
///
/// The store is a single JSON object mapping storage keys to records. Writes go through a
/// temporary file and a rename, so a process killed mid-write leaves the previous contents intact.
#[derive(Clone, Debug)]
pub struct PersistentAttemptStore {
    path: Utf8PathBuf,
}

impl PersistentAttemptStore {
    /// The name of the store file within the store directory.
    pub const FILE_NAME: &'static str = "attempts.json";

    /// Creates a store within `store_dir`.
    pub fn new(store_dir: &Utf8Path) -> Self {
        Self {
            path: store_dir.join(Self::FILE_NAME),
        }
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns true if the store file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads the records from disk.
    ///
    /// A missing or empty (whitespace-only) file is no history, not an error.
    pub fn load(&self) -> Result<AttemptRecordMap, StoreLoadError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AttemptRecordMap::new());
            }
            Err(error) => {
                return Err(StoreLoadError::ReadError {
                    path: self.path.clone(),
                    error,
                });
            }
        };

        if contents.trim().is_empty() {
            return Ok(AttemptRecordMap::new());
        }

        serde_json::from_str(&contents).map_err(|error| StoreLoadError::DeserializeError {
            path: self.path.clone(),
            error,
        })
    }

    /// Saves the records to disk, replacing the previous contents.
    pub fn save(&self, records: &AttemptRecordMap) -> Result<(), StoreSaveError> {
        create_parent_dir(&self.path).map_err(|(path, error)| StoreSaveError::CreateDirError {
            path: path.to_owned(),
            error,
        })?;

        let contents = serde_json::to_vec_pretty(records)
            .map_err(|error| StoreSaveError::SerializeError { error })?;

        let file = AtomicFile::new(&self.path, AllowOverwrite);
        file.write(|f| f.write_all(&contents))
            .map_err(|error| StoreSaveError::WriteError {
                path: self.path.clone(),
                error,
            })
    }

    /// Removes the store file. A missing file is not an error.
    pub fn clear(&self) -> Result<(), RemoveFileError> {
        remove_file_if_exists(&self.path)
            .map(|_| ())
            .map_err(|error| RemoveFileError {
                path: self.path.clone(),
                error,
            })
    }
}
