// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small helpers shared across the crate.

use camino::Utf8Path;
use chrono::Utc;
use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Locks a mutex, recovering the data if another thread panicked while holding it.
///
/// Every structure guarded this way is left consistent between statements, and a test thread
/// panicking must not take retry coordination down with it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-locks an `RwLock`, recovering from poisoning the same way as [`lock`].
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-locks an `RwLock`, recovering from poisoning the same way as [`lock`].
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Creates the parent directory of `path` if it has one.
pub(crate) fn create_parent_dir(path: &Utf8Path) -> Result<(), (&Utf8Path, std::io::Error)> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|error| (parent, error))
        }
        _ => Ok(()),
    }
}

/// Removes a file, treating "not found" as success.
pub(crate) fn remove_file_if_exists(path: &Utf8Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

/// Formats a count with a singular or plural noun.
///
/// Works for any unsigned count (`u32` attempt counters, `usize` lengths) without casts.
pub fn plural<N>(count: N, singular: &str, plural: &str) -> String
where
    N: Copy + PartialEq + From<u8> + fmt::Display,
{
    if count == N::from(1) {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn remove_missing_file_is_ok() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("missing");
        assert!(!remove_file_if_exists(&path).unwrap());
        std::fs::write(&path, "x").unwrap();
        assert!(remove_file_if_exists(&path).unwrap());
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1_u32, "attempt", "attempts"), "1 attempt");
        assert_eq!(plural(3_u32, "attempt", "attempts"), "3 attempts");
        assert_eq!(plural(0_usize, "test", "tests"), "0 tests");
        assert_eq!(plural(1_usize, "test", "tests"), "1 test");
    }
}
