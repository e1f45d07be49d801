// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `retry-ledger` failures.
///
/// Shell-level retry loops branch on these, so they are stable across releases.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum LedgerExitCode {}

impl LedgerExitCode {
    /// No errors occurred and retry-ledger exited normally.
    pub const OK: i32 = 0;

    /// `retry-ledger rerun --check` found scenarios waiting to be relaunched.
    ///
    /// A shell driver can loop on this code: relaunch the test process with the rerun artifact
    /// until `rerun --check` exits with [`Self::OK`].
    pub const RERUN_PENDING: i32 = 4;

    /// Reading or applying lifecycle events with `retry-ledger ingest` failed.
    pub const INGEST_FAILED: i32 = 97;

    /// A user issue happened while setting up a retry-ledger invocation: a bad config file, an
    /// invalid control flag in the environment, or similar.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing the consolidated report, or another durable artifact, failed.
    pub const ARTIFACT_WRITE_FAILED: i32 = 98;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
