// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Serialized formats shared by retry-ledger and the tools around it.
//!
//! These types describe data that crosses a process boundary:
//!
//! * [`AttemptRecordMap`] is the persisted attempt store, read and written by every process
//!   invocation of a retry sequence.
//! * [`LifecycleEvent`] is what a test harness emits while it runs scenarios.
//! * [`TestExecutionReport`] is the payload sent to the test-management service.
//! * [`LedgerExitCode`] documents the exit codes of the `retry-ledger` binary.

mod errors;
mod events;
mod exit_codes;
mod identity;
mod record;
mod report;

pub use errors::*;
pub use events::*;
pub use exit_codes::*;
pub use identity::*;
pub use record::*;
pub use report::*;
