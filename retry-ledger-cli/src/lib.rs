// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line driver for retry-ledger.
//!
//! Test harnesses emit lifecycle events as JSON lines; `retry-ledger ingest` applies them to the
//! persisted retry state, and the other subcommands let a shell driver decide whether to relaunch
//! and inspect what happened.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputWriter;
