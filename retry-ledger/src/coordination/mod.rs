// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared state that keeps concurrent test threads and successive process invocations in step.
//!
//! * [`ExecutionIdCoordinator`] hands out the one execution identifier of a logical run.
//! * [`RetrySuppressionRegistry`] tracks which tests have a retry pending, and so must not be
//!   reported yet.

mod execution_id;
mod suppression;

pub use execution_id::*;
pub use suppression::*;
