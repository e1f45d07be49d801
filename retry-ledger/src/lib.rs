// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Retry coordination and result aggregation for BDD-style test runs.
//!
//! A test harness that retries failed scenarios by relaunching itself runs as a sequence of
//! process invocations. This crate ties those invocations together:
//!
//! * failed scenarios are scheduled for a retry and written to a rerun artifact
//!   ([`orchestrator`], [`rerun`]),
//! * every attempt is merged into a per-test record persisted across invocations
//!   ([`aggregator`], [`store`]),
//! * all invocations share one execution in the test-management service, and exactly one final
//!   status per test is reported after the last attempt ([`coordination`], [`reporter`]).
//!
//! [`service::RetryCoordinationService`] bundles these together for a harness.

pub mod aggregator;
pub mod config;
pub mod coordination;
pub mod errors;
pub mod helpers;
pub mod orchestrator;
pub mod reporter;
pub mod rerun;
pub mod service;
pub mod store;
