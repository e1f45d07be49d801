// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for retry-ledger.
//!
//! Configuration comes from two places:
//!
//! * The config file ([`LedgerConfig`]): an embedded default layered under
//!   `.config/retry-ledger.toml`. This holds settings shared by every process invocation of a
//!   retry sequence, such as the store directory and retry overrides.
//! * Control flags ([`ControlFlags`]): per-process switches read from the environment, such as
//!   whether this invocation is the final attempt.
//!
//! The two are combined into a [`RetryPolicy`], which resolves the [`RetryBudget`] of each test.

mod control;
mod imp;
mod policy;
mod retry_setting;

pub use control::*;
pub use imp::*;
pub use policy::*;
pub use retry_setting::RetrySetting;
