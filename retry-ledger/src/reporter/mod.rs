// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Final reporting to the external test-management service.
//!
//! The main type here is [`FinalReportDispatcher`], which runs once after the last attempt of a
//! retry sequence and talks to a [`ReportingService`].

mod dispatcher;
mod junit;
mod service;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::*;
pub use junit::*;
pub use service::*;
