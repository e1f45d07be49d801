// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod app;
mod commands;
mod common;

pub use app::LedgerApp;
