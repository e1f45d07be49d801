// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{coordination::ExecutionId, errors::ControlFlagError};

/// Per-process switches, read from the environment (or command-line arguments with environment
/// fallbacks).
///
/// Unlike [`LedgerConfig`](super::LedgerConfig), these change from one process invocation of a
/// retry sequence to the next: the shell driver sets `RETRY_LEDGER_RERUN` when it relaunches with a
/// rerun artifact, and `RETRY_LEDGER_FINAL_ATTEMPT` on the last invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlFlags {
    /// Overrides `retries.enabled` from the config file.
    pub retry_enabled: Option<bool>,

    /// Overrides `retries.count` from the config file.
    pub max_retries: Option<u32>,

    /// An execution identifier supplied by the caller. Short-circuits execution creation entirely.
    pub execution_id: Option<ExecutionId>,

    /// This is the last process invocation of the retry sequence: the final report is dispatched
    /// when it finishes.
    pub final_attempt: bool,

    /// This process was launched from a rerun artifact, as part of an ongoing retry sequence.
    pub rerun: bool,
}

impl ControlFlags {
    /// Environment variable for [`Self::retry_enabled`].
    pub const RETRY_ENABLED_ENV: &'static str = "RETRY_LEDGER_RETRY_ENABLED";

    /// Environment variable for [`Self::max_retries`].
    pub const MAX_RETRIES_ENV: &'static str = "RETRY_LEDGER_MAX_RETRIES";

    /// Environment variable for [`Self::execution_id`].
    pub const EXECUTION_ID_ENV: &'static str = "RETRY_LEDGER_EXECUTION_ID";

    /// Environment variable for [`Self::final_attempt`].
    pub const FINAL_ATTEMPT_ENV: &'static str = "RETRY_LEDGER_FINAL_ATTEMPT";

    /// Environment variable for [`Self::rerun`].
    pub const RERUN_ENV: &'static str = "RETRY_LEDGER_RERUN";

    /// Reads control flags from the process environment.
    ///
    /// Invalid values are reported immediately: they're caller mistakes, and silently ignoring
    /// them would run with a different retry budget than intended.
    pub fn from_env() -> Result<Self, ControlFlagError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads control flags through `lookup`, which maps a variable name to its value.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControlFlagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let retry_enabled = get(Self::RETRY_ENABLED_ENV)
            .map(|value| parse_bool(Self::RETRY_ENABLED_ENV, &value))
            .transpose()?;
        let max_retries = get(Self::MAX_RETRIES_ENV)
            .map(|value| {
                value.trim().parse::<u32>().map_err(|error| {
                    ControlFlagError::new(Self::MAX_RETRIES_ENV, value.as_str(), error)
                })
            })
            .transpose()?;
        let execution_id = get(Self::EXECUTION_ID_ENV)
            .map(|value| {
                ExecutionId::new(value.trim()).map_err(|error| {
                    ControlFlagError::new(Self::EXECUTION_ID_ENV, value.as_str(), error)
                })
            })
            .transpose()?;
        let final_attempt = get(Self::FINAL_ATTEMPT_ENV)
            .map(|value| parse_bool(Self::FINAL_ATTEMPT_ENV, &value))
            .transpose()?
            .unwrap_or(false);
        let rerun = get(Self::RERUN_ENV)
            .map(|value| parse_bool(Self::RERUN_ENV, &value))
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            retry_enabled,
            max_retries,
            execution_id,
            final_attempt,
            rerun,
        })
    }
}

/// Parses a boolean flag value.
pub(crate) fn parse_bool(name: &'static str, value: &str) -> Result<bool, ControlFlagError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ControlFlagError::new(
            name,
            value,
            "expected one of true, false, 1, 0, yes, no, on, off",
        )),
    }
}
