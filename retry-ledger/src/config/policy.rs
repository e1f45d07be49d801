// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RetryOverride, RetrySetting};
use retry_ledger_metadata::TestIdentity;

/// Resolves how many retries a test gets.
///
/// Resolution order, most specific first:
///
/// 1. a budget attached to the test identity itself (for example from a tag in the feature file)
/// 2. an override naming the test, by name or external key
/// 3. an override naming the test's class
/// 4. the global setting
///
/// If the global setting is disabled, no test is retried regardless of overrides.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    global: RetrySetting,
    overrides: Vec<RetryOverride>,
}

impl RetryPolicy {
    /// Creates a new policy.
    pub fn new(global: RetrySetting, overrides: Vec<RetryOverride>) -> Self {
        Self { global, overrides }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new(
            RetrySetting {
                count: 0,
                enabled: false,
            },
            Vec::new(),
        )
    }

    /// Returns the global setting, after control flags were applied.
    pub fn global(&self) -> RetrySetting {
        self.global
    }

    /// Returns true if retries are enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.global.enabled
    }

    /// Returns the retry budget for this test.
    pub fn budget_for(&self, test: &TestIdentity) -> RetryBudget {
        if !self.global.enabled {
            return RetryBudget::new(0);
        }
        if let Some(retries) = test.retries {
            return RetryBudget::new(retries);
        }

        let test_override = self
            .overrides
            .iter()
            .filter(|o| o.is_test_level())
            .find(|o| {
                let selector = o.test();
                selector == Some(test.name.as_str()) || selector == test.key.as_deref()
            });
        if let Some(o) = test_override {
            return RetryBudget::new(o.retries().effective_count());
        }

        let class_override = self.overrides.iter().find(|o| {
            !o.is_test_level() && o.class().is_some() && o.class() == test.class.as_deref()
        });
        if let Some(o) = class_override {
            return RetryBudget::new(o.retries().effective_count());
        }

        RetryBudget::new(self.global.effective_count())
    }
}

/// The number of retries granted to a single test.
///
/// `max_retries` counts additional attempts: a test with a budget of 2 runs at most 3 times.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    max_retries: u32,
}

impl RetryBudget {
    /// Creates a new budget.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// The number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The total number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns true if another attempt may follow a failure on attempt number `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_retries > 0 && attempt <= self.max_retries
    }

    /// Returns true if attempt number `attempt` (1-based) is within the budget.
    ///
    /// Attempts outside the budget happen when a test runs more often than the budget allows, for
    /// example when the budget was lowered between process invocations. Their outcome doesn't
    /// change the recorded final status.
    pub fn within_budget(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts()
    }
}
