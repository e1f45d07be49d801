// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::helpers::lock;
use std::{collections::HashMap, sync::Mutex};
use tracing::trace;

/// In-process retry state for one test key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    /// The number of retries scheduled so far in this process.
    pub retry_count: u32,

    /// Whether external reporting is withheld because a retry is pending.
    pub suppressed: bool,
}

/// Records, per test key, whether reporting is suppressed and how many retries were scheduled.
///
/// All operations take `&self` and are safe to call from any number of threads. Suppressing an
/// already suppressed key, or allowing an already allowed one, does nothing.
#[derive(Debug, Default)]
pub struct RetrySuppressionRegistry {
    states: Mutex<HashMap<String, RetryState>>,
}

impl RetrySuppressionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Withholds reporting for `key` until [`allow`](Self::allow) is called.
    ///
    /// Returns true if the key wasn't suppressed before.
    pub fn suppress(&self, key: &str) -> bool {
        let mut states = lock(&self.states);
        let state = states.entry(key.to_owned()).or_default();
        let changed = !state.suppressed;
        state.suppressed = true;
        if changed {
            trace!(test_key = key, "suppressed reporting");
        }
        changed
    }

    /// Re-enables reporting for `key`.
    ///
    /// Returns true if the key was suppressed before.
    pub fn allow(&self, key: &str) -> bool {
        let mut states = lock(&self.states);
        match states.get_mut(key) {
            Some(state) if state.suppressed => {
                state.suppressed = false;
                trace!(test_key = key, "allowed reporting");
                true
            }
            _ => false,
        }
    }

    /// Returns true if reporting for `key` is currently withheld.
    pub fn is_suppressed(&self, key: &str) -> bool {
        lock(&self.states)
            .get(key)
            .is_some_and(|state| state.suppressed)
    }

    /// Returns the number of retries scheduled for `key` in this process.
    pub fn retry_count(&self, key: &str) -> u32 {
        lock(&self.states)
            .get(key)
            .map_or(0, |state| state.retry_count)
    }

    /// Records one more scheduled retry for `key` and returns the new count.
    pub fn increment(&self, key: &str) -> u32 {
        let mut states = lock(&self.states);
        let state = states.entry(key.to_owned()).or_default();
        state.retry_count = state.retry_count.saturating_add(1);
        state.retry_count
    }

    /// Returns the state for `key`, if it is tracked.
    pub fn state(&self, key: &str) -> Option<RetryState> {
        lock(&self.states).get(key).copied()
    }

    /// Stops tracking `key`. The retry count is discarded.
    pub fn clear(&self, key: &str) {
        lock(&self.states).remove(key);
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        lock(&self.states).len()
    }

    /// Returns true if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
