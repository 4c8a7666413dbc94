// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry budget for 5xx responses in the signal loop.

/// Remaining retries. Consuming is pure: the caller keeps the returned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new(remaining: u32) -> Self {
        Self { remaining }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Spend one retry. `None` once nothing is left.
    #[must_use]
    pub fn consume(self) -> Option<Self> {
        self.remaining.checked_sub(1).map(Self::new)
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RETRY_BUDGET)
    }
}
