// Copyright 2024 TAKKT Industrial & Packaging GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Decides which part failures are worth another attempt, and how long to wait before it.

use crate::{
    consts::DEFAULT_MAXIMUM_ATTEMPTS,
    error::{
        PartError,
        TransportErrorKind,
    },
};
use std::{
    collections::BTreeSet,
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per part, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Status codes that are worth retrying, e.g. rate limiting.
    pub retryable_statuses: BTreeSet<u16>,
    /// Retry every 5xx status, not just those in `retryable_statuses`.
    pub retry_server_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAXIMUM_ATTEMPTS,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            retryable_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retry_server_errors: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_server_errors_retried(mut self, retry_server_errors: bool) -> Self {
        self.retry_server_errors = retry_server_errors;
        self
    }

    pub fn classify(&self, error: &PartError) -> RetryDecision {
        let retryable = match error {
            PartError::Transport(err) => match err.kind {
                TransportErrorKind::Timeout | TransportErrorKind::Connection => true,
                TransportErrorKind::Status(status) => {
                    self.retryable_statuses.contains(&status)
                        || (self.retry_server_errors && (500..600).contains(&status))
                }
                TransportErrorKind::Other => false,
            },
            PartError::MissingIntegrityToken { .. }
            | PartError::Protocol(_)
            | PartError::Io(_)
            | PartError::Cancelled => false,
        };
        if retryable {
            RetryDecision::Retry
        } else {
            RetryDecision::Fail
        }
    }

    /// Whether a part that just failed its `attempt`-th attempt with `error` goes again.
    pub fn should_retry(&self, error: &PartError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.classify(error) == RetryDecision::Retry
    }

    /// Delay before attempt number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
