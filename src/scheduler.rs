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

//! Drives the part workers of a transfer with bounded concurrency.
//!
//! The scheduler is the only place where part results are applied to the checkpoint. Workers run
//! as independent tasks, but their results are consumed one at a time by the single loop in
//! [`TransferScheduler::run`], so checkpoint mutation is serialized while the network I/O is not.

use crate::{
    checkpoint::Checkpoint,
    consts::DEFAULT_CONCURRENCY,
    error::{
        PartError,
        Result,
        TransferError,
        TransportError,
    },
    plan::PartSpec,
    retry::{
        RetryDecision,
        RetryPolicy,
    },
    worker::{
        PartResult,
        PartWorker,
    },
};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// Reported after every acknowledged part, and once before the first part of a new transfer.
#[derive(Debug)]
pub struct Progress<'a> {
    pub done_parts: u64,
    pub total_parts: u64,
    /// The part that was just acknowledged. `None` for the initial report.
    pub part: Option<&'a PartResult>,
    /// The checkpoint including `part`, ready to be persisted.
    pub checkpoint: &'a Checkpoint,
}

pub type ProgressFn = Arc<dyn Fn(&Progress<'_>) + Send + Sync>;

#[derive(Clone)]
pub struct TransferOptions {
    /// Maximum number of parts in flight.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub progress: Option<ProgressFn>,
    pub cancel: CancellationToken,
    /// Applies to every attempt separately. A timed-out attempt is retried.
    pub part_timeout: Option<Duration>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            progress: None,
            cancel: CancellationToken::new(),
            part_timeout: None,
        }
    }
}

impl std::fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOptions")
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("progress", &self.progress.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("part_timeout", &self.part_timeout)
            .finish()
    }
}

impl TransferOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&Progress<'_>) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_part_timeout(mut self, part_timeout: Duration) -> Self {
        self.part_timeout = Some(part_timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(TransferError::Configuration(
                "the concurrency must be at least 1".to_owned(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(TransferError::Configuration(
                "every part needs at least one attempt".to_owned(),
            ));
        }
        Ok(())
    }

    pub(crate) fn report(&self, progress: &Progress<'_>) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

struct Attempt {
    spec: PartSpec,
    attempt: u32,
    outcome: std::result::Result<PartResult, PartError>,
}

pub struct TransferScheduler<W> {
    worker: Arc<W>,
}

impl<W> TransferScheduler<W>
where
    W: PartWorker,
{
    pub fn new(worker: W) -> Self {
        Self {
            worker: Arc::new(worker),
        }
    }

    /// Transfers every part of `checkpoint` that isn't acknowledged yet.
    ///
    /// Returns the checkpoint with all parts acknowledged. On failure or cancellation the error
    /// carries the checkpoint with every part that was acknowledged before the transfer stopped.
    #[tracing::instrument(skip_all, fields(name = %checkpoint.name))]
    pub async fn run(&self, mut checkpoint: Checkpoint, options: &TransferOptions) -> Result<Checkpoint> {
        options.validate()?;
        if checkpoint.part_size == 0 {
            return Err(TransferError::Configuration(
                "the checkpoint has a part size of 0 bytes".to_owned(),
            ));
        }

        let total_parts = checkpoint.number_of_parts();
        let mut pending: VecDeque<PartSpec> = checkpoint.pending_parts().into();
        let concurrency = match self.worker.max_concurrency() {
            Some(limit) => options.concurrency.min(limit.max(1)),
            None => options.concurrency,
        };
        info!(
            "Transferring {} of {} parts of {} bytes each, {} at a time",
            pending.len(),
            total_parts,
            checkpoint.part_size,
            concurrency,
        );

        let mut in_flight = JoinSet::new();
        let mut failure: Option<(u64, u32, PartError)> = None;
        let mut cancelled = false;

        loop {
            while failure.is_none() && !cancelled && in_flight.len() < concurrency {
                let Some(spec) = pending.pop_front() else {
                    break;
                };
                if options.cancel.is_cancelled() {
                    info!(
                        "Transfer was cancelled, waiting for {} part(s) in flight",
                        in_flight.len(),
                    );
                    pending.push_front(spec);
                    cancelled = true;
                    break;
                }
                self.dispatch(&mut in_flight, spec, 1, Duration::ZERO, &checkpoint, options);
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let Attempt {
                spec,
                attempt,
                outcome,
            } = match joined {
                Ok(attempt) => attempt,
                // We never abort attempts, so the only way to get here is a panicking worker.
                Err(err) => std::panic::resume_unwind(err.into_panic()),
            };

            match outcome {
                Ok(result) => {
                    checkpoint.acknowledge(&result);
                    debug!(
                        "Part {} acknowledged ({} of {} done)",
                        result.part_number,
                        checkpoint.done_parts.len(),
                        total_parts,
                    );
                    options.report(&Progress {
                        done_parts: checkpoint.done_parts.len() as u64,
                        total_parts,
                        part: Some(&result),
                        checkpoint: &checkpoint,
                    });
                }
                Err(PartError::Cancelled) => {
                    debug!("Part {} was not transferred due to cancellation", spec.number);
                    cancelled = true;
                }
                Err(err)
                    if failure.is_none()
                        && !cancelled
                        && options.retry.should_retry(&err, attempt) =>
                {
                    if options.cancel.is_cancelled() {
                        debug!("Not retrying part {} due to cancellation: {}", spec.number, err);
                        cancelled = true;
                        continue;
                    }
                    let delay = options.retry.backoff(attempt);
                    warn!(
                        "Failed to transfer part {}, retrying in {:?} (attempt {} of {}): {}",
                        spec.number, delay, attempt, options.retry.max_attempts, err,
                    );
                    self.dispatch(&mut in_flight, spec, attempt + 1, delay, &checkpoint, options);
                }
                Err(err)
                    if (failure.is_some() || cancelled)
                        && options.retry.classify(&err) == RetryDecision::Retry =>
                {
                    debug!(
                        "Part {} failed while the transfer is stopping, it stays pending: {}",
                        spec.number, err,
                    );
                }
                Err(err) => {
                    if failure.is_none() {
                        error!(
                            "Failed to transfer part {} after {} attempt(s), no further parts will be started: {}",
                            spec.number, attempt, err,
                        );
                        failure = Some((spec.number, attempt, err));
                    } else {
                        warn!(
                            "Part {} failed as well while the transfer is stopping: {}",
                            spec.number, err,
                        );
                    }
                }
            }
        }

        if let Some((part_number, attempts, source)) = failure {
            error!(
                "Transfer failed with {} of {} parts done. It can be resumed from its checkpoint.",
                checkpoint.done_parts.len(),
                total_parts,
            );
            return Err(TransferError::TransferFailed {
                part_number,
                attempts,
                source,
                checkpoint: Box::new(checkpoint),
            });
        }
        if cancelled || !checkpoint.is_complete() {
            info!(
                "Transfer cancelled with {} of {} parts done",
                checkpoint.done_parts.len(),
                total_parts,
            );
            return Err(TransferError::Cancelled {
                checkpoint: Box::new(checkpoint),
            });
        }

        info!("All {} parts transferred", total_parts);
        Ok(checkpoint)
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<Attempt>,
        spec: PartSpec,
        attempt: u32,
        delay: Duration,
        checkpoint: &Checkpoint,
        options: &TransferOptions,
    ) {
        let worker = Arc::clone(&self.worker);
        let transaction_id = checkpoint.transaction_id.clone();
        let cancel = options.cancel.clone();
        let part_timeout = options.part_timeout;

        in_flight.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Attempt {
                            spec,
                            attempt,
                            outcome: Err(PartError::Cancelled),
                        };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let run = worker.run_part(spec, &transaction_id, &cancel);
            let outcome = match part_timeout {
                Some(part_timeout) => tokio::time::timeout(part_timeout, run)
                    .await
                    .unwrap_or_else(|_| {
                        Err(TransportError::timeout(format!(
                            "part {} did not finish within {:?}",
                            spec.number, part_timeout,
                        ))
                        .into())
                    }),
                None => run.await,
            };
            Attempt {
                spec,
                attempt,
                outcome,
            }
        });
    }
}
