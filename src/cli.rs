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

pub(crate) mod download;
pub(crate) mod state;
pub(crate) mod upload;

use crate::{
    cli::state::State,
    result::{
        bail,
        AnyhowResultExt,
        Result,
        StdResultExt,
    },
};
use clap::Args;
use std::{
    path::Path,
    time::Duration,
};
use steadfast::{
    consts::{
        DEFAULT_CONCURRENCY,
        DEFAULT_MAXIMUM_ATTEMPTS,
    },
    s3::S3Transport,
    CancellationToken,
    Client,
    PartLimits,
    RetryPolicy,
    TransferOptions,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// Knobs that only affect how a transfer runs, not what it transfers. They can differ between
/// `start` and every `resume`.
#[derive(Debug, Args)]
pub(crate) struct TransferArgs {
    /// How many parts to transfer at the same time.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// How often a single part is attempted before the transfer fails, including the first
    /// attempt.
    #[arg(long, default_value_t = DEFAULT_MAXIMUM_ATTEMPTS)]
    max_attempts: u32,
    /// Seconds a single attempt at a part may take before it is considered timed out.
    #[arg(long)]
    part_timeout: Option<u64>,
}

impl TransferArgs {
    /// Builds the options for a transfer whose progress is persisted to `state_file` after every
    /// finished part.
    pub(crate) fn options(&self, s3_bucket: &str, file: &Path, state_file: &Path) -> TransferOptions {
        let s3_bucket = s3_bucket.to_owned();
        let file = file.to_owned();
        let state_file = state_file.to_owned();
        let options = TransferOptions::default()
            .with_concurrency(self.concurrency)
            .with_retry(RetryPolicy::default().with_max_attempts(self.max_attempts))
            .with_cancellation(cancel_on_ctrl_c())
            .with_progress(move |progress| {
                if let Some(part) = progress.part {
                    info!(
                        "Finished part {} ({} bytes), {} of {} parts done",
                        part.part_number, part.size, progress.done_parts, progress.total_parts,
                    );
                }
                let state = State {
                    s3_bucket: s3_bucket.clone(),
                    file: file.clone(),
                    checkpoint: progress.checkpoint.clone(),
                };
                if let Err(err) = state.write_to_file(&state_file) {
                    error!("Failed to update the state-file: {}", err);
                }
            });
        match self.part_timeout {
            Some(seconds) => options.with_part_timeout(Duration::from_secs(seconds)),
            None => options,
        }
    }
}

/// Cancels the returned token on Ctrl-C. Parts that are already in flight still finish, so the
/// state-file reflects everything the service has acknowledged.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl-C, waiting for in-flight parts before stopping");
                cancel.cancel();
            }
        }
    });
    cancel
}

pub(crate) async fn s3_client(s3_bucket: &str) -> Client<S3Transport> {
    Client::new(S3Transport::from_env(s3_bucket).await).with_limits(PartLimits::s3())
}

pub(crate) async fn ensure_state_file_is_new(state_file: &Path, command: &str) -> Result<()> {
    debug!("Verifying that the state-file doesn't exist yet. If it does, we don't allow the start of a new {} against the same file.", command);
    if tokio::fs::try_exists(state_file).await.into_unrecoverable()? {
        bail!(
            "The state-file already exists, and we don't allow starting a new {command} against the same file. If you want to resume the {command}, use the 'resume' command instead. If you want to start a new {command}, please remove the state-file first, or use a different one."
        );
    }
    Ok(())
}

pub(crate) async fn remove_state_file(state_file: &Path) -> Result<()> {
    debug!("Removing state-file: {}", state_file.display());
    match tokio::fs::remove_file(state_file).await {
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!("The state-file did not exist, so there is nothing to remove.");
            Ok(())
        }
        result => result.into_unrecoverable(),
    }
}

pub(crate) fn print_resume_hint(command: &str, state_file: &Path) {
    error!(
        "Process failed with a retryable error. To resume the {}, run the following command:",
        command,
    );
    error!(
        "steadfast {} resume --state-file '{}'",
        command,
        state_file.display(),
    );
}
