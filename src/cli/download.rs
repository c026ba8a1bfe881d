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

use crate::{
    cli::{
        self,
        state::State,
        TransferArgs,
    },
    result::{
        bail,
        AnyhowResultExt,
        Error,
        Result,
    },
};
use clap::{
    Args,
    Subcommand,
};
use std::path::{
    Path,
    PathBuf,
};
use steadfast::{
    io::FileDestination,
    s3::S3Transport,
    Client,
    DownloadOptions,
};
use tracing::{
    debug,
    error,
    info,
};

#[derive(Debug, Subcommand)]
pub(crate) enum Download {
    /// Start the download of a file from S3.
    ///
    /// Steadfast will take care of downloading the file in a manner that is resilient, such that
    /// intermittent errors do not result in losing all progress on the download, as well as
    /// resumable, e.g. in case the system you are downloading crashed or there is a more
    /// persistent, but still recoverable, error.
    ///
    /// This is achieved through a state-file which keeps track of the state of the download.
    /// Resuming a download is done through the `resume` subcommand, by providing the same
    /// state-file again.
    ///
    /// You need the following AWS permissions for the S3-object ARN you are trying to download from:
    ///
    /// * `s3:GetObject`
    ///
    /// Steadfast will automatically discover valid AWS credentials like most AWS SDKs. This means
    /// you can provide environment variables such as `AWS_PROFILE` to select the profile you want
    /// to download a file with, or provide the `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
    /// directly.
    Start(Start),
    /// Resume the download of a file from S3.
    ///
    /// You only have to provide the state-file of a previous invocation to `download start`, and
    /// Steadfast will resume your download where it left off. If the object was replaced in the
    /// meantime, the download starts over.
    Resume(Resume),
    /// Abort the download of a file from S3.
    ///
    /// If you previously started a download using the `start` subcommand which has failed with a
    /// recoverable error, but you no longer want to finish the download you can invoke this
    /// subcommand with the state-file.
    Abort(Abort),
}

impl Download {
    pub(crate) async fn run(self) -> Result<()> {
        match self {
            Download::Start(start) => start.run().await,
            Download::Resume(resume) => resume.run().await,
            Download::Abort(abort) => abort.run().await,
        }
    }
}

#[derive(Debug, Args)]
pub(crate) struct Start {
    /// The name of the S3 bucket to download the file from.
    #[arg(long)]
    s3_bucket: String,
    /// The S3 key to download the file from.
    #[arg(long)]
    s3_key: String,
    /// Path to the local file to download to.
    #[arg(long)]
    output: PathBuf,
    /// Explicit part-size, in bytes, to use.
    #[arg(long)]
    part_size: Option<u64>,
    /// Path to where the state-file will be saved.
    ///
    /// The state-file is used to make resumable downloads possible. It will automatically be
    /// removed if the download finishes successfully.
    #[arg(long)]
    state_file: PathBuf,
    #[command(flatten)]
    transfer: TransferArgs,
}

impl Start {
    async fn run(self) -> Result<()> {
        debug!("Running download command: {:?}", self);

        cli::ensure_state_file_is_new(&self.state_file, "download").await?;

        if self.output.exists() {
            bail!("The output file already exists. We don't allow overwriting existing files.");
        }

        let client = cli::s3_client(&self.s3_bucket).await;
        let options = DownloadOptions {
            part_size: self.part_size,
            checkpoint: None,
            transfer: self
                .transfer
                .options(&self.s3_bucket, &self.output, &self.state_file),
        };
        download(&client, &self.s3_key, self.output, &self.state_file, options).await
    }
}

#[derive(Debug, Args)]
pub(crate) struct Resume {
    /// Path to the state-file to resume the download from.
    ///
    /// The state-file will automatically be removed if the download finishes successfully.
    #[arg(long)]
    state_file: PathBuf,
    #[command(flatten)]
    transfer: TransferArgs,
}

impl Resume {
    async fn run(self) -> Result<()> {
        debug!("Running resume command: {:?}", self);

        let state = State::from_file(&self.state_file).await?;

        let client = cli::s3_client(&state.s3_bucket).await;
        let options = DownloadOptions {
            part_size: Some(state.checkpoint.part_size),
            checkpoint: Some(state.checkpoint.clone()),
            transfer: self
                .transfer
                .options(&state.s3_bucket, &state.file, &self.state_file),
        };
        download(&client, &state.checkpoint.name, state.file, &self.state_file, options).await
    }
}

#[derive(Debug, Args)]
pub(crate) struct Abort {
    /// Path to the state-file of the download to abort.
    #[arg(long)]
    state_file: PathBuf,
}

impl Abort {
    async fn run(&self) -> Result<()> {
        debug!("Running abort command: {:?}", self);

        // Downloads hold no remote state, forgetting the progress is all there is to do.
        cli::remove_state_file(&self.state_file).await
    }
}

#[tracing::instrument(skip_all)]
async fn download(
    client: &Client<S3Transport>,
    s3_key: &str,
    output: PathBuf,
    state_file: &Path,
    options: DownloadOptions,
) -> Result<()> {
    match client
        .download(s3_key, FileDestination::new(output), options)
        .await
        .map_err(Error::from)
    {
        Ok(result) => {
            info!(
                "Successfully downloaded the file in {} parts ({} bytes). ETag: {}",
                result.parts.len(),
                result.size,
                result.etag,
            );
            cli::remove_state_file(state_file).await
        }
        Err(Error::Retryable(err)) => {
            error!("Download will not be aborted, to allow resuming: {}", err);
            cli::print_resume_hint("download", state_file);
            Err(Error::Retryable(err))
        }
        Err(err) => Err(err),
    }
}
