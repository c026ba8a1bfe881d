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
        StdResultExt,
    },
};
use anyhow::Context;
use clap::{
    Args,
    Subcommand,
};
use std::path::{
    Path,
    PathBuf,
};
use steadfast::{
    consts::S3_MAXIMUM_OBJECT_SIZE,
    io::FileSource,
    s3::S3Transport,
    Client,
    UploadOptions,
};
use tracing::{
    debug,
    error,
    info,
};

#[derive(Debug, Subcommand)]
pub(crate) enum Upload {
    /// Start the upload of a file to S3.
    ///
    /// Steadfast uploads the file in parts, several at a time, such that intermittent errors do not
    /// result in losing all progress on the upload. Every part S3 acknowledges is recorded in the
    /// state-file, so an upload that failed or was interrupted with Ctrl-C can be continued through
    /// the `resume` subcommand, by providing the same state-file again.
    ///
    /// You need the following AWS permissions for the S3-object ARN you are trying to upload to:
    ///
    /// * `s3:PutObject`
    /// * `s3:AbortMultipartUpload`
    ///
    /// Steadfast will automatically discover valid AWS credentials like most AWS SDKs. This means
    /// you can provide environment variables such as `AWS_PROFILE` to select the profile you want
    /// to upload a file with, or provide the `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
    /// directly.
    Start(Start),
    /// Resume the upload of a file to S3.
    ///
    /// You only have to provide the state-file of a previous invocation to `upload start`, and
    /// Steadfast will only upload the parts that S3 hasn't acknowledged yet. The file must not
    /// have changed in the meantime.
    Resume(Resume),
    /// Abort the upload of a file to S3.
    ///
    /// Removes the parts that were already uploaded from S3, and the state-file afterwards.
    Abort(Abort),
}

impl Upload {
    pub(crate) async fn run(self) -> Result<()> {
        match self {
            Upload::Start(start) => start.run().await,
            Upload::Resume(resume) => resume.run().await,
            Upload::Abort(abort) => abort.run().await,
        }
    }
}

#[derive(Debug, Args)]
pub(crate) struct Start {
    /// The name of the S3 bucket to upload the file to.
    #[arg(long)]
    s3_bucket: String,
    /// The S3 key where to upload the file to.
    #[arg(long)]
    s3_key: String,
    /// Path to the file to upload.
    #[arg(long)]
    file_to_upload: PathBuf,
    /// Explicit part-size, in bytes, to use.
    ///
    /// By default, the smallest power-of-two multiple of 5 MiB is used that keeps the upload
    /// within 10,000 parts.
    #[arg(long)]
    part_size: Option<u64>,
    /// Content-Type of the uploaded object, e.g. `application/gzip`.
    #[arg(long)]
    content_type: Option<String>,
    /// User metadata to store with the uploaded object, as `KEY=VALUE`. Can be given multiple
    /// times.
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_metadata)]
    metadata: Vec<(String, String)>,
    /// Path to where the state-file will be saved.
    ///
    /// The state-file is used to make resumable uploads possible. It is kept up to date while the
    /// upload runs, and will automatically be removed if the upload finishes successfully.
    #[arg(long)]
    state_file: PathBuf,
    #[command(flatten)]
    transfer: TransferArgs,
}

impl Start {
    async fn run(mut self) -> Result<()> {
        debug!("Running upload command: {:?}", self);

        cli::ensure_state_file_is_new(&self.state_file, "upload").await?;

        self.file_to_upload = self
            .file_to_upload
            .canonicalize()
            .context("Failed to canonicalize file path")
            .into_unrecoverable()?;

        let file_size_in_bytes = tokio::fs::metadata(&self.file_to_upload)
            .await
            .into_unrecoverable()?
            .len();
        if file_size_in_bytes > S3_MAXIMUM_OBJECT_SIZE {
            bail!("File exceeds the maximum object size of S3 and thus can't be uploaded")
        }

        let client = cli::s3_client(&self.s3_bucket).await;
        let options = UploadOptions {
            part_size: self.part_size,
            content_type: self.content_type.clone(),
            metadata: self.metadata.iter().cloned().collect(),
            transfer: self
                .transfer
                .options(&self.s3_bucket, &self.file_to_upload, &self.state_file),
            ..UploadOptions::default()
        };
        upload(&client, &self.s3_key, self.file_to_upload, &self.state_file, options).await
    }
}

fn parse_metadata(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", value)),
    }
}

#[derive(Debug, Args)]
pub(crate) struct Resume {
    /// Path to the state-file of a previous upload.
    ///
    /// The state-file will automatically be removed if the upload finishes successfully.
    #[arg(long)]
    state_file: PathBuf,
    #[command(flatten)]
    transfer: TransferArgs,
}

impl Resume {
    async fn run(self) -> Result<()> {
        debug!("Running resume command: {:?}", self);

        let state = State::from_file(&self.state_file).await?;

        let current_file_size_in_bytes = tokio::fs::metadata(&state.file)
            .await
            .into_unrecoverable()?
            .len();
        if current_file_size_in_bytes != state.checkpoint.total_size {
            bail!(
                "The file has changed since the last upload. The file size was {} bytes, but is now {} bytes. The upload cannot be resumed, and should be aborted! Upload ID: {}",
                state.checkpoint.total_size,
                current_file_size_in_bytes,
                state.checkpoint.transaction_id,
            );
        }

        let client = cli::s3_client(&state.s3_bucket).await;
        // A checkpoint that doesn't fit the file is reported instead of silently starting over,
        // which would leave the upload of the state-file behind.
        let options = UploadOptions {
            part_size: Some(state.checkpoint.part_size),
            checkpoint: Some(state.checkpoint.clone()),
            require_resume: true,
            transfer: self
                .transfer
                .options(&state.s3_bucket, &state.file, &self.state_file),
            ..UploadOptions::default()
        };
        upload(&client, &state.checkpoint.name, state.file, &self.state_file, options).await
    }
}

#[derive(Debug, Args)]
pub(crate) struct Abort {
    /// Path to the state-file of the upload to abort.
    #[arg(long)]
    state_file: PathBuf,
}

impl Abort {
    async fn run(&self) -> Result<()> {
        debug!("Running abort command: {:?}", self);

        let state = State::from_file(&self.state_file).await?;
        let client = cli::s3_client(&state.s3_bucket).await;
        client.abort(&state.checkpoint).await?;
        info!(
            "Aborted multipart upload with ID {} for: s3://{}/{}",
            state.checkpoint.transaction_id, state.s3_bucket, state.checkpoint.name,
        );

        cli::remove_state_file(&self.state_file).await
    }
}

#[tracing::instrument(skip_all)]
async fn upload(
    client: &Client<S3Transport>,
    s3_key: &str,
    file: PathBuf,
    state_file: &Path,
    options: UploadOptions,
) -> Result<()> {
    let err = match client.upload(s3_key, FileSource::new(file), options).await {
        Ok(result) => {
            info!(
                "Successfully uploaded the file in {} parts. ETag: {}",
                result.parts.len(),
                result.etag.as_deref().unwrap_or("<unknown>"),
            );
            return cli::remove_state_file(state_file).await;
        }
        Err(err) => err,
    };

    let checkpoint = err.checkpoint().cloned();
    match (Error::from(err), checkpoint) {
        (Error::Unrecoverable(err), Some(checkpoint)) => {
            error!(
                "Unrecoverable failure during upload, aborting multipart upload: {}",
                err,
            );
            client.abort(&checkpoint).await?;
            cli::remove_state_file(state_file).await?;
            Err(Error::Unrecoverable(err))
        }
        (Error::Retryable(err), Some(_)) => {
            error!("Multipart upload will not be aborted, to allow resuming: {}", err);
            cli::print_resume_hint("upload", state_file);
            Err(Error::Retryable(err))
        }
        (err, None) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Command {
        #[command(subcommand)]
        upload: Upload,
    }

    #[test]
    fn start_takes_content_type_and_metadata() {
        let command = Command::try_parse_from([
            "upload",
            "start",
            "--s3-bucket",
            "bucket",
            "--s3-key",
            "backup.tar.gz",
            "--file-to-upload",
            "backup.tar.gz",
            "--state-file",
            "state.json",
            "--content-type",
            "application/gzip",
            "--metadata",
            "origin=nightly",
            "--metadata",
            "checksum=a=b",
        ])
        .unwrap();

        let Upload::Start(start) = command.upload else {
            panic!("expected the start subcommand");
        };
        assert_eq!(start.content_type.as_deref(), Some("application/gzip"));
        assert_eq!(
            start.metadata,
            vec![
                ("origin".to_owned(), "nightly".to_owned()),
                ("checksum".to_owned(), "a=b".to_owned()),
            ],
        );
    }

    #[test]
    fn metadata_needs_a_key() {
        assert!(parse_metadata("=value").is_err());
        assert!(parse_metadata("no-separator").is_err());
        assert_eq!(
            parse_metadata("key=").unwrap(),
            ("key".to_owned(), String::new()),
        );
    }
}
