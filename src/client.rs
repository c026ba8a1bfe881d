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

//! Whole transfers: planning, initiating or resuming, scheduling the parts and finalizing.

use crate::{
    checkpoint::{
        Checkpoint,
        TransferTarget,
    },
    complete::{
        self,
        DownloadResult,
        FinalResult,
    },
    error::{
        Result,
        TransferError,
    },
    io::{
        Destination,
        Source,
    },
    plan::{
        self,
        PartLimits,
        Plan,
    },
    scheduler::{
        Progress,
        TransferOptions,
        TransferScheduler,
    },
    transport::{
        InitiateRequest,
        Transport,
    },
    worker::{
        DownloadWorker,
        UploadWorker,
    },
};
use std::{
    collections::HashMap,
    sync::Arc,
};
use tracing::{
    info,
    warn,
};

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Explicit part size. Chosen from the part-size ladder if absent.
    pub part_size: Option<u64>,
    /// Checkpoint of an earlier, interrupted upload of the same object.
    pub checkpoint: Option<Checkpoint>,
    /// Forwarded to the service with the completion request.
    pub callback: Option<String>,
    /// Media type of the assembled object, sent when the upload is initiated.
    pub content_type: Option<String>,
    /// User metadata of the assembled object, sent when the upload is initiated.
    pub metadata: HashMap<String, String>,
    /// Fail with [`TransferError::InvalidCheckpoint`] instead of starting a new upload when
    /// `checkpoint` can't be resumed. The remote upload of that checkpoint stays untouched.
    pub require_resume: bool,
    pub transfer: TransferOptions,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub part_size: Option<u64>,
    pub checkpoint: Option<Checkpoint>,
    pub transfer: TransferOptions,
}

pub struct Client<T> {
    transport: Arc<T>,
    limits: PartLimits,
}

impl<T> Client<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            limits: PartLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PartLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn limits(&self) -> &PartLimits {
        &self.limits
    }

    fn part_size(&self, target: &TransferTarget, requested_part_size: Option<u64>) -> Result<u64> {
        match plan::plan(target.total_size, requested_part_size, &self.limits)? {
            Plan::SingleShot => Err(TransferError::BelowMultipartThreshold {
                size: target.total_size,
                threshold: self.limits.multipart_threshold,
            }),
            Plan::Multipart { part_size, .. } => Ok(part_size),
        }
    }

    /// Uploads `source` as the object `name` in parts.
    ///
    /// If `options.checkpoint` is a valid checkpoint for this object, the upload continues that
    /// transaction and only sends the parts it is missing. Otherwise a new transaction is started.
    #[tracing::instrument(skip_all, fields(name = %name))]
    pub async fn upload<S>(&self, name: &str, source: S, options: UploadOptions) -> Result<FinalResult>
    where
        S: Source,
    {
        options.transfer.validate()?;
        let target = TransferTarget::new(name, source.size().await?);
        let part_size = self.part_size(&target, options.part_size)?;

        let resumable = match options.checkpoint {
            Some(checkpoint) => match checkpoint.validate(&target, part_size) {
                Ok(()) => Some(checkpoint),
                Err(err) if options.require_resume => return Err(err),
                Err(err) => {
                    warn!("Starting a new upload instead of resuming: {}", err);
                    None
                }
            },
            None => None,
        };
        let checkpoint = match resumable {
            Some(checkpoint) => {
                info!(
                    "Resuming multipart upload with ID {}, {} of {} parts are already done",
                    checkpoint.transaction_id,
                    checkpoint.done_parts.len(),
                    checkpoint.number_of_parts(),
                );
                checkpoint
            }
            None => {
                let transaction_id = self
                    .transport
                    .initiate(InitiateRequest {
                        name: name.to_owned(),
                        content_type: options.content_type,
                        metadata: options.metadata,
                    })
                    .await
                    .map_err(TransferError::Initiate)?;
                info!(
                    "Created multipart upload with ID {} for: {}",
                    transaction_id, name,
                );
                let checkpoint = Checkpoint::new(&target, part_size, transaction_id);
                report_start(&checkpoint, &options.transfer);
                checkpoint
            }
        };

        let worker = UploadWorker::new(Arc::clone(&self.transport), Arc::new(source), name);
        let checkpoint = TransferScheduler::new(worker)
            .run(checkpoint, &options.transfer)
            .await?;
        complete::complete(&*self.transport, &checkpoint, options.callback).await
    }

    /// Downloads the object `name` into `destination` in parts.
    ///
    /// The object's entity tag serves as the transaction id: a checkpoint is only resumed if the
    /// object hasn't changed since, and every part is requested on the condition that it still
    /// hasn't.
    #[tracing::instrument(skip_all, fields(name = %name))]
    pub async fn download<D>(
        &self,
        name: &str,
        destination: D,
        options: DownloadOptions,
    ) -> Result<DownloadResult>
    where
        D: Destination,
    {
        options.transfer.validate()?;
        let object = self
            .transport
            .stat(name)
            .await
            .map_err(TransferError::Initiate)?;
        let etag = object.etag.ok_or_else(|| {
            TransferError::Protocol(format!("the service did not return an entity tag for '{}'", name))
        })?;
        let target = TransferTarget::new(name, object.size);
        let part_size = self.part_size(&target, options.part_size)?;

        let resumable = options.checkpoint.and_then(|checkpoint| {
            if checkpoint.transaction_id != etag {
                warn!(
                    "Starting a new download instead of resuming: the object changed from entity tag {} to {}",
                    checkpoint.transaction_id, etag,
                );
                return None;
            }
            match checkpoint.validate(&target, part_size) {
                Ok(()) => Some(checkpoint),
                Err(err) => {
                    warn!("Starting a new download instead of resuming: {}", err);
                    None
                }
            }
        });

        destination.set_len(target.total_size).await?;
        let checkpoint = match resumable {
            Some(checkpoint) => {
                info!(
                    "Resuming download, {} of {} parts are already done",
                    checkpoint.done_parts.len(),
                    checkpoint.number_of_parts(),
                );
                checkpoint
            }
            None => {
                let checkpoint = Checkpoint::new(&target, part_size, etag);
                report_start(&checkpoint, &options.transfer);
                checkpoint
            }
        };

        let worker = DownloadWorker::new(Arc::clone(&self.transport), Arc::new(destination), name);
        let checkpoint = TransferScheduler::new(worker)
            .run(checkpoint, &options.transfer)
            .await?;
        complete::verify_download(&checkpoint)
    }

    /// Abandons the upload described by `checkpoint`.
    pub async fn abort(&self, checkpoint: &Checkpoint) -> Result<()> {
        complete::abort(&*self.transport, checkpoint).await
    }
}

/// Hands a freshly created checkpoint to the progress callback, so it can be persisted before any
/// part is transferred.
fn report_start(checkpoint: &Checkpoint, options: &TransferOptions) {
    options.report(&Progress {
        done_parts: 0,
        total_parts: checkpoint.number_of_parts(),
        part: None,
        checkpoint,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consts::KiB,
        error::{
            PartError,
            TransportError,
        },
        io::{
            BufferDestination,
            BytesSource,
            FileDestination,
            FileSource,
            StreamSource,
        },
        retry::RetryPolicy,
        testing::MockTransport,
    };
    use std::{
        sync::Mutex,
        time::Duration,
    };
    use tokio_util::{
        bytes::Bytes,
        sync::CancellationToken,
    };

    fn object(size: u64) -> Bytes {
        (0..size).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    fn fast_retries() -> TransferOptions {
        TransferOptions::default()
            .with_retry(RetryPolicy::default().with_backoff(Duration::ZERO, Duration::ZERO))
    }

    fn upload_options(part_size: u64) -> UploadOptions {
        UploadOptions {
            part_size: Some(part_size),
            transfer: fast_retries(),
            ..UploadOptions::default()
        }
    }

    #[tokio::test]
    async fn uploads_in_three_parts_and_assembles_in_order() {
        let client = Client::new(MockTransport::default());
        let data = object(250 * KiB);

        let result = client
            .upload("backup.tar", BytesSource::new(data.clone()), upload_options(100 * KiB))
            .await
            .unwrap();

        let part_numbers: Vec<_> = result.parts.iter().map(|part| part.part_number).collect();
        assert_eq!(part_numbers, vec![1, 2, 3]);
        assert_eq!(client.transport().object("backup.tar").unwrap(), data);
        assert_eq!(result.etag.as_deref(), Some("\"object-256000\""));
        assert_eq!(result.data, None);

        let state = client.transport().state();
        assert_eq!(state.complete_calls.len(), 1);
        let sizes: Vec<_> = state.complete_calls[0]
            .parts
            .iter()
            .map(|part| part.part_number)
            .collect();
        assert_eq!(sizes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn uploads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.bin");
        let data = object(300 * KiB + 3);
        std::fs::write(&path, &data).unwrap();

        let client = Client::new(MockTransport::default());
        client
            .upload("object.bin", FileSource::new(&path), upload_options(100 * KiB))
            .await
            .unwrap();

        assert_eq!(client.transport().object("object.bin").unwrap(), data);
        assert_eq!(client.transport().state().part_calls.len(), 4);
    }

    #[tokio::test]
    async fn uploads_from_a_sequential_stream() {
        let data = object(250 * KiB);
        let client = Client::new(MockTransport::default().failing_part(2, [
            TransportError::connection("reset"),
        ]));

        client
            .upload(
                "stream.bin",
                StreamSource::new(std::io::Cursor::new(data.to_vec()), data.len() as u64),
                upload_options(100 * KiB),
            )
            .await
            .unwrap();

        assert_eq!(client.transport().object("stream.bin").unwrap(), data);
        assert_eq!(client.transport().state().part_calls, vec![1, 2, 2, 3]);
    }

    #[tokio::test]
    async fn retries_transient_part_failures() {
        let client = Client::new(
            MockTransport::default().failing_part(2, [TransportError::status(503, "slow down")]),
        );
        let data = object(250 * KiB);

        let result = client
            .upload("object", BytesSource::new(data.clone()), upload_options(100 * KiB))
            .await
            .unwrap();

        assert_eq!(result.parts.len(), 3);
        assert_eq!(client.transport().object("object").unwrap(), data);
    }

    #[tokio::test]
    async fn resumes_a_failed_upload_without_resending_parts() {
        let client = Client::new(
            MockTransport::default().failing_part(2, [TransportError::status(403, "denied")]),
        );
        let data = object(500 * KiB);
        let mut options = upload_options(100 * KiB);
        options.transfer = options.transfer.with_concurrency(1);

        let err = client
            .upload("object", BytesSource::new(data.clone()), options.clone())
            .await
            .unwrap_err();
        assert!(err.is_resumable());
        let checkpoint = err.into_checkpoint().unwrap();
        assert_eq!(checkpoint.done_parts.keys().copied().collect::<Vec<_>>(), vec![1]);

        client.transport().state().part_calls.clear();
        options.checkpoint = Some(checkpoint);
        client
            .upload("object", BytesSource::new(data.clone()), options)
            .await
            .unwrap();

        let state = client.transport().state();
        assert_eq!(state.initiated, 1);
        assert_eq!(state.part_calls, vec![2, 3, 4, 5]);
        drop(state);
        assert_eq!(client.transport().object("object").unwrap(), data);
    }

    #[tokio::test]
    async fn invalid_checkpoint_starts_a_new_upload() {
        let client = Client::new(MockTransport::default());
        let stale = Checkpoint::new(&TransferTarget::new("object", 900 * KiB), 100 * KiB, "old");
        let options = UploadOptions {
            checkpoint: Some(stale),
            ..upload_options(100 * KiB)
        };

        client
            .upload("object", BytesSource::new(object(250 * KiB)), options)
            .await
            .unwrap();

        let state = client.transport().state();
        assert_eq!(state.initiated, 1);
        assert_eq!(state.part_calls.len(), 3);
    }

    #[tokio::test]
    async fn checkpoint_with_another_part_size_starts_a_new_upload() {
        let client = Client::new(MockTransport::default());
        let data = object(500 * KiB);
        let earlier = client
            .transport()
            .initiate(InitiateRequest::new("object"))
            .await
            .unwrap();
        let mut checkpoint = Checkpoint::new(
            &TransferTarget::new("object", data.len() as u64),
            200 * KiB,
            earlier,
        );
        checkpoint.done_parts.insert(
            1,
            crate::checkpoint::DonePart {
                part_number: 1,
                integrity_token: "\"etag-1\"".to_owned(),
            },
        );
        let options = UploadOptions {
            checkpoint: Some(checkpoint),
            ..upload_options(100 * KiB)
        };

        let result = client
            .upload("object", BytesSource::new(data.clone()), options)
            .await
            .unwrap();

        assert_eq!(result.parts.len(), 5);
        let state = client.transport().state();
        assert_eq!(state.initiated, 2);
        assert_eq!(state.part_calls.len(), 5);
        drop(state);
        assert_eq!(client.transport().object("object").unwrap(), data);
    }

    #[tokio::test]
    async fn required_resume_rejects_an_invalid_checkpoint() {
        let client = Client::new(MockTransport::default());
        let stale = Checkpoint::new(&TransferTarget::new("object", 900 * KiB), 100 * KiB, "old");
        let options = UploadOptions {
            checkpoint: Some(stale),
            require_resume: true,
            ..upload_options(100 * KiB)
        };

        let err = client
            .upload("object", BytesSource::new(object(250 * KiB)), options)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::InvalidCheckpoint(_)));
        assert!(err.checkpoint().is_none());
        let state = client.transport().state();
        assert_eq!(state.initiated, 0);
        assert!(state.part_calls.is_empty());
    }

    #[tokio::test]
    async fn initiate_carries_content_type_and_metadata() {
        let client = Client::new(MockTransport::default());
        let options = UploadOptions {
            content_type: Some("application/gzip".to_owned()),
            metadata: HashMap::from([("origin".to_owned(), "nightly".to_owned())]),
            ..upload_options(100 * KiB)
        };

        client
            .upload("backup.tar.gz", BytesSource::new(object(250 * KiB)), options)
            .await
            .unwrap();

        let state = client.transport().state();
        assert_eq!(
            state.initiate_calls,
            vec![InitiateRequest {
                name: "backup.tar.gz".to_owned(),
                content_type: Some("application/gzip".to_owned()),
                metadata: HashMap::from([("origin".to_owned(), "nightly".to_owned())]),
            }],
        );
    }

    #[tokio::test]
    async fn cancelled_upload_can_be_resumed() {
        let client = Client::new(MockTransport::default());
        let data = object(400 * KiB);
        let cancel = CancellationToken::new();
        let mut options = upload_options(100 * KiB);
        options.transfer = options
            .transfer
            .with_concurrency(1)
            .with_cancellation(cancel.clone())
            .with_progress(move |progress| {
                if progress.done_parts == 2 {
                    cancel.cancel();
                }
            });

        let err = client
            .upload("object", BytesSource::new(data.clone()), options)
            .await
            .unwrap_err();
        let checkpoint = match err {
            TransferError::Cancelled { checkpoint } => *checkpoint,
            err => panic!("unexpected error: {:?}", err),
        };
        assert_eq!(checkpoint.done_parts.len(), 2);
        assert!(client.transport().state().complete_calls.is_empty());

        let options = UploadOptions {
            checkpoint: Some(checkpoint),
            ..upload_options(100 * KiB)
        };
        client
            .upload("object", BytesSource::new(data.clone()), options)
            .await
            .unwrap();
        assert_eq!(client.transport().state().part_calls, vec![1, 2, 3, 4]);
        assert_eq!(client.transport().object("object").unwrap(), data);
    }

    #[tokio::test]
    async fn reports_new_checkpoint_before_first_part() {
        let client = Client::new(MockTransport::default());
        let reports = Arc::new(Mutex::new(vec![]));
        let mut options = upload_options(100 * KiB);
        options.transfer = options.transfer.with_concurrency(1).with_progress({
            let reports = Arc::clone(&reports);
            move |progress| {
                reports.lock().unwrap().push((
                    progress.done_parts,
                    progress.total_parts,
                    progress.checkpoint.transaction_id.clone(),
                ));
            }
        });

        client
            .upload("object", BytesSource::new(object(250 * KiB)), options)
            .await
            .unwrap();

        let reports = reports.lock().unwrap();
        let transaction_id = "transaction-1".to_owned();
        assert_eq!(
            *reports,
            vec![
                (0, 3, transaction_id.clone()),
                (1, 3, transaction_id.clone()),
                (2, 3, transaction_id.clone()),
                (3, 3, transaction_id),
            ],
        );
    }

    #[tokio::test]
    async fn small_objects_are_rejected() {
        let client = Client::new(MockTransport::default());
        let err = client
            .upload("small", BytesSource::new(object(10)), UploadOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::BelowMultipartThreshold { size: 10, .. }
        ));
        assert_eq!(client.transport().state().initiated, 0);
    }

    #[tokio::test]
    async fn missing_etag_fails_the_upload() {
        let client = Client::new(MockTransport::default());
        client.transport().state().omit_part_etag = true;

        let err = client
            .upload("object", BytesSource::new(object(250 * KiB)), upload_options(100 * KiB))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::TransferFailed {
                source: PartError::MissingIntegrityToken { .. },
                attempts: 1,
                ..
            }
        ));
        assert!(client.transport().state().complete_calls.is_empty());
    }

    #[tokio::test]
    async fn rejected_completion_is_not_resumable() {
        let client = Client::new(MockTransport::default());
        client.transport().state().reject_complete =
            Some(TransportError::status(400, "InvalidPart"));

        let err = client
            .upload("object", BytesSource::new(object(250 * KiB)), upload_options(100 * KiB))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Completion { .. }));
        assert!(!err.is_resumable());
        assert!(err.checkpoint().unwrap().is_complete());
    }

    #[tokio::test]
    async fn returns_callback_payload() {
        let client = Client::new(MockTransport::default());
        let options = UploadOptions {
            callback: Some("notify".to_owned()),
            ..upload_options(100 * KiB)
        };

        let result = client
            .upload("object", BytesSource::new(object(250 * KiB)), options)
            .await
            .unwrap();

        assert_eq!(
            result.data.as_deref(),
            Some(&b"{\"callback\":\"notify\"}"[..]),
        );
    }

    #[tokio::test]
    async fn aborts_an_upload() {
        let client = Client::new(
            MockTransport::default().failing_part(1, [TransportError::status(403, "denied")]),
        );
        let err = client
            .upload("object", BytesSource::new(object(250 * KiB)), upload_options(100 * KiB))
            .await
            .unwrap_err();
        let checkpoint = err.into_checkpoint().unwrap();

        client.abort(&checkpoint).await.unwrap();
        assert_eq!(
            client.transport().state().aborted,
            vec![checkpoint.transaction_id.clone()],
        );
    }

    #[tokio::test]
    async fn downloads_into_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download.bin");
        let data = object(350 * KiB + 1);
        let client = Client::new(MockTransport::default().with_object("object", data.clone()));

        let result = client
            .download(
                "object",
                FileDestination::new(&path),
                DownloadOptions {
                    part_size: Some(100 * KiB),
                    transfer: fast_retries(),
                    ..DownloadOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.size, data.len() as u64);
        assert_eq!(result.parts.len(), 4);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn resumes_a_failed_download() {
        let data = object(300 * KiB);
        let client = Client::new(
            MockTransport::default()
                .with_object("object", data.clone())
                .failing_range(100 * KiB, [TransportError::status(403, "denied")]),
        );
        let destination = BufferDestination::new();
        let mut options = DownloadOptions {
            part_size: Some(100 * KiB),
            transfer: fast_retries().with_concurrency(1),
            ..DownloadOptions::default()
        };

        let err = client
            .download("object", destination.clone(), options.clone())
            .await
            .unwrap_err();
        let checkpoint = err.into_checkpoint().unwrap();
        assert_eq!(checkpoint.done_parts.keys().copied().collect::<Vec<_>>(), vec![1]);

        client.transport().state().range_calls.clear();
        options.checkpoint = Some(checkpoint);
        client
            .download("object", destination.clone(), options)
            .await
            .unwrap();

        assert_eq!(
            client.transport().state().range_calls,
            vec![100 * KiB, 200 * KiB],
        );
        assert_eq!(destination.contents(), data);
    }

    #[tokio::test]
    async fn changed_object_restarts_the_download() {
        let data = object(300 * KiB);
        let client = Client::new(MockTransport::default().with_object("object", data.clone()));
        let mut stale = Checkpoint::new(
            &TransferTarget::new("object", data.len() as u64),
            100 * KiB,
            "\"an-older-version\"",
        );
        stale.done_parts.insert(
            1,
            crate::checkpoint::DonePart {
                part_number: 1,
                integrity_token: "\"an-older-version\"".to_owned(),
            },
        );
        let destination = BufferDestination::new();

        client
            .download(
                "object",
                destination.clone(),
                DownloadOptions {
                    part_size: Some(100 * KiB),
                    checkpoint: Some(stale),
                    ..DownloadOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(client.transport().state().range_calls.len(), 3);
        assert_eq!(destination.contents(), data);
    }
}
