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

//! Transfers of individual parts.
//!
//! A worker performs exactly one attempt at one part and reports the outcome. It neither retries
//! nor touches the checkpoint; both are left to the scheduler.

use crate::{
    consts::MiB,
    error::{
        PartError,
        TransportError,
    },
    io::{
        Destination,
        Source,
    },
    plan::PartSpec,
    transport::{
        RangeRequest,
        Transport,
        UploadPartRequest,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::{
    bytes::BytesMut,
    sync::CancellationToken,
};
use tracing::{
    debug,
    info,
};

/// Downloaded bytes are handed to the destination in chunks of at most this size.
const DOWNLOAD_CHUNK_SIZE: usize = MiB as usize;

/// A part the remote service has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: u64,
    pub integrity_token: String,
    pub size: u64,
}

#[async_trait]
pub trait PartWorker: Send + Sync + 'static {
    /// An upper bound on concurrent [`Self::run_part`] calls, if this worker has one.
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    async fn run_part(
        &self,
        spec: PartSpec,
        transaction_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PartResult, PartError>;
}

/// Uploads a byte range of a [`Source`] as one part of a multipart upload.
#[derive(Debug)]
pub struct UploadWorker<T, S> {
    transport: Arc<T>,
    source: Arc<S>,
    name: String,
}

impl<T, S> UploadWorker<T, S> {
    pub fn new(transport: Arc<T>, source: Arc<S>, name: impl Into<String>) -> Self {
        Self {
            transport,
            source,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<T, S> PartWorker for UploadWorker<T, S>
where
    T: Transport,
    S: Source,
{
    fn max_concurrency(&self) -> Option<usize> {
        (!self.source.supports_concurrent_reads()).then_some(1)
    }

    #[tracing::instrument(skip_all, fields(part = spec.number))]
    async fn run_part(
        &self,
        spec: PartSpec,
        transaction_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PartResult, PartError> {
        if cancel.is_cancelled() {
            return Err(PartError::Cancelled);
        }

        info!(
            "Starting upload of part {} ({} bytes)...",
            spec.number,
            spec.len(),
        );
        let body = self.source.open_range_reader(spec.start, spec.len()).await?;
        let response = self
            .transport
            .upload_part(UploadPartRequest {
                name: self.name.clone(),
                transaction_id: transaction_id.to_owned(),
                part_number: spec.number,
                content_length: spec.len(),
                body,
            })
            .await?;

        let integrity_token = response
            .etag()
            .filter(|etag| !etag.is_empty())
            .ok_or(PartError::MissingIntegrityToken {
                part_number: spec.number,
            })?
            .to_owned();

        info!(
            "Finished upload of part {} ({} bytes)",
            spec.number,
            spec.len(),
        );
        Ok(PartResult {
            part_number: spec.number,
            integrity_token,
            size: spec.len(),
        })
    }
}

/// Downloads one byte range of an object into a [`Destination`].
#[derive(Debug)]
pub struct DownloadWorker<T, D> {
    transport: Arc<T>,
    destination: Arc<D>,
    name: String,
}

impl<T, D> DownloadWorker<T, D> {
    pub fn new(transport: Arc<T>, destination: Arc<D>, name: impl Into<String>) -> Self {
        Self {
            transport,
            destination,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<T, D> PartWorker for DownloadWorker<T, D>
where
    T: Transport,
    D: Destination,
{
    #[tracing::instrument(skip_all, fields(part = spec.number))]
    async fn run_part(
        &self,
        spec: PartSpec,
        transaction_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PartResult, PartError> {
        if cancel.is_cancelled() {
            return Err(PartError::Cancelled);
        }

        info!(
            "Starting download of part {} ({} bytes)...",
            spec.number,
            spec.len(),
        );
        let mut response = self
            .transport
            .get_range(RangeRequest {
                name: self.name.clone(),
                start: spec.start,
                end: spec.end,
                if_match: Some(transaction_id.to_owned()),
            })
            .await?;

        let integrity_token = match response.etag() {
            Some(etag) if etag != transaction_id => {
                return Err(PartError::Protocol(format!(
                    "the object changed while downloading it, expected entity tag {} but got {}",
                    transaction_id, etag,
                )));
            }
            Some(etag) => etag.to_owned(),
            None => transaction_id.to_owned(),
        };

        debug!("Copying response body to the destination");
        let mut offset = spec.start;
        loop {
            let mut chunk = BytesMut::with_capacity(DOWNLOAD_CHUNK_SIZE);
            while chunk.len() < DOWNLOAD_CHUNK_SIZE {
                let read = response.body.read_buf(&mut chunk).await.map_err(|err| {
                    TransportError::connection(format!("failed to read response body: {}", err))
                })?;
                if read == 0 {
                    break;
                }
            }
            if chunk.is_empty() {
                break;
            }
            if offset + chunk.len() as u64 > spec.end {
                return Err(TransportError::connection(format!(
                    "the response for part {} is longer than the requested {} bytes",
                    spec.number,
                    spec.len(),
                ))
                .into());
            }

            let length = chunk.len() as u64;
            self.destination.write_at(offset, chunk.freeze()).await?;
            offset += length;

            if offset < spec.end && cancel.is_cancelled() {
                return Err(PartError::Cancelled);
            }
        }

        if offset != spec.end {
            return Err(TransportError::connection(format!(
                "the response for part {} ended after {} of {} bytes",
                spec.number,
                offset - spec.start,
                spec.len(),
            ))
            .into());
        }

        info!(
            "Finished download of part {} ({} bytes)",
            spec.number,
            spec.len(),
        );
        Ok(PartResult {
            part_number: spec.number,
            integrity_token,
            size: spec.len(),
        })
    }
}
