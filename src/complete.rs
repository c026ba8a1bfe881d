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

//! Finalizing a transfer once all of its parts are acknowledged.

use crate::{
    checkpoint::{
        Checkpoint,
        DonePart,
    },
    error::{
        Result,
        TransferError,
    },
    transport::{
        CompleteRequest,
        Transport,
    },
};
use tokio_util::bytes::Bytes;
use tracing::{
    debug,
    error,
    info,
};

/// The outcome of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalResult {
    pub name: String,
    /// The entity tag of the assembled object, if the service returned one.
    pub etag: Option<String>,
    /// The parts the object was assembled from, ascending by part number.
    pub parts: Vec<DonePart>,
    /// Whatever else the service sent back, e.g. the acknowledgement of a completion callback.
    pub data: Option<Bytes>,
}

/// The outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub name: String,
    pub size: u64,
    pub etag: String,
    pub parts: Vec<DonePart>,
}

fn ensure_complete(checkpoint: &Checkpoint) -> Result<()> {
    let missing = checkpoint.missing_parts();
    if missing.is_empty() {
        return Ok(());
    }
    error!(
        "Can't finalize the transfer of '{}', {} of {} parts are missing",
        checkpoint.name,
        missing.len(),
        checkpoint.number_of_parts(),
    );
    Err(TransferError::IncompleteTransfer {
        missing,
        checkpoint: Box::new(checkpoint.clone()),
    })
}

/// Asks the service to assemble the uploaded parts into the final object.
///
/// The parts are listed in ascending part-number order, independent of the order in which they
/// were acknowledged. Nothing is sent if any part of the plan is missing.
#[tracing::instrument(skip_all, fields(name = %checkpoint.name))]
pub async fn complete<T>(
    transport: &T,
    checkpoint: &Checkpoint,
    callback: Option<String>,
) -> Result<FinalResult>
where
    T: Transport + ?Sized,
{
    ensure_complete(checkpoint)?;

    let parts = checkpoint.ordered_parts();
    debug!("Completing transfer with {} parts", parts.len());
    let response = transport
        .complete(CompleteRequest {
            name: checkpoint.name.clone(),
            transaction_id: checkpoint.transaction_id.clone(),
            parts: parts.clone(),
            callback,
        })
        .await
        .map_err(|source| {
            error!(
                "The service rejected the completion of transaction {}: {}",
                checkpoint.transaction_id, source,
            );
            TransferError::Completion {
                source,
                checkpoint: Box::new(checkpoint.clone()),
            }
        })?;

    let etag = response.etag().map(ToOwned::to_owned);
    info!(
        "Successfully uploaded the object. ETag: {}",
        etag.as_deref().unwrap_or("<unknown>"),
    );
    Ok(FinalResult {
        name: checkpoint.name.clone(),
        etag,
        parts,
        data: (!response.body.is_empty()).then_some(response.body),
    })
}

/// Checks that every part of a download has been written from the same version of the object.
///
/// The parts of a download are written at their final offsets, so there is nothing left to
/// assemble. Every acknowledged part has to carry the entity tag the download was pinned to;
/// parts that don't are reported as missing and dropped from the returned checkpoint, so a
/// resume transfers them again.
pub fn verify_download(checkpoint: &Checkpoint) -> Result<DownloadResult> {
    ensure_complete(checkpoint)?;

    let foreign: Vec<u64> = checkpoint
        .done_parts
        .values()
        .filter(|part| part.integrity_token != checkpoint.transaction_id)
        .map(|part| part.part_number)
        .collect();
    if !foreign.is_empty() {
        error!(
            "Parts {:?} of '{}' were not downloaded from version {}",
            foreign, checkpoint.name, checkpoint.transaction_id,
        );
        let mut checkpoint = checkpoint.clone();
        checkpoint
            .done_parts
            .retain(|part_number, _| !foreign.contains(part_number));
        return Err(TransferError::IncompleteTransfer {
            missing: foreign,
            checkpoint: Box::new(checkpoint),
        });
    }

    info!("Successfully downloaded the object.");
    Ok(DownloadResult {
        name: checkpoint.name.clone(),
        size: checkpoint.total_size,
        etag: checkpoint.transaction_id.clone(),
        parts: checkpoint.ordered_parts(),
    })
}

/// Abandons the remote transaction of an upload. Its checkpoint can't be resumed afterwards.
pub async fn abort<T>(transport: &T, checkpoint: &Checkpoint) -> Result<()>
where
    T: Transport + ?Sized,
{
    info!(
        "Aborting transaction {} for '{}'",
        checkpoint.transaction_id, checkpoint.name,
    );
    transport
        .abort(&checkpoint.name, &checkpoint.transaction_id)
        .await
        .map_err(TransferError::Abort)
}
