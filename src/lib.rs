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

//! Resumable, concurrent multipart transfers of large objects.
//!
//! An object is split into parts ([`plan`]), the parts are transferred by a bounded pool of
//! workers ([`scheduler`], [`worker`]) while a [`Checkpoint`] records every part the service has
//! acknowledged, and the transfer is finalized once all parts are done ([`complete`]). When a
//! transfer fails or is cancelled, the error carries the checkpoint, and passing it to the next
//! attempt skips every part that was already acknowledged.
//!
//! The storage service itself is reached through the [`Transport`] trait; [`s3::S3Transport`]
//! implements it on top of the AWS SDK.

mod compat;
pub mod checkpoint;
pub mod client;
pub mod complete;
pub mod consts;
mod de;
pub mod error;
pub mod io;
pub mod plan;
pub mod retry;
pub mod s3;
pub mod scheduler;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod worker;

pub use crate::{
    checkpoint::{
        Checkpoint,
        DonePart,
        TransferTarget,
    },
    client::{
        Client,
        DownloadOptions,
        UploadOptions,
    },
    complete::{
        DownloadResult,
        FinalResult,
    },
    error::{
        PartError,
        TransferError,
        TransportError,
        TransportErrorKind,
    },
    plan::{
        PartLimits,
        PartSpec,
        Plan,
    },
    retry::{
        RetryDecision,
        RetryPolicy,
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
        PartResult,
        PartWorker,
    },
};
pub use tokio_util::sync::CancellationToken;
