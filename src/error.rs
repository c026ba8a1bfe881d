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

//! Error types of the transfer engine.
//!
//! Failures are split by where they originate: [`TransportError`] is what a [`Transport`]
//! reports for a single exchange, [`PartError`] is the outcome of one failed part attempt and
//! [`TransferError`] is what the caller of a whole transfer sees. Every [`TransferError`] raised
//! after a transfer has started carries the checkpoint accumulated so far, so that the caller
//! can resume without transferring acknowledged parts again.
//!
//! [`Transport`]: crate::transport::Transport

use crate::checkpoint::Checkpoint;
use std::fmt::{
    Display,
    Formatter,
};

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

/// Broad classes of transport failures, used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The exchange did not finish in time.
    Timeout,
    /// The connection was reset, refused or the response was cut short.
    Connection,
    /// The service answered with a non-success status code.
    Status(u16),
    /// Anything else, e.g. a request that could not be constructed.
    Other,
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Connection => write!(f, "connection error"),
            TransportErrorKind::Status(status) => write!(f, "status {}", status),
            TransportErrorKind::Other => write!(f, "transport error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connection, message)
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Status(status), message)
    }
}

/// Why a single attempt at transferring a part failed.
#[derive(Debug, thiserror::Error)]
pub enum PartError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The service accepted the part but did not tell us its entity tag, so we can't prove it
    /// stored what we sent.
    #[error("the response for part {part_number} did not include an integrity token")]
    MissingIntegrityToken { part_number: u64 },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("failed to access part data: {0}")]
    Io(#[from] std::io::Error),
    #[error("the part was not transferred because the transfer was cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Bad part size or options, detected before any network call.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("object of {size} bytes is below the multipart threshold of {threshold} bytes")]
    BelowMultipartThreshold { size: u64, threshold: u64 },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("failed to access local data: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint can't be used for this transfer: {0}")]
    InvalidCheckpoint(String),
    #[error("failed to initiate the transfer: {0}")]
    Initiate(#[source] TransportError),
    #[error("part {part_number} failed after {attempts} attempt(s): {source}")]
    TransferFailed {
        part_number: u64,
        attempts: u32,
        #[source]
        source: PartError,
        checkpoint: Box<Checkpoint>,
    },
    #[error("the transfer was cancelled")]
    Cancelled { checkpoint: Box<Checkpoint> },
    #[error("the transfer is missing parts {missing:?}")]
    IncompleteTransfer {
        missing: Vec<u64>,
        checkpoint: Box<Checkpoint>,
    },
    #[error("the service rejected the completion of the transfer: {source}")]
    Completion {
        #[source]
        source: TransportError,
        checkpoint: Box<Checkpoint>,
    },
    #[error("failed to abort the transfer: {0}")]
    Abort(#[source] TransportError),
}

impl TransferError {
    /// The checkpoint as it was when the transfer stopped, if the transfer got far enough to have
    /// one.
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            TransferError::TransferFailed { checkpoint, .. }
            | TransferError::Cancelled { checkpoint }
            | TransferError::IncompleteTransfer { checkpoint, .. }
            | TransferError::Completion { checkpoint, .. } => Some(checkpoint),
            _ => None,
        }
    }

    pub fn into_checkpoint(self) -> Option<Checkpoint> {
        match self {
            TransferError::TransferFailed { checkpoint, .. }
            | TransferError::Cancelled { checkpoint }
            | TransferError::IncompleteTransfer { checkpoint, .. }
            | TransferError::Completion { checkpoint, .. } => Some(*checkpoint),
            _ => None,
        }
    }

    /// Whether feeding [`Self::checkpoint`] back into a new run can finish the transfer.
    ///
    /// A rejected completion is not resumable, the remote transaction is gone at that point.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TransferError::TransferFailed { .. }
                | TransferError::Cancelled { .. }
                | TransferError::IncompleteTransfer { .. }
        )
    }
}
