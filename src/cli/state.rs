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

use crate::result::{
    AnyhowResultExt,
    Result,
    StdResultExt,
};
use anyhow::Context;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};
use steadfast::Checkpoint;

/// Everything needed to pick a transfer up again in a new process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct State {
    pub(crate) s3_bucket: String,
    /// The local file that is uploaded, or downloaded to.
    pub(crate) file: PathBuf,
    #[serde(flatten)]
    pub(crate) checkpoint: Checkpoint,
}

impl State {
    pub(crate) async fn from_file(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref().to_owned();

        // serde_json does not support asynchronous readers, so we make sure to spawn the task away
        // from the main thread.
        tokio::task::spawn_blocking(|| {
            serde_json::from_reader(
                std::fs::File::open(file)
                    .context("Failed to open state file")
                    .into_unrecoverable()?,
            )
            .context("Failed to deserialize state file")
            .into_unrecoverable()
        })
        .await
        .into_unrecoverable()?
    }

    /// Only ever called from the scheduler's progress reports, which are serialized, so there is
    /// only one writer at a time.
    pub(crate) fn write_to_file(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref().to_owned();

        // serde_json does not support asynchronous writers, so we make sure that blocking on the
        // write doesn't starve the executor.
        tokio::task::block_in_place(|| {
            serde_json::to_writer(
                std::fs::File::create(file)
                    .context("Failed to open state file")
                    .into_unrecoverable()?,
                self,
            )
            .context("Failed to serialize state file")
            .into_unrecoverable()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steadfast::{
        DonePart,
        TransferTarget,
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn state_file_round_trips_through_disk() {
        let directory = tempfile::tempdir().unwrap();
        let state_file = directory.path().join("state.json");

        let mut checkpoint = Checkpoint::new(&TransferTarget::new("backups/db.tar", 12), 5, "upload-1");
        checkpoint.done_parts.insert(
            2,
            DonePart {
                part_number: 2,
                integrity_token: "\"etag-2\"".to_owned(),
            },
        );
        let state = State {
            s3_bucket: "bucket".to_owned(),
            file: PathBuf::from("/tmp/db.tar"),
            checkpoint,
        };
        state.write_to_file(&state_file).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&state_file).unwrap()).unwrap();
        assert_eq!(json["s3_bucket"], "bucket");
        assert_eq!(json["transaction_id"], "upload-1");
        assert_eq!(json["name"], "backups/db.tar");

        let restored = State::from_file(&state_file).await.unwrap();
        assert_eq!(restored.checkpoint, state.checkpoint);
        assert_eq!(restored.file, state.file);
    }
}
