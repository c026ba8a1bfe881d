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

//! The resumable record of an in-progress transfer.

use crate::{
    de,
    error::{
        Result,
        TransferError,
    },
    plan::{
        compute_part_specs,
        PartSpec,
    },
    worker::PartResult,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// What is being transferred: the object key and its total size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub name: String,
    pub total_size: u64,
}

impl TransferTarget {
    pub fn new(name: impl Into<String>, total_size: u64) -> Self {
        Self {
            name: name.into(),
            total_size,
        }
    }
}

/// A part the remote service has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DonePart {
    pub part_number: u64,
    pub integrity_token: String,
}

impl From<&PartResult> for DonePart {
    fn from(result: &PartResult) -> Self {
        Self {
            part_number: result.part_number,
            integrity_token: result.integrity_token.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Checkpoint {
    pub transaction_id: String,
    pub name: String,
    pub total_size: u64,
    pub part_size: u64,
    #[serde(with = "de::done_parts")]
    pub done_parts: BTreeMap<u64, DonePart>,
}

impl Checkpoint {
    pub fn new(target: &TransferTarget, part_size: u64, transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            name: target.name.clone(),
            total_size: target.total_size,
            part_size,
            done_parts: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> TransferTarget {
        TransferTarget::new(self.name.clone(), self.total_size)
    }

    /// All parts of the transfer, acknowledged or not.
    pub fn part_specs(&self) -> Vec<PartSpec> {
        compute_part_specs(self.total_size, self.part_size)
    }

    pub fn number_of_parts(&self) -> u64 {
        self.total_size.div_ceil(self.part_size.max(1))
    }

    /// The parts that still have to be transferred, in ascending order.
    pub fn pending_parts(&self) -> Vec<PartSpec> {
        self.part_specs()
            .into_iter()
            .filter(|spec| !self.done_parts.contains_key(&spec.number))
            .collect()
    }

    /// Part numbers of the plan that have not been acknowledged yet.
    pub fn missing_parts(&self) -> Vec<u64> {
        self.pending_parts().iter().map(|spec| spec.number).collect()
    }

    pub fn is_done(&self, part_number: u64) -> bool {
        self.done_parts.contains_key(&part_number)
    }

    pub fn is_complete(&self) -> bool {
        self.done_parts.len() as u64 == self.number_of_parts() && self.missing_parts().is_empty()
    }

    pub(crate) fn acknowledge(&mut self, result: &PartResult) {
        self.done_parts
            .insert(result.part_number, DonePart::from(result));
    }

    /// The acknowledged parts in ascending part-number order.
    pub fn ordered_parts(&self) -> Vec<DonePart> {
        self.done_parts.values().cloned().collect()
    }

    /// Checks that this checkpoint describes a transfer of `target` in parts of
    /// `planned_part_size`, the size a fresh plan for the same transfer yields.
    pub fn validate(&self, target: &TransferTarget, planned_part_size: u64) -> Result<()> {
        if self.transaction_id.is_empty() {
            return Err(invalid("the transaction id is empty"));
        }
        if self.name != target.name {
            return Err(invalid(format!(
                "it belongs to '{}', not '{}'",
                self.name, target.name,
            )));
        }
        if self.total_size != target.total_size {
            return Err(invalid(format!(
                "the object size was {} bytes, but is now {} bytes",
                self.total_size, target.total_size,
            )));
        }
        if self.part_size != planned_part_size {
            return Err(invalid(format!(
                "its part size of {} bytes disagrees with the planned part size of {} bytes",
                self.part_size, planned_part_size,
            )));
        }

        let number_of_parts = self.number_of_parts();
        for part in self.done_parts.values() {
            if part.part_number == 0 || part.part_number > number_of_parts {
                return Err(invalid(format!(
                    "part {} is outside of the {} planned parts",
                    part.part_number, number_of_parts,
                )));
            }
            if part.integrity_token.is_empty() {
                return Err(invalid(format!(
                    "part {} has no integrity token",
                    part.part_number,
                )));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> TransferError {
    TransferError::InvalidCheckpoint(reason.into())
}
