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

//! Part-size computation and splitting of an object into part ranges.

use crate::{
    consts::{
        DEFAULT_MINIMUM_PART_SIZE,
        DEFAULT_MULTIPART_THRESHOLD,
        LADDER_FIRST_RUNG,
        LADDER_LAST_RUNG,
        MAXIMUM_NUMBER_OF_PARTS,
        MINIMUM_PART_NUMBER,
        S3_MAXIMUM_PART_SIZE,
        S3_MINIMUM_PART_SIZE,
    },
    error::{
        Result,
        TransferError,
    },
};
use tracing::{
    debug,
    warn,
};

/// Service-defined limits the planner has to respect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartLimits {
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_part_count: u64,
    /// Objects below this size are not transferred in parts.
    pub multipart_threshold: u64,
    /// Ascending part sizes to pick from when the caller doesn't request one.
    pub ladder: Vec<u64>,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MINIMUM_PART_SIZE,
            max_part_size: S3_MAXIMUM_PART_SIZE,
            max_part_count: MAXIMUM_NUMBER_OF_PARTS,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            ladder: doubling_ladder(LADDER_FIRST_RUNG, LADDER_LAST_RUNG),
        }
    }
}

impl PartLimits {
    /// The limits imposed by S3, which doesn't accept parts below 5 MiB (except for the last).
    pub fn s3() -> Self {
        Self {
            min_part_size: S3_MINIMUM_PART_SIZE,
            multipart_threshold: S3_MINIMUM_PART_SIZE,
            ladder: doubling_ladder(S3_MINIMUM_PART_SIZE, LADDER_LAST_RUNG),
            ..Self::default()
        }
    }
}

fn doubling_ladder(first: u64, last: u64) -> Vec<u64> {
    std::iter::successors(Some(first), |rung| rung.checked_mul(2))
        .take_while(|rung| *rung <= last)
        .collect()
}

/// One chunk of the object, covering the bytes `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartSpec {
    pub number: u64,
    pub start: u64,
    pub end: u64,
}

impl PartSpec {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// How an object of a given size is going to be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The object is too small to be split, it has to go through a single request.
    SingleShot,
    Multipart { part_size: u64, parts: Vec<PartSpec> },
}

pub fn compute_part_size(
    total_size: u64,
    requested_part_size: Option<u64>,
    limits: &PartLimits,
) -> Result<u64> {
    let Some(requested_part_size) = requested_part_size else {
        return limits
            .ladder
            .iter()
            .copied()
            .find(|rung| total_size.div_ceil(*rung) <= limits.max_part_count)
            .ok_or_else(|| {
                TransferError::Configuration(format!(
                    "an object of {} bytes can't be split into at most {} parts with any supported part size",
                    total_size, limits.max_part_count,
                ))
            });
    };

    if requested_part_size == 0 {
        return Err(TransferError::Configuration(
            "the part size must be a positive number of bytes".to_owned(),
        ));
    } else if requested_part_size < limits.min_part_size {
        return Err(TransferError::Configuration(format!(
            "the part size is too small, it must be at least {} bytes",
            limits.min_part_size,
        )));
    } else if requested_part_size > limits.max_part_size {
        return Err(TransferError::Configuration(format!(
            "the part size is too large, it must be at most {} bytes",
            limits.max_part_size,
        )));
    }

    if total_size.div_ceil(requested_part_size) <= limits.max_part_count {
        return Ok(requested_part_size);
    }

    // The requested size would need more parts than the service allows, so we pick the smallest
    // size that stays within the limit instead.
    let part_size = total_size.div_ceil(limits.max_part_count);
    if part_size > limits.max_part_size {
        return Err(TransferError::Configuration(format!(
            "an object of {} bytes can't be split into at most {} parts of at most {} bytes",
            total_size, limits.max_part_count, limits.max_part_size,
        )));
    }
    warn!(
        "Part size of {} bytes would exceed {} parts, using {} bytes instead",
        requested_part_size, limits.max_part_count, part_size,
    );
    Ok(part_size)
}

/// Splits `0..total_size` into consecutive parts of `part_size` bytes, the last one possibly
/// shorter.
pub fn compute_part_specs(total_size: u64, part_size: u64) -> Vec<PartSpec> {
    if total_size == 0 || part_size == 0 {
        return vec![];
    }

    (0..total_size.div_ceil(part_size))
        .map(|index| {
            let start = index * part_size;
            PartSpec {
                number: MINIMUM_PART_NUMBER + index,
                start,
                end: (start + part_size).min(total_size),
            }
        })
        .collect()
}

pub fn plan(total_size: u64, requested_part_size: Option<u64>, limits: &PartLimits) -> Result<Plan> {
    if total_size < limits.multipart_threshold || total_size == 0 {
        debug!(
            "Object of {} bytes is below the multipart threshold of {} bytes",
            total_size, limits.multipart_threshold,
        );
        return Ok(Plan::SingleShot);
    }

    let part_size = compute_part_size(total_size, requested_part_size, limits)?;
    let parts = compute_part_specs(total_size, part_size);
    debug!(
        "Object size: {} bytes. Part size: {} bytes. Number of parts: {}.",
        total_size,
        part_size,
        parts.len(),
    );
    Ok(Plan::Multipart { part_size, parts })
}
