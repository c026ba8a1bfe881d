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

//! Sizes and service limits used as defaults by the planner and the scheduler.

#[allow(non_upper_case_globals)]
pub const KiB: u64 = 1024;
#[allow(non_upper_case_globals)]
pub const MiB: u64 = 1024 * KiB;
#[allow(non_upper_case_globals)]
pub const GiB: u64 = 1024 * MiB;
#[allow(non_upper_case_globals)]
pub const TiB: u64 = 1024 * GiB;

/// Part numbers are 1-based.
pub const MINIMUM_PART_NUMBER: u64 = 1;

/// Upper bound on the number of parts a single multipart transfer may consist of.
pub const MAXIMUM_NUMBER_OF_PARTS: u64 = 10_000;

/// The smallest part size a caller may request.
pub const DEFAULT_MINIMUM_PART_SIZE: u64 = 100 * KiB;

/// Objects smaller than this are not split, the caller has to use a single-shot transfer.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * KiB;

/// The smallest rung of the part-size ladder used when no part size is requested.
pub const LADDER_FIRST_RUNG: u64 = MiB;
/// The largest rung of the part-size ladder.
pub const LADDER_LAST_RUNG: u64 = 4 * GiB;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAXIMUM_ATTEMPTS: u32 = 3;

pub const S3_MAXIMUM_OBJECT_SIZE: u64 = 5 * TiB;
pub const S3_MINIMUM_PART_SIZE: u64 = 5 * MiB;
pub const S3_MAXIMUM_PART_SIZE: u64 = 5 * GiB;
