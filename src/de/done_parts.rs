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

//! (De)serializes the acknowledged parts of a checkpoint as a list ordered by part number, rather
//! than as a map keyed by a stringified part number.

use crate::checkpoint::DonePart;
use serde::{
    de::Error,
    Deserialize,
    Deserializer,
    Serializer,
};
use std::collections::BTreeMap;

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<u64, DonePart>, D::Error>
where
    D: Deserializer<'de>,
{
    let parts: Vec<DonePart> = Vec::deserialize(deserializer)?;
    let mut done_parts = BTreeMap::new();
    for part in parts {
        if done_parts.insert(part.part_number, part.clone()).is_some() {
            return Err(D::Error::custom(format!(
                "part {} is listed more than once",
                part.part_number,
            )));
        }
    }
    Ok(done_parts)
}

pub(crate) fn serialize<S>(parts: &BTreeMap<u64, DonePart>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(parts.values())
}
