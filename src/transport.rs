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

//! The narrow interface the engine uses to talk to the storage service.
//!
//! Implementations perform one authenticated exchange per call and must not retry on their own;
//! retrying part transfers is the scheduler's job.

use crate::{
    checkpoint::DonePart,
    error::TransportError,
    io::{
        BodyReader,
        PartReader,
    },
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::bytes::Bytes;

/// Header carrying the per-part (or per-object) integrity token.
pub const ETAG_HEADER: &str = "etag";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    /// Header names are lower-case.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header(ETAG_HEADER)
    }
}

/// The response to a ranged read, with the body left as a stream.
pub struct RangeResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: BodyReader,
}

impl RangeResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header(ETAG_HEADER)
    }
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(&name.to_ascii_lowercase())
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

pub struct UploadPartRequest {
    pub name: String,
    pub transaction_id: String,
    pub part_number: u64,
    pub content_length: u64,
    pub body: PartReader,
}

impl std::fmt::Debug for UploadPartRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPartRequest")
            .field("name", &self.name)
            .field("transaction_id", &self.transaction_id)
            .field("part_number", &self.part_number)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Requests the bytes `start..end` of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub name: String,
    pub start: u64,
    pub end: u64,
    /// Only serve the range if the object still has this entity tag.
    pub if_match: Option<String>,
}

impl RangeRequest {
    /// The value of an HTTP `Range` header for this request. HTTP ranges are inclusive.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Starts a multipart upload of the object `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitiateRequest {
    pub name: String,
    /// The media type the assembled object is served with.
    pub content_type: Option<String>,
    /// User-defined metadata stored with the assembled object.
    pub metadata: HashMap<String, String>,
}

impl InitiateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteRequest {
    pub name: String,
    pub transaction_id: String,
    /// Ascending by part number.
    pub parts: Vec<DonePart>,
    /// Opaque callback configuration forwarded to the service, if any.
    pub callback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub etag: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts a multipart upload and returns its transaction id.
    async fn initiate(&self, request: InitiateRequest) -> Result<String, TransportError>;

    async fn upload_part(&self, request: UploadPartRequest) -> Result<Response, TransportError>;

    async fn complete(&self, request: CompleteRequest) -> Result<Response, TransportError>;

    async fn abort(&self, name: &str, transaction_id: &str) -> Result<(), TransportError>;

    async fn stat(&self, name: &str) -> Result<ObjectInfo, TransportError>;

    async fn get_range(&self, request: RangeRequest) -> Result<RangeResponse, TransportError>;
}
