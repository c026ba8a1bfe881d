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

//! An in-memory storage service for tests.

use crate::{
    error::TransportError,
    transport::{
        CompleteRequest,
        InitiateRequest,
        ObjectInfo,
        RangeRequest,
        RangeResponse,
        Response,
        Transport,
        UploadPartRequest,
        ETAG_HEADER,
    },
};
use async_trait::async_trait;
use std::{
    collections::{
        BTreeMap,
        HashMap,
        VecDeque,
    },
    io::Cursor,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::io::AsyncReadExt;
use tokio_util::bytes::Bytes;

#[derive(Default)]
pub(crate) struct State {
    pub(crate) objects: HashMap<String, Bytes>,
    pub(crate) uploads: HashMap<String, BTreeMap<u64, Bytes>>,
    pub(crate) next_transaction: u64,
    pub(crate) initiated: usize,
    pub(crate) initiate_calls: Vec<InitiateRequest>,
    pub(crate) part_calls: Vec<u64>,
    pub(crate) range_calls: Vec<u64>,
    pub(crate) complete_calls: Vec<CompleteRequest>,
    pub(crate) aborted: Vec<String>,
    pub(crate) part_failures: HashMap<u64, VecDeque<TransportError>>,
    pub(crate) range_failures: HashMap<u64, VecDeque<TransportError>>,
    pub(crate) omit_part_etag: bool,
    pub(crate) reject_complete: Option<TransportError>,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<State>>,
}

pub(crate) fn object_etag(bytes: &[u8]) -> String {
    format!("\"object-{}\"", bytes.len())
}

impl MockTransport {
    pub(crate) fn with_object(self, name: &str, bytes: impl Into<Bytes>) -> Self {
        self.state().objects.insert(name.to_owned(), bytes.into());
        self
    }

    pub(crate) fn failing_part(self, part_number: u64, errors: impl IntoIterator<Item = TransportError>) -> Self {
        self.state()
            .part_failures
            .insert(part_number, errors.into_iter().collect());
        self
    }

    pub(crate) fn failing_range(self, start: u64, errors: impl IntoIterator<Item = TransportError>) -> Self {
        self.state()
            .range_failures
            .insert(start, errors.into_iter().collect());
        self
    }

    pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn object(&self, name: &str) -> Option<Bytes> {
        self.state().objects.get(name).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn initiate(&self, request: InitiateRequest) -> Result<String, TransportError> {
        let mut state = self.state();
        state.next_transaction += 1;
        state.initiated += 1;
        state.initiate_calls.push(request);
        let transaction_id = format!("transaction-{}", state.next_transaction);
        state.uploads.insert(transaction_id.clone(), BTreeMap::new());
        Ok(transaction_id)
    }

    async fn upload_part(&self, mut request: UploadPartRequest) -> Result<Response, TransportError> {
        let failure = {
            let mut state = self.state();
            state.part_calls.push(request.part_number);
            state
                .part_failures
                .get_mut(&request.part_number)
                .and_then(VecDeque::pop_front)
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let mut body = vec![];
        request
            .body
            .read_to_end(&mut body)
            .await
            .map_err(|err| TransportError::connection(err.to_string()))?;
        if body.len() as u64 != request.content_length {
            return Err(TransportError::status(400, "content length mismatch"));
        }

        let mut state = self.state();
        let omit_etag = state.omit_part_etag;
        let parts = state
            .uploads
            .get_mut(&request.transaction_id)
            .ok_or_else(|| TransportError::status(404, "no such upload"))?;
        parts.insert(request.part_number, Bytes::from(body));

        let response = Response::new(200);
        if omit_etag {
            return Ok(response);
        }
        Ok(response.with_header(
            ETAG_HEADER,
            format!("\"{}-{}\"", request.transaction_id, request.part_number),
        ))
    }

    async fn complete(&self, request: CompleteRequest) -> Result<Response, TransportError> {
        let mut state = self.state();
        state.complete_calls.push(request.clone());
        if let Some(error) = state.reject_complete.clone() {
            return Err(error);
        }

        let parts = state
            .uploads
            .remove(&request.transaction_id)
            .ok_or_else(|| TransportError::status(404, "no such upload"))?;
        let mut object = vec![];
        for part in &request.parts {
            let expected = format!("\"{}-{}\"", request.transaction_id, part.part_number);
            if part.integrity_token != expected {
                return Err(TransportError::status(400, "invalid part"));
            }
            let bytes = parts
                .get(&part.part_number)
                .ok_or_else(|| TransportError::status(400, "invalid part"))?;
            object.extend_from_slice(bytes);
        }

        let etag = object_etag(&object);
        state.objects.insert(request.name.clone(), Bytes::from(object));
        let response = Response::new(200).with_header(ETAG_HEADER, etag);
        Ok(match request.callback {
            Some(callback) => response.with_body(format!("{{\"callback\":\"{}\"}}", callback)),
            None => response,
        })
    }

    async fn abort(&self, _name: &str, transaction_id: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        state.uploads.remove(transaction_id);
        state.aborted.push(transaction_id.to_owned());
        Ok(())
    }

    async fn stat(&self, name: &str) -> Result<ObjectInfo, TransportError> {
        let object = self
            .object(name)
            .ok_or_else(|| TransportError::status(404, "no such key"))?;
        Ok(ObjectInfo {
            size: object.len() as u64,
            etag: Some(object_etag(&object)),
        })
    }

    async fn get_range(&self, request: RangeRequest) -> Result<RangeResponse, TransportError> {
        let failure = {
            let mut state = self.state();
            state.range_calls.push(request.start);
            state
                .range_failures
                .get_mut(&request.start)
                .and_then(VecDeque::pop_front)
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let object = self
            .object(&request.name)
            .ok_or_else(|| TransportError::status(404, "no such key"))?;
        let etag = object_etag(&object);
        if request.if_match.as_deref().is_some_and(|if_match| if_match != etag) {
            return Err(TransportError::status(412, "precondition failed"));
        }
        let end = request.end.min(object.len() as u64);
        Ok(RangeResponse {
            status: 206,
            headers: [(ETAG_HEADER.to_owned(), etag)].into_iter().collect(),
            body: Box::pin(Cursor::new(
                object.slice(request.start as usize..end as usize),
            )),
        })
    }
}
