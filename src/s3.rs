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

//! A [`Transport`] for Amazon S3 and S3-compatible services.

use crate::{
    compat::ByteStreamExt,
    error::{
        TransportError,
        TransportErrorKind,
    },
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
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{
        http::HttpResponse,
        retry::RetryConfig,
    },
    error::{
        DisplayErrorContext,
        SdkError,
    },
    primitives::ByteStream,
    types::{
        CompletedMultipartUpload,
        CompletedPart,
    },
};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct S3Transport {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Transport {
    /// Wraps `client`, with the SDK's own retries turned off. Failed parts are retried by the
    /// transfer engine, which also keeps the checkpoint up to date while doing so.
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        let config = client
            .config()
            .to_builder()
            .retry_config(RetryConfig::disabled())
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: bucket.into(),
        }
    }

    /// Discovers credentials and region the way most AWS SDKs do, e.g. through `AWS_PROFILE`.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::v2024_03_28())
            .retry_config(RetryConfig::disabled())
            .load()
            .await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn transport_error<E>(err: SdkError<E, HttpResponse>) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) => TransportErrorKind::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => TransportErrorKind::Timeout,
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => TransportErrorKind::Connection,
        SdkError::ServiceError(context) => TransportErrorKind::Status(context.raw().status().as_u16()),
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, DisplayErrorContext(&err).to_string())
}

fn part_number(part_number: u64) -> Result<i32, TransportError> {
    i32::try_from(part_number).map_err(|_| {
        TransportError::new(
            TransportErrorKind::Other,
            format!("part number {} is out of range for S3", part_number),
        )
    })
}

fn with_etag(mut response: Response, e_tag: Option<&str>) -> Response {
    if let Some(e_tag) = e_tag {
        response = response.with_header(ETAG_HEADER, e_tag);
    }
    response
}

#[async_trait]
impl Transport for S3Transport {
    async fn initiate(&self, request: InitiateRequest) -> Result<String, TransportError> {
        let metadata = (!request.metadata.is_empty()).then_some(request.metadata);
        let multipart_upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&request.name)
            .set_content_type(request.content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(transport_error)?;
        multipart_upload.upload_id.ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::Other,
                "creating the multipart upload probably failed, because no upload ID was returned",
            )
        })
    }

    async fn upload_part(&self, request: UploadPartRequest) -> Result<Response, TransportError> {
        let content_length = i64::try_from(request.content_length).map_err(|_| {
            TransportError::new(TransportErrorKind::Other, "part is too large for S3")
        })?;
        let uploaded_part = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&request.name)
            .upload_id(&request.transaction_id)
            .part_number(part_number(request.part_number)?)
            .content_length(content_length)
            .body(ByteStream::from_part_reader(request.body))
            .send()
            .await
            .map_err(transport_error)?;
        Ok(with_etag(Response::new(200), uploaded_part.e_tag()))
    }

    async fn complete(&self, request: CompleteRequest) -> Result<Response, TransportError> {
        if request.callback.is_some() {
            debug!("S3 doesn't support completion callbacks, ignoring the callback");
        }
        let parts = request
            .parts
            .iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .e_tag(&part.integrity_token)
                    .part_number(part_number(part.part_number)?)
                    .build())
            })
            .collect::<Result<Vec<_>, TransportError>>()?;

        let completed_multipart_upload = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&request.name)
            .upload_id(&request.transaction_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(transport_error)?;
        Ok(with_etag(
            Response::new(200),
            completed_multipart_upload.e_tag(),
        ))
    }

    async fn abort(&self, name: &str, transaction_id: &str) -> Result<(), TransportError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(name)
            .upload_id(transaction_id)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn stat(&self, name: &str) -> Result<ObjectInfo, TransportError> {
        let object = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(transport_error)?;
        let size = object
            .content_length()
            .and_then(|size| u64::try_from(size).ok())
            .ok_or_else(|| {
                TransportError::new(TransportErrorKind::Other, "object size is required")
            })?;
        Ok(ObjectInfo {
            size,
            etag: object.e_tag().map(ToOwned::to_owned),
        })
    }

    async fn get_range(&self, request: RangeRequest) -> Result<RangeResponse, TransportError> {
        debug!("Retrieving range {} from S3", request.range_header());
        let get_part = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&request.name)
            .range(request.range_header())
            .set_if_match(request.if_match.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let mut headers = HashMap::new();
        if let Some(e_tag) = get_part.e_tag() {
            headers.insert(ETAG_HEADER.to_owned(), e_tag.to_owned());
        }
        Ok(RangeResponse {
            status: 206,
            headers,
            body: get_part.body.into_body_reader(),
        })
    }
}
